//! Gap filling on an SRTM tile.
//!
//! Run with: cargo run --example fill_gaps -- /path/to/N35E138.hgt [sweep|smooth|region]
//!
//! Set `RUST_LOG=heixel=debug` to see every pass.

use std::env;

use heixel::hgt::read_hgt;
use heixel::{fill_gaps, FillStrategy, Signal, TerrainError};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), TerrainError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = env::args().skip(1);
    let path = args.next().unwrap_or_else(|| {
        eprintln!("Usage: cargo run --example fill_gaps -- TILE.hgt [sweep|smooth|region]");
        std::process::exit(1);
    });
    let strategy = match args.next().as_deref() {
        None | Some("sweep") => FillStrategy::Sweep,
        Some("smooth") => FillStrategy::Smooth,
        Some("region") => FillStrategy::RegionGrowing {
            min_radius: 1,
            max_radius: 16,
        },
        Some(other) => {
            eprintln!("Unknown strategy: {}", other);
            std::process::exit(1);
        }
    };

    let mut grid = read_hgt(&path)?;
    let voids = grid.nodata_count();
    println!("{}: {}x{} samples, {} voids", path, grid.cols(), grid.rows(), voids);
    if voids == 0 {
        return Ok(());
    }

    let mut last_percent = 0;
    let mut report = |fraction: f64| {
        let percent = (fraction * 100.0) as u32;
        if percent >= last_percent + 10 {
            println!("  {}%", percent);
            last_percent = percent;
        }
        Signal::Continue
    };

    let outcome = fill_gaps(&mut grid, None, strategy, &mut report)?;
    println!(
        "Filled {} of {} voids with {:?}, {} remain",
        outcome.filled(),
        voids,
        strategy,
        grid.nodata_count()
    );
    if let Some((min, max)) = grid.compute_height_extents() {
        println!("Elevation range: {}m to {}m", min, max);
    }

    Ok(())
}
