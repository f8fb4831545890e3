//! Repairing and querying a persisted TIN.
//!
//! Run with: cargo run --example query_tin -- /path/to/site.tin X Y [X Y ...]

use std::env;

use glam::DVec2;
use heixel::{read_tin, TerrainError};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), TerrainError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args.len() % 2 == 0 {
        eprintln!("Usage: cargo run --example query_tin -- /path/to/site.tin X Y [X Y ...]");
        std::process::exit(1);
    }

    let mut tin = read_tin(&args[0])?;
    println!(
        "{}: {} vertices, {} triangles",
        args[0],
        tin.vertex_count(),
        tin.triangle_count()
    );

    let merged = tin.merge_shared_vertices();
    let flipped = tin.cleanup_winding();
    let unused = tin.remove_unused_vertices();
    println!(
        "Repairs: {} duplicate vertices merged, {} triangles flipped, {} unused vertices removed",
        merged, flipped, unused
    );
    tin.compute_extents();
    tin.setup_bins(64)?;

    println!("\nHeight queries:");
    println!("{:-<50}", "");
    for pair in args[1..].chunks(2) {
        let (Ok(x), Ok(y)) = (pair[0].parse::<f64>(), pair[1].parse::<f64>()) else {
            println!("({}, {}): not a coordinate", pair[0], pair[1]);
            continue;
        };
        match tin.height_at_binned(DVec2::new(x, y))? {
            Some(hit) => println!(
                "({}, {}): {:.2}m (triangle {})",
                x, y, hit.elevation, hit.triangle
            ),
            None => println!("({}, {}): outside the mesh", x, y),
        }
    }

    Ok(())
}
