//! # heixel - Terrain Elevation Engine
//!
//! Ground elevation as either a uniform raster ([`HeightGrid`]) or a
//! triangulated irregular network ([`TriMesh`]), with one height query
//! contract over both ([`HeightSource`]).
//!
//! ## Features
//!
//! - **Grids**: 16-bit or 32-bit samples with a vertical scale, nearest and
//!   bilinear queries, and gap filling with three strategies
//! - **Meshes**: barycentric height queries, optionally accelerated by a
//!   uniform bin index, and integrity repairs (winding, duplicate vertices,
//!   unused vertices, cutting along a segment)
//! - **Files**: the persisted TIN format and SRTM `.hgt` tiles, plain or zipped
//! - **Service**: a directory-backed, LRU-cached terrain store
//!
//! ## Quick Start
//!
//! ```
//! use glam::DVec2;
//! use heixel::{fill_gaps, Extent, FillStrategy, HeightGrid, NoProgress, ValueMode, NODATA};
//!
//! let mut grid = HeightGrid::allocate(3, 3, Extent::new(0.0, 2.0, 0.0, 2.0), ValueMode::Float32)?;
//! for row in 0..3 {
//!     for col in 0..3 {
//!         grid.set_sample(col, row, 10.0)?;
//!     }
//! }
//! grid.set_sample(1, 1, NODATA)?;
//!
//! let outcome = fill_gaps(&mut grid, None, FillStrategy::Sweep, &mut NoProgress)?;
//! assert_eq!(outcome.filled(), 1);
//! assert_eq!(grid.get_sample(1, 1)?, 10.0);
//! assert_eq!(grid.height_at_interpolated(DVec2::new(0.5, 0.5)).value(), Some(10.0));
//! # Ok::<(), heixel::TerrainError>(())
//! ```
//!
//! ## Logging
//!
//! The library emits [`tracing`] events and never installs a subscriber.

pub mod bins;
pub mod crs;
pub mod error;
pub mod fill;
pub mod geometry;
pub mod grid;
pub mod hgt;
pub mod itf;
pub mod maintain;
pub mod progress;
pub mod service;
pub mod source;
pub mod tin;

pub use glam;

// Re-export main types at crate root for convenience
pub use bins::{BinContent, SpatialBinIndex};
pub use crs::{Crs, CrsTransform};
pub use error::{Result, TerrainError};
pub use fill::{fill_gaps, FillOutcome, FillStrategy};
pub use geometry::Extent;
pub use grid::{GridHeight, GridRect, HeightGrid, ValueMode, NODATA};
pub use itf::{read_tin, write_tin};
pub use progress::{NoProgress, Progress, Signal};
pub use service::{CacheStats, Terrain, TerrainService, TerrainServiceBuilder};
pub use source::HeightSource;
pub use tin::{TinHit, TinVertex, TriMesh, Triangle};
