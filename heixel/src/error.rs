//! Error types for the heixel library.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when building, repairing or querying terrain.
#[derive(Error, Debug)]
pub enum TerrainError {
    /// IO error when reading or writing files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A sample or vertex buffer could not be allocated.
    #[error("Allocation failure: {bytes} bytes could not be reserved")]
    AllocationFailure { bytes: usize },

    /// A grid cell, vertex or triangle index was outside the live range.
    #[error("Index out of range: {index} (valid range 0..{len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Geometry that the operation cannot work with (degenerate triangle,
    /// zero-sized grid, ...).
    #[error("Unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    /// A query that needs a spatial bin index was issued before one was built,
    /// or after a topology change invalidated it.
    #[error("Spatial bin index not ready")]
    IndexNotReady,

    /// The coordinate transform collaborator could not convert a point.
    #[error("Inconvertible coordinates: ({x}, {y})")]
    Inconvertible { x: f64, y: f64 },

    /// A persisted file did not match the expected layout.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The requested terrain file was not found.
    #[error("Terrain file not found: {path}")]
    FileNotFound { path: PathBuf },
}

/// Result type alias using [`TerrainError`].
pub type Result<T> = std::result::Result<T, TerrainError>;

/// Reserve a zero-initialised buffer without aborting on allocation failure.
pub(crate) fn try_alloc<T: Clone>(len: usize, fill: T) -> Result<Vec<T>> {
    let bytes = len
        .checked_mul(std::mem::size_of::<T>())
        .ok_or(TerrainError::AllocationFailure { bytes: usize::MAX })?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| TerrainError::AllocationFailure { bytes })?;
    buf.resize(len, fill);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TerrainError::IndexOutOfRange { index: 12, len: 9 };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("0..9"));

        let err = TerrainError::FileNotFound {
            path: PathBuf::from("valley.tin"),
        };
        assert!(err.to_string().contains("valley.tin"));

        let err = TerrainError::Inconvertible { x: 1.5, y: -2.0 };
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn test_try_alloc() {
        let buf = try_alloc(16, 0u8).unwrap();
        assert_eq!(buf.len(), 16);

        let result = try_alloc(usize::MAX, 0u64);
        assert!(matches!(
            result,
            Err(TerrainError::AllocationFailure { .. })
        ));
    }
}
