//! Coordinate reference system handles.
//!
//! heixel does no projection math. A [`Crs`] is an opaque WKT string carried
//! alongside the data, and reprojection is delegated to a [`CrsTransform`]
//! supplied by the caller (typically a wrapper around a projection library).

use glam::DVec2;

use crate::error::Result;

/// Opaque coordinate reference system, stored as WKT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Crs {
    wkt: String,
}

impl Crs {
    pub fn from_wkt<S: Into<String>>(wkt: S) -> Self {
        Self { wkt: wkt.into() }
    }

    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    pub fn is_empty(&self) -> bool {
        self.wkt.is_empty()
    }
}

/// A point transform between two coordinate reference systems.
pub trait CrsTransform {
    /// The system points are converted into.
    fn target(&self) -> Crs;

    /// Convert one horizontal position.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TerrainError::Inconvertible`] if the point has no
    /// image in the target system.
    fn transform(&self, p: DVec2) -> Result<DVec2>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_wkt() {
        let crs = Crs::from_wkt("LOCAL_CS[\"site grid\"]");
        assert_eq!(crs.wkt(), "LOCAL_CS[\"site grid\"]");
        assert!(!crs.is_empty());
        assert!(Crs::default().is_empty());
    }
}
