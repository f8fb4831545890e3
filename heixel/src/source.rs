//! One height query contract over grids and meshes.

use glam::DVec2;

use crate::error::Result;
use crate::geometry::Extent;
use crate::grid::HeightGrid;
use crate::tin::TriMesh;

/// Anything that can answer "height at this point".
///
/// `Ok(None)` means the point has no elevation (outside the data or over a
/// gap); errors are reserved for queries that cannot be answered at all.
pub trait HeightSource {
    /// Elevation in meters at `p`.
    fn height_at(&self, p: DVec2) -> Result<Option<f32>>;

    /// Horizontal area covered.
    fn coverage(&self) -> Extent;

    /// Elevations at several points, in order.
    fn heights_at(&self, points: &[DVec2]) -> Result<Vec<Option<f32>>> {
        points.iter().map(|&p| self.height_at(p)).collect()
    }
}

impl HeightSource for HeightGrid {
    /// Bilinear interpolation; see [`HeightGrid::height_at_interpolated`].
    fn height_at(&self, p: DVec2) -> Result<Option<f32>> {
        Ok(self.height_at_interpolated(p).value())
    }

    fn coverage(&self) -> Extent {
        self.extent()
    }
}

impl HeightSource for TriMesh {
    /// Uses the bin index when one is built, otherwise scans every triangle.
    fn height_at(&self, p: DVec2) -> Result<Option<f32>> {
        let hit = if self.bins().is_some() {
            self.height_at_binned(p)?
        } else {
            TriMesh::height_at(self, p)
        };
        Ok(hit.map(|h| h.elevation))
    }

    fn coverage(&self) -> Extent {
        Extent::from_points(self.vertices().iter().map(|v| v.position))
    }
}

impl<T: HeightSource + ?Sized> HeightSource for &T {
    fn height_at(&self, p: DVec2) -> Result<Option<f32>> {
        (**self).height_at(p)
    }

    fn coverage(&self) -> Extent {
        (**self).coverage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{ValueMode, NODATA};

    fn plane_grid() -> HeightGrid {
        let mut grid =
            HeightGrid::allocate(3, 3, Extent::new(0.0, 2.0, 0.0, 2.0), ValueMode::Float32)
                .unwrap();
        for row in 0..3 {
            for col in 0..3 {
                grid.set_sample(col, row, (col + row) as f32).unwrap();
            }
        }
        grid.set_sample(2, 2, NODATA).unwrap();
        grid
    }

    fn plane_tin() -> TriMesh {
        let mut tin = TriMesh::new();
        tin.add_vertex(DVec2::new(0.0, 0.0), 0.0);
        tin.add_vertex(DVec2::new(2.0, 0.0), 2.0);
        tin.add_vertex(DVec2::new(0.0, 2.0), 2.0);
        tin.add_vertex(DVec2::new(2.0, 2.0), 4.0);
        tin.add_triangle([0, 1, 2]).unwrap();
        tin.add_triangle([1, 3, 2]).unwrap();
        tin
    }

    #[test]
    fn test_grid_and_tin_agree_on_a_plane() {
        let grid = plane_grid();
        let tin = plane_tin();
        let sources: [&dyn HeightSource; 2] = [&grid, &tin];
        for source in sources {
            let z = source.height_at(DVec2::new(0.5, 1.0)).unwrap().unwrap();
            assert!((z - 1.5).abs() < 1e-6);
            assert_eq!(source.height_at(DVec2::new(9.0, 9.0)).unwrap(), None);
        }
    }

    #[test]
    fn test_grid_gap_is_none() {
        let grid = plane_grid();
        assert_eq!(grid.height_at(DVec2::new(2.0, 2.0)).unwrap(), None);
    }

    #[test]
    fn test_tin_uses_bins_when_built() {
        let mut tin = plane_tin();
        tin.setup_bins(2).unwrap();
        let z = HeightSource::height_at(&tin, DVec2::new(2.0, 2.0)).unwrap();
        assert_eq!(z, Some(4.0));
        assert_eq!(tin.coverage(), Extent::new(0.0, 2.0, 0.0, 2.0));
    }

    #[test]
    fn test_heights_at() {
        let tin = plane_tin();
        let points = [DVec2::new(0.0, 0.0), DVec2::new(-1.0, 0.0)];
        assert_eq!(tin.heights_at(&points).unwrap(), vec![Some(0.0), None]);
    }
}
