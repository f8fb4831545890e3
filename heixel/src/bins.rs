//! Uniform spatial bins over a mesh.
//!
//! A [`SpatialBinIndex`] divides a mesh's extent into `cols × rows` equal
//! bins. Each bin lists the indices of the entities overlapping it: triangles
//! (every bin touched by the triangle's bounding box) or vertices (the single
//! bin containing the vertex). The index never owns or copies the entities;
//! it is tied to the mesh revision it was built from and must be rebuilt after
//! any topology change.

use glam::DVec2;

use crate::error::{try_alloc, Result, TerrainError};
use crate::geometry::Extent;
use crate::tin::TriMesh;

/// What the entries of a [`SpatialBinIndex`] refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinContent {
    Triangles,
    Vertices,
}

/// Uniform 2D grid of bins listing overlapping triangle or vertex indices.
#[derive(Debug, Clone)]
pub struct SpatialBinIndex {
    extent: Extent,
    cols: usize,
    rows: usize,
    bin_size: DVec2,
    bins: Vec<Vec<u32>>,
    content: BinContent,
    revision: u64,
}

impl SpatialBinIndex {
    fn empty_for(mesh: &TriMesh, bins_per_axis: usize, content: BinContent) -> Result<Self> {
        if bins_per_axis == 0 {
            return Err(TerrainError::UnsupportedGeometry(
                "bin index needs at least one bin per axis".into(),
            ));
        }
        if mesh.is_empty() {
            return Err(TerrainError::UnsupportedGeometry(
                "cannot index an empty mesh".into(),
            ));
        }
        if mesh.vertex_count() > u32::MAX as usize || mesh.triangle_count() > u32::MAX as usize {
            return Err(TerrainError::UnsupportedGeometry(
                "mesh too large for a bin index".into(),
            ));
        }
        let count = bins_per_axis
            .checked_mul(bins_per_axis)
            .ok_or(TerrainError::AllocationFailure { bytes: usize::MAX })?;

        // Always derived from the vertices, never from a possibly stale cached extent.
        let extent = Extent::from_points(mesh.vertices().iter().map(|v| v.position));
        Ok(Self {
            extent,
            cols: bins_per_axis,
            rows: bins_per_axis,
            bin_size: DVec2::new(
                extent.width() / bins_per_axis as f64,
                extent.height() / bins_per_axis as f64,
            ),
            bins: try_alloc(count, Vec::new())?,
            content,
            revision: mesh.revision(),
        })
    }

    /// Index the triangles of `mesh` in `bins_per_axis × bins_per_axis` bins.
    ///
    /// # Errors
    ///
    /// - [`TerrainError::UnsupportedGeometry`] for zero bins or an empty mesh
    /// - [`TerrainError::AllocationFailure`] if the bins cannot be allocated
    pub fn build_triangles(mesh: &TriMesh, bins_per_axis: usize) -> Result<Self> {
        let mut index = Self::empty_for(mesh, bins_per_axis, BinContent::Triangles)?;
        for (i, tri) in mesh.triangles().iter().enumerate() {
            let bounds = Extent::from_points(mesh.corners(tri));
            let (c0, r0) = index.clamped_bin(DVec2::new(bounds.left, bounds.bottom));
            let (c1, r1) = index.clamped_bin(DVec2::new(bounds.right, bounds.top));
            for r in r0..=r1 {
                for c in c0..=c1 {
                    index.bins[r * index.cols + c].push(i as u32);
                }
            }
        }
        Ok(index)
    }

    /// Index the vertices of `mesh` in `bins_per_axis × bins_per_axis` bins.
    pub fn build_vertices(mesh: &TriMesh, bins_per_axis: usize) -> Result<Self> {
        let mut index = Self::empty_for(mesh, bins_per_axis, BinContent::Vertices)?;
        for (i, vertex) in mesh.vertices().iter().enumerate() {
            let (c, r) = index.clamped_bin(vertex.position);
            index.bins[r * index.cols + c].push(i as u32);
        }
        Ok(index)
    }

    fn axis_bin(v: f64, origin: f64, size: f64, count: usize) -> usize {
        if size <= 0.0 {
            return 0;
        }
        let b = ((v - origin) / size).floor();
        if b <= 0.0 {
            0
        } else {
            (b as usize).min(count - 1)
        }
    }

    /// Bin coordinates of `p`, clamped onto the grid.
    fn clamped_bin(&self, p: DVec2) -> (usize, usize) {
        (
            Self::axis_bin(p.x, self.extent.left, self.bin_size.x, self.cols),
            Self::axis_bin(p.y, self.extent.bottom, self.bin_size.y, self.rows),
        )
    }

    /// Linear bin index of `p`, or `None` outside the indexed extent.
    pub fn bin_of(&self, p: DVec2) -> Option<usize> {
        if !self.extent.contains(p) {
            return None;
        }
        let (c, r) = self.clamped_bin(p);
        Some(r * self.cols + c)
    }

    /// Entities listed in the bin containing `p`; empty outside the extent.
    pub fn entries(&self, p: DVec2) -> &[u32] {
        match self.bin_of(p) {
            Some(b) => &self.bins[b],
            None => &[],
        }
    }

    /// Entities listed in bin `(col, row)`.
    pub fn bin(&self, col: usize, row: usize) -> Option<&[u32]> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        Some(&self.bins[row * self.cols + col])
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn content(&self) -> BinContent {
        self.content
    }

    /// Total number of entries over all bins, counting duplicates.
    pub fn entry_count(&self) -> usize {
        self.bins.iter().map(Vec::len).sum()
    }

    /// Returns true if `mesh` has not changed since this index was built.
    pub fn is_current(&self, mesh: &TriMesh) -> bool {
        self.revision == mesh.revision()
    }

    /// Index of the vertex closest to `p`, searching rings of bins outwards.
    ///
    /// # Errors
    ///
    /// - [`TerrainError::IndexNotReady`] if the mesh changed since the index
    ///   was built
    /// - [`TerrainError::UnsupportedGeometry`] if this is a triangle index
    pub fn nearest_vertex(&self, mesh: &TriMesh, p: DVec2) -> Result<Option<usize>> {
        if !self.is_current(mesh) {
            return Err(TerrainError::IndexNotReady);
        }
        if self.content != BinContent::Vertices {
            return Err(TerrainError::UnsupportedGeometry(
                "nearest vertex needs a vertex bin index".into(),
            ));
        }

        let (cc, cr) = self.clamped_bin(p);
        let min_bin = self.bin_size.x.min(self.bin_size.y);
        let max_ring = self.cols.max(self.rows);
        let mut best: Option<(usize, f64)> = None;

        for ring in 0..=max_ring {
            let ring_i = ring as isize;
            for dr in -ring_i..=ring_i {
                for dc in -ring_i..=ring_i {
                    if dr.abs() != ring_i && dc.abs() != ring_i {
                        continue;
                    }
                    let c = cc as isize + dc;
                    let r = cr as isize + dr;
                    if c < 0 || r < 0 || c >= self.cols as isize || r >= self.rows as isize {
                        continue;
                    }
                    for &v in &self.bins[r as usize * self.cols + c as usize] {
                        let d = mesh.vertices()[v as usize].position.distance_squared(p);
                        if best.map_or(true, |(_, bd)| d < bd) {
                            best = Some((v as usize, d));
                        }
                    }
                }
            }
            // Anything in a further ring is at least `ring` bins away.
            if let Some((_, d)) = best {
                let reach = ring as f64 * min_bin;
                if d <= reach * reach {
                    break;
                }
            }
        }

        Ok(best.map(|(v, _)| v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64, y: f64) -> DVec2 {
        DVec2::new(x, y)
    }

    /// 4×4 vertex lattice over [0,3]² triangulated into 18 triangles.
    fn lattice() -> TriMesh {
        let mut tin = TriMesh::new();
        for row in 0..4 {
            for col in 0..4 {
                tin.add_vertex(v(col as f64, row as f64), (col + row) as f32);
            }
        }
        for row in 0..3 {
            for col in 0..3 {
                let a = row * 4 + col;
                tin.add_triangle([a, a + 1, a + 5]).unwrap();
                tin.add_triangle([a, a + 5, a + 4]).unwrap();
            }
        }
        tin.compute_extents();
        tin
    }

    #[test]
    fn test_triangles_listed_in_every_overlapped_bin() {
        let tin = lattice();
        let index = SpatialBinIndex::build_triangles(&tin, 3).unwrap();
        assert_eq!(index.content(), BinContent::Triangles);

        // The bin of each corner lists the triangle, so vertex queries never
        // miss their own triangles.
        for (i, tri) in tin.triangles().iter().enumerate() {
            for &vtx in &tri.vertices {
                let p = tin.vertices()[vtx].position;
                assert!(index.entries(p).contains(&(i as u32)), "triangle {i}, vertex {vtx}");
            }
        }
        assert!(index.entry_count() >= tin.triangle_count());
        assert!(index.entries(v(1.5, 1.5)).contains(&8));
        assert!(index.entries(v(1.5, 1.5)).contains(&9));
    }

    #[test]
    fn test_outside_extent_is_empty() {
        let tin = lattice();
        let index = SpatialBinIndex::build_triangles(&tin, 4).unwrap();
        assert!(index.entries(v(-0.1, 1.0)).is_empty());
        assert!(index.bin_of(v(3.0, 3.0)).is_some());
        assert_eq!(index.bin_of(v(3.5, 3.0)), None);
    }

    #[test]
    fn test_rejects_empty_inputs() {
        assert!(SpatialBinIndex::build_triangles(&TriMesh::new(), 4).is_err());
        assert!(SpatialBinIndex::build_triangles(&lattice(), 0).is_err());
    }

    #[test]
    fn test_nearest_vertex() {
        let tin = lattice();
        let index = SpatialBinIndex::build_vertices(&tin, 2).unwrap();
        assert_eq!(index.nearest_vertex(&tin, v(0.1, 0.2)).unwrap(), Some(0));
        assert_eq!(index.nearest_vertex(&tin, v(2.9, 1.2)).unwrap(), Some(7));
        // Outside the extent still finds the closest corner.
        assert_eq!(index.nearest_vertex(&tin, v(10.0, 10.0)).unwrap(), Some(15));
    }

    #[test]
    fn test_nearest_vertex_stale_index() {
        let mut tin = lattice();
        let index = SpatialBinIndex::build_vertices(&tin, 2).unwrap();
        assert!(index.is_current(&tin));
        tin.add_vertex(v(5.0, 5.0), 0.0);
        assert!(matches!(
            index.nearest_vertex(&tin, v(0.0, 0.0)),
            Err(TerrainError::IndexNotReady)
        ));
    }

    #[test]
    fn test_nearest_vertex_needs_vertex_index() {
        let tin = lattice();
        let index = SpatialBinIndex::build_triangles(&tin, 2).unwrap();
        assert!(index.nearest_vertex(&tin, v(0.0, 0.0)).is_err());
    }

    #[test]
    fn test_degenerate_axis() {
        let mut tin = TriMesh::new();
        tin.add_vertex(v(1.0, 0.0), 0.0);
        tin.add_vertex(v(1.0, 2.0), 0.0);
        let index = SpatialBinIndex::build_vertices(&tin, 4).unwrap();
        assert_eq!(index.bin_of(v(1.0, 1.9)), Some(12));
        assert_eq!(index.nearest_vertex(&tin, v(1.0, 1.5)).unwrap(), Some(1));
    }
}
