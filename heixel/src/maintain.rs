//! Mesh integrity repairs: winding, compaction, vertex merging and cutting.

use glam::DVec2;
use tracing::info;

use crate::geometry::{segments_intersect, signed_area2};
use crate::tin::TriMesh;

/// Number of X bins used by [`TriMesh::merge_shared_vertices`].
pub const DEFAULT_MERGE_BINS: usize = 128;

impl TriMesh {
    /// Make every triangle counter-clockwise (up-facing).
    ///
    /// Triangles with a negative signed area get their 2nd and 3rd corners
    /// swapped. Returns the number of triangles flipped.
    pub fn cleanup_winding(&mut self) -> usize {
        let mut flipped = 0;
        for i in 0..self.triangles.len() {
            let [a, b, c] = self.corners(&self.triangles[i]);
            if signed_area2(a, b, c) < 0.0 {
                self.triangles[i].vertices.swap(1, 2);
                flipped += 1;
            }
        }
        if flipped > 0 {
            for v in &mut self.vertices {
                v.normal = None;
            }
        }
        flipped
    }

    /// Remove vertices not referenced by any triangle.
    ///
    /// Returns the number of vertices removed.
    pub fn remove_unused_vertices(&mut self) -> usize {
        let mut used = vec![false; self.vertices.len()];
        for tri in &self.triangles {
            for &v in &tri.vertices {
                used[v] = true;
            }
        }
        self.compact_vertices(&used)
    }

    /// Merge vertices with bit-identical positions, using
    /// [`DEFAULT_MERGE_BINS`] X bins.
    pub fn merge_shared_vertices(&mut self) -> usize {
        self.merge_shared_vertices_with_bins(DEFAULT_MERGE_BINS)
    }

    /// Merge vertices with bit-identical positions.
    ///
    /// Vertices are sorted into `bin_count` slabs along X and compared only
    /// within a slab and against the next slab. The lowest index of a group
    /// of duplicates survives; triangles are rewritten to it and the others
    /// are removed. Vertices that differ in the last bit are not merged.
    ///
    /// Returns the number of vertices removed.
    pub fn merge_shared_vertices_with_bins(&mut self, bin_count: usize) -> usize {
        let n = self.vertices.len();
        if n < 2 {
            return 0;
        }
        // More slabs than vertices cannot separate anything further.
        let bin_count = bin_count.clamp(1, n);

        let (min_x, max_x) = self
            .vertices
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v.position.x), hi.max(v.position.x))
            });
        let width = max_x - min_x;
        let slab_of = |x: f64| -> usize {
            if width > 0.0 {
                (((x - min_x) / width * bin_count as f64) as usize).min(bin_count - 1)
            } else {
                0
            }
        };

        let mut slabs: Vec<Vec<usize>> = vec![Vec::new(); bin_count];
        for (i, v) in self.vertices.iter().enumerate() {
            slabs[slab_of(v.position.x)].push(i);
        }

        let key = |p: DVec2| (p.x.to_bits(), p.y.to_bits());
        let mut replace: Vec<usize> = (0..n).collect();
        for b in 0..bin_count {
            let next: &[usize] = if b + 1 < bin_count { &slabs[b + 1] } else { &[] };
            for (k, &i) in slabs[b].iter().enumerate() {
                let pi = key(self.vertices[i].position);
                for &j in slabs[b][k + 1..].iter().chain(next) {
                    if key(self.vertices[j].position) == pi {
                        let (keep, gone) = if i < j { (i, j) } else { (j, i) };
                        replace[gone] = replace[gone].min(keep);
                    }
                }
            }
        }

        // Follow chains so every entry points at a survivor.
        for i in 0..n {
            let mut r = replace[i];
            while replace[r] != r {
                r = replace[r];
            }
            replace[i] = r;
        }

        let merged = replace.iter().enumerate().filter(|&(i, &r)| i != r).count();
        if merged == 0 {
            return 0;
        }

        for tri in &mut self.triangles {
            tri.vertices = tri.vertices.map(|v| replace[v]);
        }
        let keep: Vec<bool> = replace.iter().enumerate().map(|(i, &r)| i == r).collect();
        let removed = self.compact_vertices(&keep);
        info!(removed, bin_count, "merged shared vertices");
        removed
    }

    /// Remove every triangle with an edge crossing the segment `p1-p2`.
    ///
    /// Vertices left unused are removed and the extents recomputed. Returns
    /// the number of triangles removed.
    pub fn remove_triangles_by_segment(&mut self, p1: DVec2, p2: DVec2) -> usize {
        let doomed: Vec<usize> = self
            .triangles
            .iter()
            .enumerate()
            .filter(|(_, tri)| {
                let [a, b, c] = self.corners(tri);
                segments_intersect(a, b, p1, p2)
                    || segments_intersect(b, c, p1, p2)
                    || segments_intersect(c, a, p1, p2)
            })
            .map(|(i, _)| i)
            .collect();

        let removed = self.remove_triangles(&doomed);
        if removed > 0 {
            self.remove_unused_vertices();
            self.compute_extents();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn v(x: f64, y: f64) -> DVec2 {
        DVec2::new(x, y)
    }

    /// Two disjoint triangles that each carry their own copy of (1, 0).
    fn duplicated_corner() -> TriMesh {
        let mut tin = TriMesh::new();
        tin.add_vertex(v(0.0, 0.0), 1.0);
        tin.add_vertex(v(1.0, 0.0), 2.0);
        tin.add_vertex(v(0.0, 1.0), 3.0);
        tin.add_vertex(v(1.0, 0.0), 2.0);
        tin.add_vertex(v(2.0, 0.0), 4.0);
        tin.add_vertex(v(2.0, 1.0), 5.0);
        tin.add_triangle([0, 1, 2]).unwrap();
        tin.add_triangle([3, 4, 5]).unwrap();
        tin
    }

    /// 3×3 vertex lattice with mixed winding and an orphan vertex.
    fn mixed_winding() -> TriMesh {
        let mut tin = TriMesh::new();
        for row in 0..3 {
            for col in 0..3 {
                tin.add_vertex(v(col as f64, row as f64), (col * row) as f32);
            }
        }
        tin.add_vertex(v(9.0, 9.0), 0.0);
        for row in 0..2 {
            for col in 0..2 {
                let a = row * 3 + col;
                if (row + col) % 2 == 0 {
                    tin.add_triangle([a, a + 1, a + 4]).unwrap();
                    tin.add_triangle([a, a + 3, a + 4]).unwrap();
                } else {
                    tin.add_triangle([a, a + 4, a + 1]).unwrap();
                    tin.add_triangle([a, a + 4, a + 3]).unwrap();
                }
            }
        }
        tin.compute_extents();
        tin
    }

    #[test]
    fn test_cleanup_winding() {
        let mut tin = mixed_winding();
        let flipped = tin.cleanup_winding();
        assert_eq!(flipped, 4);
        for tri in tin.triangles() {
            let [a, b, c] = tri.vertices.map(|i| tin.vertices()[i].position);
            assert!(signed_area2(a, b, c) >= 0.0);
        }
        // Idempotent
        assert_eq!(tin.cleanup_winding(), 0);
    }

    #[test]
    fn test_cleanup_winding_normals_point_up() {
        let mut tin = mixed_winding();
        tin.cleanup_winding();
        for i in 0..tin.triangle_count() {
            assert!(tin.triangle_normal(i).unwrap().z > 0.0);
        }
    }

    #[test]
    fn test_remove_unused_vertices() {
        let mut tin = mixed_winding();
        tin.remove_triangles(&[0, 1]);
        let referenced: HashSet<usize> = tin
            .triangles()
            .iter()
            .flat_map(|t| t.vertices)
            .collect();

        let removed = tin.remove_unused_vertices();
        assert_eq!(removed, 10 - referenced.len());
        assert_eq!(tin.vertex_count(), referenced.len());
        for tri in tin.triangles() {
            assert!(tri.vertices.iter().all(|&i| i < tin.vertex_count()));
        }
        assert_eq!(tin.remove_unused_vertices(), 0);
    }

    #[test]
    fn test_merge_duplicated_corner() {
        let mut tin = duplicated_corner();
        let removed = tin.merge_shared_vertices();
        assert_eq!(removed, 1);
        assert_eq!(tin.vertex_count(), 5);
        assert_eq!(tin.triangle_count(), 2);
        assert_eq!(tin.triangles()[0].vertices, [0, 1, 2]);
        assert_eq!(tin.triangles()[1].vertices, [1, 3, 4]);
        tin.test_consistency().unwrap();

        // Idempotent
        assert_eq!(tin.merge_shared_vertices(), 0);
        assert_eq!(tin.vertex_count(), 5);
    }

    #[test]
    fn test_merge_transitive_groups() {
        let mut tin = TriMesh::new();
        for _ in 0..4 {
            tin.add_vertex(v(0.5, 0.5), 1.0);
        }
        tin.add_vertex(v(1.0, 0.0), 0.0);
        tin.add_vertex(v(0.0, 1.0), 0.0);
        tin.add_triangle([3, 4, 5]).unwrap();
        tin.add_triangle([2, 4, 5]).unwrap();

        assert_eq!(tin.merge_shared_vertices_with_bins(1), 3);
        assert_eq!(tin.vertex_count(), 3);
        assert_eq!(tin.triangles()[0].vertices, [0, 1, 2]);
        assert_eq!(tin.triangles()[1].vertices, [0, 1, 2]);
    }

    #[test]
    fn test_merge_requires_exact_bits() {
        let mut tin = TriMesh::new();
        tin.add_vertex(v(0.1 + 0.2, 0.0), 0.0);
        tin.add_vertex(v(0.3, 0.0), 0.0);
        assert_eq!(tin.merge_shared_vertices(), 0);
        assert_eq!(tin.vertex_count(), 2);
    }

    #[test]
    fn test_merge_across_slab_boundary() {
        let mut tin = duplicated_corner();
        // Many slabs: the duplicate pair still lands in one slab.
        assert_eq!(tin.merge_shared_vertices_with_bins(1000), 1);
    }

    #[test]
    fn test_merge_with_huge_bin_count() {
        let mut tin = TriMesh::new();
        tin.add_vertex(v(2.0, 3.0), 1.0);
        tin.add_vertex(v(2.0, 3.0), 1.0);
        assert_eq!(tin.merge_shared_vertices_with_bins(usize::MAX), 1);
        assert_eq!(tin.vertex_count(), 1);

        let mut tin = duplicated_corner();
        assert_eq!(tin.merge_shared_vertices_with_bins(usize::MAX), 1);
        assert_eq!(tin.merge_shared_vertices_with_bins(0), 0);
    }

    #[test]
    fn test_remove_triangles_by_segment() {
        let mut tin = mixed_winding();
        tin.cleanup_winding();
        // Vertical cut through the left column of cells.
        let removed = tin.remove_triangles_by_segment(v(0.5, -1.0), v(0.5, 3.0));
        assert_eq!(removed, 4);
        assert_eq!(tin.triangle_count(), 4);
        // Column x=0 vertices and the orphan are gone.
        assert_eq!(tin.vertex_count(), 6);
        assert_eq!(tin.extent().left, 1.0);
        tin.test_consistency().unwrap();
    }

    #[test]
    fn test_remove_triangles_by_segment_miss() {
        let mut tin = mixed_winding();
        assert_eq!(tin.remove_triangles_by_segment(v(5.0, 5.0), v(6.0, 6.0)), 0);
        assert_eq!(tin.vertex_count(), 10);
    }
}
