//! Triangulated irregular networks.
//!
//! A [`TriMesh`] is an indexed triangle mesh whose vertices carry a 2D position
//! and an elevation. Triangles are supplied from outside (an importer or a
//! triangulation library); this module only stores, queries and edits them.
//!
//! Height queries interpolate the elevations of the containing triangle's
//! corners with barycentric weights, which reproduces the triangle's plane
//! exactly. They either scan every triangle ([`TriMesh::height_at`]) or only
//! the triangles of the point's bin ([`TriMesh::height_at_binned`]) once
//! [`TriMesh::setup_bins`] has been called.

use glam::{DVec2, DVec3, Vec3};
use tracing::debug;

use crate::bins::SpatialBinIndex;
use crate::crs::{Crs, CrsTransform};
use crate::error::{Result, TerrainError};
use crate::geometry::{barycentric, Extent, POINT_EPSILON};

/// Mesh vertex: horizontal position plus elevation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TinVertex {
    pub position: DVec2,
    /// Elevation in meters.
    pub elevation: f32,
    /// Unit surface normal, once computed.
    pub normal: Option<Vec3>,
}

impl TinVertex {
    pub fn new(position: DVec2, elevation: f32) -> Self {
        Self {
            position,
            elevation,
            normal: None,
        }
    }

    /// Position and elevation as one 3D point.
    pub fn point3(&self) -> DVec3 {
        DVec3::new(self.position.x, self.position.y, self.elevation as f64)
    }
}

/// Triangle defined by three vertex indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub vertices: [usize; 3],
    /// Index into the mesh's surface type names.
    pub surface: Option<u16>,
}

impl Triangle {
    pub fn new(vertices: [usize; 3]) -> Self {
        Self {
            vertices,
            surface: None,
        }
    }

    pub fn references(&self, vertex: usize) -> bool {
        self.vertices.contains(&vertex)
    }
}

/// Result of a successful mesh height query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TinHit {
    /// Interpolated elevation in meters.
    pub elevation: f32,
    /// Index of the triangle containing the point.
    pub triangle: usize,
}

/// Indexed triangle mesh of elevation samples.
///
/// # Example
///
/// ```
/// use heixel::TriMesh;
/// use glam::DVec2;
///
/// let mut tin = TriMesh::new();
/// let a = tin.add_vertex(DVec2::new(0.0, 0.0), 0.0);
/// let b = tin.add_vertex(DVec2::new(1.0, 0.0), 0.0);
/// let c = tin.add_vertex(DVec2::new(0.0, 1.0), 5.0);
/// tin.add_triangle([a, b, c])?;
///
/// let hit = tin.height_at(DVec2::new(0.0, 0.5)).unwrap();
/// assert_eq!(hit.elevation, 2.5);
/// # Ok::<(), heixel::TerrainError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct TriMesh {
    pub(crate) vertices: Vec<TinVertex>,
    pub(crate) triangles: Vec<Triangle>,
    surface_types: Vec<String>,
    extent: Extent,
    height_range: Option<(f32, f32)>,
    crs: Option<Crs>,
    bins: Option<SpatialBinIndex>,
    /// Bumped on every change that invalidates a spatial index.
    revision: u64,
}

impl TriMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(vertex_count: usize, triangle_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            triangles: Vec::with_capacity(triangle_count),
            ..Self::default()
        }
    }

    /// Add a vertex and return its index.
    pub fn add_vertex(&mut self, position: DVec2, elevation: f32) -> usize {
        let index = self.vertices.len();
        self.vertices.push(TinVertex::new(position, elevation));
        self.touch();
        index
    }

    /// Add a triangle and return its index.
    ///
    /// # Errors
    ///
    /// [`TerrainError::IndexOutOfRange`] if a corner does not reference an
    /// existing vertex.
    pub fn add_triangle(&mut self, vertices: [usize; 3]) -> Result<usize> {
        self.add_triangle_with_surface(vertices, None)
    }

    /// Add a triangle tagged with a surface type.
    pub fn add_triangle_with_surface(
        &mut self,
        vertices: [usize; 3],
        surface: Option<u16>,
    ) -> Result<usize> {
        if let Some(&bad) = vertices.iter().find(|&&v| v >= self.vertices.len()) {
            return Err(TerrainError::IndexOutOfRange {
                index: bad,
                len: self.vertices.len(),
            });
        }
        let index = self.triangles.len();
        self.triangles.push(Triangle { vertices, surface });
        self.touch();
        Ok(index)
    }

    /// Register a surface type name and return its index.
    pub fn add_surface_type<S: Into<String>>(&mut self, name: S) -> u16 {
        self.surface_types.push(name.into());
        (self.surface_types.len() - 1) as u16
    }

    pub fn surface_types(&self) -> &[String] {
        &self.surface_types
    }

    /// Name of a triangle's surface type, if tagged.
    pub fn surface_of(&self, triangle: usize) -> Option<&str> {
        let surface = self.triangles.get(triangle)?.surface?;
        self.surface_types.get(surface as usize).map(String::as_str)
    }

    pub fn vertices(&self) -> &[TinVertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Extent computed by the last [`Self::compute_extents`].
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Elevation range computed by the last [`Self::compute_extents`].
    pub fn height_range(&self) -> Option<(f32, f32)> {
        self.height_range
    }

    pub(crate) fn set_extents(&mut self, extent: Extent, height_range: Option<(f32, f32)>) {
        self.extent = extent;
        self.height_range = height_range;
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    pub fn set_crs(&mut self, crs: Option<Crs>) {
        self.crs = crs;
    }

    /// Revision counter; changes whenever positions or topology change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Record a change that invalidates spatial indices.
    pub(crate) fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
        self.bins = None;
    }

    /// Recompute the horizontal extent and elevation range from the vertices.
    pub fn compute_extents(&mut self) {
        self.extent = Extent::from_points(self.vertices.iter().map(|v| v.position));
        self.height_range = self.vertices.iter().fold(None, |range, v| {
            Some(match range {
                Some((lo, hi)) => (v.elevation.min(lo), v.elevation.max(hi)),
                None => (v.elevation, v.elevation),
            })
        });
    }

    /// Corner positions of a triangle.
    pub(crate) fn corners(&self, tri: &Triangle) -> [DVec2; 3] {
        tri.vertices.map(|v| self.vertices[v].position)
    }

    /// Interpolated elevation of `p` inside triangle `index`, if it contains `p`.
    fn height_in_triangle(&self, index: usize, p: DVec2) -> Option<TinHit> {
        let tri = &self.triangles[index];
        let [a, b, c] = self.corners(tri);
        let w = barycentric(p, a, b, c)?;
        if w.iter().any(|&x| x < -POINT_EPSILON) {
            return None;
        }
        let z: f64 = tri
            .vertices
            .iter()
            .zip(w)
            .map(|(&v, weight)| self.vertices[v].elevation as f64 * weight)
            .sum();
        Some(TinHit {
            elevation: z as f32,
            triangle: index,
        })
    }

    /// Elevation at `p`, testing every triangle in order.
    ///
    /// A point on an edge shared by two triangles may be reported in either.
    pub fn height_at(&self, p: DVec2) -> Option<TinHit> {
        (0..self.triangles.len()).find_map(|i| self.height_in_triangle(i, p))
    }

    /// Elevation at `p`, testing only the triangles of `p`'s bin.
    ///
    /// # Errors
    ///
    /// [`TerrainError::IndexNotReady`] if [`Self::setup_bins`] has not been
    /// called since the last topology change.
    pub fn height_at_binned(&self, p: DVec2) -> Result<Option<TinHit>> {
        let bins = self.bins.as_ref().ok_or(TerrainError::IndexNotReady)?;
        Ok(bins
            .entries(p)
            .iter()
            .find_map(|&i| self.height_in_triangle(i as usize, p)))
    }

    /// Build and keep a triangle bin index with `bins_per_axis²` bins.
    pub fn setup_bins(&mut self, bins_per_axis: usize) -> Result<()> {
        let index = SpatialBinIndex::build_triangles(self, bins_per_axis)?;
        debug!(
            bins_per_axis,
            entries = index.entry_count(),
            "built triangle bins"
        );
        self.bins = Some(index);
        Ok(())
    }

    /// The triangle bin index, if one is current.
    pub fn bins(&self) -> Option<&SpatialBinIndex> {
        self.bins.as_ref()
    }

    /// Drop the triangle bin index.
    pub fn free_bins(&mut self) {
        self.bins = None;
    }

    /// Unit normal of triangle `index`, pointing up for counter-clockwise
    /// triangles.
    ///
    /// # Errors
    ///
    /// - [`TerrainError::IndexOutOfRange`] for a bad triangle index
    /// - [`TerrainError::UnsupportedGeometry`] for a degenerate triangle
    pub fn triangle_normal(&self, index: usize) -> Result<DVec3> {
        let tri = self
            .triangles
            .get(index)
            .ok_or(TerrainError::IndexOutOfRange {
                index,
                len: self.triangles.len(),
            })?;
        let [a, b, c] = tri.vertices.map(|v| self.vertices[v].point3());
        let n = (b - a).cross(c - a);
        let len = n.length();
        if len == 0.0 {
            return Err(TerrainError::UnsupportedGeometry(format!(
                "triangle {index} is degenerate"
            )));
        }
        Ok(n / len)
    }

    /// Set every vertex normal to the area-weighted mean of its triangles'
    /// normals. Vertices without triangles get no normal.
    pub fn compute_vertex_normals(&mut self) {
        let mut sums = vec![DVec3::ZERO; self.vertices.len()];
        for tri in &self.triangles {
            let [a, b, c] = tri.vertices.map(|v| self.vertices[v].point3());
            // Unnormalised cross product weights by area.
            let n = (b - a).cross(c - a);
            for &v in &tri.vertices {
                sums[v] += n;
            }
        }
        for (vertex, sum) in self.vertices.iter_mut().zip(sums) {
            vertex.normal = sum.try_normalize().map(|n| n.as_vec3());
        }
    }

    /// Total horizontal area of all triangles.
    pub fn area_2d(&self) -> f64 {
        self.triangles
            .iter()
            .map(|tri| {
                let [a, b, c] = self.corners(tri);
                crate::geometry::signed_area2(a, b, c).abs() * 0.5
            })
            .sum()
    }

    /// Total surface area of all triangles.
    pub fn area_3d(&self) -> f64 {
        self.triangles
            .iter()
            .map(|tri| {
                let [a, b, c] = tri.vertices.map(|v| self.vertices[v].point3());
                (b - a).cross(c - a).length() * 0.5
            })
            .sum()
    }

    /// Longest horizontal edge of any triangle.
    pub fn max_edge_length(&self) -> f64 {
        self.triangles
            .iter()
            .flat_map(|tri| {
                let [a, b, c] = self.corners(tri);
                [a.distance(b), b.distance(c), c.distance(a)]
            })
            .fold(0.0, f64::max)
    }

    /// Multiply every elevation by `factor`.
    pub fn scale_heights(&mut self, factor: f32) {
        for v in &mut self.vertices {
            v.elevation *= factor;
            v.normal = None;
        }
        self.compute_extents();
    }

    /// Add `delta` meters to every elevation.
    pub fn offset_heights(&mut self, delta: f32) {
        for v in &mut self.vertices {
            v.elevation += delta;
        }
        if let Some((lo, hi)) = self.height_range {
            self.height_range = Some((lo + delta, hi + delta));
        }
    }

    /// Append all vertices and triangles of `other`.
    ///
    /// Surface types are appended too and `other`'s triangles are retagged.
    /// Shared vertices are not merged; see [`Self::merge_shared_vertices`].
    pub fn append(&mut self, other: &TriMesh) {
        let vertex_offset = self.vertices.len();
        let surface_offset = self.surface_types.len() as u16;
        self.vertices.extend_from_slice(&other.vertices);
        self.surface_types.extend(other.surface_types.iter().cloned());
        self.triangles
            .extend(other.triangles.iter().map(|tri| Triangle {
                vertices: tri.vertices.map(|v| v + vertex_offset),
                surface: tri.surface.map(|s| s + surface_offset),
            }));
        self.touch();
        self.compute_extents();
    }

    /// Check that every triangle references a live vertex.
    pub fn test_consistency(&self) -> Result<()> {
        let len = self.vertices.len();
        for tri in &self.triangles {
            if let Some(&index) = tri.vertices.iter().find(|&&v| v >= len) {
                return Err(TerrainError::IndexOutOfRange { index, len });
            }
        }
        Ok(())
    }

    /// Remove a vertex and every triangle using it.
    ///
    /// Indices above `index` shift down by one. Each call is a full pass over
    /// the mesh; use [`Self::remove_vertices`] for bulk removal.
    pub fn remove_vertex(&mut self, index: usize) -> Result<()> {
        if index >= self.vertices.len() {
            return Err(TerrainError::IndexOutOfRange {
                index,
                len: self.vertices.len(),
            });
        }
        self.vertices.remove(index);
        self.triangles.retain(|tri| !tri.references(index));
        for tri in &mut self.triangles {
            for v in &mut tri.vertices {
                if *v > index {
                    *v -= 1;
                }
            }
        }
        self.touch();
        Ok(())
    }

    /// Remove a set of vertices (and their triangles) in one pass.
    ///
    /// Out-of-range and repeated indices are ignored. Returns the number of
    /// vertices removed.
    pub fn remove_vertices(&mut self, indices: &[usize]) -> usize {
        let mut keep = vec![true; self.vertices.len()];
        for &i in indices {
            if let Some(k) = keep.get_mut(i) {
                *k = false;
            }
        }
        self.compact_vertices(&keep)
    }

    /// Keep only vertices flagged in `keep`, dropping triangles that use any
    /// other vertex and renumbering the rest.
    pub(crate) fn compact_vertices(&mut self, keep: &[bool]) -> usize {
        let mut remap = vec![usize::MAX; self.vertices.len()];
        let mut next = 0;
        for (i, &k) in keep.iter().enumerate() {
            if k {
                remap[i] = next;
                next += 1;
            }
        }
        let removed = self.vertices.len() - next;
        if removed == 0 {
            return 0;
        }

        let mut flags = keep.iter();
        self.vertices.retain(|_| *flags.next().unwrap_or(&false));
        self.triangles
            .retain(|tri| tri.vertices.iter().all(|&v| remap[v] != usize::MAX));
        for tri in &mut self.triangles {
            tri.vertices = tri.vertices.map(|v| remap[v]);
        }
        self.touch();
        removed
    }

    /// Remove the triangles at `indices`. Vertices are kept.
    pub fn remove_triangles(&mut self, indices: &[usize]) -> usize {
        let mut doomed = vec![false; self.triangles.len()];
        for &i in indices {
            if let Some(d) = doomed.get_mut(i) {
                *d = true;
            }
        }
        let before = self.triangles.len();
        let mut flags = doomed.iter();
        self.triangles.retain(|_| !*flags.next().unwrap_or(&false));
        let removed = before - self.triangles.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Reproject every vertex through `transform`.
    ///
    /// The mesh is only modified if every vertex converts; on failure it is
    /// left exactly as it was.
    pub fn convert_crs(&mut self, transform: &dyn CrsTransform) -> Result<()> {
        let converted = self
            .vertices
            .iter()
            .map(|v| transform.transform(v.position))
            .collect::<Result<Vec<_>>>()?;
        for (vertex, position) in self.vertices.iter_mut().zip(converted) {
            vertex.position = position;
            vertex.normal = None;
        }
        self.crs = Some(transform.target());
        self.touch();
        self.compute_extents();
        Ok(())
    }
}
