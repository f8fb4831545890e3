//! Persisted TIN files.
//!
//! # Layout
//!
//! All numbers are in host byte order.
//!
//! | Field            | Type                 | Notes                        |
//! |------------------|----------------------|------------------------------|
//! | magic            | 4 bytes              | `tin1` or `tin2`             |
//! | vertex count     | i32                  |                              |
//! | triangle count   | i32                  |                              |
//! | data offset      | i32                  | byte offset of the records   |
//! | CRS length       | i32                  | followed by that many bytes of WKT |
//! | extent           | 4 × f64              | version 2: left, right, bottom, top |
//! | height range     | 2 × f32              | version 2: min, max          |
//! | vertices         | (f64, f64, f32) each | at the data offset           |
//! | triangles        | (i32, i32, i32) each | directly after the vertices  |
//!
//! Files are always written as version 2. Version 1 files are read and their
//! extents recomputed from the vertices.

use std::fs::File;
use std::path::Path;

use glam::DVec2;
use memmap2::Mmap;
use tracing::{debug, info};

use crate::crs::Crs;
use crate::error::{Result, TerrainError};
use crate::geometry::Extent;
use crate::tin::{TinVertex, TriMesh, Triangle};

const MAGIC_PREFIX: &[u8; 3] = b"tin";

/// Version emitted by [`serialize_tin`].
pub const CURRENT_VERSION: u8 = 2;

const VERTEX_RECORD: usize = 8 + 8 + 4;
const TRIANGLE_RECORD: usize = 3 * 4;

/// Sequential reader over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                TerrainError::InvalidFormat(format!(
                    "unexpected end of data at byte {} (wanted {len} more)",
                    self.pos
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_ne_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_ne_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_ne_bytes(self.array()?))
    }

    /// A non-negative i32 field, as a length or count.
    fn count(&mut self, what: &str) -> Result<usize> {
        let v = self.i32()?;
        usize::try_from(v).map_err(|_| TerrainError::InvalidFormat(format!("negative {what}: {v}")))
    }
}

/// Parse a TIN from the bytes of a persisted file.
///
/// # Errors
///
/// Returns [`TerrainError::InvalidFormat`] if the magic, counts, data offset
/// or triangle indices do not describe a valid mesh within `data`.
pub fn parse_tin(data: &[u8]) -> Result<TriMesh> {
    let mut r = Reader::new(data);

    let magic: [u8; 4] = r.array()?;
    if &magic[..3] != MAGIC_PREFIX {
        return Err(TerrainError::InvalidFormat("not a TIN file".into()));
    }
    let version = match magic[3] {
        b'1' => 1,
        b'2' => 2,
        other => {
            return Err(TerrainError::InvalidFormat(format!(
                "unsupported TIN version {:?}",
                other as char
            )))
        }
    };

    let vertex_count = r.count("vertex count")?;
    let triangle_count = r.count("triangle count")?;
    let data_offset = r.count("data offset")?;
    let wkt_len = r.count("CRS length")?;
    let wkt = std::str::from_utf8(r.take(wkt_len)?)
        .map_err(|_| TerrainError::InvalidFormat("CRS is not valid UTF-8".into()))?;

    let header_extents = if version >= 2 {
        let extent = Extent::new(r.f64()?, r.f64()?, r.f64()?, r.f64()?);
        let (min, max) = (r.f32()?, r.f32()?);
        Some((extent, min, max))
    } else {
        None
    };

    if data_offset < r.pos {
        return Err(TerrainError::InvalidFormat(format!(
            "data offset {data_offset} overlaps the header ({} bytes)",
            r.pos
        )));
    }
    let body = vertex_count
        .checked_mul(VERTEX_RECORD)
        .zip(triangle_count.checked_mul(TRIANGLE_RECORD))
        .and_then(|(v, t)| v.checked_add(t))
        .and_then(|len| len.checked_add(data_offset));
    match body {
        Some(end) if end <= data.len() => {}
        _ => {
            return Err(TerrainError::InvalidFormat(format!(
                "{vertex_count} vertices and {triangle_count} triangles do not fit in {} bytes",
                data.len()
            )))
        }
    }
    r.pos = data_offset;

    let mut tin = TriMesh::with_capacity(vertex_count, triangle_count);
    for _ in 0..vertex_count {
        let x = r.f64()?;
        let y = r.f64()?;
        let z = r.f32()?;
        tin.vertices.push(TinVertex::new(DVec2::new(x, y), z));
    }
    for t in 0..triangle_count {
        let mut corners = [0usize; 3];
        for corner in &mut corners {
            let raw = r.i32()?;
            *corner = usize::try_from(raw)
                .ok()
                .filter(|&i| i < vertex_count)
                .ok_or_else(|| {
                    TerrainError::InvalidFormat(format!(
                        "triangle {t} references vertex {raw} of {vertex_count}"
                    ))
                })?;
        }
        tin.triangles.push(Triangle::new(corners));
    }

    if !wkt.is_empty() {
        tin.set_crs(Some(Crs::from_wkt(wkt)));
    }
    match header_extents {
        Some((extent, min, max)) => {
            let range = (vertex_count > 0).then_some((min, max));
            tin.set_extents(extent, range);
        }
        None => tin.compute_extents(),
    }
    tin.touch();

    debug!(version, vertex_count, triangle_count, "parsed TIN");
    Ok(tin)
}

/// Read a TIN file through a memory map.
///
/// # Errors
///
/// - [`TerrainError::FileNotFound`] if `path` does not exist
/// - [`TerrainError::InvalidFormat`] if the contents are not a valid TIN
pub fn read_tin<P: AsRef<Path>>(path: P) -> Result<TriMesh> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TerrainError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => TerrainError::Io(e),
    })?;
    if file.metadata()?.len() < 4 {
        return Err(TerrainError::InvalidFormat(format!(
            "{} is too short to be a TIN file",
            path.display()
        )));
    }

    // SAFETY: The file is opened read-only and the map does not outlive this
    // call; everything is copied into the mesh before returning.
    let mmap = unsafe { Mmap::map(&file)? };
    let tin = parse_tin(&mmap)?;
    info!(
        path = %path.display(),
        vertices = tin.vertex_count(),
        triangles = tin.triangle_count(),
        "loaded TIN"
    );
    Ok(tin)
}

fn to_i32(v: usize, what: &str) -> Result<i32> {
    i32::try_from(v).map_err(|_| {
        TerrainError::UnsupportedGeometry(format!("{what} {v} exceeds the TIN format limit"))
    })
}

/// Encode a mesh in the current TIN format.
///
/// The extent and height range are recomputed from the vertices rather than
/// taken from the mesh's cached values.
///
/// # Errors
///
/// [`TerrainError::UnsupportedGeometry`] if a count does not fit the format's
/// 32-bit fields.
pub fn serialize_tin(tin: &TriMesh) -> Result<Vec<u8>> {
    let wkt = tin.crs().map(Crs::wkt).unwrap_or("");
    let vertex_count = to_i32(tin.vertex_count(), "vertex count")?;
    let triangle_count = to_i32(tin.triangle_count(), "triangle count")?;
    let header_len = 4 + 4 * 4 + wkt.len() + 4 * 8 + 2 * 4;
    let data_offset = to_i32(header_len, "header length")?;

    let extent = Extent::from_points(tin.vertices().iter().map(|v| v.position));
    let (min, max) = tin
        .vertices()
        .iter()
        .fold(None, |range: Option<(f32, f32)>, v| {
            Some(match range {
                Some((lo, hi)) => (lo.min(v.elevation), hi.max(v.elevation)),
                None => (v.elevation, v.elevation),
            })
        })
        .unwrap_or((0.0, 0.0));

    let mut out = Vec::with_capacity(
        header_len + tin.vertex_count() * VERTEX_RECORD + tin.triangle_count() * TRIANGLE_RECORD,
    );
    out.extend_from_slice(MAGIC_PREFIX);
    out.push(b'0' + CURRENT_VERSION);
    out.extend_from_slice(&vertex_count.to_ne_bytes());
    out.extend_from_slice(&triangle_count.to_ne_bytes());
    out.extend_from_slice(&data_offset.to_ne_bytes());
    out.extend_from_slice(&to_i32(wkt.len(), "CRS length")?.to_ne_bytes());
    out.extend_from_slice(wkt.as_bytes());
    for v in [extent.left, extent.right, extent.bottom, extent.top] {
        out.extend_from_slice(&v.to_ne_bytes());
    }
    out.extend_from_slice(&min.to_ne_bytes());
    out.extend_from_slice(&max.to_ne_bytes());
    debug_assert_eq!(out.len(), header_len);

    for v in tin.vertices() {
        out.extend_from_slice(&v.position.x.to_ne_bytes());
        out.extend_from_slice(&v.position.y.to_ne_bytes());
        out.extend_from_slice(&v.elevation.to_ne_bytes());
    }
    for tri in tin.triangles() {
        for &i in &tri.vertices {
            // Vertex indices are below the already checked vertex count.
            out.extend_from_slice(&(i as i32).to_ne_bytes());
        }
    }
    Ok(out)
}

/// Write a mesh to `path` in the current TIN format.
pub fn write_tin<P: AsRef<Path>>(tin: &TriMesh, path: P) -> Result<()> {
    let bytes = serialize_tin(tin)?;
    std::fs::write(path.as_ref(), bytes)?;
    info!(
        path = %path.as_ref().display(),
        vertices = tin.vertex_count(),
        triangles = tin.triangle_count(),
        "wrote TIN"
    );
    Ok(())
}
