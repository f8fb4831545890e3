//! SRTM `.hgt` raster import.
//!
//! An `.hgt` file is a square block of 16-bit big-endian signed samples,
//! stored row by row from the northern edge down. The resolution is detected
//! from the file size:
//!
//! - **SRTM1**: 3601×3601 samples, 1 arc-second (~30m)
//! - **SRTM3**: 1201×1201 samples, 3 arc-second (~90m)
//!
//! Tiles cover 1°×1°; the filename (`N35E138.hgt`) names the southwest
//! corner. Imported tiles become an Int16 [`HeightGrid`] whose extent is the
//! tile in degrees, with row 0 at the southern edge. Void samples (`-32768`)
//! become [`NODATA`](crate::grid::NODATA).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, info};

use crate::error::{Result, TerrainError};
use crate::geometry::Extent;
use crate::grid::{HeightGrid, ValueMode};

/// Number of samples per row/column for SRTM1.
const SRTM1_SAMPLES: usize = 3601;

/// Number of samples per row/column for SRTM3.
const SRTM3_SAMPLES: usize = 1201;

/// File size for SRTM1: 3601 × 3601 × 2 bytes.
const SRTM1_SIZE: usize = SRTM1_SAMPLES * SRTM1_SAMPLES * 2;

/// File size for SRTM3: 1201 × 1201 × 2 bytes.
const SRTM3_SIZE: usize = SRTM3_SAMPLES * SRTM3_SAMPLES * 2;

/// Value marking a void sample in `.hgt` files.
pub const HGT_VOID: i16 = -32768;

/// Resolution of an SRTM tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HgtResolution {
    /// 1 arc-second (~30m).
    Srtm1,
    /// 3 arc-second (~90m).
    Srtm3,
}

impl HgtResolution {
    /// Detect the resolution from a file size in bytes.
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            SRTM1_SIZE => Some(HgtResolution::Srtm1),
            SRTM3_SIZE => Some(HgtResolution::Srtm3),
            _ => None,
        }
    }

    /// Samples per row/column.
    pub fn samples(&self) -> usize {
        match self {
            HgtResolution::Srtm1 => SRTM1_SAMPLES,
            HgtResolution::Srtm3 => SRTM3_SAMPLES,
        }
    }
}

/// Build a grid from the raw bytes of an `.hgt` tile.
///
/// # Arguments
///
/// * `bytes` - The file contents
/// * `lat` - Latitude of the tile's southwest corner
/// * `lon` - Longitude of the tile's southwest corner
///
/// # Errors
///
/// Returns [`TerrainError::InvalidFormat`] if the size matches neither SRTM1
/// nor SRTM3.
pub fn grid_from_hgt_bytes(bytes: &[u8], lat: i32, lon: i32) -> Result<HeightGrid> {
    let resolution = HgtResolution::from_len(bytes.len()).ok_or_else(|| {
        TerrainError::InvalidFormat(format!(
            "{} bytes is neither an SRTM1 nor an SRTM3 tile",
            bytes.len()
        ))
    })?;
    let n = resolution.samples();
    let extent = Extent::new(
        lon as f64,
        lon as f64 + 1.0,
        lat as f64,
        lat as f64 + 1.0,
    );
    let mut grid = HeightGrid::allocate(n, n, extent, ValueMode::Int16)?;

    // File rows run north to south; grid rows run south to north.
    for (file_row, line) in bytes.chunks_exact(n * 2).enumerate() {
        let row = n - 1 - file_row;
        for (col, sample) in line.chunks_exact(2).enumerate() {
            let v = i16::from_be_bytes([sample[0], sample[1]]);
            if v != HGT_VOID {
                grid.set_sample(col, row, v as f32)?;
            }
        }
    }
    let range = grid.compute_height_extents();
    debug!(lat, lon, samples = n, ?range, "decoded hgt tile");
    Ok(grid)
}

fn tile_origin(name: &str, path: &Path) -> Result<(i32, i32)> {
    filename_to_lat_lon(name).ok_or_else(|| {
        TerrainError::InvalidFormat(format!(
            "cannot derive tile coordinates from {}",
            path.display()
        ))
    })
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TerrainError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => TerrainError::Io(e),
    })
}

/// Load an `.hgt` file named after its southwest corner.
///
/// # Errors
///
/// - [`TerrainError::FileNotFound`] if `path` does not exist
/// - [`TerrainError::InvalidFormat`] if the filename is not a tile name or
///   the size is not a known resolution
pub fn read_hgt<P: AsRef<Path>>(path: P) -> Result<HeightGrid> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (lat, lon) = tile_origin(&name, path)?;
    let file = open(path)?;

    // SAFETY: The file is opened read-only and the map is dropped before
    // returning; samples are copied into the grid.
    let mmap = unsafe { Mmap::map(&file)? };
    let grid = grid_from_hgt_bytes(&mmap, lat, lon)?;
    info!(path = %path.display(), lat, lon, "loaded hgt tile");
    Ok(grid)
}

/// Load the first `.hgt` entry of a zip archive.
///
/// The tile coordinates come from the entry name, or from the archive name
/// (`N35E138.hgt.zip`) when the entry is not named after a tile.
pub fn read_hgt_zip<P: AsRef<Path>>(path: P) -> Result<HeightGrid> {
    let path = path.as_ref();
    let file = open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| TerrainError::InvalidFormat(format!("{}: {e}", path.display())))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| TerrainError::InvalidFormat(format!("{}: {e}", path.display())))?;
        let entry_name = entry.name().to_string();
        if !entry_name.to_ascii_lowercase().ends_with(".hgt") {
            continue;
        }

        let archive_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let archive_name = archive_name.strip_suffix(".zip").unwrap_or(&archive_name);
        let (lat, lon) = filename_to_lat_lon(&entry_name)
            .map(Ok)
            .unwrap_or_else(|| tile_origin(archive_name, path))?;

        let declared = usize::try_from(entry.size()).ok();
        let Some(resolution) = declared.and_then(HgtResolution::from_len) else {
            return Err(TerrainError::InvalidFormat(format!(
                "{}: entry {} declares {} bytes, not an SRTM tile",
                path.display(),
                entry_name,
                entry.size()
            )));
        };
        let expected = resolution.samples() * resolution.samples() * 2;

        // The declared size is untrusted; never read past one full SRTM1 tile.
        let mut bytes = Vec::with_capacity(expected);
        entry
            .by_ref()
            .take(SRTM1_SIZE as u64 + 1)
            .read_to_end(&mut bytes)?;
        let grid = grid_from_hgt_bytes(&bytes, lat, lon)?;
        info!(path = %path.display(), entry = %entry_name, lat, lon, "loaded zipped hgt tile");
        return Ok(grid);
    }

    Err(TerrainError::InvalidFormat(format!(
        "no .hgt entry in {}",
        path.display()
    )))
}

/// Convert latitude and longitude to the name of the tile containing them.
///
/// # Examples
///
/// ```
/// use heixel::hgt::lat_lon_to_filename;
///
/// assert_eq!(lat_lon_to_filename(35.5, 138.7), "N35E138.hgt");
/// assert_eq!(lat_lon_to_filename(-12.3, -77.1), "S13W078.hgt");
/// ```
pub fn lat_lon_to_filename(lat: f64, lon: f64) -> String {
    let lat_int = lat.floor() as i32;
    let lon_int = lon.floor() as i32;
    let lat_prefix = if lat_int >= 0 { 'N' } else { 'S' };
    let lon_prefix = if lon_int >= 0 { 'E' } else { 'W' };
    format!(
        "{}{:02}{}{:03}.hgt",
        lat_prefix,
        lat_int.abs(),
        lon_prefix,
        lon_int.abs()
    )
}

/// Parse a tile name into its southwest corner `(lat, lon)`.
///
/// Accepts a bare name or a path, with or without the `.hgt` extension.
///
/// # Examples
///
/// ```
/// use heixel::hgt::filename_to_lat_lon;
///
/// assert_eq!(filename_to_lat_lon("N35E138.hgt"), Some((35, 138)));
/// assert_eq!(filename_to_lat_lon("/data/S12W077.hgt"), Some((-12, -77)));
/// assert_eq!(filename_to_lat_lon("dem.hgt"), None);
/// ```
pub fn filename_to_lat_lon(filename: &str) -> Option<(i32, i32)> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let name = name.strip_suffix(".hgt").unwrap_or(name);
    let bytes = name.as_bytes();
    if bytes.len() != 7 || !name.is_ascii() {
        return None;
    }

    let lat_sign = match bytes[0] {
        b'N' | b'n' => 1,
        b'S' | b's' => -1,
        _ => return None,
    };
    let lon_sign = match bytes[3] {
        b'E' | b'e' => 1,
        b'W' | b'w' => -1,
        _ => return None,
    };
    let lat: i32 = name[1..3].parse().ok()?;
    let lon: i32 = name[4..7].parse().ok()?;
    Some((lat * lat_sign, lon * lon_sign))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;
    use std::io::Write;
    use tempfile::TempDir;

    use crate::grid::{GridHeight, NODATA};

    fn put(data: &mut [u8], file_row: usize, col: usize, v: i16) {
        let offset = (file_row * SRTM3_SAMPLES + col) * 2;
        data[offset..offset + 2].copy_from_slice(&v.to_be_bytes());
    }

    /// SRTM3 tile: NW corner 1000m, centre 500m, SE corner 100m, one void.
    fn srtm3_bytes() -> Vec<u8> {
        let mut data = vec![0u8; SRTM3_SIZE];
        put(&mut data, 0, 0, 1000);
        put(&mut data, 600, 600, 500);
        put(&mut data, 1200, 1200, 100);
        put(&mut data, 10, 20, HGT_VOID);
        data
    }

    #[test]
    fn test_grid_from_srtm3_bytes() {
        let grid = grid_from_hgt_bytes(&srtm3_bytes(), 35, 138).unwrap();
        assert_eq!(grid.cols(), 1201);
        assert_eq!(grid.rows(), 1201);
        assert_eq!(grid.value_mode(), ValueMode::Int16);
        assert_eq!(grid.extent(), Extent::new(138.0, 139.0, 35.0, 36.0));

        // North-west corner is the last grid row.
        assert_eq!(grid.get_sample(0, 1200).unwrap(), 1000.0);
        assert_eq!(grid.get_sample(600, 600).unwrap(), 500.0);
        assert_eq!(grid.get_sample(1200, 0).unwrap(), 100.0);
        assert_eq!(grid.get_sample(20, 1190).unwrap(), NODATA);
        assert_eq!(grid.nodata_count(), 1);
        assert_eq!(grid.height_range(), Some((0.0, 1000.0)));

        assert_eq!(
            grid.height_at_nearest(DVec2::new(138.5, 35.5)),
            GridHeight::Value(500.0)
        );
    }

    #[test]
    fn test_rejects_unknown_size() {
        let err = grid_from_hgt_bytes(&[0u8; 1000], 0, 0).unwrap_err();
        assert!(matches!(err, TerrainError::InvalidFormat(_)));
    }

    #[test]
    fn test_read_hgt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("S01W002.hgt");
        std::fs::write(&path, srtm3_bytes()).unwrap();

        let grid = read_hgt(&path).unwrap();
        assert_eq!(grid.extent(), Extent::new(-2.0, -1.0, -1.0, 0.0));
        assert_eq!(grid.get_sample(600, 600).unwrap(), 500.0);
    }

    #[test]
    fn test_read_hgt_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_hgt(dir.path().join("N00E000.hgt")),
            Err(TerrainError::FileNotFound { .. })
        ));

        let badly_named = dir.path().join("terrain.hgt");
        std::fs::write(&badly_named, srtm3_bytes()).unwrap();
        assert!(matches!(
            read_hgt(&badly_named),
            Err(TerrainError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_read_hgt_zip() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("N40E010.hgt.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("N40E010.hgt", options).unwrap();
        writer.write_all(&srtm3_bytes()).unwrap();
        writer.finish().unwrap();

        let grid = read_hgt_zip(&zip_path).unwrap();
        assert_eq!(grid.extent(), Extent::new(10.0, 11.0, 40.0, 41.0));
        assert_eq!(grid.get_sample(0, 1200).unwrap(), 1000.0);
    }

    #[test]
    fn test_read_hgt_zip_uses_archive_name() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("N05E006.hgt.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("tile.hgt", options).unwrap();
        writer.write_all(&srtm3_bytes()).unwrap();
        writer.finish().unwrap();

        let grid = read_hgt_zip(&zip_path).unwrap();
        assert_eq!(grid.extent().left, 6.0);
        assert_eq!(grid.extent().bottom, 5.0);
    }

    #[test]
    fn test_read_hgt_zip_rejects_wrong_entry_size() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("N40E010.hgt.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("N40E010.hgt", options).unwrap();
        let mut oversized = srtm3_bytes();
        oversized.extend_from_slice(&[0u8; 64]);
        writer.write_all(&oversized).unwrap();
        writer.finish().unwrap();

        assert!(matches!(
            read_hgt_zip(&zip_path),
            Err(TerrainError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_filename_round_trip() {
        assert_eq!(lat_lon_to_filename(0.5, -0.5), "N00W001.hgt");
        assert_eq!(lat_lon_to_filename(-59.9, -179.9), "S60W180.hgt");
        assert_eq!(filename_to_lat_lon("n35e138"), Some((35, 138)));
        assert_eq!(filename_to_lat_lon("C:\\dem\\N35E138.hgt"), Some((35, 138)));
        assert_eq!(filename_to_lat_lon("X35E138.hgt"), None);
        assert_eq!(filename_to_lat_lon("N35E13.hgt"), None);
    }
}
