//! Directory-backed terrain store with LRU caching.
//!
//! [`TerrainService`] loads terrain files from a data directory on first use
//! and keeps the most recently used ones in memory:
//!
//! - `*.tin`: persisted meshes, indexed with a triangle bin grid on load
//! - `*.hgt`: SRTM tiles, as Int16 grids
//! - `*.hgt.zip`: zipped SRTM tiles
//!
//! Every loaded terrain answers queries through [`HeightSource`].
//!
//! ```no_run
//! use glam::DVec2;
//! use heixel::TerrainServiceBuilder;
//!
//! let service = TerrainServiceBuilder::new("/data/terrain")
//!     .cache_size(8)
//!     .bins_per_axis(128)
//!     .build();
//!
//! let z = service.height_at("site.tin", DVec2::new(512.0, 384.0))?;
//! let srtm = service.srtm_height_at(35.3606, 138.7274)?;
//! # Ok::<(), heixel::TerrainError>(())
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use glam::DVec2;
use moka::sync::Cache;
use tracing::{debug, info, warn};

use crate::error::{Result, TerrainError};
use crate::geometry::Extent;
use crate::grid::HeightGrid;
use crate::hgt::{lat_lon_to_filename, read_hgt, read_hgt_zip};
use crate::itf::read_tin;
use crate::source::HeightSource;
use crate::tin::TriMesh;

/// Default number of terrains kept in memory.
pub const DEFAULT_CACHE_SIZE: u64 = 16;

/// Default bins per axis for the triangle index of loaded meshes.
pub const DEFAULT_BINS_PER_AXIS: usize = 64;

/// A loaded terrain of either representation.
#[derive(Debug, Clone)]
pub enum Terrain {
    Grid(HeightGrid),
    Tin(TriMesh),
}

impl HeightSource for Terrain {
    fn height_at(&self, p: DVec2) -> Result<Option<f32>> {
        match self {
            Terrain::Grid(grid) => HeightSource::height_at(grid, p),
            Terrain::Tin(tin) => HeightSource::height_at(tin, p),
        }
    }

    fn coverage(&self) -> Extent {
        match self {
            Terrain::Grid(grid) => grid.coverage(),
            Terrain::Tin(tin) => tin.coverage(),
        }
    }
}

/// File formats the service can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerrainKind {
    Tin,
    Hgt,
    HgtZip,
}

impl TerrainKind {
    fn of(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tin") {
            Some(TerrainKind::Tin)
        } else if lower.ends_with(".hgt.zip") {
            Some(TerrainKind::HgtZip)
        } else if lower.ends_with(".hgt") {
            Some(TerrainKind::Hgt)
        } else {
            None
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of terrains currently in the cache.
    pub entry_count: u64,
    /// Number of requests served from the cache.
    pub hit_count: u64,
    /// Number of terrains loaded from disk.
    pub miss_count: u64,
}

impl CacheStats {
    /// Cache hit rate (0.0 to 1.0); 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Statistics from a preload operation.
#[derive(Debug, Clone, Default)]
pub struct PreloadStats {
    /// Terrains loaded into the cache.
    pub loaded: u64,
    /// Terrains that were already cached.
    pub already_cached: u64,
    /// Terrains that failed to load.
    pub failed: u64,
    /// Total elapsed time in milliseconds.
    pub elapsed_ms: u64,
}

/// Terrain store answering height queries by file name.
///
/// Cheap to share between threads: loaded terrains are handed out as
/// `Arc<Terrain>` snapshots and never mutated by the service.
pub struct TerrainService {
    data_dir: PathBuf,
    bins_per_axis: usize,
    cache: Cache<String, Arc<Terrain>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl TerrainService {
    /// Create a service over `data_dir` keeping up to `cache_size` terrains.
    pub fn new<P: AsRef<Path>>(data_dir: P, cache_size: u64) -> Self {
        TerrainServiceBuilder::new(data_dir)
            .cache_size(cache_size)
            .build()
    }

    /// Create a builder for more configuration options.
    pub fn builder<P: AsRef<Path>>(data_dir: P) -> TerrainServiceBuilder {
        TerrainServiceBuilder::new(data_dir)
    }

    /// Get a terrain by file name, loading it on a cache miss.
    ///
    /// # Errors
    ///
    /// - [`TerrainError::FileNotFound`] if the file does not exist
    /// - [`TerrainError::InvalidFormat`] if the name is not a plain file name
    ///   with a known extension, or the file is malformed
    pub fn load(&self, name: &str) -> Result<Arc<Terrain>> {
        if let Some(terrain) = self.cache.get(name) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(terrain);
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);

        let terrain = Arc::new(self.load_from_disk(name)?);
        self.cache.insert(name.to_string(), terrain.clone());
        Ok(terrain)
    }

    fn load_from_disk(&self, name: &str) -> Result<Terrain> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            warn!(terrain = name, "rejected terrain name");
            return Err(TerrainError::InvalidFormat(format!(
                "{name:?} is not a terrain file name"
            )));
        }
        let Some(kind) = TerrainKind::of(name) else {
            warn!(terrain = name, "rejected terrain file with unknown extension");
            return Err(TerrainError::InvalidFormat(format!(
                "unknown terrain file type: {name}"
            )));
        };

        let start = Instant::now();
        let path = self.data_dir.join(name);
        let terrain = match kind {
            TerrainKind::Tin => {
                let mut tin = read_tin(&path)?;
                if !tin.is_empty() {
                    tin.setup_bins(self.bins_per_axis)?;
                }
                Terrain::Tin(tin)
            }
            TerrainKind::Hgt => {
                // Fall back to a zipped copy next to the missing tile.
                let zipped = self.data_dir.join(format!("{name}.zip"));
                if !path.exists() && zipped.exists() {
                    Terrain::Grid(read_hgt_zip(&zipped)?)
                } else {
                    Terrain::Grid(read_hgt(&path)?)
                }
            }
            TerrainKind::HgtZip => Terrain::Grid(read_hgt_zip(&path)?),
        };
        info!(
            terrain = name,
            ?kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "cache miss, loaded terrain"
        );
        Ok(terrain)
    }

    /// Elevation at `p` on the named terrain.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(elevation))` - elevation in meters
    /// - `Ok(None)` - `p` is outside the terrain or over a gap
    /// - `Err(...)` - the terrain could not be loaded
    pub fn height_at(&self, name: &str, p: DVec2) -> Result<Option<f32>> {
        self.load(name)?.height_at(p)
    }

    /// Elevation at a WGS84 coordinate from the SRTM tile covering it.
    ///
    /// The tile is looked up by name (`N35E138.hgt`, or its `.zip`). A
    /// missing tile yields `Ok(None)`, like a void sample.
    pub fn srtm_height_at(&self, lat: f64, lon: f64) -> Result<Option<f32>> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(TerrainError::Inconvertible { x: lon, y: lat });
        }
        let name = lat_lon_to_filename(lat, lon);
        match self.load(&name) {
            Ok(tile) => tile.height_at(DVec2::new(lon, lat)),
            Err(TerrainError::FileNotFound { path }) => {
                debug!(path = %path.display(), "no SRTM tile");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.cache.entry_count(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn bins_per_axis(&self) -> usize {
        self.bins_per_axis
    }

    /// Maximum number of terrains kept in memory.
    pub fn cache_capacity(&self) -> u64 {
        self.cache.policy().max_capacity().unwrap_or(0)
    }

    /// Drop one terrain from the cache, e.g. after its file changed.
    pub fn invalidate(&self, name: &str) {
        self.cache.invalidate(name);
    }

    /// Drop every cached terrain.
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Names of the loadable files in the data directory, sorted.
    ///
    /// A zipped tile is listed under its `.hgt` name when both exist.
    pub fn scan_terrain_files(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut names = BTreeSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            match TerrainKind::of(&name) {
                Some(TerrainKind::HgtZip) => {
                    let hgt = &name[..name.len() - ".zip".len()];
                    names.insert(hgt.to_string());
                }
                Some(_) => {
                    names.insert(name);
                }
                None => {}
            }
        }
        names.into_iter().collect()
    }

    /// Load every terrain in the data directory into the cache.
    pub fn preload(&self) -> PreloadStats {
        let start = Instant::now();
        let mut stats = PreloadStats::default();

        for name in self.scan_terrain_files() {
            if self.cache.contains_key(&name) {
                stats.already_cached += 1;
                continue;
            }
            match self.load(&name) {
                Ok(_) => stats.loaded += 1,
                Err(e) => {
                    warn!(terrain = %name, error = %e, "failed to preload terrain");
                    stats.failed += 1;
                }
            }
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        stats
    }
}

/// Builder for [`TerrainService`].
///
/// # Environment
///
/// [`Self::from_env`] reads:
///
/// - `HEIXEL_DATA_DIR` (required): directory holding the terrain files
/// - `HEIXEL_CACHE_SIZE`: terrains kept in memory (default 16)
/// - `HEIXEL_BINS`: bins per axis for loaded meshes (default 64)
pub struct TerrainServiceBuilder {
    data_dir: PathBuf,
    cache_size: u64,
    bins_per_axis: usize,
}

impl TerrainServiceBuilder {
    /// Create a builder with default settings.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            cache_size: DEFAULT_CACHE_SIZE,
            bins_per_axis: DEFAULT_BINS_PER_AXIS,
        }
    }

    /// Create a builder from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `HEIXEL_DATA_DIR` is not set.
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("HEIXEL_DATA_DIR").map_err(|_| {
            TerrainError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "HEIXEL_DATA_DIR environment variable not set",
            ))
        })?;

        let cache_size = std::env::var("HEIXEL_CACHE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_SIZE);
        let bins_per_axis = std::env::var("HEIXEL_BINS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_BINS_PER_AXIS);

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            cache_size,
            bins_per_axis,
        })
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Bins per axis of the triangle index built for each loaded mesh.
    /// Zero is ignored.
    pub fn bins_per_axis(mut self, bins: usize) -> Self {
        if bins > 0 {
            self.bins_per_axis = bins;
        }
        self
    }

    pub fn build(self) -> TerrainService {
        TerrainService {
            data_dir: self.data_dir,
            bins_per_axis: self.bins_per_axis,
            cache: Cache::builder().max_capacity(self.cache_size).build(),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    use crate::itf::write_tin;

    const SRTM3_SAMPLES: usize = 1201;
    const SRTM3_SIZE: usize = SRTM3_SAMPLES * SRTM3_SAMPLES * 2;

    fn srtm3_tile(center_elevation: i16) -> Vec<u8> {
        let mut data = vec![0u8; SRTM3_SIZE];
        let offset = (600 * SRTM3_SAMPLES + 600) * 2;
        data[offset..offset + 2].copy_from_slice(&center_elevation.to_be_bytes());
        data
    }

    fn create_tile(dir: &Path, filename: &str, center_elevation: i16) {
        fs::write(dir.join(filename), srtm3_tile(center_elevation)).unwrap();
    }

    fn create_tin(dir: &Path, filename: &str) {
        let mut tin = TriMesh::new();
        tin.add_vertex(DVec2::new(0.0, 0.0), 0.0);
        tin.add_vertex(DVec2::new(10.0, 0.0), 10.0);
        tin.add_vertex(DVec2::new(0.0, 10.0), 20.0);
        tin.add_triangle([0, 1, 2]).unwrap();
        write_tin(&tin, dir.join(filename)).unwrap();
    }

    #[test]
    fn test_tin_terrain() {
        let dir = TempDir::new().unwrap();
        create_tin(dir.path(), "site.tin");
        let service = TerrainService::builder(dir.path()).bins_per_axis(4).build();

        let z = service
            .height_at("site.tin", DVec2::new(2.0, 3.0))
            .unwrap()
            .unwrap();
        assert!((z - 8.0).abs() < 1e-5);
        assert_eq!(service.height_at("site.tin", DVec2::new(9.0, 9.0)).unwrap(), None);

        // Loaded meshes come with their bin index.
        match &*service.load("site.tin").unwrap() {
            Terrain::Tin(tin) => assert_eq!(tin.bins().unwrap().cols(), 4),
            Terrain::Grid(_) => panic!("expected a mesh"),
        }
    }

    #[test]
    fn test_hgt_terrain() {
        let dir = TempDir::new().unwrap();
        create_tile(dir.path(), "N35E138.hgt", 500);
        let service = TerrainService::new(dir.path(), 10);

        let z = service
            .height_at("N35E138.hgt", DVec2::new(138.5, 35.5))
            .unwrap();
        assert_eq!(z, Some(500.0));
    }

    #[test]
    fn test_cache_hit() {
        let dir = TempDir::new().unwrap();
        create_tile(dir.path(), "N35E138.hgt", 500);
        let service = TerrainService::new(dir.path(), 10);

        service.srtm_height_at(35.5, 138.5).unwrap();
        let stats = service.cache_stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 0);

        service.srtm_height_at(35.6, 138.6).unwrap();
        let stats = service.cache_stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 1);
    }

    #[test]
    fn test_srtm_height_at() {
        let dir = TempDir::new().unwrap();
        create_tile(dir.path(), "N35E138.hgt", 500);
        create_tile(dir.path(), "N36E138.hgt", 1000);
        let service = TerrainService::new(dir.path(), 10);

        assert_eq!(service.srtm_height_at(35.5, 138.5).unwrap(), Some(500.0));
        assert_eq!(service.srtm_height_at(36.5, 138.5).unwrap(), Some(1000.0));
        // Missing tile
        assert_eq!(service.srtm_height_at(10.5, 10.5).unwrap(), None);
        assert!(service.srtm_height_at(95.0, 0.0).is_err());
    }

    #[test]
    fn test_zipped_tile_fallback() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("N40E010.hgt.zip");
        let file = fs::File::create(&zip_path).unwrap();
        let mut zip_writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip_writer.start_file("N40E010.hgt", options).unwrap();
        zip_writer.write_all(&srtm3_tile(250)).unwrap();
        zip_writer.finish().unwrap();

        let service = TerrainService::new(dir.path(), 10);
        assert_eq!(service.srtm_height_at(40.5, 10.5).unwrap(), Some(250.0));
        // Read in place, nothing extracted.
        assert!(!dir.path().join("N40E010.hgt").exists());
        assert_eq!(
            service.scan_terrain_files(),
            vec!["N40E010.hgt".to_string()]
        );
    }

    #[test]
    fn test_missing_and_rejected_names() {
        let dir = TempDir::new().unwrap();
        let service = TerrainService::new(dir.path(), 10);
        assert!(matches!(
            service.load("absent.tin"),
            Err(TerrainError::FileNotFound { .. })
        ));
        assert!(matches!(
            service.load("../escape.tin"),
            Err(TerrainError::InvalidFormat(_))
        ));
        assert!(matches!(
            service.load("notes.txt"),
            Err(TerrainError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_scan_and_preload() {
        let dir = TempDir::new().unwrap();
        create_tile(dir.path(), "N35E138.hgt", 500);
        create_tin(dir.path(), "site.tin");
        fs::write(dir.path().join("broken.tin"), b"tin2garbage").unwrap();
        fs::write(dir.path().join("readme.txt"), b"hello").unwrap();
        let service = TerrainService::new(dir.path(), 10);

        assert_eq!(
            service.scan_terrain_files(),
            vec!["N35E138.hgt", "broken.tin", "site.tin"]
        );

        let stats = service.preload();
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.failed, 1);

        let again = service.preload();
        assert_eq!(again.already_cached, 2);
        assert_eq!(again.failed, 1);
    }

    #[test]
    fn test_clear_cache_and_invalidate() {
        let dir = TempDir::new().unwrap();
        create_tin(dir.path(), "site.tin");
        let service = TerrainService::new(dir.path(), 10);

        service.load("site.tin").unwrap();
        service.invalidate("site.tin");
        service.load("site.tin").unwrap();
        assert_eq!(service.cache_stats().miss_count, 2);

        service.clear_cache();
        service.load("site.tin").unwrap();
        assert_eq!(service.cache_stats().miss_count, 3);
    }

    #[test]
    fn test_cache_stats() {
        let stats = CacheStats {
            entry_count: 5,
            hit_count: 80,
            miss_count: 20,
        };
        assert_eq!(stats.hit_rate(), 0.8);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_builder_defaults() {
        let service = TerrainService::builder("/data").bins_per_axis(0).build();
        assert_eq!(service.cache_capacity(), DEFAULT_CACHE_SIZE);
        assert_eq!(service.bins_per_axis(), DEFAULT_BINS_PER_AXIS);
        assert_eq!(service.data_dir(), Path::new("/data"));
    }

    #[test]
    fn test_from_env() {
        // One test touches these variables so parallel tests cannot race.
        let saved: Vec<_> = ["HEIXEL_DATA_DIR", "HEIXEL_CACHE_SIZE", "HEIXEL_BINS"]
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        std::env::remove_var("HEIXEL_DATA_DIR");
        assert!(TerrainServiceBuilder::from_env().is_err());

        let dir = TempDir::new().unwrap();
        std::env::set_var("HEIXEL_DATA_DIR", dir.path());
        std::env::remove_var("HEIXEL_CACHE_SIZE");
        std::env::remove_var("HEIXEL_BINS");
        let builder = TerrainServiceBuilder::from_env().unwrap();
        assert_eq!(builder.data_dir, dir.path());
        assert_eq!(builder.cache_size, DEFAULT_CACHE_SIZE);
        assert_eq!(builder.bins_per_axis, DEFAULT_BINS_PER_AXIS);

        std::env::set_var("HEIXEL_CACHE_SIZE", "50");
        std::env::set_var("HEIXEL_BINS", "32");
        let builder = TerrainServiceBuilder::from_env().unwrap();
        assert_eq!(builder.cache_size, 50);
        assert_eq!(builder.bins_per_axis, 32);

        for (key, value) in saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}
