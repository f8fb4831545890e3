//! Uniform elevation rasters.
//!
//! This module provides [`HeightGrid`], a dense `cols × rows` array of
//! elevation samples (heixels) covering a rectangular extent. Samples sit on
//! the grid lines: column 0 lies on the western edge of the extent and the last
//! column on the eastern edge. Row 0 is the southern edge.
//!
//! # Storage
//!
//! Samples are stored either as 16-bit integers or as 32-bit floats. Both are
//! multiplied by a vertical scale (meters per stored unit) on the way out, so
//! callers always see elevations in meters.
//!
//! The special value [`NODATA`] (stored as [`NODATA_I16`] in integer mode)
//! marks a missing sample.

use glam::DVec2;
use tracing::debug;

use crate::error::{try_alloc, Result, TerrainError};
use crate::geometry::Extent;

/// Elevation value meaning "no sample here".
pub const NODATA: f32 = -99999.0;

/// Stored representation of [`NODATA`] in an [`ValueMode::Int16`] grid.
pub const NODATA_I16: i16 = i16::MIN;

/// Storage type of the samples in a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueMode {
    /// 16-bit signed integer samples
    Int16,
    /// 32-bit floating point samples
    Float32,
}

#[derive(Debug, Clone)]
enum Samples {
    Int16(Vec<i16>),
    Float32(Vec<f32>),
}

/// Outcome of a point query against a [`HeightGrid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridHeight {
    /// Elevation in meters.
    Value(f32),
    /// The point is covered by the grid but the samples are missing.
    NoData,
    /// The point lies outside the grid.
    Outside,
}

impl GridHeight {
    /// The elevation, treating missing data and outside points alike.
    pub fn value(self) -> Option<f32> {
        match self {
            GridHeight::Value(v) => Some(v),
            GridHeight::NoData | GridHeight::Outside => None,
        }
    }
}

/// Inclusive rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRect {
    pub min_col: usize,
    pub min_row: usize,
    pub max_col: usize,
    pub max_row: usize,
}

impl GridRect {
    /// Create a rectangle covering `min_col..=max_col × min_row..=max_row`.
    pub fn new(min_col: usize, min_row: usize, max_col: usize, max_row: usize) -> Self {
        Self {
            min_col,
            min_row,
            max_col,
            max_row,
        }
    }

    /// Number of columns covered, 0 if `min_col > max_col`.
    pub fn cols(&self) -> usize {
        span(self.min_col, self.max_col)
    }

    /// Number of rows covered, 0 if `min_row > max_row`.
    pub fn rows(&self) -> usize {
        span(self.min_row, self.max_row)
    }

    pub fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.min_col && col <= self.max_col && row >= self.min_row && row <= self.max_row
    }

    /// Intersect with the cells of a `cols × rows` grid.
    ///
    /// Returns `None` when nothing of the rectangle lies inside the grid.
    pub fn clamp_to(&self, cols: usize, rows: usize) -> Option<GridRect> {
        if self.min_col > self.max_col
            || self.min_row > self.max_row
            || self.min_col >= cols
            || self.min_row >= rows
        {
            return None;
        }
        Some(GridRect {
            min_col: self.min_col,
            min_row: self.min_row,
            max_col: self.max_col.min(cols - 1),
            max_row: self.max_row.min(rows - 1),
        })
    }
}

fn span(min: usize, max: usize) -> usize {
    max.checked_sub(min).map_or(0, |d| d.saturating_add(1))
}

/// A dense elevation raster.
///
/// # Example
///
/// ```
/// use heixel::{Extent, HeightGrid, ValueMode};
/// use glam::DVec2;
///
/// let mut grid = HeightGrid::allocate(3, 3, Extent::new(0.0, 2.0, 0.0, 2.0), ValueMode::Float32)?;
/// grid.set_sample(1, 1, 42.0)?;
/// assert_eq!(grid.height_at_nearest(DVec2::new(1.1, 0.9)).value(), Some(42.0));
/// # Ok::<(), heixel::TerrainError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HeightGrid {
    cols: usize,
    rows: usize,
    extent: Extent,
    vertical_scale: f32,
    samples: Samples,
    height_range: Option<(f32, f32)>,
}

impl HeightGrid {
    /// Allocate a grid with every sample set to [`NODATA`].
    ///
    /// # Errors
    ///
    /// - [`TerrainError::UnsupportedGeometry`] if the grid has fewer than two
    ///   columns or rows, or the extent has no width or height
    /// - [`TerrainError::AllocationFailure`] if the sample buffer cannot be
    ///   reserved
    pub fn allocate(cols: usize, rows: usize, extent: Extent, mode: ValueMode) -> Result<Self> {
        if cols < 2 || rows < 2 {
            return Err(TerrainError::UnsupportedGeometry(format!(
                "grid must be at least 2x2, got {cols}x{rows}"
            )));
        }
        if !(extent.width() > 0.0 && extent.height() > 0.0) {
            return Err(TerrainError::UnsupportedGeometry(format!(
                "grid extent must have a positive width and height, got {extent:?}"
            )));
        }
        let count = cols
            .checked_mul(rows)
            .ok_or(TerrainError::AllocationFailure { bytes: usize::MAX })?;

        let samples = match mode {
            ValueMode::Int16 => Samples::Int16(try_alloc(count, NODATA_I16)?),
            ValueMode::Float32 => Samples::Float32(try_alloc(count, NODATA)?),
        };
        debug!(cols, rows, ?mode, "allocated height grid");

        Ok(Self {
            cols,
            rows,
            extent,
            vertical_scale: 1.0,
            samples,
            height_range: None,
        })
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

    pub fn value_mode(&self) -> ValueMode {
        match self.samples {
            Samples::Int16(_) => ValueMode::Int16,
            Samples::Float32(_) => ValueMode::Float32,
        }
    }

    /// Meters per stored unit.
    pub fn vertical_scale(&self) -> f32 {
        self.vertical_scale
    }

    /// Change the meters-per-unit factor applied to stored samples.
    ///
    /// Stored samples are reinterpreted, not converted.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::UnsupportedGeometry`] unless `scale` is finite
    /// and positive.
    pub fn set_vertical_scale(&mut self, scale: f32) -> Result<()> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(TerrainError::UnsupportedGeometry(format!(
                "vertical scale must be finite and positive, got {scale}"
            )));
        }
        self.vertical_scale = scale;
        self.height_range = None;
        Ok(())
    }

    /// Distance between neighbouring samples along x and y.
    pub fn spacing(&self) -> DVec2 {
        DVec2::new(
            self.extent.width() / (self.cols - 1) as f64,
            self.extent.height() / (self.rows - 1) as f64,
        )
    }

    /// The full set of cells.
    pub fn full_rect(&self) -> GridRect {
        GridRect::new(0, 0, self.cols - 1, self.rows - 1)
    }

    /// World position of the sample at `(col, row)`.
    pub fn grid_to_world(&self, col: usize, row: usize) -> DVec2 {
        let spacing = self.spacing();
        DVec2::new(
            self.extent.left + col as f64 * spacing.x,
            self.extent.bottom + row as f64 * spacing.y,
        )
    }

    /// Fractional `(col, row)` of a world position.
    pub fn world_to_grid(&self, p: DVec2) -> DVec2 {
        let spacing = self.spacing();
        DVec2::new(
            (p.x - self.extent.left) / spacing.x,
            (p.y - self.extent.bottom) / spacing.y,
        )
    }

    fn check_index(&self, col: usize, row: usize) -> Result<usize> {
        if col >= self.cols {
            return Err(TerrainError::IndexOutOfRange {
                index: col,
                len: self.cols,
            });
        }
        if row >= self.rows {
            return Err(TerrainError::IndexOutOfRange {
                index: row,
                len: self.rows,
            });
        }
        Ok(row * self.cols + col)
    }

    /// Set the elevation (meters) of one sample. [`NODATA`] clears it.
    ///
    /// In [`ValueMode::Int16`] the value is rounded to the nearest stored unit.
    pub fn set_sample(&mut self, col: usize, row: usize, value: f32) -> Result<()> {
        let idx = self.check_index(col, row)?;
        self.put(idx, value);
        Ok(())
    }

    /// Elevation (meters) of one sample, or [`NODATA`].
    pub fn get_sample(&self, col: usize, row: usize) -> Result<f32> {
        let idx = self.check_index(col, row)?;
        Ok(self.value(idx))
    }

    /// Unchecked read by linear index.
    #[inline]
    pub(crate) fn value(&self, idx: usize) -> f32 {
        match &self.samples {
            Samples::Int16(data) => {
                let raw = data[idx];
                if raw == NODATA_I16 {
                    NODATA
                } else {
                    raw as f32 * self.vertical_scale
                }
            }
            Samples::Float32(data) => {
                let raw = data[idx];
                if raw == NODATA {
                    NODATA
                } else {
                    raw * self.vertical_scale
                }
            }
        }
    }

    /// Unchecked write by linear index.
    #[inline]
    pub(crate) fn put(&mut self, idx: usize, value: f32) {
        let scale = self.vertical_scale;
        match &mut self.samples {
            Samples::Int16(data) => {
                data[idx] = if value == NODATA {
                    NODATA_I16
                } else {
                    // The sentinel itself is never produced from a real value.
                    (value / scale).round().clamp(-(i16::MAX as f32), i16::MAX as f32) as i16
                };
            }
            Samples::Float32(data) => {
                data[idx] = if value == NODATA { NODATA } else { value / scale };
            }
        }
    }

    /// Elevation of the sample nearest to `p`.
    pub fn height_at_nearest(&self, p: DVec2) -> GridHeight {
        if !self.extent.contains(p) {
            return GridHeight::Outside;
        }
        let f = self.world_to_grid(p);
        let col = (f.x.round() as usize).min(self.cols - 1);
        let row = (f.y.round() as usize).min(self.rows - 1);
        let v = self.value(row * self.cols + col);
        if v == NODATA {
            GridHeight::NoData
        } else {
            GridHeight::Value(v)
        }
    }

    /// Bilinear interpolation between the four samples surrounding `p`.
    ///
    /// Points up to half a cell beyond the extent are accepted and clamped to
    /// the border samples. Missing corners are dropped and the remaining
    /// weights renormalised; if all four are missing the result is
    /// [`GridHeight::NoData`].
    pub fn height_at_interpolated(&self, p: DVec2) -> GridHeight {
        let f = self.world_to_grid(p);
        let max_col = (self.cols - 1) as f64;
        let max_row = (self.rows - 1) as f64;
        if !(-0.5..=max_col + 0.5).contains(&f.x) || !(-0.5..=max_row + 0.5).contains(&f.y) {
            return GridHeight::Outside;
        }

        let fx = f.x.clamp(0.0, max_col);
        let fy = f.y.clamp(0.0, max_row);
        let c0 = (fx.floor() as usize).min(self.cols - 2);
        let r0 = (fy.floor() as usize).min(self.rows - 2);
        let tx = fx - c0 as f64;
        let ty = fy - r0 as f64;

        let corners = [
            (r0 * self.cols + c0, (1.0 - tx) * (1.0 - ty)),
            (r0 * self.cols + c0 + 1, tx * (1.0 - ty)),
            ((r0 + 1) * self.cols + c0, (1.0 - tx) * ty),
            ((r0 + 1) * self.cols + c0 + 1, tx * ty),
        ];

        let mut sum = 0.0;
        let mut weight = 0.0;
        for (idx, w) in corners {
            let v = self.value(idx);
            if v != NODATA {
                sum += v as f64 * w;
                weight += w;
            }
        }

        // Zero weight also covers a point sitting exactly on a missing sample.
        if weight <= 0.0 {
            GridHeight::NoData
        } else {
            GridHeight::Value((sum / weight) as f32)
        }
    }

    /// Scan valid samples for the minimum and maximum elevation.
    ///
    /// Must be called after bulk mutation; the result is cached and returned
    /// by [`Self::height_range`].
    pub fn compute_height_extents(&mut self) -> Option<(f32, f32)> {
        let mut range: Option<(f32, f32)> = None;
        for idx in 0..self.cols * self.rows {
            let v = self.value(idx);
            if v == NODATA {
                continue;
            }
            range = Some(match range {
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
                None => (v, v),
            });
        }
        self.height_range = range;
        range
    }

    /// Cached result of the last [`Self::compute_height_extents`].
    pub fn height_range(&self) -> Option<(f32, f32)> {
        self.height_range
    }

    /// Number of samples equal to [`NODATA`].
    pub fn nodata_count(&self) -> usize {
        (0..self.cols * self.rows)
            .filter(|&idx| self.value(idx) == NODATA)
            .count()
    }

    /// Number of samples carrying an elevation.
    pub fn valid_count(&self) -> usize {
        self.cols * self.rows - self.nodata_count()
    }

    /// Returns true if at least one sample carries an elevation.
    pub fn has_data(&self) -> bool {
        (0..self.cols * self.rows).any(|idx| self.value(idx) != NODATA)
    }

    fn map_valid(&mut self, f: impl Fn(f32) -> f32) {
        for idx in 0..self.cols * self.rows {
            let v = self.value(idx);
            if v != NODATA {
                self.put(idx, f(v));
            }
        }
        self.height_range = None;
    }

    /// Multiply every valid elevation by `factor`.
    pub fn scale_heights(&mut self, factor: f32) {
        self.map_valid(|v| v * factor);
    }

    /// Add `delta` meters to every valid elevation.
    pub fn offset_heights(&mut self, delta: f32) {
        self.map_valid(|v| v + delta);
    }

    /// Replace every sample equal to `from` with `to`. Returns the count.
    ///
    /// Either value may be [`NODATA`], which makes this the usual way of
    /// turning an importer's own void marker into gaps.
    pub fn replace_value(&mut self, from: f32, to: f32) -> usize {
        let mut replaced = 0;
        for idx in 0..self.cols * self.rows {
            if self.value(idx) == from {
                self.put(idx, to);
                replaced += 1;
            }
        }
        if replaced > 0 {
            self.height_range = None;
        }
        replaced
    }
}
