//! Replacing missing samples in a [`HeightGrid`].
//!
//! All strategies share one contract: the grid is modified in place, only
//! [`NODATA`] samples are ever written, and only samples inside the requested
//! area are read or written. The [`Progress`] observer is polled once per
//! processed line; cancelling keeps everything committed so far.
//!
//! # Strategies
//!
//! - [`FillStrategy::Sweep`]: fast. Alternating passes over columns and rows,
//!   each gap takes the mean of its valid 3×3 neighbours.
//! - [`FillStrategy::Smooth`]: 5×5 neighbourhood, double-buffered so a pass
//!   never sees its own results.
//! - [`FillStrategy::RegionGrowing`]: slowest, best quality. Extrapolates the
//!   local slope from every valid neighbour, one pass per radius.

use tracing::{debug, info};

use crate::error::{try_alloc, Result};
use crate::grid::{GridRect, HeightGrid, NODATA};
use crate::progress::{Progress, Signal};

/// Minimum number of valid 3×3 neighbours for a sweep patch.
const SWEEP_MIN_NEIGHBOURS: usize = 2;

/// Minimum number of valid 5×5 neighbours for a smooth patch.
const SMOOTH_MIN_NEIGHBOURS: usize = 5;

/// Gap filling algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStrategy {
    /// In-place 3×3 averaging, repeated to a fixed point.
    Sweep,
    /// Double-buffered 5×5 averaging.
    Smooth,
    /// Slope-extrapolating region growing over `min_radius..=max_radius`.
    RegionGrowing { min_radius: usize, max_radius: usize },
}

/// Result of a gap filling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The algorithm ran to completion.
    Completed { filled: usize },
    /// The progress observer asked to stop; `filled` samples were committed.
    Cancelled { filled: usize },
}

impl FillOutcome {
    /// Number of samples that were filled.
    pub fn filled(&self) -> usize {
        match *self {
            FillOutcome::Completed { filled } | FillOutcome::Cancelled { filled } => filled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FillOutcome::Cancelled { .. })
    }
}

/// Fill missing samples of `grid` inside `area` (the whole grid if `None`).
///
/// # Errors
///
/// Returns [`crate::TerrainError::AllocationFailure`] if a working buffer
/// cannot be reserved. The grid is left untouched by the failing pass.
///
/// # Example
///
/// ```
/// use heixel::{fill_gaps, Extent, FillStrategy, HeightGrid, NoProgress, ValueMode, NODATA};
///
/// let mut grid = HeightGrid::allocate(3, 3, Extent::new(0.0, 2.0, 0.0, 2.0), ValueMode::Float32)?;
/// for row in 0..3 {
///     for col in 0..3 {
///         grid.set_sample(col, row, 10.0)?;
///     }
/// }
/// grid.set_sample(1, 1, NODATA)?;
///
/// let outcome = fill_gaps(&mut grid, None, FillStrategy::Sweep, &mut NoProgress)?;
/// assert_eq!(outcome.filled(), 1);
/// assert_eq!(grid.get_sample(1, 1)?, 10.0);
/// # Ok::<(), heixel::TerrainError>(())
/// ```
pub fn fill_gaps<P: Progress + ?Sized>(
    grid: &mut HeightGrid,
    area: Option<GridRect>,
    strategy: FillStrategy,
    progress: &mut P,
) -> Result<FillOutcome> {
    let requested = area.unwrap_or_else(|| grid.full_rect());
    let rect = match requested.clamp_to(grid.cols(), grid.rows()) {
        Some(rect) => rect,
        None => return Ok(FillOutcome::Completed { filled: 0 }),
    };

    let outcome = match strategy {
        FillStrategy::Sweep => fill_sweep(grid, rect, progress)?,
        FillStrategy::Smooth => fill_smooth(grid, rect, progress)?,
        FillStrategy::RegionGrowing {
            min_radius,
            max_radius,
        } => fill_region_growing(grid, rect, min_radius, max_radius, progress)?,
    };

    info!(?strategy, ?outcome, "gap filling finished");
    Ok(outcome)
}

/// Working view of a rectangle of a grid.
struct Window<'a> {
    grid: &'a HeightGrid,
    rect: GridRect,
}

impl Window<'_> {
    /// Linear grid index of the rect-relative cell `(c, r)`.
    #[inline]
    fn index(&self, c: usize, r: usize) -> usize {
        (self.rect.min_row + r) * self.grid.cols() + self.rect.min_col + c
    }

    #[inline]
    fn get(&self, c: usize, r: usize) -> f32 {
        self.grid.value(self.index(c, r))
    }

    /// Mean of the valid samples within `radius` of `(c, r)`, excluding the
    /// cell itself, if at least `min_count` are valid.
    fn neighbourhood_mean(
        &self,
        c: usize,
        r: usize,
        radius: usize,
        min_count: usize,
    ) -> Option<f32> {
        let c_lo = c.saturating_sub(radius);
        let r_lo = r.saturating_sub(radius);
        let c_hi = (c + radius).min(self.rect.cols() - 1);
        let r_hi = (r + radius).min(self.rect.rows() - 1);

        let mut sum = 0.0f64;
        let mut count = 0;
        for rr in r_lo..=r_hi {
            for cc in c_lo..=c_hi {
                if cc == c && rr == r {
                    continue;
                }
                let v = self.get(cc, rr);
                if v != NODATA {
                    sum += v as f64;
                    count += 1;
                }
            }
        }
        (count >= min_count).then(|| (sum / count as f64) as f32)
    }
}

fn fill_sweep<P: Progress + ?Sized>(
    grid: &mut HeightGrid,
    rect: GridRect,
    progress: &mut P,
) -> Result<FillOutcome> {
    let cols = rect.cols();
    let rows = rect.rows();
    let mut col_gaps = try_alloc(cols, false)?;
    let mut row_gaps = try_alloc(rows, false)?;

    let mut gaps = 0usize;
    {
        let window = Window { grid, rect };
        for r in 0..rows {
            for c in 0..cols {
                if window.get(c, r) == NODATA {
                    col_gaps[c] = true;
                    row_gaps[r] = true;
                    gaps += 1;
                }
            }
        }
    }
    if gaps == 0 {
        return Ok(FillOutcome::Completed { filled: 0 });
    }

    let mut filled = 0usize;
    let mut iteration = 0usize;
    loop {
        let filled_before = filled;
        let forward = iteration % 2 == 0;

        // Columns first, then rows; the direction flips every iteration.
        for pass_over_cols in [true, false] {
            let (lines, cells) = if pass_over_cols { (cols, rows) } else { (rows, cols) };
            for k in 0..lines {
                let line = if forward { k } else { lines - 1 - k };
                let line_has_gaps = if pass_over_cols {
                    &mut col_gaps[line]
                } else {
                    &mut row_gaps[line]
                };
                if !*line_has_gaps {
                    continue;
                }
                *line_has_gaps = false;

                for m in 0..cells {
                    let cell = if forward { m } else { cells - 1 - m };
                    let (c, r) = if pass_over_cols { (line, cell) } else { (cell, line) };
                    let window = Window { grid, rect };
                    if window.get(c, r) != NODATA {
                        continue;
                    }
                    match window.neighbourhood_mean(c, r, 1, SWEEP_MIN_NEIGHBOURS) {
                        Some(mean) => {
                            let idx = window.index(c, r);
                            grid.put(idx, mean);
                            filled += 1;
                        }
                        None => {
                            col_gaps[c] = true;
                            row_gaps[r] = true;
                        }
                    }
                }

                if progress.report(filled as f64 / gaps as f64) == Signal::Cancel {
                    return Ok(FillOutcome::Cancelled { filled });
                }
            }
        }

        debug!(iteration, filled, remaining = gaps - filled, "sweep pass");
        if filled == gaps || filled == filled_before {
            break;
        }
        iteration += 1;
    }

    Ok(FillOutcome::Completed { filled })
}

fn fill_smooth<P: Progress + ?Sized>(
    grid: &mut HeightGrid,
    rect: GridRect,
    progress: &mut P,
) -> Result<FillOutcome> {
    let cols = rect.cols();
    let rows = rect.rows();
    let mut pending = try_alloc(cols * rows, NODATA)?;

    let mut gaps = 0usize;
    {
        let window = Window { grid, rect };
        for r in 0..rows {
            for c in 0..cols {
                if window.get(c, r) == NODATA {
                    gaps += 1;
                }
            }
        }
    }

    let mut filled = 0usize;
    let mut pass = 0usize;
    while gaps > 0 {
        let mut pass_filled = 0usize;
        {
            let window = Window { grid, rect };
            for r in 0..rows {
                for c in 0..cols {
                    if window.get(c, r) != NODATA {
                        continue;
                    }
                    let mean = window.neighbourhood_mean(c, r, 2, SMOOTH_MIN_NEIGHBOURS);
                    if let Some(mean) = mean {
                        pending[r * cols + c] = mean;
                        pass_filled += 1;
                    }
                }
                if progress.report((r + 1) as f64 / rows as f64) == Signal::Cancel {
                    return Ok(FillOutcome::Cancelled { filled });
                }
            }
        }

        if pass_filled == 0 {
            break;
        }

        for r in 0..rows {
            for c in 0..cols {
                let v = std::mem::replace(&mut pending[r * cols + c], NODATA);
                if v != NODATA {
                    let idx = (rect.min_row + r) * grid.cols() + rect.min_col + c;
                    grid.put(idx, v);
                }
            }
        }
        filled += pass_filled;
        gaps -= pass_filled;
        debug!(pass, pass_filled, remaining = gaps, "smooth pass");
        pass += 1;
    }

    Ok(FillOutcome::Completed { filled })
}

/// Sliding-window sums of `input` (a `len`-long line with stride `stride`
/// starting at `start`) over `±radius`, written to `output` with the same
/// layout. `prefix` is scratch space of at least `len + 1` entries.
fn window_sums(
    input: &[u32],
    output: &mut [u32],
    prefix: &mut [u32],
    start: usize,
    stride: usize,
    len: usize,
    radius: usize,
) {
    prefix[0] = 0;
    for i in 0..len {
        prefix[i + 1] = prefix[i] + input[start + i * stride];
    }
    for i in 0..len {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius).min(len - 1);
        output[start + i * stride] = prefix[hi + 1] - prefix[lo];
    }
}

/// Average first difference along one axis inside the window, in meters per
/// cell. Pairs with a missing sample are skipped.
fn mean_gradient(window: &Window<'_>, c: usize, r: usize, radius: usize, along_x: bool) -> f64 {
    let c_lo = c.saturating_sub(radius);
    let r_lo = r.saturating_sub(radius);
    let c_hi = (c + radius).min(window.rect.cols() - 1);
    let r_hi = (r + radius).min(window.rect.rows() - 1);

    let mut sum = 0.0;
    let mut count = 0usize;
    for rr in r_lo..=r_hi {
        for cc in c_lo..=c_hi {
            let (nc, nr) = if along_x { (cc + 1, rr) } else { (cc, rr + 1) };
            if nc > c_hi || nr > r_hi {
                continue;
            }
            let a = window.get(cc, rr);
            let b = window.get(nc, nr);
            if a != NODATA && b != NODATA {
                sum += (b - a) as f64;
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Slope-extrapolated estimate for the gap at `(c, r)`.
fn extrapolate(window: &Window<'_>, c: usize, r: usize, radius: usize) -> Option<f32> {
    let dzdx = mean_gradient(window, c, r, radius, true);
    let dzdy = mean_gradient(window, c, r, radius, false);

    let c_lo = c.saturating_sub(radius);
    let r_lo = r.saturating_sub(radius);
    let c_hi = (c + radius).min(window.rect.cols() - 1);
    let r_hi = (r + radius).min(window.rect.rows() - 1);

    let mut sum = 0.0;
    let mut weight = 0.0;
    for rr in r_lo..=r_hi {
        for cc in c_lo..=c_hi {
            let v = window.get(cc, rr);
            if v == NODATA {
                continue;
            }
            let m = cc as f64 - c as f64;
            let n = rr as f64 - r as f64;
            let candidate = v as f64 - m * dzdx - n * dzdy;
            let w = 1.0 / (m * m + n * n);
            sum += candidate * w;
            weight += w;
        }
    }
    (weight > 0.0).then(|| (sum / weight) as f32)
}

/// Valid neighbours needed in the `(2r+1)²` window, or `None` on overflow.
fn majority_threshold(radius: usize) -> Option<u64> {
    let side = u64::try_from(radius).ok()?.checked_mul(2)?.checked_add(1)?;
    Some(side.checked_mul(side)?.checked_add(1)? / 2)
}

fn fill_region_growing<P: Progress + ?Sized>(
    grid: &mut HeightGrid,
    rect: GridRect,
    min_radius: usize,
    max_radius: usize,
    progress: &mut P,
) -> Result<FillOutcome> {
    let cols = rect.cols();
    let rows = rect.rows();
    let min_radius = min_radius.max(1);
    // Past the longer side the window already spans the whole area.
    let max_radius = max_radius.min(cols.max(rows));
    if min_radius > max_radius {
        return Ok(FillOutcome::Completed { filled: 0 });
    }

    let cells = cols * rows;
    let mut valid = try_alloc(cells, 0u32)?;
    let mut horizontal = try_alloc(cells, 0u32)?;
    let mut counts = try_alloc(cells, 0u32)?;
    let mut prefix = try_alloc(cols.max(rows) + 1, 0u32)?;
    let mut pending: Vec<(usize, f32)> = Vec::new();

    let radius_count = (max_radius - min_radius + 1) as f64;
    let mut filled = 0usize;

    for radius in min_radius..=max_radius {
        let threshold = match majority_threshold(radius) {
            Some(t) if t <= cells as u64 => t,
            // No cell can reach the majority at this or any larger radius.
            _ => break,
        };

        let window = Window { grid, rect };
        for r in 0..rows {
            for c in 0..cols {
                valid[r * cols + c] = u32::from(window.get(c, r) != NODATA);
            }
        }

        // Separable count of valid neighbours: rows, then columns.
        for r in 0..rows {
            window_sums(&valid, &mut horizontal, &mut prefix, r * cols, 1, cols, radius);
        }
        for c in 0..cols {
            window_sums(&horizontal, &mut counts, &mut prefix, c, cols, rows, radius);
        }

        pending.clear();
        for r in 0..rows {
            for c in 0..cols {
                let i = r * cols + c;
                if valid[i] != 0 || u64::from(counts[i]) < threshold {
                    continue;
                }
                if let Some(v) = extrapolate(&window, c, r, radius) {
                    pending.push((window.index(c, r), v));
                }
            }
            let fraction = ((radius - min_radius) as f64 + (r + 1) as f64 / rows as f64)
                / radius_count;
            if progress.report(fraction) == Signal::Cancel {
                return Ok(FillOutcome::Cancelled { filled });
            }
        }

        for &(idx, v) in &pending {
            grid.put(idx, v);
        }
        filled += pending.len();
        debug!(radius, pass_filled = pending.len(), "region growing pass");
    }

    Ok(FillOutcome::Completed { filled })
}
