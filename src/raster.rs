//! Grid preparation and small raster helpers shared by the engines.

use log::debug;
use ndarray::{Array2, ArrayView2};
use ndarray_stats::QuantileExt;

use crate::error::{Error, Result};

/// Building and ground surface model, normalized for shadow geometry.
///
/// No-data and NaN cells are set to zero; a negative minimum shifts the
/// whole grid up so the lowest cell sits at zero.
#[derive(Debug, Clone)]
pub struct Dsm {
    grid: Array2<f32>,
    max_height: f32,
}

impl Dsm {
    /// Copy `values` into a normalized DSM. The caller's grid is not touched.
    pub fn new(values: ArrayView2<f32>, nodata: Option<f32>) -> Self {
        let mut grid = values.mapv(|v| if is_nodata(v, nodata) { 0.0 } else { v });

        let min = min_value(grid.view());
        if min < 0.0 {
            debug!("DSM minimum {min} below zero, shifting grid by {}", -min);
            grid.par_mapv_inplace(|v| v - min);
        }

        let max_height = max_value(grid.view());
        Dsm { grid, max_height }
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.grid.view()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.grid.dim()
    }

    pub fn max_height(&self) -> f32 {
        self.max_height
    }
}

#[inline]
pub(crate) fn is_nodata(v: f32, nodata: Option<f32>) -> bool {
    v.is_nan() || nodata.is_some_and(|nd| v == nd)
}

/// Largest value of a NaN-free grid, zero for an empty one.
pub(crate) fn max_value(grid: ArrayView2<f32>) -> f32 {
    grid.max().map_or(0.0, |v| *v)
}

fn min_value(grid: ArrayView2<f32>) -> f32 {
    grid.min().map_or(0.0, |v| *v)
}

/// Fail with `ExtentMismatch` unless `grid` has the DSM's row/column count.
pub(crate) fn ensure_same_extent(
    name: &'static str,
    expected: (usize, usize),
    grid: ArrayView2<f32>,
) -> Result<()> {
    let actual = grid.dim();
    if actual != expected {
        return Err(Error::ExtentMismatch {
            name,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Overlap of a grid axis with itself shifted by `offset` cells, such that
/// `dst[start_dst + k]` reads `src[start_src + k]` with `src = dst + offset`.
///
/// Returns `(start_src, start_dst, len)`, or `None` when nothing overlaps.
#[inline]
pub(crate) fn shifted_overlap(offset: isize, size: usize) -> Option<(usize, usize, usize)> {
    let n = size as isize;
    if offset.abs() >= n {
        return None;
    }
    if offset >= 0 {
        Some((offset as usize, 0, (n - offset) as usize))
    } else {
        Some((0, (-offset) as usize, (n + offset) as usize))
    }
}

/// Bilinear sample at fractional `(row, col)`; coordinates are clamped to
/// the grid so edge values extend outward.
pub(crate) fn sample_bilinear(grid: &ArrayView2<f32>, row: f32, col: f32) -> f32 {
    let (rows, cols) = grid.dim();
    if rows == 0 || cols == 0 {
        return 0.0;
    }
    let y = row.clamp(0.0, (rows - 1) as f32);
    let x = col.clamp(0.0, (cols - 1) as f32);

    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(rows - 1);
    let x1 = (x0 + 1).min(cols - 1);
    let wy = y - y0 as f32;
    let wx = x - x0 as f32;

    grid[[y0, x0]] * (1.0 - wx) * (1.0 - wy)
        + grid[[y0, x1]] * wx * (1.0 - wy)
        + grid[[y1, x0]] * (1.0 - wx) * wy
        + grid[[y1, x1]] * wx * wy
}
