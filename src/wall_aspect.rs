//! Wall aspect (orientation) from a wall grid and the DSM.
//!
//! A line filter is rotated through a half circle around every wall pixel;
//! the rotation that covers the most wall pixels gives the wall line. The
//! DSM on either side of that line then decides which way the wall faces.
//!
//! References:
//! - Goodwin NR, Coops NC, Tooke TR, Christen A, Voogt JA (2009)
//! - Lindberg F., Jonsson, P. & Honjo, T. and Wästberg, D. (2015b)

use std::sync::atomic::{AtomicUsize, Ordering};

use log::{info, warn};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::config::WallConfig;
use crate::error::Result;
use crate::progress::{NoProgress, Outcome, Progress};
use crate::raster::{ensure_same_extent, sample_bilinear, Dsm};

/// One filter rotation: line bearing in degrees clockwise from north and the
/// (row, col) cell offsets it covers, centre included.
struct LineFilter {
    bearing: f32,
    offsets: Vec<(isize, isize)>,
}

fn precompute_filters(rotations: usize, step: f32, filter_size: usize) -> Vec<LineFilter> {
    let reach = (filter_size / 2) as isize;
    (0..rotations)
        .map(|k| {
            let bearing = k as f32 * step;
            let (sin_b, cos_b) = f64::from(bearing).to_radians().sin_cos();
            // North is decreasing row index
            let offsets = (-reach..=reach)
                .map(|d| {
                    let d = d as f64;
                    ((-d * cos_b).round() as isize, (d * sin_b).round() as isize)
                })
                .collect();
            LineFilter { bearing, offsets }
        })
        .collect()
}

/// Wall pixels of `mask` under `filter` centred on (row, col).
fn aligned_walls(mask: &ArrayView2<bool>, filter: &LineFilter, row: usize, col: usize) -> usize {
    filter
        .offsets
        .iter()
        .filter(|&&(dr, dc)| {
            let (r, c) = (row as isize + dr, col as isize + dc);
            r >= 0 && c >= 0 && mask.get((r as usize, c as usize)).copied().unwrap_or(false)
        })
        .count()
}

/// Bearing of the wall line through (row, col), [0, 180).
///
/// On a raster several neighbouring rotations cover the same number of wall
/// pixels; their axial mean is taken instead of the first of them.
fn wall_line_bearing(mask: &ArrayView2<bool>, filters: &[LineFilter], row: usize, col: usize) -> f32 {
    let mut best = 0;
    let (mut sum_sin, mut sum_cos) = (0.0f32, 0.0f32);
    for filter in filters {
        let count = aligned_walls(mask, filter, row, col);
        if count > best {
            best = count;
            sum_sin = 0.0;
            sum_cos = 0.0;
        }
        if count == best {
            let (s, c) = (2.0 * filter.bearing).to_radians().sin_cos();
            sum_sin += s;
            sum_cos += c;
        }
    }
    (0.5 * sum_sin.atan2(sum_cos).to_degrees()).rem_euclid(180.0)
}

/// Summed DSM height ahead of (row, col) along `bearing` minus the height
/// behind it, over `reach` cells each way.
fn side_contrast(dsm: &ArrayView2<f32>, bearing: f32, reach: usize, row: usize, col: usize) -> f32 {
    let (sin_b, cos_b) = bearing.to_radians().sin_cos();
    let (r, c) = (row as f32, col as f32);
    (1..=reach)
        .map(|d| {
            let (dr, dc) = (-(d as f32) * cos_b, d as f32 * sin_b);
            sample_bilinear(dsm, r + dr, c + dc) - sample_bilinear(dsm, r - dr, c - dc)
        })
        .sum()
}

/// Bearing from the pixel towards the raised side, or `None` when both
/// sides of the wall line stand equally high.
fn pixel_aspect(
    dsm: &ArrayView2<f32>,
    mask: &ArrayView2<bool>,
    filters: &[LineFilter],
    reach: usize,
    row: usize,
    col: usize,
) -> Option<f32> {
    let normal = wall_line_bearing(mask, filters, row, col) + 90.0;
    let contrast = side_contrast(dsm, normal, reach, row, col);
    if contrast > 0.0 {
        Some(normal.rem_euclid(360.0))
    } else if contrast < 0.0 {
        Some((normal + 180.0).rem_euclid(360.0))
    } else {
        None
    }
}

/// Aspect in degrees clockwise from north, [0, 360), for every wall pixel of
/// `wall_heights` (finite and > 0); NaN elsewhere. The bearing points from
/// the wall pixel towards the raised side of the discontinuity.
pub fn wall_aspect(
    wall_heights: ArrayView2<f32>,
    dsm: ArrayView2<f32>,
    config: &WallConfig,
) -> Result<Array2<f32>> {
    match wall_aspect_with_progress(wall_heights, dsm, config, &NoProgress)? {
        Outcome::Complete(aspect) => Ok(aspect),
        // NoProgress never cancels
        Outcome::Cancelled { partial, .. } => Ok(partial),
    }
}

/// As [`wall_aspect`], reporting per wall pixel. On cancellation the
/// pixels finished so far are kept and the rest stay NaN.
pub fn wall_aspect_with_progress(
    wall_heights: ArrayView2<f32>,
    dsm: ArrayView2<f32>,
    config: &WallConfig,
    progress: &dyn Progress,
) -> Result<Outcome<Array2<f32>>> {
    config.validate()?;
    let rotations = config.rotation_count()?;
    ensure_same_extent("wall heights", dsm.dim(), wall_heights)?;

    let dsm = Dsm::new(dsm, config.dsm_nodata);
    let dsm_view = dsm.view();
    let filters = precompute_filters(rotations, config.rotation_step, config.filter_size);
    let reach = config.filter_size / 2;
    let mask = wall_heights.mapv(|h| h.is_finite() && h > 0.0);
    let mask_view = mask.view();

    let wall_pixels: Vec<(usize, usize)> = mask
        .indexed_iter()
        .filter(|(_, &wall)| wall)
        .map(|(idx, _)| idx)
        .collect();
    let total = wall_pixels.len();
    info!(
        "Computing aspect for {total} wall pixels over {rotations} rotations of {}°",
        config.rotation_step
    );

    progress.update(0, total);
    let processed = AtomicUsize::new(0);
    let results: Vec<(usize, usize, Option<f32>)> = wall_pixels
        .par_iter()
        .filter_map(|&(i, j)| {
            if progress.is_cancelled() {
                return None;
            }
            let aspect = pixel_aspect(&dsm_view, &mask_view, &filters, reach, i, j);
            let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
            progress.update(count, total);
            Some((i, j, aspect))
        })
        .collect();

    let mut aspect = Array2::<f32>::from_elem(wall_heights.dim(), f32::NAN);
    for &(i, j, a) in &results {
        if let Some(a) = a {
            aspect[[i, j]] = a;
        }
    }

    let completed = results.len();
    if completed < total {
        warn!("Wall aspect cancelled after {completed} of {total} wall pixels");
        return Ok(Outcome::Cancelled {
            partial: aspect,
            completed,
            total,
        });
    }
    Ok(Outcome::Complete(aspect))
}
