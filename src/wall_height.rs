//! Wall pixel detection from height discontinuities in a DSM.

use log::info;
use ndarray::{s, Array2, ArrayView2, Zip};

use crate::config::{validate_height_threshold, WallConfig};
use crate::error::Result;
use crate::raster::is_nodata;

/// Mark wall pixels in `dsm`.
///
/// An interior cell is a wall when its absolute height difference to any of
/// its four orthogonal neighbours is strictly greater than `height_threshold`
/// (metres); the cell then carries the largest such difference. Every other
/// cell, the boundary ring included, is NaN. NaN DSM cells never form walls
/// and are ignored as neighbours.
pub fn find_walls(dsm: ArrayView2<f32>, height_threshold: f32) -> Result<Array2<f32>> {
    validate_height_threshold(height_threshold)?;

    let (rows, cols) = dsm.dim();
    let mut walls = Array2::<f32>::from_elem((rows, cols), f32::NAN);
    if rows < 3 || cols < 3 {
        return Ok(walls);
    }

    let centre = dsm.slice(s![1..rows - 1, 1..cols - 1]);
    let north = dsm.slice(s![0..rows - 2, 1..cols - 1]);
    let south = dsm.slice(s![2..rows, 1..cols - 1]);
    let west = dsm.slice(s![1..rows - 1, 0..cols - 2]);
    let east = dsm.slice(s![1..rows - 1, 2..cols]);

    Zip::from(walls.slice_mut(s![1..rows - 1, 1..cols - 1]))
        .and(&centre)
        .and(&north)
        .and(&south)
        .and(&west)
        .and(&east)
        .par_for_each(|wall, &c, &n, &s, &w, &e| {
            // f32::max drops NaN differences
            let height = [n, s, w, e]
                .into_iter()
                .fold(0.0_f32, |acc, nb| acc.max((c - nb).abs()));
            if height > height_threshold {
                *wall = height;
            }
        });

    let count = walls.iter().filter(|h| !h.is_nan()).count();
    info!("Found {count} wall pixels above {height_threshold} m");
    Ok(walls)
}

/// [`find_walls`] driven by a [`WallConfig`]: cells equal to
/// `config.dsm_nodata` are treated as missing, like NaN, so the edge of a
/// no-data region never reads as a wall.
pub fn find_walls_with_config(dsm: ArrayView2<f32>, config: &WallConfig) -> Result<Array2<f32>> {
    config.validate()?;
    if config.dsm_nodata.is_none() {
        return find_walls(dsm, config.height_threshold);
    }
    let masked = dsm.mapv(|v| if is_nodata(v, config.dsm_nodata) { f32::NAN } else { v });
    find_walls(masked.view(), config.height_threshold)
}
