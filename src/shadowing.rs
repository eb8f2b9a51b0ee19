//! Shadow volume casting for a single sky direction.
//!
//! The DSM is repeatedly shifted one cell further towards the patch azimuth
//! and lowered by the ray rise over that distance; a cell is occluded once
//! any shifted surface rises above it. Vegetation is cast the same way, with
//! the band between trunk and canopy surfaces as the only opaque part.

use ndarray::{par_azip, s, Array2, ArrayView2, Zip};

use crate::raster::shifted_overlap;
use crate::vegetation::Vegetation;

const PI_OVER_4: f32 = std::f32::consts::FRAC_PI_4;
const THREE_PI_OVER_4: f32 = 3.0 * PI_OVER_4;
const FIVE_PI_OVER_4: f32 = 5.0 * PI_OVER_4;
const SEVEN_PI_OVER_4: f32 = 7.0 * PI_OVER_4;

/// Sky visibility for one patch: 1.0 where the patch is visible, 0.0 where
/// it is occluded.
pub(crate) struct PatchShadows {
    pub bldg_sh: Array2<f32>,
    pub veg: Option<VegetationShadows>,
}

pub(crate) struct VegetationShadows {
    /// Visibility through vegetation. Cells already occluded by buildings
    /// count as visible here so building occlusion is not counted twice.
    pub veg_sh: Array2<f32>,
    /// 0.0 where vegetation shading is hidden behind a building shadow.
    pub veg_blocks_bldg_sh: Array2<f32>,
}

struct VegetationPass<'a> {
    canopy: ArrayView2<'a, f32>,
    trunk: ArrayView2<'a, f32>,
    veg_sh: Array2<f32>,
    veg_blocks_bldg_sh: Array2<f32>,
}

/// Cast shadows towards `azimuth_deg` (clockwise from north) at
/// `altitude_deg` above the horizon. `scale` is cells per metre and
/// `max_height` bounds how far the shadow volume is marched.
pub(crate) fn cast_shadows(
    dsm: ArrayView2<f32>,
    vegetation: Option<&Vegetation>,
    azimuth_deg: f32,
    altitude_deg: f32,
    scale: f32,
    max_height: f32,
) -> PatchShadows {
    let (num_rows, num_cols) = dsm.dim();
    let dim = (num_rows, num_cols);

    let mut veg_pass = vegetation.map(|veg| VegetationPass {
        canopy: veg.canopy(),
        trunk: veg.trunk(),
        veg_sh: veg.bush().mapv(|v| if v > 1.0 { 1.0 } else { 0.0 }),
        veg_blocks_bldg_sh: Array2::<f32>::zeros(dim),
    });

    let mut bldg_sh = Array2::<f32>::zeros(dim);
    let mut propagated_bldg_sh_height = dsm.to_owned();

    let azimuth_rad = azimuth_deg.to_radians();
    let sin_azimuth = azimuth_rad.sin();
    let cos_azimuth = azimuth_rad.cos();
    let tan_azimuth = azimuth_rad.tan();
    let sign_sin_azimuth = sin_azimuth.signum();
    let sign_cos_azimuth = cos_azimuth.signum();
    let ds_sin = (1.0 / sin_azimuth).abs();
    let ds_cos = (1.0 / cos_azimuth).abs();
    // Nothing in a 2.5D surface overhangs a cell, so the zenith only needs
    // the unshifted step.
    let tan_altitude_by_scale = if altitude_deg >= 90.0 {
        f32::MAX
    } else {
        altitude_deg.to_radians().tan() / scale
    };
    let steep = (PI_OVER_4..THREE_PI_OVER_4).contains(&azimuth_rad)
        || (FIVE_PI_OVER_4..SEVEN_PI_OVER_4).contains(&azimuth_rad);

    let mut dx: f32 = 0.0;
    let mut dy: f32 = 0.0;
    let mut dz: f32 = 0.0;
    let mut prev_dz: f32 = 0.0;
    let mut ds: f32;
    let mut index: f32 = 0.0;

    while max_height >= dz && dx.abs() < num_rows as f32 && dy.abs() < num_cols as f32 {
        if steep {
            dy = sign_sin_azimuth * index;
            dx = -1.0 * sign_cos_azimuth * (index / tan_azimuth).round().abs();
            ds = ds_sin;
        } else {
            dy = sign_sin_azimuth * (index * tan_azimuth).round().abs();
            dx = -1.0 * sign_cos_azimuth * index;
            ds = ds_cos;
        }
        dz = (ds * index) * tan_altitude_by_scale;

        if let (Some((xs, xd, xlen)), Some((ys, yd, ylen))) = (
            shifted_overlap(dx as isize, num_rows),
            shifted_overlap(dy as isize, num_cols),
        ) {
            let dsm_dst_slice = dsm.slice(s![xd..xd + xlen, yd..yd + ylen]);

            {
                let dsm_src_slice = dsm.slice(s![xs..xs + xlen, ys..ys + ylen]);
                let mut prop_bldg_h_dst_slice = propagated_bldg_sh_height
                    .slice_mut(s![xd..xd + xlen, yd..yd + ylen]);
                let mut bldg_sh_dst_slice = bldg_sh.slice_mut(s![xd..xd + xlen, yd..yd + ylen]);

                par_azip!((prop_h in &mut prop_bldg_h_dst_slice, &dsm_src in &dsm_src_slice) {
                    *prop_h = prop_h.max(dsm_src - dz);
                });

                par_azip!((bldg_sh_flag in &mut bldg_sh_dst_slice, &prop_h in &prop_bldg_h_dst_slice, &dsm_target in &dsm_dst_slice) {
                    *bldg_sh_flag = if prop_h > dsm_target { 1.0 } else { 0.0 };
                });
            }

            if let Some(vp) = veg_pass.as_mut() {
                let veg_canopy_src_slice = vp.canopy.slice(s![xs..xs + xlen, ys..ys + ylen]);
                let veg_trunk_src_slice = vp.trunk.slice(s![xs..xs + xlen, ys..ys + ylen]);
                let mut veg_sh_dst_slice = vp.veg_sh.slice_mut(s![xd..xd + xlen, yd..yd + ylen]);

                // Occluded when the target sits inside the canopy band of this
                // or the previous step, but not when it is below the trunk zone
                // (or above the canopy) for both.
                par_azip!((
                    veg_sh_flag in &mut veg_sh_dst_slice,
                    &dsm_h_target in &dsm_dst_slice,
                    &canopy in &veg_canopy_src_slice,
                    &trunk in &veg_trunk_src_slice
                ) {
                    let conditions = [
                        canopy - dz > dsm_h_target,
                        trunk - dz > dsm_h_target,
                        canopy - prev_dz > dsm_h_target,
                        trunk - prev_dz > dsm_h_target,
                    ];
                    let met = conditions.iter().filter(|&&c| c).count();
                    if met > 0 && met < 4 {
                        *veg_sh_flag = 1.0;
                    }
                });

                let bldg_sh_dst_slice_ro = bldg_sh.slice(s![xd..xd + xlen, yd..yd + ylen]);
                par_azip!((veg_sh_flag in &mut veg_sh_dst_slice, &bldg_sh_flag in &bldg_sh_dst_slice_ro) {
                    if *veg_sh_flag > 0.0 && bldg_sh_flag > 0.0 {
                        *veg_sh_flag = 0.0;
                    }
                });

                let veg_sh_dst_slice_ro = vp.veg_sh.slice(s![xd..xd + xlen, yd..yd + ylen]);
                let mut veg_blocks_bldg_sh_dst_slice = vp
                    .veg_blocks_bldg_sh
                    .slice_mut(s![xd..xd + xlen, yd..yd + ylen]);
                par_azip!((vbs_acc in &mut veg_blocks_bldg_sh_dst_slice, &veg_sh_flag in &veg_sh_dst_slice_ro) {
                    if veg_sh_flag > 0.0 {
                        *vbs_acc += veg_sh_flag;
                    }
                });
            }
        }

        prev_dz = dz;
        index += 1.0;
    }

    bldg_sh.par_mapv_inplace(|v| 1.0 - v);

    let veg = veg_pass.map(|vp| {
        let VegetationPass {
            mut veg_sh,
            mut veg_blocks_bldg_sh,
            ..
        } = vp;
        Zip::from(&mut veg_blocks_bldg_sh)
            .and(&veg_sh)
            .par_for_each(|vbs, &veg_flag| {
                let ever_shaded = if *vbs > 0.0 { 1.0 } else { 0.0 };
                let still_shaded = if veg_flag > 0.0 { 1.0 } else { 0.0 };
                *vbs = 1.0 - f32::max(ever_shaded - still_shaded, 0.0);
            });
        veg_sh.par_mapv_inplace(|v| if v > 0.0 { 0.0 } else { 1.0 });
        VegetationShadows {
            veg_sh,
            veg_blocks_bldg_sh,
        }
    });

    PatchShadows { bldg_sh, veg }
}
