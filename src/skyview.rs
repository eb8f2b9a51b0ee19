//! Sky view factor engine.
//!
//! Shadows are cast once per sky patch and the per-cell visibility is summed
//! with the patch weights into an isotropic SVF and four directional
//! components. Patches are visited in patch-set order, so repeated runs give
//! identical grids.

use log::{debug, info, warn};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, Zip};

use crate::config::SvfConfig;
use crate::error::{Error, Result};
use crate::patches::{patch_set, PatchSet, Quadrant, Resolution, SkyPatch};
use crate::progress::{NoProgress, Outcome, Progress};
use crate::raster::Dsm;
use crate::shadowing::{cast_shadows, PatchShadows};
use crate::vegetation::Vegetation;

/// Per-quadrant SVF grids.
#[derive(Debug, Clone)]
pub struct DirectionalSvf {
    pub north: Array2<f32>,
    pub east: Array2<f32>,
    pub south: Array2<f32>,
    pub west: Array2<f32>,
}

impl DirectionalSvf {
    fn zeros(dim: (usize, usize)) -> Self {
        Self {
            north: Array2::zeros(dim),
            east: Array2::zeros(dim),
            south: Array2::zeros(dim),
            west: Array2::zeros(dim),
        }
    }

    pub fn get(&self, quadrant: Quadrant) -> &Array2<f32> {
        match quadrant {
            Quadrant::North => &self.north,
            Quadrant::East => &self.east,
            Quadrant::South => &self.south,
            Quadrant::West => &self.west,
        }
    }

    /// Cell-wise mean of the four quadrants.
    pub fn mean(&self) -> Array2<f32> {
        let mut mean = Array2::<f32>::zeros(self.north.raw_dim());
        Zip::from(&mut mean)
            .and(&self.north)
            .and(&self.east)
            .and(&self.south)
            .and(&self.west)
            .par_for_each(|m, &n, &e, &s, &w| *m = (n + e + s + w) / 4.0);
        mean
    }
}

/// Isotropic SVF with its directional breakdown.
#[derive(Debug, Clone)]
pub struct SvfComponents {
    pub isotropic: Array2<f32>,
    pub directional: DirectionalSvf,
}

impl SvfComponents {
    fn zeros(dim: (usize, usize)) -> Self {
        Self {
            isotropic: Array2::zeros(dim),
            directional: DirectionalSvf::zeros(dim),
        }
    }

    fn accumulate(&mut self, visibility: &Array2<f32>, pw: &PatchWeights) {
        let d = &mut self.directional;
        Zip::from(visibility)
            .and(&mut self.isotropic)
            .and(&mut d.north)
            .and(&mut d.east)
            .and(&mut d.south)
            .and(&mut d.west)
            .par_for_each(|&v, svf, svf_n, svf_e, svf_s, svf_w| {
                *svf += pw.weight_iso * v;
                *svf_n += pw.weight_n * v;
                *svf_e += pw.weight_e * v;
                *svf_s += pw.weight_s * v;
                *svf_w += pw.weight_w * v;
            });
    }

    fn clamp(&mut self) {
        let d = &mut self.directional;
        for grid in [
            &mut self.isotropic,
            &mut d.north,
            &mut d.east,
            &mut d.south,
            &mut d.west,
        ] {
            grid.par_mapv_inplace(|x| x.clamp(0.0, 1.0));
        }
    }
}

/// SVF grids derived from vegetation.
#[derive(Debug, Clone)]
pub struct VegetationSvf {
    /// Sky visible through vegetation only.
    pub veg: SvfComponents,
    /// Vegetation occlusion that is not already hidden behind buildings.
    pub aveg: SvfComponents,
    /// Building SVF reduced by canopy opacity.
    pub total: Array2<f32>,
}

/// Which per-patch visibility a shadow matrix holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowKind {
    Building,
    Vegetation,
    VegetationBlocksBuilding,
}

/// Per-cell, per-patch sky visibility for anisotropic sky models.
///
/// Each matrix has shape `(rows, cols, ceil(patches / 8))`; bit `p & 7` of
/// byte `p >> 3` is set when patch `p` is visible from the cell.
#[derive(Debug, Clone)]
pub struct ShadowMatrices {
    patch_count: usize,
    building: Array3<u8>,
    vegetation: Array3<u8>,
    veg_blocks_bldg: Array3<u8>,
}

impl ShadowMatrices {
    fn zeros(dim: (usize, usize), patch_count: usize) -> Self {
        let shape = (dim.0, dim.1, pack_bytes(patch_count));
        Self {
            patch_count,
            building: Array3::zeros(shape),
            vegetation: Array3::zeros(shape),
            veg_blocks_bldg: Array3::zeros(shape),
        }
    }

    pub fn patch_count(&self) -> usize {
        self.patch_count
    }

    pub fn matrix(&self, kind: ShadowKind) -> &Array3<u8> {
        match kind {
            ShadowKind::Building => &self.building,
            ShadowKind::Vegetation => &self.vegetation,
            ShadowKind::VegetationBlocksBuilding => &self.veg_blocks_bldg,
        }
    }

    pub fn is_visible(&self, kind: ShadowKind, row: usize, col: usize, patch: usize) -> bool {
        self.matrix(kind)[[row, col, patch >> 3]] & (1 << (patch & 7)) != 0
    }

    /// Unpacked `(rows, cols, patches)` matrix of 0/1 values.
    pub fn to_dense(&self, kind: ShadowKind) -> Array3<u8> {
        let packed = self.matrix(kind);
        let (rows, cols, _) = packed.dim();
        Array3::from_shape_fn((rows, cols, self.patch_count), |(r, c, p)| {
            (packed[[r, c, p >> 3]] >> (p & 7)) & 1
        })
    }

    /// Building, vegetation and vegetation-blocks-building matrices.
    pub fn into_parts(self) -> (Array3<u8>, Array3<u8>, Array3<u8>) {
        (self.building, self.vegetation, self.veg_blocks_bldg)
    }

    fn record(&mut self, patch_idx: usize, shadows: &PatchShadows) {
        set_patch_bit(&mut self.building, patch_idx, &shadows.bldg_sh);
        if let Some(veg) = &shadows.veg {
            set_patch_bit(&mut self.vegetation, patch_idx, &veg.veg_sh);
            set_patch_bit(&mut self.veg_blocks_bldg, patch_idx, &veg.veg_blocks_bldg_sh);
        }
    }
}

/// Number of packed bytes needed for n_patches: ceil(n / 8).
#[inline(always)]
fn pack_bytes(n_patches: usize) -> usize {
    (n_patches + 7) / 8
}

/// Packed bytes with the bit of every patch set and the padding bits of the
/// last byte clear.
fn all_visible_bytes(n_patches: usize) -> Array1<u8> {
    let mut bytes = Array1::from_elem(pack_bytes(n_patches), 0xFFu8);
    let tail = n_patches & 7;
    if tail != 0 {
        let last = bytes.len() - 1;
        bytes[last] = (1u8 << tail) - 1;
    }
    bytes
}

fn set_patch_bit(matrix: &mut Array3<u8>, patch_idx: usize, visibility: &Array2<f32>) {
    let bit_mask = 1u8 << (patch_idx & 7);
    let mut plane = matrix.index_axis_mut(Axis(2), patch_idx >> 3);
    Zip::from(&mut plane)
        .and(visibility)
        .par_for_each(|byte, &v| {
            if v >= 0.5 {
                *byte |= bit_mask;
            }
        });
}

/// All outputs of one SVF run. Vegetation grids are present exactly when a
/// canopy grid was supplied; shadow matrices exactly when anisotropic output
/// was requested.
#[derive(Debug, Clone)]
pub struct SvfResult {
    pub building: SvfComponents,
    pub vegetation: Option<VegetationSvf>,
    pub shadow_matrices: Option<ShadowMatrices>,
    pub resolution: Resolution,
}

impl SvfResult {
    /// Combined SVF: `svftotal` with vegetation, the building SVF without.
    pub fn total(&self) -> &Array2<f32> {
        match &self.vegetation {
            Some(v) => &v.total,
            None => &self.building.isotropic,
        }
    }

    /// Output grids under their conventional raster names.
    pub fn named_grids(&self) -> Vec<(&'static str, &Array2<f32>)> {
        let b = &self.building;
        let mut grids = vec![
            ("svf", &b.isotropic),
            ("svfN", &b.directional.north),
            ("svfE", &b.directional.east),
            ("svfS", &b.directional.south),
            ("svfW", &b.directional.west),
        ];
        if let Some(v) = &self.vegetation {
            grids.extend([
                ("svfveg", &v.veg.isotropic),
                ("svfNveg", &v.veg.directional.north),
                ("svfEveg", &v.veg.directional.east),
                ("svfSveg", &v.veg.directional.south),
                ("svfWveg", &v.veg.directional.west),
                ("svfaveg", &v.aveg.isotropic),
                ("svfNaveg", &v.aveg.directional.north),
                ("svfEaveg", &v.aveg.directional.east),
                ("svfSaveg", &v.aveg.directional.south),
                ("svfWaveg", &v.aveg.directional.west),
                ("svftotal", &v.total),
            ]);
        }
        grids
    }
}

/// Isotropic and per-quadrant weights of one patch.
struct PatchWeights {
    weight_iso: f32,
    weight_n: f32,
    weight_e: f32,
    weight_s: f32,
    weight_w: f32,
}

impl PatchWeights {
    fn new(set: &PatchSet, patch: &SkyPatch) -> Self {
        Self {
            weight_iso: patch.weight,
            weight_n: set.quadrant_weight(patch, Quadrant::North),
            weight_e: set.quadrant_weight(patch, Quadrant::East),
            weight_s: set.quadrant_weight(patch, Quadrant::South),
            weight_w: set.quadrant_weight(patch, Quadrant::West),
        }
    }
}

struct SvfAccumulator {
    building: SvfComponents,
    veg: Option<(SvfComponents, SvfComponents)>,
    matrices: Option<ShadowMatrices>,
}

impl SvfAccumulator {
    fn new(dim: (usize, usize), with_vegetation: bool, matrix_patches: Option<usize>) -> Self {
        Self {
            building: SvfComponents::zeros(dim),
            veg: with_vegetation.then(|| (SvfComponents::zeros(dim), SvfComponents::zeros(dim))),
            matrices: matrix_patches.map(|n| ShadowMatrices::zeros(dim, n)),
        }
    }

    fn add(&mut self, patch_idx: usize, pw: &PatchWeights, shadows: &PatchShadows) {
        self.building.accumulate(&shadows.bldg_sh, pw);
        if let (Some((veg, aveg)), Some(sh)) = (self.veg.as_mut(), shadows.veg.as_ref()) {
            veg.accumulate(&sh.veg_sh, pw);
            aveg.accumulate(&sh.veg_blocks_bldg_sh, pw);
        }
        if let Some(m) = self.matrices.as_mut() {
            m.record(patch_idx, shadows);
        }
    }

    fn finish(self, transmissivity: f32, resolution: Resolution) -> SvfResult {
        let SvfAccumulator {
            mut building,
            veg,
            mut matrices,
        } = self;
        building.clamp();

        let vegetation = veg.map(|(mut veg, mut aveg)| {
            veg.clamp();
            aveg.clamp();
            let mut total = Array2::<f32>::zeros(building.isotropic.raw_dim());
            Zip::from(&mut total)
                .and(&building.isotropic)
                .and(&veg.isotropic)
                .par_for_each(|t, &svf, &svf_veg| {
                    *t = (svf - (1.0 - svf_veg) * (1.0 - transmissivity)).clamp(0.0, 1.0);
                });
            VegetationSvf { veg, aveg, total }
        });

        // Without vegetation only buildings block the sky.
        if vegetation.is_none() {
            if let Some(m) = matrices.as_mut() {
                let visible = all_visible_bytes(m.patch_count);
                for mut lane in m.vegetation.lanes_mut(Axis(2)) {
                    lane.assign(&visible);
                }
                m.veg_blocks_bldg.assign(&m.building);
            }
        }

        SvfResult {
            building,
            vegetation,
            shadow_matrices: matrices,
            resolution,
        }
    }
}

/// Compute SVF for `dsm` with optional canopy and trunk-zone grids (heights
/// above ground, same extent as `dsm`).
pub fn compute_svf(
    dsm: ArrayView2<f32>,
    canopy: Option<ArrayView2<f32>>,
    trunk: Option<ArrayView2<f32>>,
    config: &SvfConfig,
) -> Result<SvfResult> {
    match compute_svf_with_progress(dsm, canopy, trunk, config, &NoProgress)? {
        Outcome::Complete(result) => Ok(result),
        // NoProgress never cancels
        Outcome::Cancelled { partial, .. } => Ok(partial),
    }
}

/// As [`compute_svf`], reporting after every patch and stopping early when
/// `progress` asks to cancel. A cancelled run returns the grids summed so far.
pub fn compute_svf_with_progress(
    dsm: ArrayView2<f32>,
    canopy: Option<ArrayView2<f32>>,
    trunk: Option<ArrayView2<f32>>,
    config: &SvfConfig,
    progress: &dyn Progress,
) -> Result<Outcome<SvfResult>> {
    config.validate()?;
    if trunk.is_some() && canopy.is_none() {
        return Err(Error::invalid(
            "trunk",
            "supplied",
            "a trunk-zone grid requires a canopy grid",
        ));
    }

    let dsm = Dsm::new(dsm, config.dsm_nodata);
    let dim = dsm.dim();
    let vegetation = canopy
        .map(|c| Vegetation::new(&dsm, c, trunk, config.trunk_ratio_fraction()))
        .transpose()?;

    let patches = patch_set(config.resolution);
    let total = patches.len();
    let max_height = match &vegetation {
        Some(veg) => dsm.max_height().max(veg.max_height()),
        None => dsm.max_height(),
    };
    info!(
        "Computing SVF on {}x{} grid with {} sky patches{}",
        dim.0,
        dim.1,
        total,
        if vegetation.is_some() { ", vegetation enabled" } else { "" }
    );
    debug!("Shadow casting bounded by max height {max_height:.2} m");

    let mut acc = SvfAccumulator::new(
        dim,
        vegetation.is_some(),
        config.anisotropic.then_some(total),
    );
    let transmissivity = config.transmissivity_fraction();

    progress.update(0, total);
    for (patch_idx, patch) in patches.iter().enumerate() {
        if progress.is_cancelled() {
            warn!("SVF computation cancelled after {patch_idx} of {total} patches");
            return Ok(Outcome::Cancelled {
                partial: acc.finish(transmissivity, config.resolution),
                completed: patch_idx,
                total,
            });
        }

        let shadows = cast_shadows(
            dsm.view(),
            vegetation.as_ref(),
            patch.azimuth,
            patch.altitude,
            config.scale,
            max_height,
        );
        acc.add(patch_idx, &PatchWeights::new(patches, patch), &shadows);
        progress.update(patch_idx + 1, total);
    }

    Ok(Outcome::Complete(acc.finish(transmissivity, config.resolution)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressCounter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coarse() -> SvfConfig {
        SvfConfig {
            resolution: Resolution::Coarse,
            ..SvfConfig::default()
        }
    }

    /// Flat ground with a single tall cell in the centre.
    fn spike(size: usize, height: f32) -> Array2<f32> {
        let mut dsm = Array2::<f32>::zeros((size, size));
        dsm[[size / 2, size / 2]] = height;
        dsm
    }

    fn assert_all_close(grid: &Array2<f32>, expected: f32, tol: f32, what: &str) {
        for (idx, &v) in grid.indexed_iter() {
            assert!((v - expected).abs() < tol, "{what} at {idx:?} = {v}");
        }
    }

    #[test]
    fn test_flat_dsm_sees_full_sky() {
        let dsm = Array2::<f32>::from_elem((10, 10), 12.0);
        for res in [Resolution::Coarse, Resolution::Fine] {
            let config = SvfConfig {
                resolution: res,
                ..SvfConfig::default()
            };
            let result = compute_svf(dsm.view(), None, None, &config).unwrap();
            assert_all_close(&result.building.isotropic, 1.0, 1e-5, "svf");
            for q in Quadrant::ALL {
                assert_all_close(result.building.directional.get(q), 1.0, 1e-5, "directional");
            }
            assert!(result.vegetation.is_none());
            assert!(result.shadow_matrices.is_none());
            assert_eq!(result.total(), &result.building.isotropic);
        }
    }

    #[test]
    fn test_spike_svf_rises_with_distance() {
        let dsm = spike(41, 30.0);
        let result = compute_svf(dsm.view(), None, None, &coarse()).unwrap();
        let svf = &result.building.isotropic;

        let adjacent = svf[[20, 21]];
        let far = svf[[20, 40]];
        assert!(adjacent < far, "adjacent {adjacent} >= far {far}");
        assert!(far > 0.95, "far cell {far}");
        for c in 21..40 {
            assert!(
                svf[[20, c]] <= svf[[20, c + 1]] + 1e-6,
                "svf drops from col {c} to {}",
                c + 1
            );
        }
        // The occluded sector is towards the spike
        assert!(result.building.directional.west[[20, 21]] < result.building.directional.east[[20, 21]]);
    }

    #[test]
    fn test_directional_mean_tracks_isotropic() {
        let dsm = spike(41, 30.0);
        let result = compute_svf(dsm.view(), None, None, &coarse()).unwrap();
        let mean = result.building.directional.mean();
        Zip::indexed(&mean)
            .and(&result.building.isotropic)
            .for_each(|idx, &m, &iso| {
                assert!((m - iso).abs() < 0.05, "mean {m} vs iso {iso} at {idx:?}");
            });
    }

    #[test]
    fn test_resolutions_converge() {
        let dsm = spike(31, 15.0);
        let coarse_svf = compute_svf(dsm.view(), None, None, &coarse()).unwrap();
        let fine_svf = compute_svf(dsm.view(), None, None, &SvfConfig::default()).unwrap();
        let c = &coarse_svf.building.isotropic;
        let f = &fine_svf.building.isotropic;

        let mean_c = c.mean().unwrap();
        let mean_f = f.mean().unwrap();
        assert!((mean_c - mean_f).abs() < 0.02, "{mean_c} vs {mean_f}");
        assert!((c[[15, 25]] - f[[15, 25]]).abs() < 0.05);
        // Both see the spike
        assert!(c[[15, 16]] < c[[15, 25]]);
        assert!(f[[15, 16]] < f[[15, 25]]);
    }

    fn canopy_block() -> Array2<f32> {
        let mut canopy = Array2::<f32>::zeros((25, 25));
        canopy.slice_mut(ndarray::s![10..15, 10..15]).fill(8.0);
        canopy
    }

    #[test]
    fn test_fully_transparent_vegetation_has_no_effect() {
        let dsm = spike(25, 10.0);
        let canopy = canopy_block();
        let config = SvfConfig {
            transmissivity: 100.0,
            ..coarse()
        };
        let result = compute_svf(dsm.view(), Some(canopy.view()), None, &config).unwrap();
        let veg = result.vegetation.as_ref().unwrap();
        assert_eq!(&veg.total, &result.building.isotropic);
        // Vegetation still occludes in its own grid
        assert!(veg.veg.isotropic[[12, 17]] < 1.0);
    }

    #[test]
    fn test_opaque_vegetation_total_equals_vegetation_svf() {
        let dsm = Array2::<f32>::zeros((25, 25));
        let canopy = canopy_block();
        let config = SvfConfig {
            transmissivity: 0.0,
            ..coarse()
        };
        let result = compute_svf(dsm.view(), Some(canopy.view()), None, &config).unwrap();
        let veg = result.vegetation.as_ref().unwrap();
        Zip::indexed(&veg.total)
            .and(&veg.veg.isotropic)
            .for_each(|idx, &t, &v| assert!((t - v).abs() < 1e-5, "{t} vs {v} at {idx:?}"));
        assert!(veg.total[[12, 17]] < 0.95);
        assert_all_close(&result.building.isotropic, 1.0, 1e-5, "building svf");
        // Nothing hides the canopy from the ground
        assert_all_close(&veg.aveg.isotropic, 1.0, 1e-5, "aveg");
    }

    #[test]
    fn test_default_transmissivity_blends() {
        let dsm = Array2::<f32>::zeros((25, 25));
        let canopy = canopy_block();
        let result = compute_svf(dsm.view(), Some(canopy.view()), None, &coarse()).unwrap();
        let veg = result.vegetation.unwrap();
        let (svf, svf_veg) = (1.0_f32, veg.veg.isotropic[[12, 17]]);
        let expected = svf - (1.0 - svf_veg) * 0.97;
        assert!((veg.total[[12, 17]] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_named_grids() {
        let dsm = Array2::<f32>::zeros((6, 6));
        let bare = compute_svf(dsm.view(), None, None, &coarse()).unwrap();
        let names: Vec<_> = bare.named_grids().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["svf", "svfN", "svfE", "svfS", "svfW"]);

        let canopy = Array2::<f32>::from_elem((6, 6), 2.0);
        let with_veg = compute_svf(dsm.view(), Some(canopy.view()), None, &coarse()).unwrap();
        let grids = with_veg.named_grids();
        assert_eq!(grids.len(), 16);
        assert_eq!(grids[5].0, "svfveg");
        assert_eq!(grids[10].0, "svfaveg");
        assert_eq!(grids[15].0, "svftotal");
        assert_eq!(with_veg.total(), grids[15].1);
    }

    #[test]
    fn test_shadow_matrices_match_svf() {
        let dsm = spike(15, 12.0);
        let result = compute_svf(dsm.view(), None, None, &SvfConfig::anisotropic(1.0)).unwrap();
        let m = result.shadow_matrices.as_ref().unwrap();
        assert_eq!(m.patch_count(), 153);
        assert_eq!(m.matrix(ShadowKind::Building).dim(), (15, 15, 20));

        let set = patch_set(Resolution::Coarse);
        for (r, c) in [(7, 8), (7, 9), (2, 3), (0, 14)] {
            let from_bits: f32 = set
                .iter()
                .enumerate()
                .filter(|(p, _)| m.is_visible(ShadowKind::Building, r, c, *p))
                .map(|(_, patch)| patch.weight)
                .sum();
            let svf = result.building.isotropic[[r, c]];
            assert!((from_bits - svf).abs() < 1e-4, "{from_bits} vs {svf} at ({r}, {c})");
        }

        // Without vegetation the other matrices carry no extra occlusion
        let dense_veg = m.to_dense(ShadowKind::Vegetation);
        assert_eq!(dense_veg.dim(), (15, 15, 153));
        assert!(dense_veg.iter().all(|&b| b == 1));
        assert_eq!(
            m.matrix(ShadowKind::VegetationBlocksBuilding),
            m.matrix(ShadowKind::Building)
        );
        // 153 patches leave seven padding bits in the last byte, clear in
        // every matrix
        for kind in [
            ShadowKind::Building,
            ShadowKind::Vegetation,
            ShadowKind::VegetationBlocksBuilding,
        ] {
            assert!(
                m.matrix(kind)
                    .index_axis(Axis(2), 19)
                    .iter()
                    .all(|&b| (b & 0xFE) == 0),
                "{kind:?}"
            );
        }
        assert!(m
            .matrix(ShadowKind::Vegetation)
            .index_axis(Axis(2), 19)
            .iter()
            .all(|&b| b == 0x01));
        // Nothing lies west of the grid edge
        let west_low = set
            .iter()
            .position(|p| p.altitude < 10.0 && p.quadrant == Some(Quadrant::West))
            .unwrap();
        assert!(m.is_visible(ShadowKind::Building, 0, 0, west_low));
    }

    #[test]
    fn test_rejects_bad_inputs_before_casting() {
        let dsm = Array2::<f32>::zeros((5, 5));
        let wrong = Array2::<f32>::zeros((5, 4));
        let err = compute_svf(dsm.view(), Some(wrong.view()), None, &coarse()).unwrap_err();
        assert!(matches!(err, Error::ExtentMismatch { name: "vegetation canopy", .. }));

        let err = compute_svf(dsm.view(), None, Some(dsm.view()), &coarse()).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "trunk", .. }));

        let fine_aniso = SvfConfig {
            anisotropic: true,
            ..SvfConfig::default()
        };
        assert!(compute_svf(dsm.view(), None, None, &fine_aniso).is_err());

        let counter = ProgressCounter::new();
        let bad_scale = SvfConfig {
            scale: -1.0,
            ..coarse()
        };
        assert!(compute_svf_with_progress(dsm.view(), None, None, &bad_scale, &counter).is_err());
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_nodata_cells_treated_as_ground() {
        let mut dsm = Array2::<f32>::zeros((8, 8));
        dsm[[3, 3]] = -9999.0;
        dsm[[4, 4]] = f32::NAN;
        let config = SvfConfig {
            dsm_nodata: Some(-9999.0),
            ..coarse()
        };
        let result = compute_svf(dsm.view(), None, None, &config).unwrap();
        assert_all_close(&result.building.isotropic, 1.0, 1e-5, "svf");
        assert_eq!(dsm[[3, 3]], -9999.0);
    }

    #[test]
    fn test_empty_grid() {
        let dsm = Array2::<f32>::zeros((0, 0));
        let result = compute_svf(dsm.view(), None, None, &coarse()).unwrap();
        assert_eq!(result.building.isotropic.dim(), (0, 0));
    }

    struct CancelAfter {
        limit: usize,
        seen: AtomicUsize,
    }

    impl Progress for CancelAfter {
        fn update(&self, completed: usize, _total: usize) {
            self.seen.store(completed, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.seen.load(Ordering::SeqCst) >= self.limit
        }
    }

    #[test]
    fn test_cancel_returns_partial() {
        let dsm = Array2::<f32>::zeros((6, 6));
        let progress = CancelAfter {
            limit: 3,
            seen: AtomicUsize::new(0),
        };
        let outcome = compute_svf_with_progress(dsm.view(), None, None, &coarse(), &progress).unwrap();
        match outcome {
            Outcome::Cancelled {
                partial,
                completed,
                total,
            } => {
                assert_eq!(completed, 3);
                assert_eq!(total, 153);
                // Only three patches summed
                assert!(partial.building.isotropic[[2, 2]] < 0.5);
            }
            Outcome::Complete(_) => panic!("run was not cancelled"),
        }
    }

    #[test]
    fn test_counter_reaches_total() {
        let dsm = Array2::<f32>::zeros((4, 4));
        let counter = ProgressCounter::new();
        let outcome = compute_svf_with_progress(dsm.view(), None, None, &coarse(), &counter).unwrap();
        assert!(outcome.is_complete());
        assert_eq!(counter.completed(), 153);
        assert_eq!(counter.fraction(), 1.0);

        counter.cancel();
        let outcome = compute_svf_with_progress(dsm.view(), None, None, &coarse(), &counter).unwrap();
        assert!(matches!(outcome, Outcome::Cancelled { completed: 0, .. }));
    }
}
