//! Sky vault discretization into shadow-casting patches.
//!
//! The hemisphere is split into altitude bands, each band into equally spaced
//! azimuths. Every patch carries the view-factor weight of the one-degree
//! annuli its band spans (Lindberg & Grimmond 2010), normalized so that a full
//! patch set sums to one. Switching resolution only swaps the band table.

use std::f32::consts::PI;
use std::sync::OnceLock;

use serde::Deserialize;

/// Patch set resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// 153 patches; the only set accepted by anisotropic sky consumers.
    Coarse,
    /// 655 patches.
    #[default]
    Fine,
}

impl Resolution {
    pub fn patch_count(self) -> usize {
        match self {
            Resolution::Coarse => 153,
            Resolution::Fine => 655,
        }
    }

    fn bands(self) -> &'static BandTable {
        match self {
            Resolution::Coarse => &COARSE_BANDS,
            Resolution::Fine => &FINE_BANDS,
        }
    }
}

/// Cardinal sector of the sky used for the directional SVF components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    North,
    East,
    South,
    West,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::North,
        Quadrant::East,
        Quadrant::South,
        Quadrant::West,
    ];

    /// Sector of an azimuth in degrees clockwise from north.
    /// Sectors are half-open on the counter-clockwise side: N is (315, 45].
    pub fn of_azimuth(azimuth_deg: f32) -> Quadrant {
        let az = azimuth_deg.rem_euclid(360.0);
        if az > 315.0 || az <= 45.0 {
            Quadrant::North
        } else if az <= 135.0 {
            Quadrant::East
        } else if az <= 225.0 {
            Quadrant::South
        } else {
            Quadrant::West
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Quadrant::North => 0,
            Quadrant::East => 1,
            Quadrant::South => 2,
            Quadrant::West => 3,
        }
    }
}

/// One discretized sky direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPatch {
    /// Elevation angle of the patch centre, degrees above the horizon.
    pub altitude: f32,
    /// Degrees clockwise from north, in [0, 360).
    pub azimuth: f32,
    /// Normalized view-factor weight; all weights of a set sum to one.
    pub weight: f32,
    /// `None` for the zenith patch, which belongs to every quadrant.
    pub quadrant: Option<Quadrant>,
}

impl SkyPatch {
    pub fn in_quadrant(&self, quadrant: Quadrant) -> bool {
        self.quadrant.map_or(true, |q| q == quadrant)
    }
}

/// Immutable, ordered patch enumeration for one resolution.
#[derive(Debug, Clone)]
pub struct PatchSet {
    resolution: Resolution,
    patches: Vec<SkyPatch>,
    quadrant_totals: [f32; 4],
}

impl PatchSet {
    fn build(resolution: Resolution) -> Self {
        let table = resolution.bands();
        let mut patches = Vec::with_capacity(resolution.patch_count());

        for band in 0..table.altitudes.len() {
            let count = table.counts[band];
            let weight = band_patch_weight(
                count,
                table.annulino[band] + 1,
                table.annulino[band + 1],
            );
            let interval = 360.0 / count as f32;
            let altitude = table.altitudes[band];
            for j in 0..count {
                let azimuth = (table.azimuth_starts[band] + j as f32 * interval).rem_euclid(360.0);
                let quadrant = if altitude >= 90.0 {
                    None
                } else {
                    Some(Quadrant::of_azimuth(azimuth))
                };
                patches.push(SkyPatch {
                    altitude,
                    azimuth,
                    weight,
                    quadrant,
                });
            }
        }

        // The annulus weights sum to one analytically; remove float drift.
        let total: f32 = patches.iter().map(|p| p.weight).sum();
        if total > 0.0 {
            for p in &mut patches {
                p.weight /= total;
            }
        }

        let mut quadrant_totals = [0.0_f32; 4];
        for q in Quadrant::ALL {
            quadrant_totals[q.index()] = patches
                .iter()
                .filter(|p| p.in_quadrant(q))
                .map(|p| p.weight)
                .sum();
        }

        PatchSet {
            resolution,
            patches,
            quadrant_totals,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn patches(&self) -> &[SkyPatch] {
        &self.patches
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SkyPatch> {
        self.patches.iter()
    }

    /// Weight of `patch` in the directional component of `quadrant`.
    /// Weights of one quadrant sum to one.
    pub fn quadrant_weight(&self, patch: &SkyPatch, quadrant: Quadrant) -> f32 {
        let total = self.quadrant_totals[quadrant.index()];
        if patch.in_quadrant(quadrant) && total > 0.0 {
            patch.weight / total
        } else {
            0.0
        }
    }
}

/// The shared patch set for `resolution`, built on first use.
pub fn patch_set(resolution: Resolution) -> &'static PatchSet {
    static COARSE: OnceLock<PatchSet> = OnceLock::new();
    static FINE: OnceLock<PatchSet> = OnceLock::new();
    match resolution {
        Resolution::Coarse => COARSE.get_or_init(|| PatchSet::build(Resolution::Coarse)),
        Resolution::Fine => FINE.get_or_init(|| PatchSet::build(Resolution::Fine)),
    }
}

struct BandTable {
    /// Band edges in whole degrees of altitude; band `i` spans annuli
    /// `annulino[i] + 1 ..= annulino[i + 1]`.
    annulino: &'static [i32],
    altitudes: &'static [f32],
    azimuth_starts: &'static [f32],
    counts: &'static [usize],
}

const COARSE_BANDS: BandTable = BandTable {
    annulino: &[0, 12, 24, 36, 48, 60, 72, 84, 90],
    altitudes: &[6.0, 18.0, 30.0, 42.0, 54.0, 66.0, 78.0, 90.0],
    azimuth_starts: &[0.0, 4.0, 2.0, 5.0, 8.0, 0.0, 10.0, 0.0],
    counts: &[31, 30, 28, 24, 19, 13, 7, 1],
};

const FINE_BANDS: BandTable = BandTable {
    annulino: &[0, 6, 12, 18, 24, 30, 36, 42, 48, 54, 60, 66, 72, 78, 84, 90],
    altitudes: &[
        3.0, 9.0, 15.0, 21.0, 27.0, 33.0, 39.0, 45.0, 51.0, 57.0, 63.0, 69.0, 75.0, 81.0, 90.0,
    ],
    azimuth_starts: &[
        0.0, 3.0, 0.0, 3.0, 0.0, 3.0, 0.0, 4.0, 0.0, 5.0, 0.0, 7.0, 0.0, 16.0, 0.0,
    ],
    counts: &[69, 68, 66, 64, 61, 58, 54, 49, 43, 37, 31, 25, 18, 11, 1],
};

/// View-factor weight of one patch in a band of `count` azimuths spanning
/// the one-degree annuli `first..=last` (counted from the horizon).
fn band_patch_weight(count: usize, first: i32, last: i32) -> f32 {
    let n = 90.0_f32;
    let common_w_factor = (1.0 / (2.0 * PI)) * (PI / (2.0 * n)).sin();
    let steprad = (360.0 / count as f32) * (PI / 180.0);

    let mut sin_term_sum = 0.0_f32;
    for annulus_idx in first..=last {
        let annulus = 91.0 - annulus_idx as f32;
        sin_term_sum += ((PI * (2.0 * annulus - 1.0)) / (2.0 * n)).sin();
    }

    steprad * common_w_factor * sin_term_sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_counts() {
        assert_eq!(patch_set(Resolution::Coarse).len(), 153);
        assert_eq!(patch_set(Resolution::Fine).len(), 655);
        assert_eq!(Resolution::Coarse.patch_count(), 153);
        assert_eq!(Resolution::Fine.patch_count(), 655);
    }

    #[test]
    fn test_weights_sum_to_one() {
        for res in [Resolution::Coarse, Resolution::Fine] {
            let set = patch_set(res);
            let sum: f32 = set.iter().map(|p| p.weight).sum();
            assert!((sum - 1.0).abs() < 1e-5, "{res:?}: weight sum = {sum}");
            for q in Quadrant::ALL {
                let qsum: f32 = set.iter().map(|p| set.quadrant_weight(p, q)).sum();
                assert!((qsum - 1.0).abs() < 1e-5, "{res:?} {q:?}: sum = {qsum}");
            }
        }
    }

    #[test]
    fn test_unnormalized_weights_close_to_one() {
        // The annulus scheme partitions the hemisphere before normalization.
        for res in [Resolution::Coarse, Resolution::Fine] {
            let table = res.bands();
            let raw: f32 = (0..table.counts.len())
                .map(|b| {
                    table.counts[b] as f32
                        * band_patch_weight(
                            table.counts[b],
                            table.annulino[b] + 1,
                            table.annulino[b + 1],
                        )
                })
                .sum();
            assert!((raw - 1.0).abs() < 1e-3, "{res:?}: raw sum = {raw}");
        }
    }

    #[test]
    fn test_patch_ranges() {
        for res in [Resolution::Coarse, Resolution::Fine] {
            for p in patch_set(res).iter() {
                assert!((0.0..360.0).contains(&p.azimuth));
                assert!(p.altitude > 0.0 && p.altitude <= 90.0);
                assert!(p.weight > 0.0);
            }
        }
    }

    #[test]
    fn test_zenith_in_every_quadrant() {
        let set = patch_set(Resolution::Coarse);
        let zenith = set.patches().last().unwrap();
        assert_eq!(zenith.altitude, 90.0);
        assert!(zenith.quadrant.is_none());
        for q in Quadrant::ALL {
            assert!(zenith.in_quadrant(q));
        }
    }

    #[test]
    fn test_quadrant_boundaries() {
        assert_eq!(Quadrant::of_azimuth(0.0), Quadrant::North);
        assert_eq!(Quadrant::of_azimuth(45.0), Quadrant::North);
        assert_eq!(Quadrant::of_azimuth(45.5), Quadrant::East);
        assert_eq!(Quadrant::of_azimuth(135.0), Quadrant::East);
        assert_eq!(Quadrant::of_azimuth(180.0), Quadrant::South);
        assert_eq!(Quadrant::of_azimuth(225.0), Quadrant::South);
        assert_eq!(Quadrant::of_azimuth(270.0), Quadrant::West);
        assert_eq!(Quadrant::of_azimuth(315.0), Quadrant::West);
        assert_eq!(Quadrant::of_azimuth(315.5), Quadrant::North);
        assert_eq!(Quadrant::of_azimuth(-10.0), Quadrant::North);
    }

    #[test]
    fn test_every_quadrant_populated() {
        for res in [Resolution::Coarse, Resolution::Fine] {
            let set = patch_set(res);
            for q in Quadrant::ALL {
                let n = set.iter().filter(|p| p.quadrant == Some(q)).count();
                assert!(n > 20, "{res:?} {q:?} has only {n} patches");
            }
        }
    }

    #[test]
    fn test_patch_set_is_shared() {
        let a = patch_set(Resolution::Fine) as *const PatchSet;
        let b = patch_set(Resolution::Fine) as *const PatchSet;
        assert_eq!(a, b);
    }
}
