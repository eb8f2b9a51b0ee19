//! Vegetation canopy and trunk-zone grids prepared for shadow casting.

use log::debug;
use ndarray::{Array2, ArrayView2, Zip};

use crate::error::Result;
use crate::raster::{ensure_same_extent, max_value, Dsm};

/// Canopy, trunk-zone and bush surfaces lifted onto the DSM.
///
/// Inputs are heights above ground. A cell without canopy keeps elevation
/// zero in every layer so it never casts a vegetation shadow.
#[derive(Debug, Clone)]
pub struct Vegetation {
    canopy: Array2<f32>,
    trunk: Array2<f32>,
    bush: Array2<f32>,
    max_height: f32,
}

impl Vegetation {
    /// Prepare vegetation for `dsm`. Without a trunk grid the trunk zone is
    /// `canopy * trunk_ratio` (a fraction of canopy height).
    pub fn new(
        dsm: &Dsm,
        canopy: ArrayView2<f32>,
        trunk: Option<ArrayView2<f32>>,
        trunk_ratio: f32,
    ) -> Result<Self> {
        let dim = dsm.dim();
        ensure_same_extent("vegetation canopy", dim, canopy)?;
        if let Some(t) = trunk {
            ensure_same_extent("vegetation trunk", dim, t)?;
        }

        let canopy_h = canopy.mapv(sanitize_height);
        let mut trunk_h = match trunk {
            Some(t) => t.mapv(sanitize_height),
            None => {
                debug!("No trunk-zone grid, using {:.1}% of canopy height", trunk_ratio * 100.0);
                canopy_h.mapv(|h| h * trunk_ratio)
            }
        };
        // The trunk zone lies inside the canopy column.
        Zip::from(&mut trunk_h).and(&canopy_h).for_each(|t, &c| *t = t.min(c));

        let canopy = lift_onto_dsm(canopy_h.view(), dsm.view());
        let trunk = lift_onto_dsm(trunk_h.view(), dsm.view());
        let bush = prepare_bushes(canopy.view(), trunk.view());
        let max_height = max_value(canopy.view());

        Ok(Vegetation {
            canopy,
            trunk,
            bush,
            max_height,
        })
    }

    /// Canopy top elevation, zero where there is no vegetation.
    pub fn canopy(&self) -> ArrayView2<'_, f32> {
        self.canopy.view()
    }

    /// Elevation of the canopy's lower boundary, zero where none.
    pub fn trunk(&self) -> ArrayView2<'_, f32> {
        self.trunk.view()
    }

    /// Canopy elevation of vegetation without a trunk zone.
    pub fn bush(&self) -> ArrayView2<'_, f32> {
        self.bush.view()
    }

    pub fn max_height(&self) -> f32 {
        self.max_height
    }
}

fn sanitize_height(h: f32) -> f32 {
    if h.is_finite() && h > 0.0 {
        h
    } else {
        0.0
    }
}

fn lift_onto_dsm(heights: ArrayView2<f32>, dsm: ArrayView2<f32>) -> Array2<f32> {
    let mut lifted = Array2::<f32>::zeros(heights.raw_dim());
    Zip::from(&mut lifted)
        .and(&heights)
        .and(&dsm)
        .par_for_each(|out, &h, &ground| {
            *out = if h > 0.0 { h + ground } else { 0.0 };
        });
    lifted
}

fn prepare_bushes(canopy: ArrayView2<f32>, trunk: ArrayView2<f32>) -> Array2<f32> {
    let mut bush_areas = Array2::<f32>::zeros(canopy.raw_dim());
    Zip::from(&mut bush_areas)
        .and(&canopy)
        .and(&trunk)
        .par_for_each(|bush, &v1, &v2| {
            *bush = if v2 > 0.0 { 0.0 } else { v1 };
        });
    bush_areas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use ndarray::array;

    #[test]
    fn test_trunk_derived_from_ratio() {
        let dsm = Dsm::new(array![[2.0, 2.0], [2.0, 2.0]].view(), None);
        let canopy = array![[8.0, 0.0], [4.0, 0.0]];
        let veg = Vegetation::new(&dsm, canopy.view(), None, 0.25).unwrap();
        assert_eq!(veg.canopy(), array![[10.0, 0.0], [6.0, 0.0]].view());
        assert_eq!(veg.trunk(), array![[4.0, 0.0], [3.0, 0.0]].view());
        assert_eq!(veg.bush(), Array2::<f32>::zeros((2, 2)).view());
        assert_eq!(veg.max_height(), 10.0);
    }

    #[test]
    fn test_bush_where_no_trunk() {
        let dsm = Dsm::new(Array2::<f32>::zeros((1, 3)).view(), None);
        let canopy = array![[3.0, 6.0, f32::NAN]];
        let trunk = array![[0.0, 2.0, 1.0]];
        let veg = Vegetation::new(&dsm, canopy.view(), Some(trunk.view()), 0.25).unwrap();
        assert_eq!(veg.bush(), array![[3.0, 0.0, 0.0]].view());
        assert_eq!(veg.canopy(), array![[3.0, 6.0, 0.0]].view());
        // No trunk zone where there is no canopy
        assert_eq!(veg.trunk(), array![[0.0, 2.0, 0.0]].view());
    }

    #[test]
    fn test_extent_mismatch_names_grid() {
        let dsm = Dsm::new(Array2::<f32>::zeros((3, 3)).view(), None);
        let canopy = Array2::<f32>::zeros((3, 3));
        let trunk = Array2::<f32>::zeros((3, 2));
        let err = Vegetation::new(&dsm, canopy.view(), Some(trunk.view()), 0.25).unwrap_err();
        assert!(matches!(err, Error::ExtentMismatch { name: "vegetation trunk", .. }));

        let small = Array2::<f32>::zeros((2, 3));
        let err = Vegetation::new(&dsm, small.view(), None, 0.25).unwrap_err();
        assert!(matches!(err, Error::ExtentMismatch { name: "vegetation canopy", .. }));
    }
}
