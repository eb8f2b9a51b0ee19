//! Scalar configuration for the SVF and wall engines.
//!
//! Both configs deserialize from JSON with per-field defaults and must pass
//! `validate()` before a run; the engines call it themselves.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::patches::Resolution;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SvfConfig {
    /// Cells per metre.
    pub scale: f32,
    /// Share of light passing through canopy, in percent.
    pub transmissivity: f32,
    /// Trunk-zone height as a percentage of canopy height. Only used when
    /// no trunk grid is supplied.
    pub trunk_ratio: f32,
    pub resolution: Resolution,
    /// Keep per-patch visibility matrices for anisotropic sky models.
    pub anisotropic: bool,
    pub dsm_nodata: Option<f32>,
}

impl Default for SvfConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            transmissivity: 3.0,
            trunk_ratio: 25.0,
            resolution: Resolution::Fine,
            anisotropic: false,
            dsm_nodata: None,
        }
    }
}

impl SvfConfig {
    /// Configuration for anisotropic output: coarse patches plus matrices.
    pub fn anisotropic(scale: f32) -> Self {
        Self {
            scale,
            resolution: Resolution::Coarse,
            anisotropic: true,
            ..Self::default()
        }
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)
            .map_err(|e| Error::Config(format!("failed to parse SVF config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::invalid("scale", self.scale, "must be > 0"));
        }
        if !(0.0..=100.0).contains(&self.transmissivity) {
            return Err(Error::invalid(
                "transmissivity",
                self.transmissivity,
                "must be within 0..=100 percent",
            ));
        }
        if !(0.1..=99.9).contains(&self.trunk_ratio) {
            return Err(Error::invalid(
                "trunk_ratio",
                self.trunk_ratio,
                "must be within 0.1..=99.9 percent",
            ));
        }
        if self.anisotropic && self.resolution != Resolution::Coarse {
            return Err(Error::invalid(
                "anisotropic",
                self.anisotropic,
                "anisotropic output requires the coarse (153 patch) resolution",
            ));
        }
        Ok(())
    }

    /// Transmissivity as a fraction in [0, 1].
    pub fn transmissivity_fraction(&self) -> f32 {
        self.transmissivity / 100.0
    }

    pub fn trunk_ratio_fraction(&self) -> f32 {
        self.trunk_ratio / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WallConfig {
    /// Minimum height difference in metres for a wall pixel.
    pub height_threshold: f32,
    /// Degrees between evaluated filter rotations; must divide 180.
    pub rotation_step: f32,
    /// Length in cells of the directional filter line (odd, >= 3).
    pub filter_size: usize,
    pub dsm_nodata: Option<f32>,
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            height_threshold: 3.0,
            rotation_step: 1.0,
            filter_size: 9,
            dsm_nodata: None,
        }
    }
}

impl WallConfig {
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)
            .map_err(|e| Error::Config(format!("failed to parse wall config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_height_threshold(self.height_threshold)?;
        self.rotation_count()?;
        if self.filter_size < 3 || self.filter_size % 2 == 0 {
            return Err(Error::invalid(
                "filter_size",
                self.filter_size,
                "must be an odd number >= 3",
            ));
        }
        Ok(())
    }

    /// Number of filter rotations across the half circle.
    pub fn rotation_count(&self) -> Result<usize> {
        let step = self.rotation_step;
        if !(step.is_finite() && step > 0.0 && step <= 180.0) {
            return Err(Error::invalid(
                "rotation_step",
                step,
                "must be within (0, 180] degrees",
            ));
        }
        let n = 180.0 / step;
        if (n - n.round()).abs() > 1e-4 {
            return Err(Error::invalid(
                "rotation_step",
                step,
                "must evenly divide 180 degrees",
            ));
        }
        Ok(n.round() as usize)
    }
}

pub(crate) fn validate_height_threshold(threshold: f32) -> Result<()> {
    if !(threshold.is_finite() && threshold >= 0.0) {
        return Err(Error::invalid(
            "height_threshold",
            threshold,
            "must be >= 0 metres",
        ));
    }
    Ok(())
}
