//! Urban morphometry from digital surface models: sky view factor with
//! vegetation and anisotropic shadow matrices, plus wall height and aspect
//! detection.
//!
//! All engines take `ndarray` grids of equal extent, validate their
//! configuration before touching any cell, and never modify caller grids.

pub mod config;
pub mod error;
pub mod patches;
pub mod progress;
pub mod raster;
mod shadowing;
pub mod skyview;
pub mod vegetation;
pub mod wall_aspect;
pub mod wall_height;

#[cfg(feature = "python")]
mod python;

pub use config::{SvfConfig, WallConfig};
pub use error::{Error, Result};
pub use patches::{patch_set, PatchSet, Quadrant, Resolution, SkyPatch};
pub use progress::{NoProgress, Outcome, Progress, ProgressCounter};
pub use raster::Dsm;
pub use skyview::{
    compute_svf, compute_svf_with_progress, DirectionalSvf, ShadowKind, ShadowMatrices,
    SvfComponents, SvfResult, VegetationSvf,
};
pub use vegetation::Vegetation;
pub use wall_aspect::{wall_aspect, wall_aspect_with_progress};
pub use wall_height::{find_walls, find_walls_with_config};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn urbangeom(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register_skyview_module(py_module)?;
    python::register_walls_module(py_module)?;
    py_module.add(
        "__doc__",
        "Sky view factor and wall detection for urban surface models.",
    )?;
    Ok(())
}
