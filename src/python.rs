//! Python bindings consumed by the QGIS processing wrappers.
//!
//! Inputs are copied out of numpy before the GIL is released, so a runner's
//! `progress()` and `cancel()` can be called from another Python thread while
//! a computation is in flight.

use ndarray::Array2;
use numpy::{IntoPyArray, PyArray2, PyArray3, PyReadonlyArray2};
use pyo3::exceptions::{PyInterruptedError, PyValueError};
use pyo3::prelude::*;

use crate::config::{SvfConfig, WallConfig};
use crate::error::Error;
use crate::patches::Resolution;
use crate::progress::{NoProgress, Outcome, Progress, ProgressCounter};
use crate::skyview::{self, SvfResult};
use crate::{wall_aspect, wall_height};

impl From<Error> for PyErr {
    fn from(err: Error) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

fn into_complete<T>(outcome: Outcome<T>, what: &str) -> PyResult<T> {
    match outcome {
        Outcome::Complete(value) => Ok(value),
        Outcome::Cancelled {
            completed, total, ..
        } => Err(PyInterruptedError::new_err(format!(
            "{what} cancelled after {completed} of {total}"
        ))),
    }
}

fn grid(py: Python<'_>, a: Array2<f32>) -> Py<PyArray2<f32>> {
    a.into_pyarray(py).unbind()
}

/// SVF grids handed back to Python. Vegetation fields are `None` when no
/// canopy grid was given, matrices are `None` unless anisotropic output
/// was requested.
#[pyclass(name = "SvfResult")]
pub struct PySvfResult {
    #[pyo3(get)]
    pub svf: Py<PyArray2<f32>>,
    #[pyo3(get)]
    pub svf_north: Py<PyArray2<f32>>,
    #[pyo3(get)]
    pub svf_east: Py<PyArray2<f32>>,
    #[pyo3(get)]
    pub svf_south: Py<PyArray2<f32>>,
    #[pyo3(get)]
    pub svf_west: Py<PyArray2<f32>>,
    #[pyo3(get)]
    pub svf_veg: Option<Py<PyArray2<f32>>>,
    #[pyo3(get)]
    pub svf_veg_north: Option<Py<PyArray2<f32>>>,
    #[pyo3(get)]
    pub svf_veg_east: Option<Py<PyArray2<f32>>>,
    #[pyo3(get)]
    pub svf_veg_south: Option<Py<PyArray2<f32>>>,
    #[pyo3(get)]
    pub svf_veg_west: Option<Py<PyArray2<f32>>>,
    #[pyo3(get)]
    pub svf_veg_blocks_bldg_sh: Option<Py<PyArray2<f32>>>,
    #[pyo3(get)]
    pub svf_veg_blocks_bldg_sh_north: Option<Py<PyArray2<f32>>>,
    #[pyo3(get)]
    pub svf_veg_blocks_bldg_sh_east: Option<Py<PyArray2<f32>>>,
    #[pyo3(get)]
    pub svf_veg_blocks_bldg_sh_south: Option<Py<PyArray2<f32>>>,
    #[pyo3(get)]
    pub svf_veg_blocks_bldg_sh_west: Option<Py<PyArray2<f32>>>,
    /// `svftotal` with vegetation, otherwise the building SVF.
    #[pyo3(get)]
    pub svf_total: Py<PyArray2<f32>>,
    #[pyo3(get)]
    pub bldg_sh_matrix: Option<Py<PyArray3<u8>>>,
    #[pyo3(get)]
    pub veg_sh_matrix: Option<Py<PyArray3<u8>>>,
    #[pyo3(get)]
    pub veg_blocks_bldg_sh_matrix: Option<Py<PyArray3<u8>>>,
    #[pyo3(get)]
    pub patch_count: usize,
}

fn svf_result_to_py(py: Python<'_>, result: SvfResult) -> PyResult<Py<PySvfResult>> {
    let svf_total = grid(py, result.total().clone());
    let SvfResult {
        building,
        vegetation,
        shadow_matrices,
        resolution,
    } = result;

    let (veg, aveg) = match vegetation {
        Some(v) => (Some(v.veg), Some(v.aveg)),
        None => (None, None),
    };
    let (veg_iso, veg_n, veg_e, veg_s, veg_w) = match veg {
        Some(c) => (
            Some(grid(py, c.isotropic)),
            Some(grid(py, c.directional.north)),
            Some(grid(py, c.directional.east)),
            Some(grid(py, c.directional.south)),
            Some(grid(py, c.directional.west)),
        ),
        None => (None, None, None, None, None),
    };
    let (aveg_iso, aveg_n, aveg_e, aveg_s, aveg_w) = match aveg {
        Some(c) => (
            Some(grid(py, c.isotropic)),
            Some(grid(py, c.directional.north)),
            Some(grid(py, c.directional.east)),
            Some(grid(py, c.directional.south)),
            Some(grid(py, c.directional.west)),
        ),
        None => (None, None, None, None, None),
    };
    let (bldg_m, veg_m, vbsh_m) = match shadow_matrices {
        Some(m) => {
            let (b, v, vb) = m.into_parts();
            (
                Some(b.into_pyarray(py).unbind()),
                Some(v.into_pyarray(py).unbind()),
                Some(vb.into_pyarray(py).unbind()),
            )
        }
        None => (None, None, None),
    };

    Py::new(
        py,
        PySvfResult {
            svf: grid(py, building.isotropic),
            svf_north: grid(py, building.directional.north),
            svf_east: grid(py, building.directional.east),
            svf_south: grid(py, building.directional.south),
            svf_west: grid(py, building.directional.west),
            svf_veg: veg_iso,
            svf_veg_north: veg_n,
            svf_veg_east: veg_e,
            svf_veg_south: veg_s,
            svf_veg_west: veg_w,
            svf_veg_blocks_bldg_sh: aveg_iso,
            svf_veg_blocks_bldg_sh_north: aveg_n,
            svf_veg_blocks_bldg_sh_east: aveg_e,
            svf_veg_blocks_bldg_sh_south: aveg_s,
            svf_veg_blocks_bldg_sh_west: aveg_w,
            svf_total,
            bldg_sh_matrix: bldg_m,
            veg_sh_matrix: veg_m,
            veg_blocks_bldg_sh_matrix: vbsh_m,
            patch_count: resolution.patch_count(),
        },
    )
}

fn svf_config(
    scale: f32,
    transmissivity: f32,
    trunk_ratio: f32,
    patch_count: usize,
    anisotropic: bool,
    dsm_nodata: Option<f32>,
) -> PyResult<SvfConfig> {
    let resolution = match patch_count {
        153 => Resolution::Coarse,
        655 => Resolution::Fine,
        other => {
            return Err(PyValueError::new_err(format!(
                "patch_count must be 153 or 655, got {other}"
            )))
        }
    };
    Ok(SvfConfig {
        scale,
        transmissivity,
        trunk_ratio,
        resolution,
        anisotropic,
        dsm_nodata,
    })
}

fn run_svf(
    py: Python<'_>,
    dsm: PyReadonlyArray2<f32>,
    canopy: Option<PyReadonlyArray2<f32>>,
    trunk: Option<PyReadonlyArray2<f32>>,
    config: SvfConfig,
    progress: &dyn Progress,
) -> PyResult<Py<PySvfResult>> {
    let dsm_owned = dsm.as_array().to_owned();
    let canopy_owned = canopy.map(|c| c.as_array().to_owned());
    let trunk_owned = trunk.map(|t| t.as_array().to_owned());

    let outcome = py.allow_threads(|| {
        skyview::compute_svf_with_progress(
            dsm_owned.view(),
            canopy_owned.as_ref().map(|c| c.view()),
            trunk_owned.as_ref().map(|t| t.view()),
            &config,
            progress,
        )
    })?;
    let result = into_complete(outcome, "SVF computation")?;
    svf_result_to_py(py, result)
}

/// Sky view factor for a DSM with optional canopy and trunk-zone grids.
#[pyfunction]
#[pyo3(signature = (
    dsm,
    canopy=None,
    trunk=None,
    scale=1.0,
    transmissivity=3.0,
    trunk_ratio=25.0,
    patch_count=655,
    anisotropic=false,
    dsm_nodata=None
))]
#[allow(clippy::too_many_arguments)]
pub fn calculate_svf(
    py: Python<'_>,
    dsm: PyReadonlyArray2<f32>,
    canopy: Option<PyReadonlyArray2<f32>>,
    trunk: Option<PyReadonlyArray2<f32>>,
    scale: f32,
    transmissivity: f32,
    trunk_ratio: f32,
    patch_count: usize,
    anisotropic: bool,
    dsm_nodata: Option<f32>,
) -> PyResult<Py<PySvfResult>> {
    let config = svf_config(
        scale,
        transmissivity,
        trunk_ratio,
        patch_count,
        anisotropic,
        dsm_nodata,
    )?;
    run_svf(py, dsm, canopy, trunk, config, &NoProgress)
}

/// SVF runner exposing pollable `progress()` (patches done) and `cancel()`.
#[pyclass]
#[derive(Default)]
pub struct SkyviewRunner {
    progress: ProgressCounter,
}

#[pymethods]
impl SkyviewRunner {
    #[new]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> usize {
        self.progress.completed()
    }

    pub fn total(&self) -> usize {
        self.progress.total()
    }

    pub fn cancel(&self) {
        self.progress.cancel();
    }

    #[pyo3(signature = (
        dsm,
        canopy=None,
        trunk=None,
        scale=1.0,
        transmissivity=3.0,
        trunk_ratio=25.0,
        patch_count=655,
        anisotropic=false,
        dsm_nodata=None
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_svf(
        &self,
        py: Python<'_>,
        dsm: PyReadonlyArray2<f32>,
        canopy: Option<PyReadonlyArray2<f32>>,
        trunk: Option<PyReadonlyArray2<f32>>,
        scale: f32,
        transmissivity: f32,
        trunk_ratio: f32,
        patch_count: usize,
        anisotropic: bool,
        dsm_nodata: Option<f32>,
    ) -> PyResult<Py<PySvfResult>> {
        let config = svf_config(
            scale,
            transmissivity,
            trunk_ratio,
            patch_count,
            anisotropic,
            dsm_nodata,
        )?;
        self.progress.reset();
        run_svf(py, dsm, canopy, trunk, config, &self.progress)
    }
}

/// Wall heights (NaN where no wall). Cells equal to `dsm_nodata` are
/// treated as missing.
#[pyfunction]
#[pyo3(signature = (dsm, height_threshold=3.0, dsm_nodata=None))]
pub fn find_walls(
    py: Python<'_>,
    dsm: PyReadonlyArray2<f32>,
    height_threshold: f32,
    dsm_nodata: Option<f32>,
) -> PyResult<Py<PyArray2<f32>>> {
    let config = WallConfig {
        height_threshold,
        dsm_nodata,
        ..WallConfig::default()
    };
    let dsm_owned = dsm.as_array().to_owned();
    let walls =
        py.allow_threads(|| wall_height::find_walls_with_config(dsm_owned.view(), &config))?;
    Ok(grid(py, walls))
}

fn run_wall_aspect(
    py: Python<'_>,
    walls: PyReadonlyArray2<f32>,
    dsm: PyReadonlyArray2<f32>,
    config: WallConfig,
    progress: &dyn Progress,
) -> PyResult<Py<PyArray2<f32>>> {
    let walls_owned = walls.as_array().to_owned();
    let dsm_owned = dsm.as_array().to_owned();
    let outcome = py.allow_threads(|| {
        wall_aspect::wall_aspect_with_progress(
            walls_owned.view(),
            dsm_owned.view(),
            &config,
            progress,
        )
    })?;
    let aspect = into_complete(outcome, "Wall aspect computation")?;
    Ok(grid(py, aspect))
}

/// Wall aspect in degrees from north (NaN where no wall).
#[pyfunction]
#[pyo3(signature = (walls, dsm, rotation_step=1.0, filter_size=9, dsm_nodata=None))]
pub fn compute_wall_aspect(
    py: Python<'_>,
    walls: PyReadonlyArray2<f32>,
    dsm: PyReadonlyArray2<f32>,
    rotation_step: f32,
    filter_size: usize,
    dsm_nodata: Option<f32>,
) -> PyResult<Py<PyArray2<f32>>> {
    let config = WallConfig {
        rotation_step,
        filter_size,
        dsm_nodata,
        ..WallConfig::default()
    };
    run_wall_aspect(py, walls, dsm, config, &NoProgress)
}

/// Wall aspect runner with pollable `progress()` (wall pixels done) and
/// `cancel()`.
#[pyclass]
#[derive(Default)]
pub struct WallAspectRunner {
    progress: ProgressCounter,
}

#[pymethods]
impl WallAspectRunner {
    #[new]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> usize {
        self.progress.completed()
    }

    pub fn total(&self) -> usize {
        self.progress.total()
    }

    pub fn cancel(&self) {
        self.progress.cancel();
    }

    #[pyo3(signature = (walls, dsm, rotation_step=1.0, filter_size=9, dsm_nodata=None))]
    pub fn compute(
        &self,
        py: Python<'_>,
        walls: PyReadonlyArray2<f32>,
        dsm: PyReadonlyArray2<f32>,
        rotation_step: f32,
        filter_size: usize,
        dsm_nodata: Option<f32>,
    ) -> PyResult<Py<PyArray2<f32>>> {
        let config = WallConfig {
            rotation_step,
            filter_size,
            dsm_nodata,
            ..WallConfig::default()
        };
        self.progress.reset();
        run_wall_aspect(py, walls, dsm, config, &self.progress)
    }
}

pub(crate) fn register_skyview_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "skyview")?;
    submodule.add("__doc__", "Sky View Factor calculation.")?;
    submodule.add_function(wrap_pyfunction!(calculate_svf, &submodule)?)?;
    submodule.add_class::<SkyviewRunner>()?;
    submodule.add_class::<PySvfResult>()?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}

pub(crate) fn register_walls_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "walls")?;
    submodule.add("__doc__", "Wall height and aspect detection.")?;
    submodule.add_function(wrap_pyfunction!(find_walls, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(compute_wall_aspect, &submodule)?)?;
    submodule.add_class::<WallAspectRunner>()?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}
