//! Python bindings

use crate::config::{CountRequest, DateRange};
use crate::core::{LocalEvaluator, ObservationCounter, RasterEvaluator};
use crate::io::ArchiveCatalog;
use crate::types::{AggregationMode, Aoi, CountError};
use ndarray::Array3;
use numpy::{IntoPyArray, PyArray3};
use pyo3::prelude::*;

fn to_py_err(e: CountError) -> PyErr {
    match e {
        CountError::Config(_) | CountError::InvalidFormat(_) => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyCountRequest>()?;
    m.add_function(wrap_pyfunction!(count_observations, m)?)?;
    Ok(())
}

/// Python wrapper for CountRequest
#[pyclass(name = "CountRequest")]
#[derive(Clone)]
struct PyCountRequest {
    inner: CountRequest,
}

#[pymethods]
impl PyCountRequest {
    #[new]
    #[pyo3(signature = (
        start_year,
        end_year,
        start_month,
        end_month,
        aoi,
        mode = "monthly",
        legacy_cloud_rule = "any",
        strategy = "distinct",
        scale = 30.0
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        start_year: i32,
        end_year: i32,
        start_month: u32,
        end_month: u32,
        aoi: Vec<(f64, f64)>,
        mode: &str,
        legacy_cloud_rule: &str,
        strategy: &str,
        scale: f64,
    ) -> PyResult<Self> {
        let range = DateRange::new(start_year, end_year, start_month, end_month).map_err(to_py_err)?;
        let aoi = Aoi::polygon(aoi).map_err(to_py_err)?;
        let mode: AggregationMode = mode.parse().map_err(to_py_err)?;

        let inner = CountRequest::new(range, aoi, mode)
            .with_legacy_cloud_rule(legacy_cloud_rule.parse().map_err(to_py_err)?)
            .with_strategy(strategy.parse().map_err(to_py_err)?)
            .with_scale(scale)
            .map_err(to_py_err)?;

        Ok(PyCountRequest { inner })
    }

    #[getter]
    fn output_name(&self) -> String {
        self.inner.output_name()
    }

    #[getter]
    fn labels(&self) -> PyResult<Vec<String>> {
        self.inner
            .periods()
            .iter()
            .map(|p| p.label().map_err(to_py_err))
            .collect()
    }

    fn __repr__(&self) -> String {
        format!(
            "CountRequest(name='{}', mode='{}', rule='{}', strategy='{}')",
            self.inner.output_name(),
            self.inner.mode,
            self.inner.legacy_cloud_rule,
            self.inner.strategy
        )
    }
}

/// Count observations from a directory of scene archives.
///
/// Returns the band labels and a (band, row, col) float array with NaN where
/// no observation exists.
#[pyfunction]
fn count_observations(
    py: Python<'_>,
    request: &PyCountRequest,
    archive_dir: String,
) -> PyResult<(Vec<String>, Py<PyArray3<f64>>)> {
    let counter = ObservationCounter::new(request.inner.clone());

    let raster = py
        .allow_threads(|| {
            let catalog = ArchiveCatalog::open(&archive_dir)?;
            let product = counter.build(&catalog)?;
            LocalEvaluator::new().evaluate(&product.image, &product.region)
        })
        .map_err(to_py_err)?;

    let (bands, rows, cols) = raster.dim();
    let values = Array3::from_shape_fn((bands, rows, cols), |(b, r, c)| {
        raster.value(b, r, c).unwrap_or(f64::NAN)
    });

    Ok((raster.labels, values.into_pyarray(py).to_owned()))
}
