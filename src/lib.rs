//! sarcoreg: robust polynomial co-registration for SAR image pairs
//!
//! Estimates the azimuth/range offset polynomials between a reference and a
//! secondary image from cross-correlation measurements, removing outliers by
//! iterative data snooping (w-test).

pub mod types;
pub mod core;

// Re-export main types and functions for easier access
pub use crate::types::{
    Observation, ObservationSet, NormalizationBounds, CoregError, CoregResult
};

pub use crate::core::{
    estimate, RobustEstimator, EstimatorParams, Estimation, Solution, Diagnostics,
    Termination, WeightPolicy, SignificanceLevel, WarpPolynomial, EstimationStatistics
};

#[cfg(feature = "python")]
mod python {
    use super::*;
    use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray1};
    use pyo3::prelude::*;

    fn to_py_err(e: CoregError) -> PyErr {
        match e {
            CoregError::UnsupportedWeightPolicy(_) | CoregError::InvalidParameter(_) => {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
            }
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
        }
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(estimate_cpm, m)?)?;
        m.add_class::<PyEstimation>()?;
        Ok(())
    }

    /// Estimate the CPM from numpy arrays of positions, offsets and qualities
    #[pyfunction]
    #[pyo3(signature = (
        line, pixel, d_line, d_pixel, quality = None, degree = 2, weight_policy = "uniform",
        sigma_line = 0.15, sigma_pixel = 0.10, critical_value = 1.96, max_iterations = 20
    ))]
    #[allow(clippy::too_many_arguments)]
    fn estimate_cpm<'py>(
        line: PyReadonlyArray1<'py, f64>,
        pixel: PyReadonlyArray1<'py, f64>,
        d_line: PyReadonlyArray1<'py, f64>,
        d_pixel: PyReadonlyArray1<'py, f64>,
        quality: Option<PyReadonlyArray1<'py, f64>>,
        degree: usize,
        weight_policy: &str,
        sigma_line: f64,
        sigma_pixel: f64,
        critical_value: f64,
        max_iterations: usize,
    ) -> PyResult<PyEstimation> {
        let line = line.as_array();
        let pixel = pixel.as_array();
        let d_line = d_line.as_array();
        let d_pixel = d_pixel.as_array();
        let quality = quality.as_ref().map(|q| q.as_array());

        let n = line.len();
        let lengths_match = pixel.len() == n
            && d_line.len() == n
            && d_pixel.len() == n
            && quality.as_ref().map_or(true, |q| q.len() == n);
        if !lengths_match {
            return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(
                "All input arrays must have the same length",
            ));
        }

        let observations: Vec<Observation> = (0..n)
            .map(|i| {
                let q = quality.as_ref().map_or(1.0, |q| q[i]);
                Observation::new(i, line[i], pixel[i], d_line[i], d_pixel[i], q)
            })
            .collect();

        let weight_policy: WeightPolicy = weight_policy.parse().map_err(to_py_err)?;
        let estimation = estimate(
            &observations,
            degree,
            weight_policy,
            sigma_line,
            sigma_pixel,
            critical_value,
            max_iterations,
        )
        .map_err(to_py_err)?;

        Ok(PyEstimation { inner: estimation })
    }

    /// Python wrapper for Estimation
    #[pyclass(name = "Estimation")]
    struct PyEstimation {
        inner: Estimation,
    }

    #[pymethods]
    impl PyEstimation {
        #[getter]
        fn coeff_line<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
            self.inner.solution.coeff_line.clone().into_pyarray(py)
        }

        #[getter]
        fn coeff_pixel<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
            self.inner.solution.coeff_pixel.clone().into_pyarray(py)
        }

        #[getter]
        fn covariance<'py>(&self, py: Python<'py>) -> &'py PyArray2<f64> {
            self.inner.solution.covariance.clone().into_pyarray(py)
        }

        #[getter]
        fn removed_ids(&self) -> Vec<usize> {
            self.inner.diagnostics.removed_observation_ids.clone()
        }

        #[getter]
        fn termination(&self) -> String {
            format!("{:?}", self.inner.diagnostics.termination)
        }

        #[getter]
        fn overall_model_test(&self) -> (f64, f64) {
            (
                self.inner.diagnostics.overall_model_test_line,
                self.inner.diagnostics.overall_model_test_pixel,
            )
        }

        #[getter]
        fn max_inversion_deviation(&self) -> f64 {
            self.inner.diagnostics.max_inversion_deviation
        }

        /// Offset fields `(d_line, d_pixel)` over the grid `lines × pixels`
        fn offset_grid<'py>(
            &self,
            py: Python<'py>,
            lines: Vec<f64>,
            pixels: Vec<f64>,
        ) -> PyResult<(&'py PyArray2<f64>, &'py PyArray2<f64>)> {
            let warp = self.inner.warp_polynomial().map_err(to_py_err)?;
            let (d_line, d_pixel) = warp.offset_grid(&lines, &pixels);
            Ok((d_line.into_pyarray(py), d_pixel.into_pyarray(py)))
        }

        fn report(&self) -> String {
            let statistics = self.inner.statistics();
            format!("{}", self.inner.report(&statistics))
        }

        fn __repr__(&self) -> String {
            format!(
                "Estimation(degree={}, observations={}, removed={}, termination={:?})",
                self.inner.degree,
                self.inner.observations.len(),
                self.inner.diagnostics.removed_observation_ids.len(),
                self.inner.diagnostics.termination
            )
        }
    }
}
