use crate::core::normal_equations::{projection_diagonal, PARALLEL_ROW_THRESHOLD};
use crate::types::{CoregError, CoregResult};
use ndarray::{Array1, Array2, Zip};

/// Redundancy numbers below this fraction of `1/w` mark an observation as fully determined
const REDUNDANCY_TOLERANCE: f64 = 1e-10;

/// Per-observation test statistics and aggregate model tests for one fit
#[derive(Debug, Clone)]
pub struct ResidualAnalysis {
    pub fitted_line: Array1<f64>,
    pub fitted_pixel: Array1<f64>,
    pub residual_line: Array1<f64>,
    pub residual_pixel: Array1<f64>,
    /// Diagonal of the residual cofactor matrix `Qe = W⁻¹ − A·N⁻¹·Aᵗ`
    pub redundancy: Array1<f64>,
    pub w_test_line: Array1<f64>,
    pub w_test_pixel: Array1<f64>,
    /// `wTest_line² + wTest_pixel²`
    pub w_test_sum: Array1<f64>,
    /// Variance factor for the azimuth fit, NaN without redundancy
    pub overall_model_test_line: f64,
    /// Variance factor for the range fit, NaN without redundancy
    pub overall_model_test_pixel: f64,
}

impl ResidualAnalysis {
    pub fn len(&self) -> usize {
        self.residual_line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residual_line.is_empty()
    }

    /// Index and absolute value of the largest azimuth w-test
    pub fn worst_line(&self) -> Option<(usize, f64)> {
        abs_argmax(&self.w_test_line)
    }

    /// Index and absolute value of the largest range w-test
    pub fn worst_pixel(&self) -> Option<(usize, f64)> {
        abs_argmax(&self.w_test_pixel)
    }

    /// Index of the observation with the largest combined statistic.
    ///
    /// Exact ties go to the observation with the lowest id.
    pub fn worst_combined(&self, ids: &[usize]) -> Option<usize> {
        let mut worst: Option<usize> = None;
        for (i, &value) in self.w_test_sum.iter().enumerate() {
            worst = match worst {
                None => Some(i),
                Some(w) => {
                    let current = self.w_test_sum[w];
                    if value > current || (value == current && ids[i] < ids[w]) {
                        Some(i)
                    } else {
                        Some(w)
                    }
                }
            };
        }
        worst
    }
}

fn abs_argmax(values: &Array1<f64>) -> Option<(usize, f64)> {
    values
        .iter()
        .map(|v| v.abs())
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

/// Computes residuals, w-tests and overall model tests against fixed a-priori sigmas
#[derive(Debug, Clone)]
pub struct ResidualAnalyzer {
    sigma_line: f64,
    sigma_pixel: f64,
    parallel_threshold: usize,
}

impl ResidualAnalyzer {
    pub fn new(sigma_line: f64, sigma_pixel: f64) -> CoregResult<Self> {
        for (name, sigma) in [("sigma_line", sigma_line), ("sigma_pixel", sigma_pixel)] {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(CoregError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, sigma
                )));
            }
        }

        Ok(Self {
            sigma_line,
            sigma_pixel,
            parallel_threshold: PARALLEL_ROW_THRESHOLD,
        })
    }

    pub fn with_parallel_threshold(mut self, parallel_threshold: usize) -> Self {
        self.parallel_threshold = parallel_threshold;
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn analyze(
        &self,
        a: &Array2<f64>,
        weights: &Array1<f64>,
        coeff_line: &Array1<f64>,
        coeff_pixel: &Array1<f64>,
        inverse: &Array2<f64>,
        y_line: &Array1<f64>,
        y_pixel: &Array1<f64>,
    ) -> ResidualAnalysis {
        let (num_observations, num_coefficients) = a.dim();

        let fitted_line = a.dot(coeff_line);
        let fitted_pixel = a.dot(coeff_pixel);
        let residual_line = y_line - &fitted_line;
        let residual_pixel = y_pixel - &fitted_pixel;

        let projection = projection_diagonal(a, inverse, self.parallel_threshold);
        let redundancy = Zip::from(&projection)
            .and(weights)
            .map_collect(|&p, &w| 1.0 / w - p);

        let w_test_line = self.w_tests(&residual_line, &redundancy, weights, self.sigma_line);
        let w_test_pixel = self.w_tests(&residual_pixel, &redundancy, weights, self.sigma_pixel);
        let w_test_sum = Zip::from(&w_test_line)
            .and(&w_test_pixel)
            .map_collect(|&l, &p| l * l + p * p);

        let degrees_of_freedom = num_observations.saturating_sub(num_coefficients);
        let overall_model_test_line =
            overall_model_test(&residual_line, weights, self.sigma_line, degrees_of_freedom);
        let overall_model_test_pixel =
            overall_model_test(&residual_pixel, weights, self.sigma_pixel, degrees_of_freedom);

        log::debug!("Overall model test lines: {}", overall_model_test_line);
        log::debug!("Overall model test pixels: {}", overall_model_test_pixel);

        ResidualAnalysis {
            fitted_line,
            fitted_pixel,
            residual_line,
            residual_pixel,
            redundancy,
            w_test_line,
            w_test_pixel,
            w_test_sum,
            overall_model_test_line,
            overall_model_test_pixel,
        }
    }

    fn w_tests(
        &self,
        residuals: &Array1<f64>,
        redundancy: &Array1<f64>,
        weights: &Array1<f64>,
        sigma: f64,
    ) -> Array1<f64> {
        Zip::from(residuals)
            .and(redundancy)
            .and(weights)
            .map_collect(|&e, &qe, &w| {
                if qe > REDUNDANCY_TOLERANCE / w {
                    e / (qe.sqrt() * sigma)
                } else {
                    // Observation fully determined by the model, nothing to test
                    0.0
                }
            })
    }
}

/// `Σ e²·w / σ² / (n − u)`
fn overall_model_test(residuals: &Array1<f64>, weights: &Array1<f64>, sigma: f64, degrees_of_freedom: usize) -> f64 {
    if degrees_of_freedom == 0 {
        return f64::NAN;
    }
    let weighted_sum: f64 = Zip::from(residuals)
        .and(weights)
        .fold(0.0, |acc, &e, &w| acc + e * e * w);
    weighted_sum / (sigma * sigma) / degrees_of_freedom as f64
}
