//! Robust estimation of the co-registration polynomial model (CPM).
//!
//! Fits per-axis 2-D polynomials to cross-correlation offsets by weighted
//! least squares and removes gross errors one at a time by data snooping.

use crate::core::design_matrix::{number_of_coefficients, DesignMatrixBuilder};
use crate::core::polynomial::WarpPolynomial;
use crate::core::residuals::{ResidualAnalysis, ResidualAnalyzer};
use crate::core::snooping::{OutlierSnoopingLoop, Termination};
use crate::core::stability::StabilityWarning;
use crate::core::statistics::{EstimationStatistics, ResidualReport};
use crate::core::weighting::{WeightModel, WeightPolicy};
use crate::types::{CoregError, CoregResult, NormalizationBounds, Observation, ObservationSet};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

/// Empirical a-priori standard deviation of azimuth offsets (pixels)
pub const DEFAULT_SIGMA_LINE: f64 = 0.15;

/// Empirical a-priori standard deviation of range offsets (pixels)
pub const DEFAULT_SIGMA_PIXEL: f64 = 0.10;

/// Significance levels for the w-test, mapped to two-sided normal critical values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignificanceLevel {
    /// 0.1 %
    Alpha001,
    /// 5 %
    Alpha05,
    /// 10 %
    Alpha10,
}

impl SignificanceLevel {
    pub fn critical_value(&self) -> f64 {
        match self {
            SignificanceLevel::Alpha001 => 3.2905267314919,
            SignificanceLevel::Alpha05 => 1.95996398454005,
            SignificanceLevel::Alpha10 => 1.64485362695147,
        }
    }

    /// Level matching `alpha` (0.001, 0.05 or 0.1)
    pub fn from_alpha(alpha: f64) -> CoregResult<Self> {
        const TOLERANCE: f64 = 1e-9;
        if (alpha - 0.001).abs() < TOLERANCE {
            Ok(SignificanceLevel::Alpha001)
        } else if (alpha - 0.05).abs() < TOLERANCE {
            Ok(SignificanceLevel::Alpha05)
        } else if (alpha - 0.1).abs() < TOLERANCE {
            Ok(SignificanceLevel::Alpha10)
        } else {
            Err(CoregError::InvalidParameter(format!(
                "Unsupported significance level {}",
                alpha
            )))
        }
    }
}

/// Estimation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorParams {
    /// Polynomial degree per axis
    pub degree: usize,
    pub weight_policy: WeightPolicy,
    /// A-priori azimuth offset standard deviation
    pub sigma_line: f64,
    /// A-priori range offset standard deviation
    pub sigma_pixel: f64,
    /// W-test acceptance threshold
    pub critical_value: f64,
    /// Maximum number of observations removed
    pub max_iterations: usize,
    /// Normalization extent; derived from the observations when `None`
    pub bounds: Option<NormalizationBounds>,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            degree: 2,                     // 6 coefficients per axis
            weight_policy: WeightPolicy::Uniform,
            sigma_line: DEFAULT_SIGMA_LINE,
            sigma_pixel: DEFAULT_SIGMA_PIXEL,
            critical_value: SignificanceLevel::Alpha05.critical_value(),
            max_iterations: 20,
            bounds: None,
        }
    }
}

/// Fitted coefficients and their cofactor matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub coeff_line: Array1<f64>,
    pub coeff_pixel: Array1<f64>,
    /// `N⁻¹` for the final observation set
    pub covariance: Array2<f64>,
}

/// Quality indicators of the final fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub max_inversion_deviation: f64,
    pub overall_model_test_line: f64,
    pub overall_model_test_pixel: f64,
    /// Largest absolute azimuth w-test of the final fit
    pub worst_w_test_line: f64,
    /// Largest absolute range w-test of the final fit
    pub worst_w_test_pixel: f64,
    /// Removed observation ids in removal order
    pub removed_observation_ids: Vec<usize>,
    pub termination: Termination,
    pub stability_warnings: Vec<StabilityWarning>,
    /// Number of least-squares fits performed
    pub iterations: usize,
}

/// Result of a robust estimation run
#[derive(Debug, Clone)]
pub struct Estimation {
    pub solution: Solution,
    pub diagnostics: Diagnostics,
    /// Observations that survived outlier removal
    pub observations: ObservationSet,
    /// Residuals and test statistics of the final fit
    pub residuals: ResidualAnalysis,
    pub bounds: NormalizationBounds,
    pub degree: usize,
}

impl Estimation {
    pub fn warp_polynomial(&self) -> CoregResult<WarpPolynomial> {
        WarpPolynomial::new(
            self.bounds,
            self.solution.coeff_line.clone(),
            self.solution.coeff_pixel.clone(),
        )
    }

    pub fn statistics(&self) -> EstimationStatistics {
        EstimationStatistics::from_residuals(&self.residuals.residual_line, &self.residuals.residual_pixel)
    }

    /// Printable residual table; `statistics` should come from [`Estimation::statistics`]
    pub fn report<'a>(&'a self, statistics: &'a EstimationStatistics) -> ResidualReport<'a> {
        ResidualReport {
            observations: &self.observations,
            analysis: &self.residuals,
            statistics,
        }
    }
}

/// Robust CPM estimator
#[derive(Debug, Clone)]
pub struct RobustEstimator {
    params: EstimatorParams,
}

impl RobustEstimator {
    /// Create an estimator with default parameters
    pub fn new() -> Self {
        Self {
            params: EstimatorParams::default(),
        }
    }

    /// Create an estimator with custom parameters
    pub fn with_params(params: EstimatorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    /// Estimate the offset polynomials. The caller's observations are copied, never modified.
    pub fn estimate(&self, observations: &[Observation]) -> CoregResult<Estimation> {
        self.run(observations, None)
    }

    /// Like [`RobustEstimator::estimate`], aborting with `Cancelled` once `cancel` is set
    pub fn estimate_with_cancel(&self, observations: &[Observation], cancel: &AtomicBool) -> CoregResult<Estimation> {
        self.run(observations, Some(cancel))
    }

    fn run(&self, observations: &[Observation], cancel: Option<&AtomicBool>) -> CoregResult<Estimation> {
        log::info!(
            "Estimating degree {} CPM from {} observations ({} weighting)",
            self.params.degree,
            observations.len(),
            self.params.weight_policy
        );

        self.validate(observations)?;

        let bounds = match self.params.bounds {
            Some(bounds) => bounds,
            None => NormalizationBounds::from_observations(observations)?,
        };
        log::debug!("Normalization bounds: {:?}", bounds);

        let snooping = OutlierSnoopingLoop::new(
            DesignMatrixBuilder::new(self.params.degree, bounds)?,
            WeightModel::new(self.params.weight_policy),
            ResidualAnalyzer::new(self.params.sigma_line, self.params.sigma_pixel)?,
            self.params.critical_value,
            self.params.max_iterations,
        )?;

        let outcome = snooping.run(ObservationSet::from(observations), cancel)?;

        let worst_w_test_line = outcome.analysis.worst_line().map_or(0.0, |(_, v)| v);
        let worst_w_test_pixel = outcome.analysis.worst_pixel().map_or(0.0, |(_, v)| v);

        log::info!(
            "CPM estimation finished ({:?}): {} observations removed, {} remaining",
            outcome.termination,
            outcome.removed_ids.len(),
            outcome.observations.len()
        );

        Ok(Estimation {
            solution: Solution {
                coeff_line: outcome.solution.coeff_line,
                coeff_pixel: outcome.solution.coeff_pixel,
                covariance: outcome.solution.inverse,
            },
            diagnostics: Diagnostics {
                max_inversion_deviation: outcome.max_inversion_deviation,
                overall_model_test_line: outcome.analysis.overall_model_test_line,
                overall_model_test_pixel: outcome.analysis.overall_model_test_pixel,
                worst_w_test_line,
                worst_w_test_pixel,
                removed_observation_ids: outcome.removed_ids,
                termination: outcome.termination,
                stability_warnings: outcome.stability_warnings,
                iterations: outcome.iterations,
            },
            observations: outcome.observations,
            residuals: outcome.analysis,
            bounds,
            degree: self.params.degree,
        })
    }

    fn validate(&self, observations: &[Observation]) -> CoregResult<()> {
        let num_unknowns = number_of_coefficients(self.params.degree);
        if observations.len() < num_unknowns {
            log::error!(
                "Number of observations ({}) is smaller than parameters solved for ({})",
                observations.len(),
                num_unknowns
            );
            return Err(CoregError::InsufficientRedundancy {
                observations: observations.len(),
                coefficients: num_unknowns,
            });
        }

        if let Some(obs) = observations.iter().find(|obs| {
            ![obs.line, obs.pixel, obs.d_line, obs.d_pixel].iter().all(|v| v.is_finite())
        }) {
            return Err(CoregError::InvalidParameter(format!(
                "Observation {} has non-finite position or offset",
                obs.id
            )));
        }

        Ok(())
    }
}

impl Default for RobustEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot estimation with explicit parameters and bounds derived from the data
pub fn estimate(
    observations: &[Observation],
    degree: usize,
    weight_policy: WeightPolicy,
    sigma_line: f64,
    sigma_pixel: f64,
    critical_value: f64,
    max_iterations: usize,
) -> CoregResult<Estimation> {
    RobustEstimator::with_params(EstimatorParams {
        degree,
        weight_policy,
        sigma_line,
        sigma_pixel,
        critical_value,
        max_iterations,
        bounds: None,
    })
    .estimate(observations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = EstimatorParams::default();
        assert_eq!(params.degree, 2);
        assert_eq!(params.sigma_line, 0.15);
        assert_eq!(params.sigma_pixel, 0.10);
        assert_eq!(params.max_iterations, 20);
        assert!((params.critical_value - 1.96).abs() < 1e-3);
    }

    #[test]
    fn test_significance_levels() {
        assert_eq!(SignificanceLevel::from_alpha(0.05).unwrap(), SignificanceLevel::Alpha05);
        assert!((SignificanceLevel::Alpha001.critical_value() - 3.2905).abs() < 1e-4);
        assert!((SignificanceLevel::Alpha10.critical_value() - 1.6449).abs() < 1e-4);
        assert!(SignificanceLevel::from_alpha(0.2).is_err());
    }

    #[test]
    fn test_insufficient_redundancy_at_entry() {
        let observations: Vec<Observation> = (0..5)
            .map(|i| Observation::new(i, i as f64 * 10.0, (i * i) as f64, 0.0, 0.0, 1.0))
            .collect();

        let result = RobustEstimator::new().estimate(&observations);
        assert!(matches!(
            result,
            Err(CoregError::InsufficientRedundancy { observations: 5, coefficients: 6 })
        ));
    }

    #[test]
    fn test_non_finite_observation_rejected() {
        let mut observations: Vec<Observation> = (0..8)
            .map(|i| Observation::new(i, i as f64 * 10.0, (i * i) as f64, 0.0, 0.0, 1.0))
            .collect();
        observations[3].d_line = f64::NAN;

        let result = RobustEstimator::new().estimate(&observations);
        assert!(matches!(result, Err(CoregError::InvalidParameter(_))));
    }
}
