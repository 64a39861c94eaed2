use crate::types::{CoregError, CoregResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Deviations above this abort the estimation
pub const MAX_INVERSION_DEVIATION: f64 = 0.01;

/// Deviations above this are accepted with a warning
pub const WARN_INVERSION_DEVIATION: f64 = 0.001;

/// Non-fatal inversion accuracy warning recorded for one iteration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityWarning {
    pub iteration: usize,
    pub max_deviation: f64,
}

/// Outcome of a passed stability check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityReport {
    pub max_deviation: f64,
    /// True if the deviation is in the warning band
    pub degraded: bool,
}

/// Checks that `N·N⁻¹` reproduces the identity
#[derive(Debug, Clone, Copy)]
pub struct StabilityChecker {
    max_deviation: f64,
    warn_deviation: f64,
}

impl StabilityChecker {
    pub fn new() -> Self {
        Self {
            max_deviation: MAX_INVERSION_DEVIATION,
            warn_deviation: WARN_INVERSION_DEVIATION,
        }
    }

    /// Checker with custom fatal and warning levels, `warn_deviation < max_deviation`
    pub fn with_thresholds(max_deviation: f64, warn_deviation: f64) -> CoregResult<Self> {
        if !(max_deviation.is_finite() && max_deviation > 0.0 && warn_deviation < max_deviation) {
            return Err(CoregError::InvalidParameter(format!(
                "Invalid inversion deviation levels: fatal {}, warning {}",
                max_deviation, warn_deviation
            )));
        }
        Ok(Self {
            max_deviation,
            warn_deviation,
        })
    }

    /// `max |N·N⁻¹ − I|`
    pub fn max_deviation(normal_matrix: &Array2<f64>, inverse: &Array2<f64>) -> f64 {
        let product = normal_matrix.dot(inverse);
        product
            .indexed_iter()
            .map(|((i, j), &v)| {
                let expected = if i == j { 1.0 } else { 0.0 };
                let deviation = (v - expected).abs();
                // NaN must never pass the check
                if deviation.is_nan() { f64::INFINITY } else { deviation }
            })
            .fold(0.0, f64::max)
    }

    pub fn check(&self, normal_matrix: &Array2<f64>, inverse: &Array2<f64>) -> CoregResult<StabilityReport> {
        let max_deviation = Self::max_deviation(normal_matrix, inverse);

        if max_deviation > self.max_deviation {
            log::error!(
                "Maximum deviation N*inv(N) from unity = {:.3e}. This is larger than {}",
                max_deviation, self.max_deviation
            );
            return Err(CoregError::UnstableInversion { max_deviation });
        }

        let degraded = max_deviation > self.warn_deviation;
        if degraded {
            log::warn!(
                "Maximum deviation N*inv(N) from unity = {:.3e}. This is between {} and {}",
                max_deviation, self.warn_deviation, self.max_deviation
            );
        }

        Ok(StabilityReport {
            max_deviation,
            degraded,
        })
    }
}

impl Default for StabilityChecker {
    fn default() -> Self {
        Self::new()
    }
}
