use crate::types::{CoregError, CoregResult, Observation};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Observation weighting policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightPolicy {
    /// Every observation weighs 1
    Uniform,
    /// Weight proportional to quality
    Linear,
    /// Weight proportional to squared quality
    Quadratic,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        WeightPolicy::Uniform
    }
}

impl fmt::Display for WeightPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightPolicy::Uniform => write!(f, "uniform"),
            WeightPolicy::Linear => write!(f, "linear"),
            WeightPolicy::Quadratic => write!(f, "quadratic"),
        }
    }
}

impl FromStr for WeightPolicy {
    type Err = CoregError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uniform" | "none" => Ok(WeightPolicy::Uniform),
            "linear" => Ok(WeightPolicy::Linear),
            "quadratic" => Ok(WeightPolicy::Quadratic),
            _ => Err(CoregError::UnsupportedWeightPolicy(s.to_string())),
        }
    }
}

/// Converts observation quality into least-squares weights
#[derive(Debug, Clone, Copy)]
pub struct WeightModel {
    policy: WeightPolicy,
}

impl WeightModel {
    pub fn new(policy: WeightPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> WeightPolicy {
        self.policy
    }

    /// Weights for the active observations.
    ///
    /// Linear and quadratic weights are divided by their mean so that the
    /// weighting does not rescale the estimated variance factor.
    pub fn weights(&self, observations: &[Observation]) -> CoregResult<Array1<f64>> {
        let n = observations.len();
        if n == 0 {
            return Err(CoregError::DegenerateWeights(
                "No observations to weight".to_string(),
            ));
        }

        let raw: Array1<f64> = match self.policy {
            WeightPolicy::Uniform => {
                log::debug!("No weighting");
                return Ok(Array1::ones(n));
            }
            WeightPolicy::Linear => {
                log::debug!("Using quality as weights");
                observations.iter().map(|obs| obs.quality).collect()
            }
            WeightPolicy::Quadratic => {
                log::debug!("Using squared quality as weights");
                observations.iter().map(|obs| obs.quality * obs.quality).collect()
            }
        };

        let mean = raw.sum() / n as f64;
        if mean == 0.0 || !mean.is_finite() {
            return Err(CoregError::DegenerateWeights(format!(
                "Mean {} weight is {}",
                self.policy, mean
            )));
        }

        let weights = raw / mean;
        if let Some(i) = weights.iter().position(|w| !(w.is_finite() && *w > 0.0)) {
            return Err(CoregError::DegenerateWeights(format!(
                "Observation {} has non-positive {} weight {} (quality {})",
                observations[i].id, self.policy, weights[i], observations[i].quality
            )));
        }

        Ok(weights)
    }
}
