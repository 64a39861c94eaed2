use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single cross-correlation offset measurement between the reference and
/// the secondary image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Caller-assigned identifier, reported back when the observation is rejected
    pub id: usize,
    pub line: f64,      // azimuth position in the reference image
    pub pixel: f64,     // range position in the reference image
    pub d_line: f64,    // measured azimuth offset
    pub d_pixel: f64,   // measured range offset
    /// Correlation quality, typically coherence in [0, 1]
    pub quality: f64,
}

impl Observation {
    pub fn new(id: usize, line: f64, pixel: f64, d_line: f64, d_pixel: f64, quality: f64) -> Self {
        Self {
            id,
            line,
            pixel,
            d_line,
            d_pixel,
            quality,
        }
    }
}

/// Immutable snapshot of the observations taking part in an estimation.
///
/// Removing an observation yields a new snapshot; the previous one is left
/// untouched, so iterations never alias each other's data.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSet {
    observations: Arc<[Observation]>,
}

impl ObservationSet {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self {
            observations: observations.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Observation> {
        self.observations.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    pub fn as_slice(&self) -> &[Observation] {
        &self.observations
    }

    pub fn ids(&self) -> Vec<usize> {
        self.observations.iter().map(|obs| obs.id).collect()
    }

    /// Snapshot without the observation at `index`
    pub fn without(&self, index: usize) -> CoregResult<Self> {
        if index >= self.observations.len() {
            return Err(CoregError::InvalidParameter(format!(
                "Observation index {} out of range for set of {}",
                index,
                self.observations.len()
            )));
        }

        let remaining: Vec<Observation> = self
            .observations
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, obs)| *obs)
            .collect();

        Ok(Self::new(remaining))
    }
}

impl From<&[Observation]> for ObservationSet {
    fn from(observations: &[Observation]) -> Self {
        Self::new(observations.to_vec())
    }
}

impl<'a> IntoIterator for &'a ObservationSet {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Extent used to map raw image coordinates onto [-2, 2] before polynomial
/// expansion. Fixed for the whole estimation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationBounds {
    pub min_line: f64,
    pub max_line: f64,
    pub min_pixel: f64,
    pub max_pixel: f64,
}

impl NormalizationBounds {
    pub fn new(min_line: f64, max_line: f64, min_pixel: f64, max_pixel: f64) -> CoregResult<Self> {
        let bounds = Self {
            min_line,
            max_line,
            min_pixel,
            max_pixel,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Bounds spanning every position in `observations`
    pub fn from_observations(observations: &[Observation]) -> CoregResult<Self> {
        if observations.is_empty() {
            return Err(CoregError::InvalidParameter(
                "Cannot derive normalization bounds from an empty observation set".to_string(),
            ));
        }

        let mut bounds = Self {
            min_line: f64::INFINITY,
            max_line: f64::NEG_INFINITY,
            min_pixel: f64::INFINITY,
            max_pixel: f64::NEG_INFINITY,
        };
        for obs in observations {
            bounds.min_line = bounds.min_line.min(obs.line);
            bounds.max_line = bounds.max_line.max(obs.line);
            bounds.min_pixel = bounds.min_pixel.min(obs.pixel);
            bounds.max_pixel = bounds.max_pixel.max(obs.pixel);
        }

        bounds.validate()?;
        Ok(bounds)
    }

    fn validate(&self) -> CoregResult<()> {
        let finite = [self.min_line, self.max_line, self.min_pixel, self.max_pixel]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min_line > self.max_line || self.min_pixel > self.max_pixel {
            return Err(CoregError::InvalidParameter(format!(
                "Invalid normalization bounds: {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn normalize_line(&self, line: f64) -> f64 {
        normalize_to_range(line, self.min_line, self.max_line)
    }

    pub fn normalize_pixel(&self, pixel: f64) -> f64 {
        normalize_to_range(pixel, self.min_pixel, self.max_pixel)
    }
}

/// Affine map of [min, max] onto [-2, 2]. A degenerate range maps to 0.
fn normalize_to_range(value: f64, min: f64, max: f64) -> f64 {
    let half_width = 0.25 * (max - min);
    if half_width <= 0.0 {
        return 0.0;
    }
    (value - 0.5 * (min + max)) / half_width
}

/// Error types for co-registration estimation
#[derive(Debug, thiserror::Error)]
pub enum CoregError {
    #[error("Insufficient redundancy: {observations} observations for {coefficients} unknowns")]
    InsufficientRedundancy {
        observations: usize,
        coefficients: usize,
    },

    #[error("Unsupported weight policy: {0}")]
    UnsupportedWeightPolicy(String),

    #[error("Degenerate weights: {0}")]
    DegenerateWeights(String),

    #[error("Singular normal matrix: {0}")]
    SingularNormalMatrix(String),

    #[error("Unstable inversion: max deviation of N*inv(N) from identity is {max_deviation:.3e}")]
    UnstableInversion { max_deviation: f64 },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Estimation cancelled at iteration {iteration}")]
    Cancelled { iteration: usize },
}

/// Result type for co-registration operations
pub type CoregResult<T> = Result<T, CoregError>;
