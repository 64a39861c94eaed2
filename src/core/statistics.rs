use crate::core::residuals::ResidualAnalysis;
use crate::types::ObservationSet;
use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Summary of the final residuals, as reported to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationStatistics {
    pub line_residual_mean: f64,
    pub line_residual_std: f64,
    pub pixel_residual_mean: f64,
    pub pixel_residual_std: f64,
    /// Per-observation `sqrt(e_line² + e_pixel²)`
    pub rms: Array1<f64>,
    pub rms_mean: f64,
    pub rms_std: f64,
}

impl EstimationStatistics {
    pub fn from_residuals(residual_line: &Array1<f64>, residual_pixel: &Array1<f64>) -> Self {
        let rms = Zip::from(residual_line)
            .and(residual_pixel)
            .map_collect(|&l, &p| (l * l + p * p).sqrt());

        let (line_residual_mean, line_residual_std) = mean_std(residual_line);
        let (pixel_residual_mean, pixel_residual_std) = mean_std(residual_pixel);
        let (rms_mean, rms_std) = mean_std(&rms);

        Self {
            line_residual_mean,
            line_residual_std,
            pixel_residual_mean,
            pixel_residual_std,
            rms,
            rms_mean,
            rms_std,
        }
    }
}

/// Mean and population standard deviation, zeros for empty input
fn mean_std(values: &Array1<f64>) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.sum() / n;
    let mean_sq = values.iter().map(|v| v * v).sum::<f64>() / n;
    (mean, (mean_sq - mean * mean).max(0.0).sqrt())
}

/// Residual table for the surviving observations
pub struct ResidualReport<'a> {
    pub observations: &'a ObservationSet,
    pub analysis: &'a ResidualAnalysis,
    pub statistics: &'a EstimationStatistics,
}

impl fmt::Display for ResidualReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "   Id |         Line |        Pixel |    dLine |   dPixel | Line Resid | Pixel Resid |      RMS | wTest L | wTest P"
        )?;
        writeln!(f, "{}", "-".repeat(118))?;

        for (i, obs) in self.observations.iter().enumerate() {
            writeln!(
                f,
                "{:5} | {:12.3} | {:12.3} | {:8.3} | {:8.3} | {:10.4} | {:11.4} | {:8.4} | {:7.2} | {:7.2}",
                obs.id,
                obs.line,
                obs.pixel,
                obs.d_line,
                obs.d_pixel,
                self.analysis.residual_line[i],
                self.analysis.residual_pixel[i],
                self.statistics.rms[i],
                self.analysis.w_test_line[i],
                self.analysis.w_test_pixel[i],
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Line residual mean = {:.6}", self.statistics.line_residual_mean)?;
        writeln!(f, "Line residual std = {:.6}", self.statistics.line_residual_std)?;
        writeln!(f, "Pixel residual mean = {:.6}", self.statistics.pixel_residual_mean)?;
        writeln!(f, "Pixel residual std = {:.6}", self.statistics.pixel_residual_std)?;
        writeln!(f, "RMS mean = {:.6}", self.statistics.rms_mean)?;
        write!(f, "RMS std = {:.6}", self.statistics.rms_std)
    }
}
