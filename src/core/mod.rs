//! Core co-registration estimation modules

pub mod design_matrix;
pub mod weighting;
pub mod linalg;
pub mod normal_equations;
pub mod stability;
pub mod residuals;
pub mod snooping;
pub mod polynomial;
pub mod statistics;
pub mod estimator;

// Re-export main types
pub use design_matrix::{DesignMatrixBuilder, DesignSystem, number_of_coefficients, degree_from_coefficients};
pub use weighting::{WeightModel, WeightPolicy};
pub use linalg::Cholesky;
pub use normal_equations::{NormalEquationSolver, NormalSolution};
pub use stability::{StabilityChecker, StabilityReport, StabilityWarning};
pub use residuals::{ResidualAnalyzer, ResidualAnalysis};
pub use snooping::{OutlierSnoopingLoop, SnoopingOutcome, Termination};
pub use polynomial::WarpPolynomial;
pub use statistics::{EstimationStatistics, ResidualReport};
pub use estimator::{
    estimate, Diagnostics, Estimation, EstimatorParams, RobustEstimator, SignificanceLevel, Solution,
};
