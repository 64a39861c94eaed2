use crate::core::design_matrix::DesignMatrixBuilder;
use crate::core::normal_equations::{NormalEquationSolver, NormalSolution};
use crate::core::residuals::{ResidualAnalysis, ResidualAnalyzer};
use crate::core::stability::{StabilityChecker, StabilityWarning};
use crate::core::weighting::WeightModel;
use crate::types::{CoregError, CoregResult, ObservationSet};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Overall model test values above this suggest a wrong a-priori sigma or model order
pub const MODEL_TEST_WARNING: f64 = 10.0;

/// W-test values above this point at a gross error worth inspecting by hand
pub const GROSS_ERROR_W_TEST: f64 = 200.0;

/// Why the snooping loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// All w-tests accepted
    Converged,
    /// No redundancy left to remove further observations
    Exhausted,
    /// Iteration cap reached with outliers still present
    MaxIterations,
}

impl Termination {
    /// True unless every observation passed its test
    pub fn is_warning(&self) -> bool {
        !matches!(self, Termination::Converged)
    }
}

/// Final state of the snooping loop
#[derive(Debug, Clone)]
pub struct SnoopingOutcome {
    /// Observations still active after outlier removal
    pub observations: ObservationSet,
    pub solution: NormalSolution,
    pub analysis: ResidualAnalysis,
    pub termination: Termination,
    /// Ids of removed observations, in removal order
    pub removed_ids: Vec<usize>,
    /// Number of least-squares fits performed
    pub iterations: usize,
    pub max_inversion_deviation: f64,
    pub stability_warnings: Vec<StabilityWarning>,
}

/// Iterative fit, test and removal of the worst observation (data snooping)
#[derive(Debug, Clone)]
pub struct OutlierSnoopingLoop {
    builder: DesignMatrixBuilder,
    weight_model: WeightModel,
    solver: NormalEquationSolver,
    checker: StabilityChecker,
    analyzer: ResidualAnalyzer,
    critical_value: f64,
    max_iterations: usize,
}

impl OutlierSnoopingLoop {
    pub fn new(
        builder: DesignMatrixBuilder,
        weight_model: WeightModel,
        analyzer: ResidualAnalyzer,
        critical_value: f64,
        max_iterations: usize,
    ) -> CoregResult<Self> {
        if !(critical_value.is_finite() && critical_value > 0.0) {
            return Err(CoregError::InvalidParameter(format!(
                "Critical value must be positive, got {}",
                critical_value
            )));
        }

        Ok(Self {
            builder,
            weight_model,
            solver: NormalEquationSolver::new(),
            checker: StabilityChecker::new(),
            analyzer,
            critical_value,
            max_iterations,
        })
    }

    pub fn with_solver(mut self, solver: NormalEquationSolver) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_checker(mut self, checker: StabilityChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn num_coefficients(&self) -> usize {
        self.builder.num_coefficients()
    }

    /// Run until convergence, exhaustion or the iteration cap.
    ///
    /// `cancel` is polled before every fit.
    pub fn run(&self, initial: ObservationSet, cancel: Option<&AtomicBool>) -> CoregResult<SnoopingOutcome> {
        let num_unknowns = self.num_coefficients();
        if initial.len() < num_unknowns {
            return Err(CoregError::InsufficientRedundancy {
                observations: initial.len(),
                coefficients: num_unknowns,
            });
        }

        log::info!(
            "Starting outlier snooping: {} observations, {} unknowns per axis, critical value {:.3}",
            initial.len(),
            num_unknowns,
            self.critical_value
        );

        let mut active = initial;
        let mut removed_ids = Vec::new();
        let mut stability_warnings = Vec::new();
        let mut iteration = 0usize;

        loop {
            if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                log::warn!("Estimation cancelled at iteration {}", iteration);
                return Err(CoregError::Cancelled { iteration });
            }

            let start = Instant::now();
            let num_observations = active.len();

            let system = self.builder.build(active.as_slice());
            let weights = self.weight_model.weights(active.as_slice())?;
            let solution = self
                .solver
                .solve(&system.a, &weights, &system.y_line, &system.y_pixel)?;

            let stability = self.checker.check(&solution.normal_matrix, &solution.inverse)?;
            if stability.degraded {
                stability_warnings.push(StabilityWarning {
                    iteration,
                    max_deviation: stability.max_deviation,
                });
            }

            let analysis = self.analyzer.analyze(
                &system.a,
                &weights,
                &solution.coeff_line,
                &solution.coeff_pixel,
                &solution.inverse,
                &system.y_line,
                &system.y_pixel,
            );

            let ids = active.ids();
            let (line_index, worst_line) = analysis.worst_line().unwrap_or((0, 0.0));
            let (pixel_index, worst_pixel) = analysis.worst_pixel().unwrap_or((0, 0.0));
            log::debug!(
                "Iteration {}: max w-test azimuth {:.3} (id {}), range {:.3} (id {}), {:.1} ms",
                iteration,
                worst_line,
                ids[line_index],
                worst_pixel,
                ids[pixel_index],
                start.elapsed().as_secs_f64() * 1e3
            );

            let termination = if num_observations <= num_unknowns {
                log::warn!("No redundancy left with {} observations, exiting iterations", num_observations);
                Some(Termination::Exhausted)
            } else if worst_line.max(worst_pixel) <= self.critical_value {
                log::info!("All outlier tests accepted after {} removals", removed_ids.len());
                Some(Termination::Converged)
            } else if iteration >= self.max_iterations {
                log::warn!("Maximum number of iterations ({}) reached, exiting loop", self.max_iterations);
                Some(Termination::MaxIterations)
            } else {
                None
            };

            if let Some(termination) = termination {
                self.warn_on_final_fit(&analysis, &ids);

                return Ok(SnoopingOutcome {
                    observations: active,
                    solution,
                    analysis,
                    termination,
                    removed_ids,
                    iterations: iteration + 1,
                    max_inversion_deviation: stability.max_deviation,
                    stability_warnings,
                });
            }

            let outlier = analysis.worst_combined(&ids).ok_or_else(|| {
                CoregError::InvalidParameter("No observation left to remove".to_string())
            })?;
            log::info!(
                "Removing observation {} (summed sqr. w-test {:.3})",
                ids[outlier],
                analysis.w_test_sum[outlier]
            );

            removed_ids.push(ids[outlier]);
            active = active.without(outlier)?;
            iteration += 1;
        }
    }

    fn warn_on_final_fit(&self, analysis: &ResidualAnalysis, ids: &[usize]) {
        if analysis.overall_model_test_line > MODEL_TEST_WARNING {
            log::warn!(
                "Overall model test, lines = {:.3} is larger than {}. (Model or a-priori sigma likely not correct.)",
                analysis.overall_model_test_line, MODEL_TEST_WARNING
            );
        }
        if analysis.overall_model_test_pixel > MODEL_TEST_WARNING {
            log::warn!(
                "Overall model test, pixels = {:.3} is larger than {}. (Model or a-priori sigma likely not correct.)",
                analysis.overall_model_test_pixel, MODEL_TEST_WARNING
            );
        }
        if let Some((id, worst)) = gross_error_candidate(analysis, ids) {
            log::warn!(
                "Recommendation: remove observation {} and re-run the estimation, max w-test is {:.1}",
                id, worst
            );
        }
    }
}

/// Id and w-test of the observation holding the largest w-test on either axis,
/// if that value exceeds [`GROSS_ERROR_W_TEST`]
pub fn gross_error_candidate(analysis: &ResidualAnalysis, ids: &[usize]) -> Option<(usize, f64)> {
    let line = analysis.worst_line();
    let pixel = analysis.worst_pixel();
    let (index, worst) = match (line, pixel) {
        (Some(l), Some(p)) => if p.1 > l.1 { p } else { l },
        (Some(l), None) => l,
        (None, Some(p)) => p,
        (None, None) => return None,
    };
    (worst > GROSS_ERROR_W_TEST).then(|| (ids[index], worst))
}
