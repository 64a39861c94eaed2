use approx::assert_abs_diff_eq;
use ndarray::{array, Array1};
use sarcoreg::core::WarpPolynomial;
use sarcoreg::{
    estimate, CoregError, EstimatorParams, NormalizationBounds, Observation, RobustEstimator,
    Termination, WeightPolicy,
};
use std::sync::atomic::AtomicBool;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scattered positions over a 5000 x 20000 pixel scene
fn scattered_positions(count: usize) -> Vec<(f64, f64)> {
    (0..count)
        .map(|i| {
            let line = ((i * 37) % 101) as f64 * 50.0;
            let pixel = ((i * 53) % 97) as f64 * 200.0 + (i % 7) as f64 * 13.0;
            (line, pixel)
        })
        .collect()
}

/// Observations sampled exactly from the given polynomials
fn synthetic_observations(
    positions: &[(f64, f64)],
    coeff_line: Array1<f64>,
    coeff_pixel: Array1<f64>,
) -> Vec<Observation> {
    let mut observations: Vec<Observation> = positions
        .iter()
        .enumerate()
        .map(|(i, &(line, pixel))| Observation::new(i, line, pixel, 0.0, 0.0, 0.8))
        .collect();

    let bounds = NormalizationBounds::from_observations(&observations).unwrap();
    let warp = WarpPolynomial::new(bounds, coeff_line, coeff_pixel).unwrap();
    for obs in observations.iter_mut() {
        let (d_line, d_pixel) = warp.evaluate(obs.line, obs.pixel);
        obs.d_line = d_line;
        obs.d_pixel = d_pixel;
    }
    observations
}

fn true_line() -> Array1<f64> {
    array![1.5, 0.3, -0.2, 0.05, 0.02, -0.01]
}

fn true_pixel() -> Array1<f64> {
    array![-0.8, 0.1, 0.4, 0.0, -0.03, 0.02]
}

fn assert_coefficients(got: &Array1<f64>, want: &Array1<f64>, epsilon: f64) {
    assert_eq!(got.len(), want.len());
    for (g, w) in got.iter().zip(want.iter()) {
        assert_abs_diff_eq!(*g, *w, epsilon = epsilon);
    }
}

#[test]
fn test_noiseless_data_recovers_coefficients() {
    init_logging();
    let observations = synthetic_observations(&scattered_positions(40), true_line(), true_pixel());

    let estimation = RobustEstimator::new().estimate(&observations).unwrap();

    assert_eq!(estimation.diagnostics.termination, Termination::Converged);
    assert!(estimation.diagnostics.removed_observation_ids.is_empty());
    assert_eq!(estimation.diagnostics.iterations, 1);
    assert_eq!(estimation.observations.len(), 40);
    assert_coefficients(&estimation.solution.coeff_line, &true_line(), 1e-9);
    assert_coefficients(&estimation.solution.coeff_pixel, &true_pixel(), 1e-9);

    assert_eq!(estimation.solution.covariance.dim(), (6, 6));
    assert!(estimation.diagnostics.max_inversion_deviation <= 0.001);
    assert!(estimation.diagnostics.stability_warnings.is_empty());
}

#[test]
fn test_single_outlier_is_removed() {
    init_logging();
    let mut observations = synthetic_observations(&scattered_positions(40), true_line(), true_pixel());
    observations[17].d_line += 30.0;

    let estimation = RobustEstimator::new().estimate(&observations).unwrap();

    assert_eq!(estimation.diagnostics.removed_observation_ids, vec![17]);
    assert_eq!(estimation.diagnostics.termination, Termination::Converged);
    assert_eq!(estimation.diagnostics.iterations, 2);
    assert_eq!(estimation.observations.len(), 39);
    assert_coefficients(&estimation.solution.coeff_line, &true_line(), 1e-9);
    assert_coefficients(&estimation.solution.coeff_pixel, &true_pixel(), 1e-9);
}

#[test]
fn test_plane_with_corrupted_line_offset() {
    init_logging();
    let positions = [
        (120.0, 80.0),
        (340.0, 910.0),
        (560.0, 270.0),
        (780.0, 640.0),
        (990.0, 150.0),
        (210.0, 480.0),
        (430.0, 30.0),
        (650.0, 990.0),
        (870.0, 360.0),
        (60.0, 720.0),
    ];
    let mut observations: Vec<Observation> = positions
        .iter()
        .enumerate()
        .map(|(i, &(line, pixel))| {
            let d_line = 3.0 + 0.002 * line - 0.001 * pixel;
            let d_pixel = -2.0 + 0.0005 * line + 0.003 * pixel;
            Observation::new(100 + i, line, pixel, d_line, d_pixel, 1.0)
        })
        .collect();
    observations[4].d_line += 50.0;

    let estimation = estimate(&observations, 1, WeightPolicy::Uniform, 0.15, 0.10, 1.97, 20).unwrap();

    assert_eq!(estimation.diagnostics.removed_observation_ids, vec![104]);
    assert_eq!(estimation.diagnostics.termination, Termination::Converged);
    assert_eq!(estimation.observations.len(), 9);
    assert!(estimation.residuals.residual_line.iter().all(|e| e.abs() < 1e-6));
    assert!(estimation.residuals.residual_pixel.iter().all(|e| e.abs() < 1e-6));

    let warp = estimation.warp_polynomial().unwrap();
    let (d_line, d_pixel) = warp.evaluate(500.0, 500.0);
    assert_abs_diff_eq!(d_line, 3.0 + 1.0 - 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(d_pixel, -2.0 + 0.25 + 1.5, epsilon = 1e-6);
}

#[test]
fn test_removal_until_exhausted() {
    init_logging();
    // Points on a convex curve, no three collinear
    let noise_line = [0.3, -0.5, 0.2, 0.7, -0.4, 0.1];
    let noise_pixel = [0.1, 0.6, -0.2, -0.3, 0.5, -0.1];
    let observations: Vec<Observation> = (0..6)
        .map(|i| {
            let line = i as f64 * 100.0;
            let pixel = (i * i) as f64 * 40.0;
            Observation::new(i, line, pixel, noise_line[i], noise_pixel[i], 1.0)
        })
        .collect();

    let estimation = estimate(&observations, 1, WeightPolicy::Uniform, 1e-3, 1e-3, 1.96, 100).unwrap();

    assert_eq!(estimation.diagnostics.termination, Termination::Exhausted);
    assert_eq!(estimation.observations.len(), 3);
    assert_eq!(estimation.diagnostics.removed_observation_ids.len(), 3);
    assert_eq!(estimation.diagnostics.iterations, 4);
    assert!(estimation.diagnostics.overall_model_test_line.is_nan());

    // Removed and surviving ids partition the input
    let mut all_ids = estimation.observations.ids();
    all_ids.extend(&estimation.diagnostics.removed_observation_ids);
    all_ids.sort_unstable();
    assert_eq!(all_ids, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_zero_iterations_keeps_first_solution() {
    init_logging();
    let mut observations = synthetic_observations(&scattered_positions(25), true_line(), true_pixel());
    observations[3].d_pixel -= 12.0;

    let params = EstimatorParams {
        max_iterations: 0,
        ..EstimatorParams::default()
    };
    let estimation = RobustEstimator::with_params(params).estimate(&observations).unwrap();

    assert_eq!(estimation.diagnostics.termination, Termination::MaxIterations);
    assert!(estimation.diagnostics.removed_observation_ids.is_empty());
    assert_eq!(estimation.observations.len(), 25);
    assert!(estimation.diagnostics.worst_w_test_pixel > 1.96);

    // Same fit as a plain least-squares adjustment accepting everything
    let accept_all = EstimatorParams {
        critical_value: 1e12,
        ..EstimatorParams::default()
    };
    let plain = RobustEstimator::with_params(accept_all).estimate(&observations).unwrap();
    assert_eq!(plain.diagnostics.termination, Termination::Converged);
    assert_coefficients(&estimation.solution.coeff_pixel, &plain.solution.coeff_pixel, 1e-12);
}

#[test]
fn test_coincident_positions_are_fatal() {
    init_logging();
    let observations: Vec<Observation> = (0..8)
        .map(|i| Observation::new(i, 1200.0, 3400.0, 0.5 + 0.01 * i as f64, -0.2, 1.0))
        .collect();

    let result = estimate(&observations, 1, WeightPolicy::Uniform, 0.15, 0.10, 1.96, 20);
    assert!(matches!(
        result,
        Err(CoregError::SingularNormalMatrix(_)) | Err(CoregError::UnstableInversion { .. })
    ));

    // Same with caller bounds, where every design row is identical but non-zero
    let params = EstimatorParams {
        degree: 1,
        bounds: Some(NormalizationBounds::new(0.0, 5000.0, 0.0, 20000.0).unwrap()),
        ..EstimatorParams::default()
    };
    let result = RobustEstimator::with_params(params).estimate(&observations);
    assert!(matches!(
        result,
        Err(CoregError::SingularNormalMatrix(_)) | Err(CoregError::UnstableInversion { .. })
    ));
}

#[test]
fn test_weighted_estimation() {
    init_logging();
    let mut observations = synthetic_observations(&scattered_positions(30), true_line(), true_pixel());
    for (i, obs) in observations.iter_mut().enumerate() {
        obs.quality = 0.3 + 0.02 * i as f64;
    }

    for policy in [WeightPolicy::Linear, WeightPolicy::Quadratic] {
        let params = EstimatorParams {
            weight_policy: policy,
            ..EstimatorParams::default()
        };
        let estimation = RobustEstimator::with_params(params).estimate(&observations).unwrap();
        assert_eq!(estimation.diagnostics.termination, Termination::Converged);
        assert_coefficients(&estimation.solution.coeff_line, &true_line(), 1e-9);
    }

    for obs in observations.iter_mut() {
        obs.quality = 0.0;
    }
    let params = EstimatorParams {
        weight_policy: WeightPolicy::Linear,
        ..EstimatorParams::default()
    };
    let result = RobustEstimator::with_params(params).estimate(&observations);
    assert!(matches!(result, Err(CoregError::DegenerateWeights(_))));
}

#[test]
fn test_unknown_weight_policy_is_rejected() {
    let result = "bamler".parse::<WeightPolicy>();
    assert!(matches!(result, Err(CoregError::UnsupportedWeightPolicy(_))));
}

#[test]
fn test_input_is_not_modified() {
    let mut observations = synthetic_observations(&scattered_positions(20), true_line(), true_pixel());
    observations[0].d_line += 40.0;
    let before = observations.clone();

    let estimation = RobustEstimator::new().estimate(&observations).unwrap();

    assert_eq!(observations, before);
    assert_eq!(estimation.diagnostics.removed_observation_ids, vec![0]);
}

#[test]
fn test_cancellation() {
    let observations = synthetic_observations(&scattered_positions(20), true_line(), true_pixel());
    let cancel = AtomicBool::new(true);

    let result = RobustEstimator::new().estimate_with_cancel(&observations, &cancel);
    assert!(matches!(result, Err(CoregError::Cancelled { .. })));

    let not_cancelled = AtomicBool::new(false);
    assert!(RobustEstimator::new()
        .estimate_with_cancel(&observations, &not_cancelled)
        .is_ok());
}

#[test]
fn test_statistics_and_report() {
    let mut observations = synthetic_observations(&scattered_positions(30), true_line(), true_pixel());
    observations[11].d_pixel += 8.0;

    let estimation = RobustEstimator::new().estimate(&observations).unwrap();
    let statistics = estimation.statistics();

    assert_eq!(statistics.rms.len(), estimation.observations.len());
    assert!(statistics.rms_mean < 1e-9);
    assert!(statistics.line_residual_std < 1e-9);

    let report = format!("{}", estimation.report(&statistics));
    assert!(report.contains("RMS mean"));
    assert_eq!(report.lines().filter(|l| l.contains(" | ")).count(), 1 + 29);
}

#[test]
fn test_params_and_diagnostics_serialize() {
    let params = EstimatorParams {
        degree: 3,
        weight_policy: WeightPolicy::Quadratic,
        ..EstimatorParams::default()
    };
    let json = serde_json::to_string(&params).unwrap();
    let restored: EstimatorParams = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.degree, 3);
    assert_eq!(restored.weight_policy, WeightPolicy::Quadratic);

    let observations = synthetic_observations(&scattered_positions(20), true_line(), true_pixel());
    let estimation = RobustEstimator::new().estimate(&observations).unwrap();
    let diagnostics = serde_json::to_string(&estimation.diagnostics).unwrap();
    assert!(diagnostics.contains("Converged"));
}
