//! Estimator-correlator pipeline: training -> covariance -> eigen data -> curves ->
//! statistics -> thresholds -> event windows


use npdetector::simulation::{colored_noise, embed_burst, gaussian_burst, white_noise};
use npdetector::{
    Artifact, CurveConfig, DetectorConfig, DetectorType, EstimatorKind, NeymanPearsonDetector, NoStore, Precision,
    TrainingData,
};
use test_utils::{burst_rows, flag_rate, kernel_matrix, noise_rows, SAMPLE_RATE};

const KERNEL_SAMPLES: usize = 16;
const SIGNAL_BAND: [f64; 2] = [0.05, 0.3];
const NOISE_BAND: [f64; 2] = [0.1, 0.8];

fn correlator_config(detector_type: DetectorType) -> DetectorConfig {
    let mut config = DetectorConfig::new(detector_type, KERNEL_SAMPLES as f64 / SAMPLE_RATE, SAMPLE_RATE);
    config.estimator = EstimatorKind::OracleApproximating;
    config.min_kernels_per_window = 2;
    config.curves = CurveConfig {
        precision: Precision::Low,
        snr_levels_db: (-30..=30).step_by(3).map(f64::from).collect(),
        ..CurveConfig::default()
    };
    config
}

/// Background of `kernels` kernels with bursts at +10 dB in the given kernels
fn recording(background: Vec<f64>, burst_kernels: &[usize], seed: u64) -> Vec<f64> {
    let mut samples = background;
    for (i, &k) in burst_kernels.iter().enumerate() {
        let burst = gaussian_burst(KERNEL_SAMPLES, SAMPLE_RATE, SIGNAL_BAND, seed + i as u64).expect("Failed to generate burst");
        embed_burst(&mut samples, &burst, k * KERNEL_SAMPLES, 10.0, 1.0);
    }
    samples
}

#[test]
fn test_white_noise_correlator_pipeline() {
    npdetector::tracing_init::init_test_tracing();

    let signal = burst_rows(200, KERNEL_SAMPLES, SIGNAL_BAND, 100);
    let built = NeymanPearsonDetector::build_quiet(
        correlator_config(DetectorType::EstimatorCorrelatorWhite),
        TrainingData { signal: Some(&signal), noise: None },
        &NoStore,
    )
    .expect("Failed to build detector")
    .value;

    let kinds: Vec<&str> = built
        .new_artifacts
        .iter()
        .map(|(_, a)| match a {
            Artifact::Covariance(_) => "covariance",
            Artifact::Eigen(_) => "eigen",
            Artifact::Curves(_) => "curves",
        })
        .collect();
    assert_eq!(kinds, vec!["covariance", "eigen", "curves"]);
    assert!(built.new_artifacts[1].0.starts_with("EIG_signal_ECW_"));

    let detector = built.detector;
    let eigen = detector.eigen().expect("Missing eigen data");
    assert!((eigen.signal_eigenvalues_norm().sum() - KERNEL_SAMPLES as f64).abs() < 1e-6);

    let kernels = 400;
    let bursts = [50, 51, 300];
    let samples = recording(white_noise(KERNEL_SAMPLES * kernels, 1.0, 9), &bursts, 500);
    let segments = kernel_matrix(&samples, KERNEL_SAMPLES);
    let detection = detector.detect(&segments, &vec![1.0; kernels]).expect("Detection failed");

    for &k in &bursts {
        assert!(detection.flags[k], "burst kernel {k} missed");
        assert!(detection.windows.iter().any(|w| w.signal.start <= k && w.signal.end >= k));
    }
    let noise_only: Vec<bool> = detection
        .flags
        .iter()
        .enumerate()
        .filter(|(k, _)| !bursts.contains(k))
        .map(|(_, &f)| f)
        .collect();
    assert!(flag_rate(&noise_only) < 0.1, "noise-only rate {}", flag_rate(&noise_only));

    let event = detection
        .events
        .iter()
        .find(|e| e.signal_time1 <= 50.0 * 0.016 + 1e-9 && e.signal_time2 >= 52.0 * 0.016 - 1e-9)
        .expect("Missing event for the double burst");
    assert!(event.noise_time2.is_some_and(|t| t <= event.signal_time1 + 1e-9));
}

#[test]
fn test_colored_noise_correlator_pipeline() {
    npdetector::tracing_init::init_test_tracing();

    let signal = burst_rows(200, KERNEL_SAMPLES, SIGNAL_BAND, 200);
    let noise = noise_rows(400, KERNEL_SAMPLES, NOISE_BAND, 300);
    let built = NeymanPearsonDetector::build_quiet(
        correlator_config(DetectorType::EstimatorCorrelatorColored),
        TrainingData { signal: Some(&signal), noise: Some(&noise) },
        &NoStore,
    )
    .expect("Failed to build detector");

    // Signal and noise covariances, eigen data, curves
    assert_eq!(built.value.new_artifacts.len(), 4);
    assert!(built.value.new_artifacts[2].0.starts_with("EIG_signal~noise_ECC_"));
    let detector = built.value.detector;
    assert!(detector.eigen().is_some_and(|e| e.noise().is_some()));

    let kernels = 400;
    let bursts = [120, 250];
    let background = colored_noise(KERNEL_SAMPLES * kernels, SAMPLE_RATE, NOISE_BAND, 31).expect("Failed to generate noise");
    let samples = recording(background, &bursts, 700);
    let segments = kernel_matrix(&samples, KERNEL_SAMPLES);
    let detection = detector.detect(&segments, &vec![1.0; kernels]).expect("Detection failed");

    for &k in &bursts {
        assert!(detection.flags[k], "burst kernel {k} missed");
    }
    assert!(flag_rate(&detection.flags) < 0.15, "flag rate {}", flag_rate(&detection.flags));
    // Colored-noise curves are built in SNR only
    assert!(detection.thresholds.thresholds.iter().all(|t| t.is_finite() && *t >= 0.0));
}
