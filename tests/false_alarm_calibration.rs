//! End-to-end false-alarm calibration of the energy detector
//!
//! Pure white noise of known variance is cut into kernels; the fraction of flagged
//! kernels must match the requested false-alarm probability.


use npdetector::simulation::white_noise;
use npdetector::{
    CurveConfig, DetectorConfig, DetectorType, MemoryStore, NeymanPearsonDetector, NoStore, Precision,
    ThresholdConfig, TrainingData,
};
use test_utils::{flag_rate, kernel_matrix};

const KERNEL_SAMPLES: usize = 10;
const KERNELS: usize = 20_000;

fn energy_config(target_false_alarm: f64) -> DetectorConfig {
    let mut config = DetectorConfig::new(DetectorType::EnergyDetector, 0.01, test_utils::SAMPLE_RATE);
    config.curves = CurveConfig { precision: Precision::Low, ..CurveConfig::default() };
    config.threshold = ThresholdConfig { target_false_alarm, ..ThresholdConfig::default() };
    config
}

#[test]
fn test_energy_detector_false_alarm_rate() {
    npdetector::tracing_init::init_test_tracing();

    let built = NeymanPearsonDetector::build_quiet(energy_config(0.01), TrainingData::default(), &NoStore)
        .expect("Failed to build detector");
    let detector = built.value.detector;
    assert_eq!(detector.curves().n_variables, KERNEL_SAMPLES);

    let samples = white_noise(KERNEL_SAMPLES * KERNELS, 1.0, 2024);
    let segments = kernel_matrix(&samples, KERNEL_SAMPLES);
    let detection = detector.detect(&segments, &vec![1.0; KERNELS]).expect("Detection failed");

    // chi-squared(10) upper 1% point
    for &t in &detection.thresholds.thresholds {
        assert!((t - 23.209).abs() < 0.1, "threshold {t}");
    }
    let rate = flag_rate(&detection.flags);
    println!("False-alarm rate: {rate:.4}");
    assert!((rate - 0.01).abs() < 0.004, "false-alarm rate {rate}");
}

#[test]
fn test_energy_threshold_tracks_noise_variance() {
    let detector = NeymanPearsonDetector::build_quiet(energy_config(0.05), TrainingData::default(), &NoStore)
        .expect("Failed to build detector")
        .value
        .detector;

    let kernels = 5_000;
    let sigma = 3.0;
    let samples = white_noise(KERNEL_SAMPLES * kernels, sigma, 11);
    let segments = kernel_matrix(&samples, KERNEL_SAMPLES);
    let detection = detector.detect(&segments, &vec![sigma * sigma; kernels]).expect("Detection failed");

    let rate = flag_rate(&detection.flags);
    assert!((rate - 0.05).abs() < 0.012, "false-alarm rate {rate}");
    assert!(detection.thresholds.false_alarm.iter().all(|&p| (p - 0.05).abs() < 2e-3));
}

#[test]
fn test_stored_curves_give_identical_detections() {
    let config = energy_config(0.01);
    let first = NeymanPearsonDetector::build_quiet(config.clone(), TrainingData::default(), &NoStore)
        .expect("Failed to build detector")
        .value;

    let mut store = MemoryStore::new();
    for (name, artifact) in first.new_artifacts {
        npdetector::ArtifactStore::save(&mut store, name, artifact);
    }
    let second = NeymanPearsonDetector::build_quiet(config, TrainingData::default(), &store)
        .expect("Failed to load detector")
        .value;
    assert!(second.new_artifacts.is_empty());

    let samples = white_noise(KERNEL_SAMPLES * 500, 1.0, 5);
    let segments = kernel_matrix(&samples, KERNEL_SAMPLES);
    let variances = vec![1.0; 500];
    assert_eq!(
        first.detector.detect(&segments, &variances).expect("Detection failed"),
        second.detector.detect(&segments, &variances).expect("Detection failed")
    );
}
