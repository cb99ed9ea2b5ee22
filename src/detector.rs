//! Neyman-Pearson detector
//!
//! **Build**: covariance -> eigen data -> performance curves, each taken from the
//! artifact store when present and built from training data otherwise. Everything
//! built is returned so the caller can persist it.
//!
//! **Detect**: statistic per kernel -> threshold per kernel -> flags -> event windows.
//! A kernel is a detection when its statistic exceeds its threshold.

use nalgebra::DMatrix;
use snafu::ensure;
use tracing::{debug, info, instrument};

use crate::covariance::{self, Bandpass, CovarianceConfig, CovarianceData, EstimatorKind};
use crate::diagnostics::{Diagnosed, Diagnostics, NoProgress, ProgressObserver};
use crate::eigen::{self, EigenData};
use crate::error::{DetectorError, DimensionMismatchSnafu, Result};
use crate::grouping::{self, DetectionEvent, EventWindow};
use crate::performance::{self, CurveConfig, CurveSource, PerformanceCurveSet};
use crate::statistic;
use crate::store::{Artifact, ArtifactKey, ArtifactKind, ArtifactStore};
use crate::threshold::{self, ThresholdConfig, Thresholds};
use crate::types::{DetectorType, NoiseType};

/// Configuration of a [`NeymanPearsonDetector`]
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub detector_type: DetectorType,
    /// Kernel duration in seconds
    pub kernel_duration: f64,
    /// Target sample rate in Hz
    pub sample_rate: f64,
    /// Sample rate of the training observations in Hz
    pub input_rate: f64,
    pub estimator: EstimatorKind,
    pub filter: Option<Bandpass>,
    pub curves: CurveConfig,
    pub threshold: ThresholdConfig,
    /// Shortest event window in kernels
    pub min_kernels_per_window: usize,
    /// Name of the signal training class
    pub signal_source: String,
    /// Name of the noise training class
    pub noise_source: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detector_type: DetectorType::EnergyDetector,
            kernel_duration: 0.01,
            sample_rate: 1000.0,
            input_rate: 1000.0,
            estimator: EstimatorKind::default(),
            filter: None,
            curves: CurveConfig::default(),
            threshold: ThresholdConfig::default(),
            min_kernels_per_window: 1,
            signal_source: "signal".to_string(),
            noise_source: "noise".to_string(),
        }
    }
}

impl DetectorConfig {
    pub fn new(detector_type: DetectorType, kernel_duration: f64, sample_rate: f64) -> Self {
        Self {
            detector_type,
            kernel_duration,
            sample_rate,
            input_rate: sample_rate,
            ..Self::default()
        }
    }

    /// Bandpass cutoffs recorded with the curves, `[0, 1]` without a filter
    pub fn cutoff_freqs(&self) -> [f64; 2] {
        self.filter.map_or([0.0, 1.0], |f| f.cutoffs)
    }

    pub fn kernel_samples(&self) -> usize {
        covariance::kernel_samples(self.kernel_duration, self.sample_rate)
    }

    fn covariance_config(&self) -> CovarianceConfig {
        CovarianceConfig {
            kernel_duration: self.kernel_duration,
            sample_rate: self.sample_rate,
            input_rate: self.input_rate,
            estimator: self.estimator,
            filter: self.filter,
        }
    }

    fn key(&self, source: &str) -> ArtifactKey {
        ArtifactKey {
            source: source.to_string(),
            detector_type: self.detector_type,
            cutoff_freqs: self.cutoff_freqs(),
            resample_rate: self.sample_rate,
            kernel_duration: self.kernel_duration,
            estimator: self.estimator,
        }
    }

    /// Source name of artifacts derived from the whole training set
    fn combined_source(&self) -> String {
        match self.detector_type.noise_type() {
            Some(NoiseType::Colored) => format!("{}~{}", self.signal_source, self.noise_source),
            Some(NoiseType::White) => self.signal_source.clone(),
            None => "energy".to_string(),
        }
    }
}

/// Training observations, one row per observation
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainingData<'a> {
    pub signal: Option<&'a [Vec<f64>]>,
    pub noise: Option<&'a [Vec<f64>]>,
}

/// Output of [`NeymanPearsonDetector::build`]
#[derive(Debug, Clone)]
pub struct BuiltDetector {
    pub detector: NeymanPearsonDetector,
    /// Artifacts that were not in the store, keyed by store name
    pub new_artifacts: Vec<(String, Artifact)>,
}

/// Result of running the detector over a batch of kernels
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub statistics: Vec<f64>,
    pub thresholds: Thresholds,
    pub flags: Vec<bool>,
    pub windows: Vec<EventWindow>,
    pub events: Vec<DetectionEvent>,
}

/// Detector with its eigen data and performance curves
#[derive(Debug, Clone, PartialEq)]
pub struct NeymanPearsonDetector {
    config: DetectorConfig,
    eigen: Option<EigenData>,
    curves: PerformanceCurveSet,
}

/// Store lookups and newly built artifacts for one build
struct Builder<'a> {
    store: &'a dyn ArtifactStore,
    new_artifacts: Vec<(String, Artifact)>,
    diagnostics: Diagnostics,
}

impl Builder<'_> {
    fn covariance(&mut self, key: &ArtifactKey, rows: Option<&[Vec<f64>]>, config: &CovarianceConfig, class: &'static str) -> Result<CovarianceData> {
        let name = key.name(ArtifactKind::Covariance);
        if let Some(Artifact::Covariance(data)) = self.store.load(&name) {
            debug!(%name, "covariance loaded");
            return Ok(data);
        }
        let rows = rows.ok_or_else(|| DetectorError::InvalidParameter {
            name: class,
            reason: format!("no training data and no stored artifact '{name}'"),
        })?;
        let data = covariance::estimate(rows, config)?.into_value(&mut self.diagnostics);
        self.new_artifacts.push((name, Artifact::Covariance(data.clone())));
        Ok(data)
    }

    fn eigen(&mut self, config: &DetectorConfig, noise_type: NoiseType, training: TrainingData<'_>) -> Result<EigenData> {
        let name = config.key(&config.combined_source()).name(ArtifactKind::Eigen);
        if let Some(Artifact::Eigen(data)) = self.store.load(&name) {
            debug!(%name, "eigen data loaded");
            return Ok(data);
        }
        let covariance_config = config.covariance_config();
        let signal = self.covariance(&config.key(&config.signal_source), training.signal, &covariance_config, "signal training data")?;
        let noise = match noise_type {
            NoiseType::White => None,
            NoiseType::Colored => {
                Some(self.covariance(&config.key(&config.noise_source), training.noise, &covariance_config, "noise training data")?)
            }
        };
        let data = eigen::decompose(&signal, noise.as_ref())?;
        self.new_artifacts.push((name, Artifact::Eigen(data.clone())));
        Ok(data)
    }

    fn curves(&mut self, config: &DetectorConfig, source: &CurveSource<'_>, progress: &dyn ProgressObserver) -> Result<PerformanceCurveSet> {
        let name = config.key(&config.combined_source()).name(ArtifactKind::Curves);
        if let Some(Artifact::Curves(set)) = self.store.load(&name) {
            debug!(%name, "performance curves loaded");
            return Ok(set);
        }
        let set = performance::build_curve_set(source, config.cutoff_freqs(), &config.curves, progress)?
            .into_value(&mut self.diagnostics);
        self.new_artifacts.push((name, Artifact::Curves(set.clone())));
        Ok(set)
    }
}

impl NeymanPearsonDetector {
    /// Assemble a detector from existing artifacts
    ///
    /// # Errors
    /// * `MissingEigenData` / `InvalidParameter` when the eigen data does not suit the
    ///   detector type
    /// * `DimensionMismatch` when the curves were built for another kernel size
    pub fn from_parts(config: DetectorConfig, eigen: Option<EigenData>, curves: PerformanceCurveSet) -> Result<Self> {
        let n = config.kernel_samples();
        let eigen = match config.detector_type.noise_type() {
            None => None,
            Some(_) => {
                CurveSource::for_detector(config.detector_type, n, eigen.as_ref())?;
                let n_eigen = eigen.as_ref().map_or(0, EigenData::n_samples);
                if n_eigen != n {
                    return Err(DetectorError::DimensionMismatch { what: "eigen data size", expected: n, actual: n_eigen });
                }
                eigen
            }
        };
        if curves.n_variables != n {
            return Err(DetectorError::DimensionMismatch { what: "curve kernel size", expected: n, actual: curves.n_variables });
        }
        Ok(Self { config, eigen, curves })
    }

    /// Build (or load) every artifact the detector needs
    ///
    /// # Arguments
    /// * `config` - Detector configuration
    /// * `training` - Signal / noise observations, needed only for artifacts missing from the store
    /// * `store` - Artifact lookup
    /// * `progress` - Receives curve-construction progress
    ///
    /// # Returns
    /// The detector plus newly built artifacts, with data-quality and precision warnings
    #[instrument(skip_all, fields(detector = %config.detector_type, kernel = config.kernel_duration))]
    pub fn build(
        config: DetectorConfig,
        training: TrainingData<'_>,
        store: &dyn ArtifactStore,
        progress: &dyn ProgressObserver,
    ) -> Result<Diagnosed<BuiltDetector>> {
        let mut builder = Builder { store, new_artifacts: Vec::new(), diagnostics: Diagnostics::new() };
        let n = config.kernel_samples();
        let eigen = match config.detector_type.noise_type() {
            None => None,
            Some(noise_type) => Some(builder.eigen(&config, noise_type, training)?),
        };

        let source = CurveSource::for_detector(config.detector_type, n, eigen.as_ref())?;
        let curves = builder.curves(&config, &source, progress)?;
        info!(
            detector = %config.detector_type,
            n,
            built = builder.new_artifacts.len(),
            "detector ready"
        );

        let detector = Self::from_parts(config, eigen, curves)?;
        Ok(Diagnosed::new(
            BuiltDetector { detector, new_artifacts: builder.new_artifacts },
            builder.diagnostics,
        ))
    }

    /// [`NeymanPearsonDetector::build`] without progress reporting
    pub fn build_quiet(config: DetectorConfig, training: TrainingData<'_>, store: &dyn ArtifactStore) -> Result<Diagnosed<BuiltDetector>> {
        Self::build(config, training, store, &NoProgress)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn eigen(&self) -> Option<&EigenData> {
        self.eigen.as_ref()
    }

    pub fn curves(&self) -> &PerformanceCurveSet {
        &self.curves
    }

    /// Flag detections in a batch of kernels and group them into events
    ///
    /// # Arguments
    /// * `segments` - `samples x kernels` matrix of consecutive kernels
    /// * `noise_variances` - Background noise variance per kernel
    ///
    /// # Errors
    /// `DimensionMismatch` when the kernel length differs from the curves' kernel size or
    /// the variances do not match the kernel count
    #[instrument(skip_all, fields(detector = %self.config.detector_type, kernels = segments.ncols()))]
    pub fn detect(&self, segments: &DMatrix<f64>, noise_variances: &[f64]) -> Result<Detection> {
        ensure!(
            segments.nrows() == self.curves.n_variables,
            DimensionMismatchSnafu { what: "kernel samples", expected: self.curves.n_variables, actual: segments.nrows() }
        );
        let statistics = statistic::compute(segments, self.config.detector_type, noise_variances, self.eigen.as_ref())?;
        let signal_variances = statistic::signal_variances(segments, noise_variances);
        let thresholds = threshold::solve(&self.curves, &self.config.threshold, &signal_variances, noise_variances)?;

        let flags: Vec<bool> = statistics
            .iter()
            .zip(&thresholds.thresholds)
            .map(|(s, t)| s > t)
            .collect();
        let windows = grouping::group(&flags, self.config.min_kernels_per_window);
        let events = windows
            .iter()
            .map(|w| DetectionEvent::from_window(w, self.config.kernel_duration))
            .collect();
        debug!(
            detections = flags.iter().filter(|&&f| f).count(),
            windows = windows.len(),
            "detection pass complete"
        );

        Ok(Detection { statistics, thresholds, flags, windows, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::Precision;
    use crate::simulation::{colored_noise, white_noise};
    use crate::store::{MemoryStore, NoStore};

    fn quick_curves() -> CurveConfig {
        CurveConfig {
            precision: Precision::Low,
            snr_levels_db: (-20..=20).step_by(4).map(f64::from).collect(),
            ..CurveConfig::default()
        }
    }

    fn training(n_obs: usize, len: usize, seed: u64) -> Vec<Vec<f64>> {
        (0..n_obs).map(|i| colored_noise(len, 1000.0, [0.05, 0.3], seed + i as u64).unwrap()).collect()
    }

    #[test]
    fn test_energy_detector_needs_no_training() {
        let config = DetectorConfig { curves: quick_curves(), ..DetectorConfig::default() };
        let built = NeymanPearsonDetector::build_quiet(config, TrainingData::default(), &NoStore).unwrap();
        assert!(built.value.detector.eigen().is_none());
        assert_eq!(built.value.new_artifacts.len(), 1);
        assert_eq!(built.value.detector.curves().n_variables, 10);
    }

    #[test]
    fn test_store_hits_skip_rebuilding() {
        let signal = training(30, 64, 1);
        let mut config = DetectorConfig::new(DetectorType::EstimatorCorrelatorWhite, 0.008, 1000.0);
        config.curves = quick_curves();
        let data = TrainingData { signal: Some(&signal), noise: None };

        let first = NeymanPearsonDetector::build_quiet(config.clone(), data, &NoStore).unwrap().value;
        // Signal covariance, eigen data, curves
        assert_eq!(first.new_artifacts.len(), 3);

        let mut store = MemoryStore::new();
        for (name, artifact) in first.new_artifacts {
            store.save(name, artifact);
        }
        let second = NeymanPearsonDetector::build_quiet(config, TrainingData::default(), &store).unwrap().value;
        assert!(second.new_artifacts.is_empty());
        assert_eq!(second.detector, first.detector);
    }

    #[test]
    fn test_missing_training_data_is_error() {
        let config = DetectorConfig::new(DetectorType::EstimatorCorrelatorColored, 0.008, 1000.0);
        let signal = training(20, 64, 3);
        let err = NeymanPearsonDetector::build_quiet(config, TrainingData { signal: Some(&signal), noise: None }, &NoStore).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidParameter { name: "noise training data", .. }));
    }

    #[test]
    fn test_detect_flags_loud_kernels() {
        let config = DetectorConfig { curves: quick_curves(), min_kernels_per_window: 2, ..DetectorConfig::default() };
        let detector = NeymanPearsonDetector::build_quiet(config, TrainingData::default(), &NoStore).unwrap().value.detector;

        let n = 10;
        let kernels = 12;
        let mut samples = white_noise(n * kernels, 1.0, 77);
        for v in samples.iter_mut().skip(8 * n).take(n) {
            *v *= 20.0;
        }
        let segments = DMatrix::from_column_slice(n, kernels, &samples);
        let detection = detector.detect(&segments, &vec![1.0; kernels]).unwrap();

        assert!(detection.flags[8]);
        let window = detection.windows.iter().find(|w| w.signal.start <= 8 && w.signal.end >= 8).unwrap();
        assert!(window.signal.kernels() >= 2);
        let event = detection.events.iter().find(|e| e.signal_time1 <= 0.08 + 1e-12 && e.signal_time2 >= 0.09 - 1e-12).unwrap();
        assert!(event.signal_time > event.signal_time1);
    }

    #[test]
    fn test_detect_rejects_wrong_kernel_length() {
        let config = DetectorConfig { curves: quick_curves(), ..DetectorConfig::default() };
        let detector = NeymanPearsonDetector::build_quiet(config, TrainingData::default(), &NoStore).unwrap().value.detector;

        let kernels = 1000;
        let segments = DMatrix::from_column_slice(40, kernels, &white_noise(40 * kernels, 1.0, 12));
        let err = detector.detect(&segments, &vec![1.0; kernels]).unwrap_err();
        assert!(matches!(err, DetectorError::DimensionMismatch { what: "kernel samples", expected: 10, actual: 40 }));
    }

    #[test]
    fn test_from_parts_checks_kernel_size() {
        let config = DetectorConfig { curves: quick_curves(), ..DetectorConfig::default() };
        let built = NeymanPearsonDetector::build_quiet(config, TrainingData::default(), &NoStore).unwrap().value;
        let curves = built.detector.curves().clone();
        let other = DetectorConfig::new(DetectorType::EnergyDetector, 0.02, 1000.0);
        assert!(matches!(
            NeymanPearsonDetector::from_parts(other, None, curves),
            Err(DetectorError::DimensionMismatch { .. })
        ));
    }
}
