//! Covariance Estimation
//!
//! Builds trace-normalized covariance matrices of kernel-length observations.
//!
//! **Pipeline**:
//! 1. Drop trailing NaN padding from each raw observation
//! 2. Optional Butterworth bandpass at the input rate (forward or zero-phase)
//! 3. FFT-resample the first kernel's worth of samples to the target rate
//! 4. Estimate the covariance with the configured strategy
//! 5. Divide by the mean diagonal so the matrix has unit average variance
//!
//! Observations shorter than the kernel are skipped with a data-quality warning; they
//! are never zero-padded. All physical scaling happens later through separate
//! signal / noise variance multipliers.

mod prepare;
mod shrinkage;

use core::fmt;
use core::str::FromStr;

use nalgebra::DMatrix;
use snafu::ensure;
use tracing::{debug, info, instrument};

use crate::diagnostics::{Diagnosed, Diagnostics};
use crate::error::{
    CovarianceTooLargeSnafu, DegenerateCovarianceSnafu, DetectorError, DimensionMismatchSnafu,
    InvalidParameterSnafu, NotEnoughObservationsSnafu, Result, MAX_KERNEL_SAMPLES,
};

pub use prepare::{Bandpass, FilterMode};
pub use shrinkage::{
    CorrelationShrinkage, CovarianceStrategy, DiagonalShrinkage, LeaveOneOutShrinkage,
    OneParameterShrinkage, OracleApproximatingShrinkage, RaoBlackwellLedoitWolf, SampleCovariance,
    TwoParameterShrinkage,
};

/// Covariance estimation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EstimatorKind {
    /// Unbiased sample covariance
    #[default]
    Sample,
    /// Oracle-Approximating Shrinkage toward a scaled identity
    OracleApproximating,
    /// Rao-Blackwell Ledoit-Wolf toward a scaled identity
    RaoBlackwellLedoitWolf,
    /// Shrinkage toward a scaled identity (common variance)
    OneParameter,
    /// Shrinkage toward common variance plus common covariance
    TwoParameter,
    /// Shrinkage of correlations toward zero, variances kept
    Correlation,
    /// Shrinkage toward the diagonal of the sample covariance
    DiagonalTarget,
    /// Scaled-identity shrinkage with leave-one-out likelihood selection
    LeaveOneOut,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 8] = [
        EstimatorKind::Sample,
        EstimatorKind::OracleApproximating,
        EstimatorKind::RaoBlackwellLedoitWolf,
        EstimatorKind::OneParameter,
        EstimatorKind::TwoParameter,
        EstimatorKind::Correlation,
        EstimatorKind::DiagonalTarget,
        EstimatorKind::LeaveOneOut,
    ];

    /// Instantiate the strategy for this kind
    pub fn strategy(self) -> Box<dyn CovarianceStrategy> {
        match self {
            EstimatorKind::Sample => Box::new(SampleCovariance),
            EstimatorKind::OracleApproximating => Box::new(OracleApproximatingShrinkage),
            EstimatorKind::RaoBlackwellLedoitWolf => Box::new(RaoBlackwellLedoitWolf),
            EstimatorKind::OneParameter => Box::new(OneParameterShrinkage),
            EstimatorKind::TwoParameter => Box::new(TwoParameterShrinkage),
            EstimatorKind::Correlation => Box::new(CorrelationShrinkage),
            EstimatorKind::DiagonalTarget => Box::new(DiagonalShrinkage),
            EstimatorKind::LeaveOneOut => Box::new(LeaveOneOutShrinkage::default()),
        }
    }

    /// Short tag used in artifact keys
    pub fn tag(self) -> &'static str {
        match self {
            EstimatorKind::Sample => "sample",
            EstimatorKind::OracleApproximating => "oas",
            EstimatorKind::RaoBlackwellLedoitWolf => "rblw",
            EstimatorKind::OneParameter => "shrink1",
            EstimatorKind::TwoParameter => "shrink2",
            EstimatorKind::Correlation => "corr",
            EstimatorKind::DiagonalTarget => "diag",
            EstimatorKind::LeaveOneOut => "loocv",
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for EstimatorKind {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        EstimatorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.tag() == needle)
            .ok_or_else(|| DetectorError::UnknownEstimator { name: s.to_string() })
    }
}

/// Parameters for [`estimate`]
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceConfig {
    /// Kernel duration in seconds
    pub kernel_duration: f64,
    /// Target (resampled) sample rate in Hz
    pub sample_rate: f64,
    /// Sample rate of the raw observations in Hz
    pub input_rate: f64,
    /// Estimation strategy
    pub estimator: EstimatorKind,
    /// Optional bandpass applied before resampling
    pub filter: Option<Bandpass>,
}

impl CovarianceConfig {
    /// Config for observations already at the target rate, sample covariance, no filter
    pub fn new(kernel_duration: f64, sample_rate: f64) -> Self {
        Self {
            kernel_duration,
            sample_rate,
            input_rate: sample_rate,
            estimator: EstimatorKind::default(),
            filter: None,
        }
    }

    /// Number of samples per kernel at the target rate
    pub fn kernel_samples(&self) -> usize {
        kernel_samples(self.kernel_duration, self.sample_rate)
    }

    fn validate(&self) -> Result<usize> {
        ensure!(
            self.kernel_duration.is_finite() && self.kernel_duration > 0.0,
            InvalidParameterSnafu { name: "kernel duration", reason: format!("{} s", self.kernel_duration) }
        );
        ensure!(
            self.sample_rate.is_finite() && self.sample_rate > 0.0,
            InvalidParameterSnafu { name: "sample rate", reason: format!("{} Hz", self.sample_rate) }
        );
        ensure!(
            self.input_rate.is_finite() && self.input_rate > 0.0,
            InvalidParameterSnafu { name: "input rate", reason: format!("{} Hz", self.input_rate) }
        );
        let samples = self.kernel_samples();
        ensure!(
            samples >= 1,
            InvalidParameterSnafu { name: "kernel duration", reason: "kernel holds no samples".to_string() }
        );
        ensure!(
            samples <= MAX_KERNEL_SAMPLES,
            CovarianceTooLargeSnafu { samples, max: MAX_KERNEL_SAMPLES }
        );
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        Ok(samples)
    }
}

pub(crate) fn kernel_samples(kernel_duration: f64, sample_rate: f64) -> usize {
    (kernel_duration * sample_rate).round().max(0.0) as usize
}

/// Trace-normalized covariance of kernel-length observations
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceData {
    kernel_duration: f64,
    sample_rate: f64,
    matrix: DMatrix<f64>,
}

impl CovarianceData {
    /// Wrap an existing covariance matrix, normalizing it to unit mean diagonal
    ///
    /// # Errors
    /// * `DimensionMismatch` if the matrix is not square or does not match the kernel size
    /// * `CovarianceTooLarge` if the kernel exceeds the size cap
    /// * `DegenerateCovariance` if the diagonal has no positive variance
    pub fn new(kernel_duration: f64, sample_rate: f64, matrix: DMatrix<f64>) -> Result<Self> {
        let samples = kernel_samples(kernel_duration, sample_rate);
        ensure!(
            samples <= MAX_KERNEL_SAMPLES,
            CovarianceTooLargeSnafu { samples, max: MAX_KERNEL_SAMPLES }
        );
        ensure!(
            matrix.is_square(),
            DimensionMismatchSnafu { what: "covariance columns", expected: matrix.nrows(), actual: matrix.ncols() }
        );
        ensure!(
            matrix.nrows() == samples,
            DimensionMismatchSnafu { what: "covariance size", expected: samples, actual: matrix.nrows() }
        );
        Ok(Self {
            kernel_duration,
            sample_rate,
            matrix: normalize_trace(matrix)?,
        })
    }

    pub fn kernel_duration(&self) -> f64 {
        self.kernel_duration
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Normalized covariance matrix (mean diagonal = 1)
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Kernel size N
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// True when both artifacts describe the same kernel
    pub fn same_kernel(&self, other: &CovarianceData) -> bool {
        self.n_samples() == other.n_samples()
            && (self.kernel_duration - other.kernel_duration).abs() <= 1e-12 * self.kernel_duration.abs()
            && (self.sample_rate - other.sample_rate).abs() <= 1e-9 * self.sample_rate.abs()
    }
}

/// Divide a covariance matrix by its mean diagonal
fn normalize_trace(matrix: DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = matrix.nrows().max(1) as f64;
    let mean_variance = matrix.trace() / n;
    ensure!(mean_variance.is_finite() && mean_variance > 0.0, DegenerateCovarianceSnafu);
    Ok(matrix / mean_variance)
}

/// Estimate a normalized covariance matrix from raw observation scores
///
/// # Arguments
/// * `raw_scores` - One row per independent, unit-variance observation at `config.input_rate`.
///   Trailing NaN values mark the end of a shorter observation.
/// * `config` - Kernel geometry, estimator and optional filter
///
/// # Returns
/// The covariance artifact plus data-quality warnings (skipped rows, estimator fallback)
#[instrument(skip(raw_scores, config), fields(observations = raw_scores.len(), estimator = %config.estimator))]
pub fn estimate(raw_scores: &[Vec<f64>], config: &CovarianceConfig) -> Result<Diagnosed<CovarianceData>> {
    let n_samples = config.validate()?;
    let mut diagnostics = Diagnostics::new();

    let observations = prepare::prepare_observations(raw_scores, config, n_samples, &mut diagnostics)?;
    let n_obs = observations.nrows();
    ensure!(n_obs >= 2, NotEnoughObservationsSnafu { usable: n_obs, required: 2usize });

    let mut strategy = config.estimator.strategy();
    if n_obs < strategy.min_observations() {
        diagnostics.data_quality(format!(
            "{} needs at least {} observations, got {}; falling back to sample covariance",
            strategy.name(),
            strategy.min_observations(),
            n_obs
        ));
        strategy = EstimatorKind::Sample.strategy();
    }
    if n_obs <= n_samples {
        debug!(n_obs, n_samples, "fewer observations than kernel samples, covariance is rank deficient");
    }

    let raw = strategy.estimate(&observations);
    let matrix = normalize_trace(raw)?;
    info!(n_samples, n_obs, strategy = strategy.name(), "covariance estimated");

    Ok(Diagnosed::new(
        CovarianceData {
            kernel_duration: config.kernel_duration,
            sample_rate: config.sample_rate,
            matrix,
        },
        diagnostics,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{colored_noise, white_noise};

    fn rows(n_obs: usize, len: usize, seed: u64) -> Vec<Vec<f64>> {
        (0..n_obs).map(|i| white_noise(len, 1.0, seed + i as u64)).collect()
    }

    fn mean_diagonal(data: &CovarianceData) -> f64 {
        data.matrix().trace() / data.n_samples() as f64
    }

    #[test]
    fn test_every_estimator_is_trace_normalized() {
        let raw = rows(40, 16, 7);
        for kind in EstimatorKind::ALL {
            let mut config = CovarianceConfig::new(0.016, 1000.0);
            config.estimator = kind;
            let result = estimate(&raw, &config).unwrap();
            assert_eq!(result.value.n_samples(), 16, "{kind}");
            assert!((mean_diagonal(&result.value) - 1.0).abs() < 1e-12, "{kind}");
            let m = result.value.matrix();
            assert!((m - m.transpose()).amax() < 1e-12, "{kind} not symmetric");
        }
    }

    #[test]
    fn test_rejects_oversized_kernel() {
        let config = CovarianceConfig::new(1.0, 10_001.0);
        let err = estimate(&rows(3, 10, 1), &config).unwrap_err();
        assert!(matches!(err, DetectorError::CovarianceTooLarge { samples: 10_001, .. }));
    }

    #[test]
    fn test_short_observations_are_skipped_not_padded() {
        let mut raw = rows(5, 32, 11);
        raw.push(white_noise(10, 1.0, 99));
        let mut padded = white_noise(32, 1.0, 123);
        for v in padded.iter_mut().skip(20) {
            *v = f64::NAN;
        }
        raw.push(padded);

        let config = CovarianceConfig::new(0.032, 1000.0);
        let result = estimate(&raw, &config).unwrap();
        let skipped = result
            .diagnostics
            .warnings()
            .iter()
            .filter(|w| w.to_string().contains("shorter than the kernel"))
            .count();
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_too_few_observations_is_error() {
        let config = CovarianceConfig::new(0.008, 1000.0);
        let err = estimate(&rows(1, 8, 3), &config).unwrap_err();
        assert!(matches!(err, DetectorError::NotEnoughObservations { usable: 1, .. }));
    }

    #[test]
    fn test_shrinkage_falls_back_with_two_observations() {
        let mut config = CovarianceConfig::new(0.008, 1000.0);
        config.estimator = EstimatorKind::RaoBlackwellLedoitWolf;
        let result = estimate(&rows(2, 8, 5), &config).unwrap();
        assert!(result
            .diagnostics
            .warnings()
            .iter()
            .any(|w| w.to_string().contains("falling back to sample covariance")));
    }

    #[test]
    fn test_resampled_and_filtered_observations() {
        let raw: Vec<Vec<f64>> = (0..30).map(|i| colored_noise(400, 2000.0, [0.1, 0.4], 50 + i).unwrap()).collect();
        let mut config = CovarianceConfig::new(0.02, 1000.0);
        config.input_rate = 2000.0;
        config.filter = Some(Bandpass { cutoffs: [0.05, 0.9], mode: FilterMode::ZeroPhase });
        let result = estimate(&raw, &config).unwrap();
        assert_eq!(result.value.n_samples(), 20);
        assert!(result.diagnostics.is_clean());
        assert!((mean_diagonal(&result.value) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_wrapping_existing_matrix_normalizes() {
        let matrix = DMatrix::from_diagonal_element(4, 4, 3.0);
        let data = CovarianceData::new(0.004, 1000.0, matrix).unwrap();
        assert!((mean_diagonal(&data) - 1.0).abs() < 1e-15);

        let zero = DMatrix::zeros(4, 4);
        assert!(matches!(
            CovarianceData::new(0.004, 1000.0, zero),
            Err(DetectorError::DegenerateCovariance)
        ));
    }

    #[test]
    fn test_estimator_kind_from_str() {
        assert_eq!("OAS".parse::<EstimatorKind>().unwrap(), EstimatorKind::OracleApproximating);
        assert!(matches!(
            "ledoit".parse::<EstimatorKind>(),
            Err(DetectorError::UnknownEstimator { .. })
        ));
    }
}
