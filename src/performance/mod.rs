//! Detection Performance Curves
//!
//! Computes probability density (PDF) and right-tail probability (RTP) curves of the
//! test statistic under the noise-only (false alarm) and signal-present (detection)
//! hypotheses, for a catalogue of SNR levels.
//!
//! **Detector families**:
//! - Energy detector: scaled (non-central) chi-squared statistic, analytic density
//! - Estimator-correlator: weighted sum of squared Gaussians, density obtained by
//!   numerically inverting the characteristic function
//!
//! **Numeric limits**:
//! Every curve is truncated at a statistic value found by an iteration-capped search.
//! A search that runs out of iterations returns its best estimate and records a
//! precision warning; it never aborts the batch.
//!
//! **Units**:
//! Curves are built at noise variance 1 and signal variance `10^(snr/10)`. Energy and
//! white-noise estimator-correlator thresholds therefore scale with the actual noise
//! variance; colored-noise curves depend on the SNR only.

mod chi2;
mod common_axis;
mod correlator;
mod energy;

use core::fmt;
use core::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use snafu::{ensure, OptionExt};
use tracing::{debug, info, instrument};

use crate::diagnostics::{Diagnosed, Diagnostics, NoProgress, ProgressObserver};
use crate::eigen::EigenData;
use crate::error::{DetectorError, InvalidParameterSnafu, MissingEigenDataSnafu, Result};
use crate::types::{DetectorType, NoiseType};

pub use chi2::ScaledChiSquared;
pub use common_axis::CommonAxisCurves;
pub use correlator::QuadraticForm;

/// Main-lobe sampling density at precision factor 1
pub const POINTS_IN_LOBE: usize = 250;

/// Accuracy / cost trade-off of the numeric curves
///
/// Right-tail errors on smooth densities: about 1e-5 (`Low`), 1e-8 (`Medium`), 1e-10 (`High`),
/// bounded by the truncation level `amplitude_ratio ^ -factor` that the tail fit recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Precision {
    Low,
    #[default]
    Medium,
    High,
}

impl Precision {
    pub fn factor(self) -> f64 {
        match self {
            Precision::Low => 1.0,
            Precision::Medium => 1.5,
            Precision::High => 2.0,
        }
    }

    /// Samples across the main lobe of a density
    pub fn points_in_lobe(self) -> usize {
        (POINTS_IN_LOBE as f64 * self.factor()).round() as usize
    }

    /// Parse a numeric precision factor (1, 1.5 or 2)
    pub fn from_factor(factor: f64) -> Result<Self> {
        [Precision::Low, Precision::Medium, Precision::High]
            .into_iter()
            .find(|p| (p.factor() - factor).abs() < 1e-9)
            .ok_or_else(|| DetectorError::InvalidParameter {
                name: "precision factor",
                reason: format!("{factor} is not one of 1, 1.5, 2"),
            })
    }
}

impl FromStr for Precision {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let factor = s.trim().parse::<f64>().map_err(|e| DetectorError::InvalidParameter {
            name: "precision factor",
            reason: e.to_string(),
        })?;
        Precision::from_factor(factor)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.factor())
    }
}

/// Configuration for curve construction
#[derive(Debug, Clone, PartialEq)]
pub struct CurveConfig {
    pub precision: Precision,
    /// Peak-to-truncation amplitude ratio, raised to the precision factor
    pub amplitude_ratio: f64,
    /// Iteration cap of every numeric-limit search
    pub max_iterations: usize,
    /// Byte budget of one characteristic-function block
    pub block_bytes: usize,
    /// SNR catalogue in dB, ascending
    pub snr_levels_db: Vec<f64>,
    /// Build SNR levels on the rayon pool
    pub parallel: bool,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            precision: Precision::default(),
            amplitude_ratio: 1e4,
            max_iterations: 100,
            block_bytes: 50 * 1024 * 1024,
            snr_levels_db: default_snr_levels(),
            parallel: true,
        }
    }
}

impl CurveConfig {
    /// Ratio actually used by the searches
    pub fn effective_ratio(&self) -> f64 {
        self.amplitude_ratio.powf(self.precision.factor())
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.amplitude_ratio.is_finite() && self.amplitude_ratio > 1.0,
            InvalidParameterSnafu { name: "amplitude ratio", reason: format!("{} must exceed 1", self.amplitude_ratio) }
        );
        ensure!(
            self.max_iterations > 0,
            InvalidParameterSnafu { name: "max iterations", reason: "must be positive".to_string() }
        );
        ensure!(
            !self.snr_levels_db.is_empty() && self.snr_levels_db.windows(2).all(|w| w[0] < w[1]),
            InvalidParameterSnafu { name: "SNR levels", reason: "must be non-empty and strictly ascending".to_string() }
        );
        Ok(())
    }
}

/// SNR catalogue: -50..=50 dB in 1 dB steps
pub fn default_snr_levels() -> Vec<f64> {
    (-50..=50).map(f64::from).collect()
}

/// PDF and right-tail probability of the statistic under one hypothesis
#[derive(Debug, Clone, PartialEq)]
pub struct HypothesisCurve {
    /// Statistic values, ascending and evenly spaced from 0
    pub axis: Vec<f64>,
    pub pdf: Vec<f64>,
    /// `P(statistic > axis[i])`, non-increasing
    pub rtp: Vec<f64>,
}

impl HypothesisCurve {
    /// Axis spacing
    pub fn resolution(&self) -> f64 {
        if self.axis.len() > 1 {
            self.axis[1] - self.axis[0]
        } else {
            0.0
        }
    }

    /// Largest statistic value on the axis
    pub fn upper_limit(&self) -> f64 {
        self.axis.last().copied().unwrap_or(0.0)
    }
}

/// Performance curves at one SNR level
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRecord {
    pub detector_type: DetectorType,
    pub signal_variance: f64,
    pub noise_variance: f64,
    /// `10 log10(signal_variance / noise_variance)`
    pub snr_db: f64,
    /// Kernel size N
    pub n_variables: usize,
    /// Bandpass cutoffs normalized to Nyquist
    pub cutoff_freqs: [f64; 2],
    pub false_alarm: HypothesisCurve,
    pub detection: HypothesisCurve,
}

/// Performance records for the whole SNR catalogue, ordered by ascending SNR
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceCurveSet {
    pub detector_type: DetectorType,
    pub n_variables: usize,
    pub cutoff_freqs: [f64; 2],
    records: Vec<PerformanceRecord>,
}

impl PerformanceCurveSet {
    /// Assemble a set from records, enforcing ascending SNR order
    pub fn new(detector_type: DetectorType, n_variables: usize, cutoff_freqs: [f64; 2], records: Vec<PerformanceRecord>) -> Result<Self> {
        ensure!(
            !records.is_empty() && records.windows(2).all(|w| w[0].snr_db < w[1].snr_db),
            InvalidParameterSnafu { name: "performance records", reason: "must be non-empty and ordered by ascending SNR".to_string() }
        );
        Ok(Self { detector_type, n_variables, cutoff_freqs, records })
    }

    pub fn records(&self) -> &[PerformanceRecord] {
        &self.records
    }

    pub fn snr_levels_db(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.snr_db).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Statistic distribution under one hypothesis
pub trait StatisticModel: Sync {
    fn mean(&self) -> f64;

    fn std_dev(&self) -> f64;

    fn density(&self, t: f64) -> f64;

    /// Densities at many points; implementations may evaluate in parallel
    fn densities(&self, t: &[f64]) -> Vec<f64> {
        t.iter().map(|&x| self.density(x)).collect()
    }
}

/// Largest number of axis samples in one curve
const MAX_AXIS_POINTS: usize = 1 << 22;

/// Sample a model on `[0, upper]` and integrate its right tail
///
/// The axis spacing is the main-lobe width (two standard deviations) divided by
/// `points_in_lobe`. The RTP is the reverse cumulative sum of the PDF times the spacing.
pub(crate) fn sample_curve(model: &dyn StatisticModel, upper: f64, points_in_lobe: usize) -> HypothesisCurve {
    let lobe = 2.0 * model.std_dev();
    let mut step = lobe / points_in_lobe.max(1) as f64;
    if !(step > 0.0) || !step.is_finite() {
        step = upper.max(f64::MIN_POSITIVE) / points_in_lobe.max(1) as f64;
    }
    let mut n_points = (upper / step).ceil() as usize + 1;
    if n_points > MAX_AXIS_POINTS {
        step = upper / (MAX_AXIS_POINTS - 1) as f64;
        n_points = MAX_AXIS_POINTS;
        debug!(upper, step, "curve axis capped");
    }

    let axis: Vec<f64> = (0..n_points).map(|i| i as f64 * step).collect();
    let pdf: Vec<f64> = model
        .densities(&axis)
        .into_iter()
        .map(|p| if p.is_finite() && p > 0.0 { p } else { 0.0 })
        .collect();
    let rtp = right_tail(&pdf, step);
    HypothesisCurve { axis, pdf, rtp }
}

/// Right-tail probability of a density sampled from 0 with spacing `step`
///
/// Reverse trapezoidal sum with the Euler-Maclaurin end correction (slopes from
/// second-order differences), plus the mass past the last sample from an exponential
/// fit over the last sixteenth of the axis, capped at `pdf[last] * axis length`. The
/// result is forced non-increasing.
pub(crate) fn right_tail(pdf: &[f64], step: f64) -> Vec<f64> {
    let n = pdf.len();
    let mut rtp = vec![0.0; n];
    if n == 0 {
        return rtp;
    }

    let mut acc = if n >= 2 {
        let back = ((n - 1) / 16).max(1);
        exponential_tail(pdf[n - 1 - back], pdf[n - 1], back as f64 * step).min(pdf[n - 1] * (n - 1) as f64 * step)
    } else {
        0.0
    };
    rtp[n - 1] = acc;
    for i in (0..n - 1).rev() {
        acc += 0.5 * (pdf[i] + pdf[i + 1]) * step;
        rtp[i] = acc;
    }

    if n >= 3 {
        let slope = |i: usize| -> f64 {
            if i == 0 {
                (-3.0 * pdf[0] + 4.0 * pdf[1] - pdf[2]) / (2.0 * step)
            } else if i == n - 1 {
                (3.0 * pdf[n - 1] - 4.0 * pdf[n - 2] + pdf[n - 3]) / (2.0 * step)
            } else {
                (pdf[i + 1] - pdf[i - 1]) / (2.0 * step)
            }
        };
        let end_slope = slope(n - 1);
        let c = step * step / 12.0;
        for (i, p) in rtp.iter_mut().enumerate().take(n - 1) {
            *p -= c * (end_slope - slope(i));
        }
    }

    let mut floor = 0.0f64;
    for p in rtp.iter_mut().rev() {
        floor = floor.max(*p);
        *p = floor;
    }
    rtp
}

/// Mass past the last sample when the density decays exponentially from `before` to
/// `last` over `distance`
fn exponential_tail(before: f64, last: f64, distance: f64) -> f64 {
    if last > 0.0 && before > last {
        last * distance / (before / last).ln()
    } else {
        0.0
    }
}

/// What the curves are built from
#[derive(Debug, Clone, Copy)]
pub enum CurveSource<'a> {
    /// Energy detector over a kernel of `n_variables` samples
    Energy { n_variables: usize },
    /// Estimator-correlator with the given eigen data
    Correlator { eigen: &'a EigenData },
}

impl<'a> CurveSource<'a> {
    /// Source matching a detector type
    ///
    /// # Errors
    /// * `MissingEigenData` for an estimator-correlator without eigen data
    /// * `InvalidParameter` if the eigen data noise model differs from the detector's
    pub fn for_detector(detector_type: DetectorType, n_variables: usize, eigen: Option<&'a EigenData>) -> Result<Self> {
        match detector_type.noise_type() {
            None => Ok(CurveSource::Energy { n_variables }),
            Some(noise_type) => {
                let eigen = eigen.context(MissingEigenDataSnafu { detector: "estimator-correlator" })?;
                ensure!(
                    eigen.noise_type() == noise_type,
                    InvalidParameterSnafu {
                        name: "eigen data",
                        reason: format!("{:?} noise eigen data used for {detector_type}", eigen.noise_type()),
                    }
                );
                Ok(CurveSource::Correlator { eigen })
            }
        }
    }

    fn detector_type(&self) -> DetectorType {
        match self {
            CurveSource::Energy { .. } => DetectorType::EnergyDetector,
            CurveSource::Correlator { eigen } => match eigen.noise_type() {
                NoiseType::White => DetectorType::EstimatorCorrelatorWhite,
                NoiseType::Colored => DetectorType::EstimatorCorrelatorColored,
            },
        }
    }

    fn n_variables(&self) -> usize {
        match self {
            CurveSource::Energy { n_variables } => *n_variables,
            CurveSource::Correlator { eigen } => eigen.n_samples(),
        }
    }
}

/// Estimator-correlator weights `(detection, false alarm)` at one SNR
///
/// White noise: `l*s` and `l*s*n / (l*s + n)`.
/// Colored noise: `l*s/n` and `(l*s/n) / (l*s/n + 1)`.
pub fn correlator_weights(noise_type: NoiseType, eigenvalues: &[f64], signal_variance: f64, noise_variance: f64) -> (Vec<f64>, Vec<f64>) {
    match noise_type {
        NoiseType::White => eigenvalues
            .iter()
            .map(|&l| {
                let s = l * signal_variance;
                (s, s * noise_variance / (s + noise_variance))
            })
            .unzip(),
        NoiseType::Colored => eigenvalues
            .iter()
            .map(|&l| {
                let s = l * signal_variance / noise_variance;
                (s, s / (s + 1.0))
            })
            .unzip(),
    }
}

/// Build the curves for one SNR level
#[instrument(skip(source, config, diagnostics), fields(detector = %source.detector_type()))]
pub fn build_record(
    source: &CurveSource<'_>,
    snr_db: f64,
    cutoff_freqs: [f64; 2],
    config: &CurveConfig,
    diagnostics: &mut Diagnostics,
) -> Result<PerformanceRecord> {
    let noise_variance = 1.0;
    let signal_variance = 10f64.powf(snr_db / 10.0);
    let ratio = config.effective_ratio();
    let points = config.precision.points_in_lobe();

    let (false_alarm, detection) = match source {
        CurveSource::Energy { n_variables } => {
            let k = *n_variables as f64;
            let fa = ScaledChiSquared::new(k, 0.0, noise_variance)?;
            let d = ScaledChiSquared::new(k, 0.0, signal_variance + noise_variance)?;
            (
                energy::build_curve(&fa, ratio, points, config.max_iterations, snr_db, diagnostics),
                energy::build_curve(&d, ratio, points, config.max_iterations, snr_db, diagnostics),
            )
        }
        CurveSource::Correlator { eigen } => {
            let eigenvalues = eigen.signal_eigenvalues_norm().as_slice();
            let (w_d, w_fa) = correlator_weights(eigen.noise_type(), eigenvalues, signal_variance, noise_variance);
            (
                correlator::build_curve(&QuadraticForm::new(w_fa)?, config, snr_db, diagnostics),
                correlator::build_curve(&QuadraticForm::new(w_d)?, config, snr_db, diagnostics),
            )
        }
    };
    debug!(
        snr_db,
        fa_points = false_alarm.axis.len(),
        d_points = detection.axis.len(),
        "performance record built"
    );

    Ok(PerformanceRecord {
        detector_type: source.detector_type(),
        signal_variance,
        noise_variance,
        snr_db,
        n_variables: source.n_variables(),
        cutoff_freqs,
        false_alarm,
        detection,
    })
}

/// Build the performance curves for every SNR level in the catalogue
///
/// # Arguments
/// * `source` - Energy detector size or estimator-correlator eigen data
/// * `cutoff_freqs` - Normalized bandpass cutoffs recorded in every record
/// * `config` - Precision, search limits and SNR catalogue
/// * `progress` - Receives `(completed, total)` after each SNR level
pub fn build_curve_set(
    source: &CurveSource<'_>,
    cutoff_freqs: [f64; 2],
    config: &CurveConfig,
    progress: &dyn ProgressObserver,
) -> Result<Diagnosed<PerformanceCurveSet>> {
    config.validate()?;
    let total = config.snr_levels_db.len();
    let completed = AtomicUsize::new(0);
    info!(
        detector = %source.detector_type(),
        n_variables = source.n_variables(),
        levels = total,
        precision = %config.precision,
        "building performance curves"
    );

    let build_one = |&snr_db: &f64| -> Result<(PerformanceRecord, Diagnostics)> {
        let mut diagnostics = Diagnostics::new();
        let record = build_record(source, snr_db, cutoff_freqs, config, &mut diagnostics)?;
        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        progress.on_progress(done, total);
        Ok((record, diagnostics))
    };

    let built: Vec<(PerformanceRecord, Diagnostics)> = if config.parallel {
        config.snr_levels_db.par_iter().map(build_one).collect::<Result<_>>()?
    } else {
        config.snr_levels_db.iter().map(build_one).collect::<Result<_>>()?
    };

    let mut diagnostics = Diagnostics::new();
    let mut records = Vec::with_capacity(built.len());
    for (record, record_diagnostics) in built {
        diagnostics.absorb(record_diagnostics);
        records.push(record);
    }

    let set = PerformanceCurveSet::new(source.detector_type(), source.n_variables(), cutoff_freqs, records)?;
    Ok(Diagnosed::new(set, diagnostics))
}

/// [`build_curve_set`] without progress reporting
pub fn build_curve_set_quiet(source: &CurveSource<'_>, cutoff_freqs: [f64; 2], config: &CurveConfig) -> Result<Diagnosed<PerformanceCurveSet>> {
    build_curve_set(source, cutoff_freqs, config, &NoProgress)
}
