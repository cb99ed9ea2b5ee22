//! Neyman-Pearson thresholds from performance curves
//!
//! **Per catalogue level**:
//! - `t1`: false-alarm right tail inverted at the target false-alarm probability
//! - `t2`: detection right tail inverted at the detection anchor (0.99999)
//! - `threshold = max(t1, s * t1 + (1 - s) * t2)` for sensitivity `s`
//!
//! **Per requested variance pair**: the SNR in dB is located in the catalogue. The
//! threshold is interpolated shape-preservingly (and extrapolated), the probabilities
//! linearly with the nearest catalogue value outside the range.
//!
//! Energy-detector and white-noise estimator-correlator curves are built at unit noise
//! variance, so their thresholds are multiplied by the actual noise variance.

use snafu::ensure;
use tracing::{debug, instrument};

use crate::error::{DimensionMismatchSnafu, InvalidParameterSnafu, Result};
use crate::interp::{self, Pchip};
use crate::performance::PerformanceCurveSet;

/// Detection probability the sensitivity blend pulls towards
pub const DETECTION_ANCHOR: f64 = 0.99999;

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    /// Target false-alarm probability
    pub target_false_alarm: f64,
    /// 1 keeps the false-alarm threshold, 0 moves fully towards the detection anchor
    pub sensitivity: f64,
    pub detection_anchor: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            target_false_alarm: 0.01,
            sensitivity: 1.0,
            detection_anchor: DETECTION_ANCHOR,
        }
    }
}

impl ThresholdConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            self.target_false_alarm > 0.0 && self.target_false_alarm < 1.0,
            InvalidParameterSnafu { name: "target false-alarm probability", reason: format!("{} is not in (0, 1)", self.target_false_alarm) }
        );
        ensure!(
            (0.0..=1.0).contains(&self.sensitivity),
            InvalidParameterSnafu { name: "sensitivity", reason: format!("{} is not in [0, 1]", self.sensitivity) }
        );
        ensure!(
            self.detection_anchor > 0.0 && self.detection_anchor < 1.0,
            InvalidParameterSnafu { name: "detection anchor", reason: format!("{} is not in (0, 1)", self.detection_anchor) }
        );
        Ok(())
    }
}

/// Blended threshold at one catalogue SNR, for unit noise variance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogueThreshold {
    pub snr_db: f64,
    pub threshold: f64,
    /// False-alarm probability at the threshold
    pub false_alarm: f64,
    /// Detection probability at the threshold
    pub detection: f64,
}

/// Thresholds and their probabilities for each requested variance pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thresholds {
    pub thresholds: Vec<f64>,
    pub false_alarm: Vec<f64>,
    pub detection: Vec<f64>,
}

impl Thresholds {
    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

/// Right-tail probability at `t`; zero past the end of the curve
fn tail_at(axis: &[f64], rtp: &[f64], t: f64) -> f64 {
    match interp::linear(axis, rtp, t) {
        Some(p) => p,
        None if t < axis.first().copied().unwrap_or(0.0) => rtp.first().copied().unwrap_or(1.0),
        None => 0.0,
    }
}

/// Blended threshold for every record of the set
pub fn catalogue_thresholds(set: &PerformanceCurveSet, config: &ThresholdConfig) -> Vec<CatalogueThreshold> {
    set.records()
        .iter()
        .map(|record| {
            let fa = &record.false_alarm;
            let d = &record.detection;
            let t1 = interp::inverse_right_tail(&fa.axis, &fa.rtp, config.target_false_alarm);
            let t2 = interp::inverse_right_tail(&d.axis, &d.rtp, config.detection_anchor);
            let threshold = t1.max(t1 * config.sensitivity + t2 * (1.0 - config.sensitivity));
            CatalogueThreshold {
                snr_db: record.snr_db,
                threshold,
                false_alarm: tail_at(&fa.axis, &fa.rtp, threshold),
                detection: tail_at(&d.axis, &d.rtp, threshold),
            }
        })
        .collect()
}

/// Linear interpolation, holding the end values outside the catalogue
fn probability_at(snr: &[f64], values: &[f64], x: f64) -> f64 {
    interp::linear(snr, values, x).unwrap_or_else(|| if x > snr[snr.len() - 1] { values[values.len() - 1] } else { values[0] })
}

/// Thresholds for arbitrary signal / noise variance pairs
///
/// # Arguments
/// * `set` - Performance curves of the detector, ascending SNR
/// * `config` - Target false-alarm probability, sensitivity and detection anchor
/// * `signal_variances`, `noise_variances` - One pair per kernel
///
/// # Returns
/// Thresholds in statistic units plus the false-alarm and detection probabilities
/// interpolated at each pair's SNR
///
/// # Errors
/// * `DimensionMismatch` if the variance vectors differ in length
/// * `InvalidParameter` for an out-of-range configuration
#[instrument(skip_all, fields(detector = %set.detector_type, n = signal_variances.len()))]
pub fn solve(set: &PerformanceCurveSet, config: &ThresholdConfig, signal_variances: &[f64], noise_variances: &[f64]) -> Result<Thresholds> {
    config.validate()?;
    ensure!(
        signal_variances.len() == noise_variances.len(),
        DimensionMismatchSnafu { what: "noise variances", expected: signal_variances.len(), actual: noise_variances.len() }
    );

    let catalogue = catalogue_thresholds(set, config);
    let snr: Vec<f64> = catalogue.iter().map(|c| c.snr_db).collect();
    let levels: Vec<f64> = catalogue.iter().map(|c| c.threshold).collect();
    let fa: Vec<f64> = catalogue.iter().map(|c| c.false_alarm).collect();
    let d: Vec<f64> = catalogue.iter().map(|c| c.detection).collect();
    let (lowest, highest) = (snr[0], snr[snr.len() - 1]);

    // A single-level catalogue has nothing to interpolate between
    let shape = if snr.len() >= 2 { Some(Pchip::new(snr.clone(), levels.clone())?) } else { None };
    let scale_with_noise = set.detector_type.scales_with_noise();

    let mut out = Thresholds {
        thresholds: Vec::with_capacity(signal_variances.len()),
        false_alarm: Vec::with_capacity(signal_variances.len()),
        detection: Vec::with_capacity(signal_variances.len()),
    };
    for (&s, &n) in signal_variances.iter().zip(noise_variances) {
        let raw_snr = 10.0 * (s / n).log10();
        let x = if raw_snr.is_finite() {
            raw_snr
        } else if raw_snr == f64::INFINITY {
            highest
        } else {
            lowest
        };

        let mut threshold = match &shape {
            Some(pchip) => pchip.eval(x),
            None => levels[0],
        };
        if !(threshold > 0.0) {
            threshold = 0.0;
        }
        if scale_with_noise {
            threshold *= n;
        }

        out.thresholds.push(threshold);
        out.false_alarm.push(probability_at(&snr, &fa, x));
        out.detection.push(probability_at(&snr, &d, x));
    }
    debug!(
        levels = catalogue.len(),
        min_threshold = out.thresholds.iter().copied().fold(f64::INFINITY, f64::min),
        max_threshold = out.thresholds.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "thresholds solved"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::{build_curve_set_quiet, CurveConfig, CurveSource, Precision};
    use crate::types::DetectorType;

    fn energy_set(levels: Vec<f64>) -> PerformanceCurveSet {
        let config = CurveConfig { snr_levels_db: levels, precision: Precision::Low, ..CurveConfig::default() };
        build_curve_set_quiet(&CurveSource::Energy { n_variables: 10 }, [0.0, 1.0], &config).unwrap().value
    }

    #[test]
    fn test_full_sensitivity_keeps_false_alarm_threshold() {
        let set = energy_set(vec![-10.0, 0.0, 10.0, 20.0]);
        let config = ThresholdConfig::default();
        let out = solve(&set, &config, &[1.0, 10.0], &[1.0, 1.0]).unwrap();
        for (k, idx) in [(0, 1), (1, 2)] {
            let fa = &set.records()[idx].false_alarm;
            let t1 = interp::inverse_right_tail(&fa.axis, &fa.rtp, config.target_false_alarm);
            assert_eq!(out.thresholds[k], t1);
        }
    }

    #[test]
    fn test_sensitivity_only_raises_threshold() {
        let set = energy_set(vec![-10.0, 0.0, 10.0]);
        let strict = catalogue_thresholds(&set, &ThresholdConfig::default());
        let blended = catalogue_thresholds(&set, &ThresholdConfig { sensitivity: 0.3, ..ThresholdConfig::default() });
        for (a, b) in strict.iter().zip(&blended) {
            assert!(b.threshold >= a.threshold);
            assert!(b.false_alarm <= a.false_alarm + 1e-12);
        }
    }

    #[test]
    fn test_false_alarm_probability_hits_target() {
        let set = energy_set(vec![0.0]);
        let catalogue = catalogue_thresholds(&set, &ThresholdConfig::default());
        assert!((catalogue[0].false_alarm - 0.01).abs() < 1e-6);
        // chi2(10) upper 1% point is 23.209
        assert!((catalogue[0].threshold - 23.209).abs() < 0.1, "{}", catalogue[0].threshold);
    }

    #[test]
    fn test_out_of_range_snr_extrapolates_threshold_and_holds_probabilities() {
        let set = energy_set(vec![-10.0, -5.0, 0.0, 5.0, 10.0]);
        let config = ThresholdConfig { sensitivity: 0.5, ..ThresholdConfig::default() };
        let catalogue = catalogue_thresholds(&set, &config);
        // 30 dB and -30 dB
        let out = solve(&set, &config, &[1000.0, 0.001], &[1.0, 1.0]).unwrap();
        assert!(out.thresholds.iter().all(|t| t.is_finite() && *t >= 0.0));
        assert_eq!(out.false_alarm[0], catalogue[4].false_alarm);
        assert_eq!(out.detection[0], catalogue[4].detection);
        assert_eq!(out.false_alarm[1], catalogue[0].false_alarm);
        assert_eq!(out.detection[1], catalogue[0].detection);
    }

    #[test]
    fn test_zero_signal_variance_uses_lowest_level() {
        let set = energy_set(vec![-10.0, 0.0, 10.0]);
        let config = ThresholdConfig::default();
        let catalogue = catalogue_thresholds(&set, &config);
        let out = solve(&set, &config, &[0.0], &[2.0]).unwrap();
        assert_eq!(out.thresholds[0], catalogue[0].threshold * 2.0);
        assert_eq!(out.detection[0], catalogue[0].detection);
    }

    #[test]
    fn test_noise_scaling_depends_on_detector() {
        let set = energy_set(vec![-10.0, 0.0, 10.0]);
        let config = ThresholdConfig::default();
        let unit = solve(&set, &config, &[1.0], &[1.0]).unwrap();
        let scaled = solve(&set, &config, &[4.0], &[4.0]).unwrap();
        assert!((scaled.thresholds[0] - 4.0 * unit.thresholds[0]).abs() < 1e-9 * unit.thresholds[0]);

        let colored = PerformanceCurveSet::new(
            DetectorType::EstimatorCorrelatorColored,
            set.n_variables,
            set.cutoff_freqs,
            set.records().to_vec(),
        )
        .unwrap();
        let a = solve(&colored, &config, &[1.0], &[1.0]).unwrap();
        let b = solve(&colored, &config, &[4.0], &[4.0]).unwrap();
        assert_eq!(a.thresholds, b.thresholds);
    }

    #[test]
    fn test_mismatched_variance_vectors() {
        let set = energy_set(vec![0.0, 1.0]);
        assert!(solve(&set, &ThresholdConfig::default(), &[1.0, 2.0], &[1.0]).is_err());
        assert!(solve(&set, &ThresholdConfig { sensitivity: 1.5, ..ThresholdConfig::default() }, &[], &[]).is_err());
    }
}
