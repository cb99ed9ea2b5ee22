//! Both hypotheses of a record on one statistic axis
//!
//! Post-processing for ROC comparison across SNR levels. Not used by the threshold
//! solver, which works on each curve's own axis.

use super::{HypothesisCurve, PerformanceRecord};
use crate::interp;

/// Largest number of samples on a common axis
const MAX_COMMON_POINTS: usize = 1 << 20;

/// False-alarm and detection curves resampled onto a shared axis
#[derive(Debug, Clone, PartialEq)]
pub struct CommonAxisCurves {
    pub axis: Vec<f64>,
    pub pdf_false_alarm: Vec<f64>,
    pub pdf_detection: Vec<f64>,
    pub rtp_false_alarm: Vec<f64>,
    pub rtp_detection: Vec<f64>,
}

/// Curve values on `axis`; past the end of the curve the density and tail are 0
fn resample(curve: &HypothesisCurve, axis: &[f64]) -> (Vec<f64>, Vec<f64>) {
    axis.iter()
        .map(|&t| {
            let pdf = interp::linear(&curve.axis, &curve.pdf, t).unwrap_or(0.0);
            let rtp = interp::linear(&curve.axis, &curve.rtp, t).unwrap_or(0.0);
            (pdf, rtp)
        })
        .unzip()
}

impl PerformanceRecord {
    /// Resample both hypotheses onto one axis
    ///
    /// The axis runs from 0 to the larger upper limit at the finer of the two
    /// resolutions.
    pub fn on_common_axis(&self) -> CommonAxisCurves {
        let upper = self.false_alarm.upper_limit().max(self.detection.upper_limit());
        let resolutions = [self.false_alarm.resolution(), self.detection.resolution()];
        let mut step = resolutions.into_iter().filter(|r| *r > 0.0).fold(f64::INFINITY, f64::min);
        if !step.is_finite() {
            step = upper.max(1.0);
        }
        let mut n_points = (upper / step).ceil() as usize + 1;
        if n_points > MAX_COMMON_POINTS {
            n_points = MAX_COMMON_POINTS;
            step = upper / (n_points - 1) as f64;
        }
        let axis: Vec<f64> = (0..n_points).map(|i| i as f64 * step).collect();

        let (pdf_false_alarm, rtp_false_alarm) = resample(&self.false_alarm, &axis);
        let (pdf_detection, rtp_detection) = resample(&self.detection, &axis);
        CommonAxisCurves { axis, pdf_false_alarm, pdf_detection, rtp_false_alarm, rtp_detection }
    }

    /// Receiver operating characteristic as `(false alarm, detection)` probability pairs,
    /// ordered from the lowest threshold
    pub fn roc(&self) -> Vec<(f64, f64)> {
        let common = self.on_common_axis();
        common.rtp_false_alarm.into_iter().zip(common.rtp_detection).collect()
    }
}
