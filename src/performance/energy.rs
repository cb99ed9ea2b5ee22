//! Energy detector curves
//!
//! The statistic is a scaled chi-squared variable. Its curve is truncated where the
//! analytic right-tail probability first falls to `1 / ratio`.

use tracing::trace;

use super::{sample_curve, HypothesisCurve, ScaledChiSquared, StatisticModel};
use crate::diagnostics::{Diagnostics, SearchKind, SearchOutcome};

/// Relative bracket width at which the time-limit search stops
const TIME_TOLERANCE: f64 = 1e-6;

/// Points per refinement grid
const GRID_POINTS: usize = 11;

/// Find the statistic value where the right-tail probability drops to `1 / ratio`
///
/// Starts from `1.5 * mean + 10 * std`, doubles until the tail is below target, then
/// narrows the bracket on an 11-point grid until its width is below
/// `TIME_TOLERANCE * tmax`.
pub(crate) fn time_limit(model: &ScaledChiSquared, ratio: f64, max_iterations: usize) -> SearchOutcome {
    let target = 1.0 / ratio;
    let mut lo = 0.0;
    let mut hi = 1.5 * model.mean() + 10.0 * model.std_dev();
    let mut iterations = 0;

    while model.right_tail(hi) > target {
        if iterations >= max_iterations {
            return SearchOutcome::exhausted(hi, iterations);
        }
        lo = hi;
        hi *= 2.0;
        iterations += 1;
    }

    while hi - lo > TIME_TOLERANCE * hi {
        if iterations >= max_iterations {
            return SearchOutcome::exhausted(hi, iterations);
        }
        iterations += 1;
        let step = (hi - lo) / (GRID_POINTS - 1) as f64;
        let crossing = (1..GRID_POINTS)
            .find(|&i| model.right_tail(lo + i as f64 * step) <= target)
            .unwrap_or(GRID_POINTS - 1);
        hi = lo + crossing as f64 * step;
        lo = hi - step;
        trace!(lo, hi, iterations, "energy time-limit bracket");
    }

    SearchOutcome::converged(hi, iterations)
}

/// Truncate and sample one energy-detector curve
pub(crate) fn build_curve(
    model: &ScaledChiSquared,
    ratio: f64,
    points_in_lobe: usize,
    max_iterations: usize,
    snr_db: f64,
    diagnostics: &mut Diagnostics,
) -> HypothesisCurve {
    let limit = time_limit(model, ratio, max_iterations);
    diagnostics.check_search(SearchKind::EnergyTimeLimit, Some(snr_db), &limit);
    sample_curve(model, limit.value, points_in_lobe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_limit_matches_exponential_quantile() {
        // chi2(2) with unit scale: P(T > t) = exp(-t/2)
        let model = ScaledChiSquared::new(2.0, 0.0, 1.0).unwrap();
        let outcome = time_limit(&model, 1e4, 100);
        assert!(outcome.converged);
        let expected = 2.0 * 1e4f64.ln();
        assert!((outcome.value - expected).abs() < 1e-4 * expected, "{} vs {expected}", outcome.value);
    }

    #[test]
    fn test_time_limit_scales_with_variance() {
        let unit = ScaledChiSquared::new(30.0, 0.0, 1.0).unwrap();
        let scaled = ScaledChiSquared::new(30.0, 0.0, 5.0).unwrap();
        let a = time_limit(&unit, 1e6, 100).value;
        let b = time_limit(&scaled, 1e6, 100).value;
        assert!((b / a - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_iteration_cap_reports_best_effort() {
        let model = ScaledChiSquared::new(30.0, 0.0, 1.0).unwrap();
        let outcome = time_limit(&model, 1e8, 2);
        assert!(!outcome.converged);
        assert!(outcome.value > model.mean());

        let mut diagnostics = Diagnostics::new();
        let curve = build_curve(&model, 1e8, 50, 2, 0.0, &mut diagnostics);
        assert_eq!(diagnostics.precision_warnings().count(), 1);
        assert!(!curve.axis.is_empty());
    }

    #[test]
    fn test_sampled_rtp_tracks_analytic_tail() {
        let model = ScaledChiSquared::new(10.0, 0.0, 1.0).unwrap();
        let mut diagnostics = Diagnostics::new();
        let curve = build_curve(&model, 1e6, 375, 100, 0.0, &mut diagnostics);
        for (i, &t) in curve.axis.iter().enumerate().step_by(97) {
            assert!((curve.rtp[i] - model.right_tail(t)).abs() < 1e-6, "t={t}");
        }
    }
}
