//! Estimator-correlator curves by characteristic-function inversion
//!
//! The statistic `T = sum_k w_k z_k^2` (z_k independent standard normal) has
//! characteristic function
//!
//! ```text
//! phi(f) = prod_k (1 - 4 pi i w_k f)^(-1/2)
//! ```
//!
//! and density `p(t) = integral phi(f) exp(-2 pi i f t) df`, approximated by a
//! discrete sum over `f_j = j * df`, `|j| <= M`. Three bounded searches set the grid:
//! 1. Frequency limit: `|phi(fmax)|` decayed to the truncation level
//! 2. Peak location of the density
//! 3. Time limit: first point past the peak where the density falls to `peak / ratio`
//!
//! `df = 1 / (2 Tbound)` keeps the periodic images of the density beyond `2 Tbound`.
//! When the time limit would pass `Tbound`, the bound is doubled and the grid rebuilt.

use core::f64::consts::PI;

use num::Complex;
use rayon::prelude::*;
use rustfft::FftPlanner;
use tracing::{debug, trace, warn};

use super::{right_tail, CurveConfig, HypothesisCurve, StatisticModel};
use crate::diagnostics::{Diagnostics, SearchKind, SearchOutcome, Warning};
use crate::error::{DetectorError, Result};

/// Relative bracket width of the frequency bisection
const FREQUENCY_TOLERANCE: f64 = 1e-3;

/// Extra decay demanded of the characteristic function so its truncation ripple stays
/// below the time-domain truncation level
const FREQUENCY_MARGIN: f64 = 1e2;

/// Relative bracket width of the peak search
const PEAK_TOLERANCE: f64 = 1e-4;

/// Relative bracket width of the time-limit search
const TIME_TOLERANCE: f64 = 1e-6;

/// Points per refinement grid
const GRID_POINTS: usize = 11;

/// Cap on one-sided frequency samples
const MAX_FREQUENCY_POINTS: usize = 1 << 22;

/// Cap on the transform length used to sample the final curve
const MAX_FFT_LEN: usize = 1 << 24;

/// Times the alias-free bound may be doubled
const MAX_BOUND_DOUBLINGS: usize = 4;

/// Phase recurrence is re-anchored every this many frequency steps
const RESYNC_INTERVAL: usize = 256;

/// Weighted sum of squared independent standard normals
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticForm {
    weights: Vec<f64>,
    mean: f64,
    std_dev: f64,
    max_weight: f64,
}

impl QuadraticForm {
    /// # Errors
    /// `InvalidParameter` if the weights are empty, negative, non-finite or all zero
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        let valid = !weights.is_empty() && weights.iter().all(|w| w.is_finite() && *w >= 0.0);
        let max_weight = weights.iter().copied().fold(0.0, f64::max);
        if !valid || max_weight <= 0.0 {
            return Err(DetectorError::InvalidParameter {
                name: "quadratic-form weights",
                reason: format!("{} weights, largest {max_weight}", weights.len()),
            });
        }
        let mean = weights.iter().sum();
        let std_dev = (2.0 * weights.iter().map(|w| w * w).sum::<f64>()).sqrt();
        Ok(Self { weights, mean, std_dev, max_weight })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// `phi(f)`, accumulated in log-polar form
    pub fn characteristic(&self, f: f64) -> Complex<f64> {
        let mut log_magnitude = 0.0;
        let mut phase = 0.0;
        for &w in &self.weights {
            let x = 4.0 * PI * w * f;
            log_magnitude -= 0.25 * (x * x).ln_1p();
            phase += 0.5 * x.atan();
        }
        Complex::from_polar(log_magnitude.exp(), phase)
    }

    /// `|phi(f)|`
    pub fn magnitude(&self, f: f64) -> f64 {
        let log_magnitude: f64 = self
            .weights
            .iter()
            .map(|&w| {
                let x = 4.0 * PI * w * f;
                -0.25 * (x * x).ln_1p()
            })
            .sum();
        log_magnitude.exp()
    }

    /// `1.5 * mean + 10 * std`, the first guess for the statistic's extent
    fn initial_bound(&self) -> f64 {
        1.5 * self.mean + 10.0 * self.std_dev
    }
}

/// Find `fmax` where `|phi|` has decayed to `1 / ratio`
///
/// Coarse phase multiplies the bracket by 5 until the magnitude is below target, then
/// bisection narrows it to `FREQUENCY_TOLERANCE`.
pub(crate) fn frequency_limit(form: &QuadraticForm, ratio: f64, max_iterations: usize) -> SearchOutcome {
    let target = 1.0 / ratio;
    let mut lo = 0.0;
    let mut hi = 1.0 / (4.0 * PI * form.max_weight);
    let mut iterations = 0;

    while form.magnitude(hi) > target {
        if iterations >= max_iterations {
            return SearchOutcome::exhausted(hi, iterations);
        }
        lo = hi;
        hi *= 5.0;
        iterations += 1;
    }

    while hi - lo > FREQUENCY_TOLERANCE * hi {
        if iterations >= max_iterations {
            return SearchOutcome::exhausted(hi, iterations);
        }
        iterations += 1;
        let mid = 0.5 * (lo + hi);
        if form.magnitude(mid) > target {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    SearchOutcome::converged(hi, iterations)
}

/// Sampled characteristic function ready for inversion
pub(crate) struct Inversion<'a> {
    form: &'a QuadraticForm,
    df: f64,
    /// `phi(j * df)` for `j = 0..=M`
    spectrum: Vec<Complex<f64>>,
}

impl<'a> Inversion<'a> {
    /// Sample `phi` on `[0, fmax]` in blocks bounded by `block_bytes`
    ///
    /// A block holds as many frequencies as fit a `frequencies x eigenvalues` complex
    /// matrix within the budget; blocks are evaluated in parallel.
    pub(crate) fn new(form: &'a QuadraticForm, fmax: f64, df: f64, block_bytes: usize) -> Self {
        let m = ((fmax / df).ceil() as usize).max(1);
        let bytes_per_frequency = core::mem::size_of::<Complex<f64>>() * form.weights.len();
        let block_len = (block_bytes / bytes_per_frequency.max(1)).max(1);

        let mut spectrum = vec![Complex::new(0.0, 0.0); m + 1];
        spectrum
            .par_chunks_mut(block_len)
            .enumerate()
            .for_each(|(block, chunk)| {
                let offset = block * block_len;
                for (i, value) in chunk.iter_mut().enumerate() {
                    *value = form.characteristic((offset + i) as f64 * df);
                }
            });
        trace!(m, df, block_len, "characteristic function sampled");

        Self { form, df, spectrum }
    }

    /// One-sided frequency samples M
    pub(crate) fn frequency_points(&self) -> usize {
        self.spectrum.len() - 1
    }

    /// Period of the discrete inversion
    pub(crate) fn period(&self) -> f64 {
        1.0 / self.df
    }
}

impl StatisticModel for Inversion<'_> {
    fn mean(&self) -> f64 {
        self.form.mean
    }

    fn std_dev(&self) -> f64 {
        self.form.std_dev
    }

    /// `df * |phi(0) + 2 Re sum_j phi(f_j) exp(-2 pi i f_j t)|`
    fn density(&self, t: f64) -> f64 {
        let omega = -2.0 * PI * self.df * t;
        let step = Complex::from_polar(1.0, omega);
        let mut rotation = Complex::new(1.0, 0.0);
        let mut acc = self.spectrum[0].re;
        for (j, phi) in self.spectrum.iter().enumerate().skip(1) {
            rotation = if j % RESYNC_INTERVAL == 0 {
                Complex::from_polar(1.0, omega * j as f64)
            } else {
                rotation * step
            };
            acc += 2.0 * (phi * rotation).re;
        }
        (acc * self.df).abs()
    }

    fn densities(&self, t: &[f64]) -> Vec<f64> {
        t.par_iter().map(|&x| self.density(x)).collect()
    }
}

/// Locate the density peak inside `[lo, hi]`
///
/// Each iteration evaluates an 11-point grid and shrinks the bracket to the two grid
/// cells around the best point. Returns the search outcome and the peak density.
pub(crate) fn peak_location(inversion: &Inversion<'_>, mut lo: f64, mut hi: f64, max_iterations: usize) -> (SearchOutcome, f64) {
    let width = hi - lo;
    let mut iterations = 0;
    loop {
        let step = (hi - lo) / (GRID_POINTS - 1) as f64;
        let grid: Vec<f64> = (0..GRID_POINTS).map(|i| lo + i as f64 * step).collect();
        let values = inversion.densities(&grid);
        let (best, &peak) = values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap_or((0, &0.0));

        if hi - lo <= PEAK_TOLERANCE * width {
            return (SearchOutcome::converged(grid[best], iterations), peak);
        }
        if iterations >= max_iterations {
            return (SearchOutcome::exhausted(grid[best], iterations), peak);
        }
        iterations += 1;
        lo = grid[best.saturating_sub(1)];
        hi = grid[(best + 1).min(GRID_POINTS - 1)];
    }
}

/// Find where the density past the peak first falls to `peak_value / ratio`
///
/// The density is not guaranteed monotonic past the peak, so the search keeps a
/// crossing flag: until a grid point at or below target has been seen, the bracket
/// grows away from the peak; afterwards it only narrows. Returns `None` when growth
/// would pass `ceiling` (the alias-free bound).
pub(crate) fn time_limit(
    inversion: &Inversion<'_>,
    peak: f64,
    peak_value: f64,
    ratio: f64,
    start: f64,
    ceiling: f64,
    max_iterations: usize,
) -> Option<SearchOutcome> {
    let target = peak_value / ratio;
    let mut lo = peak;
    let mut hi = start.min(ceiling).max(peak + inversion.std_dev() / GRID_POINTS as f64);
    let mut crossed = false;
    let mut iterations = 0;

    loop {
        if crossed && hi - lo <= TIME_TOLERANCE * hi {
            return Some(SearchOutcome::converged(hi, iterations));
        }
        if iterations >= max_iterations {
            return Some(SearchOutcome::exhausted(hi, iterations));
        }
        iterations += 1;

        let step = (hi - lo) / (GRID_POINTS - 1) as f64;
        let grid: Vec<f64> = (0..GRID_POINTS).map(|i| lo + i as f64 * step).collect();
        let values = inversion.densities(&grid);
        match (1..GRID_POINTS).find(|&i| values[i] <= target) {
            Some(i) => {
                crossed = true;
                lo = grid[i - 1];
                hi = grid[i];
            }
            None if crossed => {
                // Only reachable through rounding at the bracket edge
                return Some(SearchOutcome::converged(hi, iterations));
            }
            None => {
                let next = hi + (hi - peak);
                if next > ceiling {
                    return None;
                }
                lo = hi;
                hi = next;
            }
        }
        trace!(lo, hi, crossed, iterations, "correlator time-limit bracket");
    }
}

/// Sample the density on `[0, upper]` with one FFT
///
/// With `L` transform points the inversion sum evaluated at `t_m = m / (L df)` is the
/// DFT of the spectrum folded modulo `L`. `L` is the smallest power of two giving a
/// spacing no coarser than the requested main-lobe resolution.
fn sample_by_fft(inversion: &Inversion<'_>, upper: f64, points_in_lobe: usize) -> HypothesisCurve {
    let requested = 2.0 * inversion.std_dev() / points_in_lobe.max(1) as f64;
    let period = inversion.period();
    let len = ((period / requested).ceil() as usize)
        .max(GRID_POINTS)
        .next_power_of_two()
        .min(MAX_FFT_LEN);
    let dt = period / len as f64;

    let mut folded = vec![Complex::new(0.0, 0.0); len];
    folded[0] += inversion.spectrum[0];
    for (j, phi) in inversion.spectrum.iter().enumerate().skip(1) {
        let k = j % len;
        folded[k] += *phi;
        folded[(len - k) % len] += phi.conj();
    }
    FftPlanner::<f64>::new().plan_fft_forward(len).process(&mut folded);

    let n_points = (((upper / dt).ceil() as usize) + 1).min(len / 2 + 1);
    let axis: Vec<f64> = (0..n_points).map(|m| m as f64 * dt).collect();
    let pdf: Vec<f64> = folded[..n_points]
        .iter()
        .map(|c| {
            let p = c.norm() * inversion.df;
            if p.is_finite() { p } else { 0.0 }
        })
        .collect();
    let rtp = right_tail(&pdf, dt);
    HypothesisCurve { axis, pdf, rtp }
}

/// Build one estimator-correlator curve
pub(crate) fn build_curve(form: &QuadraticForm, config: &CurveConfig, snr_db: f64, diagnostics: &mut Diagnostics) -> HypothesisCurve {
    let ratio = config.effective_ratio();
    let points_in_lobe = config.precision.points_in_lobe();

    let frequency = frequency_limit(form, ratio * FREQUENCY_MARGIN, config.max_iterations);
    diagnostics.check_search(SearchKind::FrequencyLimit, Some(snr_db), &frequency);

    let start = form.initial_bound();
    let mut bound = start;
    for _ in 0..=MAX_BOUND_DOUBLINGS {
        let inversion = grid_for_bound(form, frequency, bound, config, snr_db, diagnostics);

        let peak_lo = (form.mean - 5.0 * form.std_dev).max(0.0);
        let peak_hi = (form.mean + 5.0 * form.std_dev).min(bound);
        let (peak, peak_value) = peak_location(&inversion, peak_lo, peak_hi, config.max_iterations);
        diagnostics.check_search(SearchKind::PeakLocation, Some(snr_db), &peak);

        match time_limit(&inversion, peak.value, peak_value, ratio, start, bound, config.max_iterations) {
            Some(limit) => {
                diagnostics.check_search(SearchKind::CorrelatorTimeLimit, Some(snr_db), &limit);
                debug!(
                    snr_db,
                    fmax = frequency.value,
                    peak = peak.value,
                    tmax = limit.value,
                    frequency_points = inversion.frequency_points(),
                    "correlator limits found"
                );
                return sample_by_fft(&inversion, limit.value, points_in_lobe);
            }
            None => {
                trace!(bound, "density tail passes the alias-free bound, doubling");
                bound *= 2.0;
            }
        }
    }

    // Tail never fell below target inside any bound: keep the widest bound as best effort
    let bound = bound / 2.0;
    diagnostics.push(Warning::Precision {
        search: SearchKind::CorrelatorTimeLimit,
        snr_db: Some(snr_db),
        value: bound,
        iterations: config.max_iterations,
    });
    let inversion = grid_for_bound(form, frequency, bound, config, snr_db, diagnostics);
    sample_by_fft(&inversion, bound, points_in_lobe)
}

/// Inversion grid with `df = 1 / (2 bound)`, capping the number of frequency samples
fn grid_for_bound<'a>(
    form: &'a QuadraticForm,
    frequency: SearchOutcome,
    bound: f64,
    config: &CurveConfig,
    snr_db: f64,
    diagnostics: &mut Diagnostics,
) -> Inversion<'a> {
    let df = 1.0 / (2.0 * bound);
    let mut fmax = frequency.value;
    if fmax / df > MAX_FREQUENCY_POINTS as f64 {
        fmax = MAX_FREQUENCY_POINTS as f64 * df;
        warn!(snr_db, fmax, "frequency grid capped");
        diagnostics.push(Warning::Precision {
            search: SearchKind::FrequencyLimit,
            snr_db: Some(snr_db),
            value: fmax,
            iterations: frequency.iterations,
        });
    }
    Inversion::new(form, fmax, df, config.block_bytes)
}
