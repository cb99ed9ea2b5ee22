//! Covariance estimation strategies
//!
//! Every strategy receives an `observations x samples` matrix and returns a raw
//! (not yet trace-normalized) `samples x samples` covariance estimate.
//!
//! Linear shrinkage estimators blend the sample covariance `S` with a structured target
//! `T` as `(1 - rho) S + rho T`. The identity-target family (OAS, RBLW) follows
//! Chen, Wiesel, Eldar & Hero (2010); the one/two-parameter, diagonal and correlation
//! targets use the Schafer & Strimmer (2005) intensity estimates; the leave-one-out
//! variant picks `rho` by maximizing the Gaussian leave-one-out likelihood.

use nalgebra::{Cholesky, DMatrix, DVector};
use tracing::debug;

/// A covariance estimation strategy
pub trait CovarianceStrategy: Send + Sync {
    /// Human readable name for logs
    fn name(&self) -> &'static str;

    /// Fewest observations the estimate is meaningful for
    fn min_observations(&self) -> usize {
        3
    }

    /// Estimate the covariance of the columns of `observations`
    fn estimate(&self, observations: &DMatrix<f64>) -> DMatrix<f64>;
}

/// Subtract the column means
fn centered(observations: &DMatrix<f64>) -> DMatrix<f64> {
    let mut x = observations.clone();
    for mut column in x.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }
    x
}

/// Maximum-likelihood covariance `Xc' Xc / n`
fn mle_covariance(xc: &DMatrix<f64>) -> DMatrix<f64> {
    xc.tr_mul(xc) / xc.nrows() as f64
}

/// Unbiased covariance `Xc' Xc / (n - 1)`
fn unbiased_covariance(xc: &DMatrix<f64>) -> DMatrix<f64> {
    xc.tr_mul(xc) / (xc.nrows() as f64 - 1.0)
}

/// `(1 - rho) S + rho T`
fn blend(sample: &DMatrix<f64>, target: &DMatrix<f64>, rho: f64) -> DMatrix<f64> {
    sample * (1.0 - rho) + target * rho
}

fn scaled_identity(p: usize, scale: f64) -> DMatrix<f64> {
    DMatrix::from_diagonal_element(p, p, scale)
}

/// Unbiased estimate of the variance of every entry of the unbiased sample covariance
///
/// `Var(s_ij) = n / (n-1)^3 * sum_k (w_kij - mean_k w_kij)^2` with `w_kij = x_ki x_kj`.
fn entry_variances(xc: &DMatrix<f64>) -> DMatrix<f64> {
    let n = xc.nrows() as f64;
    let squares = xc.component_mul(xc);
    let sum_w2 = squares.tr_mul(&squares);
    let mean_w = xc.tr_mul(xc) / n;
    let spread = sum_w2 - mean_w.component_mul(&mean_w) * n;
    spread.map(|v| v.max(0.0)) * (n / (n - 1.0).powi(3))
}

fn clamp_intensity(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 && numerator.is_finite() {
        (numerator / denominator).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

fn off_diagonal_sum(m: &DMatrix<f64>, f: impl Fn(f64) -> f64) -> f64 {
    let mut total = 0.0;
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            if i != j {
                total += f(m[(i, j)]);
            }
        }
    }
    total
}

/// Plain unbiased sample covariance
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleCovariance;

impl CovarianceStrategy for SampleCovariance {
    fn name(&self) -> &'static str {
        "sample covariance"
    }

    fn min_observations(&self) -> usize {
        2
    }

    fn estimate(&self, observations: &DMatrix<f64>) -> DMatrix<f64> {
        unbiased_covariance(&centered(observations))
    }
}

/// Oracle-Approximating Shrinkage toward `tr(S)/p * I`
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleApproximatingShrinkage;

impl CovarianceStrategy for OracleApproximatingShrinkage {
    fn name(&self) -> &'static str {
        "oracle-approximating shrinkage"
    }

    fn estimate(&self, observations: &DMatrix<f64>) -> DMatrix<f64> {
        let xc = centered(observations);
        let n = xc.nrows() as f64;
        let s = mle_covariance(&xc);
        let p = s.nrows() as f64;

        let mu = s.trace() / p;
        let alpha = s.norm_squared() / (p * p);
        let numerator = alpha + mu * mu;
        let denominator = (n + 1.0) * (alpha - mu * mu / p);
        let rho = clamp_intensity(numerator, denominator);
        debug!(rho, "OAS intensity");

        blend(&s, &scaled_identity(s.nrows(), mu), rho)
    }
}

/// Rao-Blackwellized Ledoit-Wolf shrinkage toward `tr(S)/p * I`
#[derive(Debug, Clone, Copy, Default)]
pub struct RaoBlackwellLedoitWolf;

impl CovarianceStrategy for RaoBlackwellLedoitWolf {
    fn name(&self) -> &'static str {
        "Rao-Blackwell Ledoit-Wolf shrinkage"
    }

    fn estimate(&self, observations: &DMatrix<f64>) -> DMatrix<f64> {
        let xc = centered(observations);
        let n = xc.nrows() as f64;
        let s = mle_covariance(&xc);
        let p = s.nrows() as f64;

        let trace = s.trace();
        let trace_sq = s.norm_squared();
        let numerator = (n - 2.0) / n * trace_sq + trace * trace;
        let denominator = (n + 2.0) * (trace_sq - trace * trace / p);
        let rho = clamp_intensity(numerator, denominator);
        debug!(rho, "RBLW intensity");

        blend(&s, &scaled_identity(s.nrows(), trace / p), rho)
    }
}

/// Shrinkage toward a common-variance identity target
#[derive(Debug, Clone, Copy, Default)]
pub struct OneParameterShrinkage;

impl CovarianceStrategy for OneParameterShrinkage {
    fn name(&self) -> &'static str {
        "one-parameter shrinkage"
    }

    fn estimate(&self, observations: &DMatrix<f64>) -> DMatrix<f64> {
        let xc = centered(observations);
        let s = unbiased_covariance(&xc);
        let p = s.nrows();
        let mean_var = s.trace() / p as f64;

        let numerator = entry_variances(&xc).sum();
        let denominator = off_diagonal_sum(&s, |v| v * v)
            + s.diagonal().iter().map(|d| (d - mean_var).powi(2)).sum::<f64>();
        let rho = clamp_intensity(numerator, denominator);
        debug!(rho, "one-parameter intensity");

        blend(&s, &scaled_identity(p, mean_var), rho)
    }
}

/// Shrinkage toward common variance on the diagonal and common covariance elsewhere
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoParameterShrinkage;

impl CovarianceStrategy for TwoParameterShrinkage {
    fn name(&self) -> &'static str {
        "two-parameter shrinkage"
    }

    fn estimate(&self, observations: &DMatrix<f64>) -> DMatrix<f64> {
        let xc = centered(observations);
        let s = unbiased_covariance(&xc);
        let p = s.nrows();
        let mean_var = s.trace() / p as f64;
        let mean_cov = if p > 1 {
            off_diagonal_sum(&s, |v| v) / (p * (p - 1)) as f64
        } else {
            0.0
        };

        let numerator = entry_variances(&xc).sum();
        let denominator = off_diagonal_sum(&s, |v| (v - mean_cov).powi(2))
            + s.diagonal().iter().map(|d| (d - mean_var).powi(2)).sum::<f64>();
        let rho = clamp_intensity(numerator, denominator);
        debug!(rho, mean_cov, "two-parameter intensity");

        let target = DMatrix::from_fn(p, p, |i, j| if i == j { mean_var } else { mean_cov });
        blend(&s, &target, rho)
    }
}

/// Shrinkage of the off-diagonal entries toward zero (target `diag(S)`)
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagonalShrinkage;

impl CovarianceStrategy for DiagonalShrinkage {
    fn name(&self) -> &'static str {
        "diagonal-target shrinkage"
    }

    fn estimate(&self, observations: &DMatrix<f64>) -> DMatrix<f64> {
        let xc = centered(observations);
        let s = unbiased_covariance(&xc);

        let numerator = off_diagonal_sum(&entry_variances(&xc), |v| v);
        let denominator = off_diagonal_sum(&s, |v| v * v);
        let rho = clamp_intensity(numerator, denominator);
        debug!(rho, "diagonal-target intensity");

        let target = DMatrix::from_diagonal(&s.diagonal());
        blend(&s, &target, rho)
    }
}

/// Shrinkage of the correlation matrix toward the identity, variances kept
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationShrinkage;

impl CovarianceStrategy for CorrelationShrinkage {
    fn name(&self) -> &'static str {
        "correlation shrinkage"
    }

    fn estimate(&self, observations: &DMatrix<f64>) -> DMatrix<f64> {
        let xc = centered(observations);
        let s = unbiased_covariance(&xc);
        let std_dev: DVector<f64> = s.diagonal().map(f64::sqrt);

        // Standardized data; constant columns stay zero and keep zero correlation
        let mut z = xc.clone();
        for (j, mut column) in z.column_iter_mut().enumerate() {
            let sd = std_dev[j];
            if sd > 0.0 {
                column /= sd;
            }
        }
        let r = unbiased_covariance(&z);

        let numerator = off_diagonal_sum(&entry_variances(&z), |v| v);
        let denominator = off_diagonal_sum(&r, |v| v * v);
        let rho = clamp_intensity(numerator, denominator);
        debug!(rho, "correlation intensity");

        let p = s.nrows();
        DMatrix::from_fn(p, p, |i, j| {
            if i == j {
                s[(i, i)]
            } else {
                (1.0 - rho) * r[(i, j)] * std_dev[i] * std_dev[j]
            }
        })
    }
}

/// Scaled-identity shrinkage with the intensity chosen by leave-one-out likelihood
#[derive(Debug, Clone)]
pub struct LeaveOneOutShrinkage {
    /// Candidate intensities in `(0, 1]`
    pub grid: Vec<f64>,
}

impl Default for LeaveOneOutShrinkage {
    fn default() -> Self {
        // 25 log-spaced intensities from 1e-3 to 1
        let grid = (0..25).map(|i| 10f64.powf(-3.0 + 3.0 * i as f64 / 24.0)).collect();
        Self { grid }
    }
}

impl LeaveOneOutShrinkage {
    /// Leave-one-out Gaussian log-likelihood for one intensity
    ///
    /// With `S_k` the covariance without observation `k`, the held-out covariance is
    /// `G - c x_k x_k'` where `G = (1-rho) n/(n-1) S + rho T` and `c = (1-rho)/(n-1)`.
    /// The determinant lemma and Sherman-Morrison give the likelihood from one Cholesky
    /// factorization of `G`.
    fn log_likelihood(xc: &DMatrix<f64>, s: &DMatrix<f64>, target: &DMatrix<f64>, rho: f64) -> Option<f64> {
        let n = xc.nrows() as f64;
        let g = s * ((1.0 - rho) * n / (n - 1.0)) + target * rho;
        let c = (1.0 - rho) / (n - 1.0);
        let chol = Cholesky::new(g)?;
        let log_det: f64 = chol.l_dirty().diagonal().iter().map(|d| 2.0 * d.ln()).sum();

        let solved = chol.solve(&xc.transpose());
        let mut total = 0.0;
        for (k, column) in solved.column_iter().enumerate() {
            let r = xc.row(k).transpose().dot(&column);
            let denom = 1.0 - c * r;
            if denom <= 0.0 {
                return None;
            }
            total -= 0.5 * (log_det + denom.ln() + r / denom);
        }
        Some(total)
    }
}

impl CovarianceStrategy for LeaveOneOutShrinkage {
    fn name(&self) -> &'static str {
        "leave-one-out shrinkage"
    }

    fn estimate(&self, observations: &DMatrix<f64>) -> DMatrix<f64> {
        let xc = centered(observations);
        let s = mle_covariance(&xc);
        let target = scaled_identity(s.nrows(), s.trace() / s.nrows() as f64);

        let best = self
            .grid
            .iter()
            .filter_map(|&rho| Self::log_likelihood(&xc, &s, &target, rho).map(|ll| (rho, ll)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let rho = best.map(|(rho, _)| rho).unwrap_or(1.0);
        debug!(rho, candidates = self.grid.len(), "leave-one-out intensity");

        blend(&s, &target, rho)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::white_noise;

    fn observations(n: usize, p: usize, seed: u64) -> DMatrix<f64> {
        let data = white_noise(n * p, 1.0, seed);
        DMatrix::from_row_slice(n, p, &data)
    }

    #[test]
    fn test_sample_covariance_of_known_data() {
        // Two perfectly correlated columns
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        let s = SampleCovariance.estimate(&x);
        assert!((s[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((s[(0, 1)] - 2.0).abs() < 1e-12);
        assert!((s[(1, 1)] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_identity_shrinkage_keeps_trace() {
        let x = observations(20, 6, 42);
        let s = mle_covariance(&centered(&x));
        for strategy in [&OracleApproximatingShrinkage as &dyn CovarianceStrategy, &RaoBlackwellLedoitWolf] {
            let shrunk = strategy.estimate(&x);
            assert!((shrunk.trace() - s.trace()).abs() < 1e-9, "{}", strategy.name());
        }
    }

    #[test]
    fn test_shrinkage_reduces_off_diagonal_energy() {
        let x = observations(10, 8, 3);
        let sample = SampleCovariance.estimate(&x);
        let strategies: [&dyn CovarianceStrategy; 5] = [
            &OneParameterShrinkage,
            &TwoParameterShrinkage,
            &DiagonalShrinkage,
            &CorrelationShrinkage,
            &LeaveOneOutShrinkage::default(),
        ];
        let sample_off = off_diagonal_sum(&sample, |v| v * v);
        for strategy in strategies {
            let shrunk = strategy.estimate(&x);
            let off = off_diagonal_sum(&shrunk, |v| v * v);
            assert!(off <= sample_off * 1.0001 + 1e-12, "{}: {off} > {sample_off}", strategy.name());
            assert!((&shrunk - shrunk.transpose()).amax() < 1e-12, "{}", strategy.name());
        }
    }

    #[test]
    fn test_diagonal_and_correlation_keep_variances() {
        let x = observations(15, 5, 8);
        let sample = SampleCovariance.estimate(&x);
        for strategy in [&DiagonalShrinkage as &dyn CovarianceStrategy, &CorrelationShrinkage] {
            let shrunk = strategy.estimate(&x);
            for i in 0..5 {
                assert!((shrunk[(i, i)] - sample[(i, i)]).abs() < 1e-12, "{}", strategy.name());
            }
        }
    }

    #[test]
    fn test_leave_one_out_handles_rank_deficiency() {
        // Fewer observations than dimensions: small intensities are singular and skipped
        let x = observations(4, 12, 21);
        let shrunk = LeaveOneOutShrinkage::default().estimate(&x);
        assert!(Cholesky::new(shrunk).is_some());
    }

    #[test]
    fn test_entry_variances_are_non_negative() {
        let x = observations(12, 4, 77);
        let v = entry_variances(&centered(&x));
        assert!(v.iter().all(|&e| e >= 0.0));
    }
}
