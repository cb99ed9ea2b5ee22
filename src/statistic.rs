//! Per-kernel test statistics
//!
//! Segments arrive as a `samples x kernels` matrix, one kernel per column.
//!
//! - Energy detector: `sum x^2`
//! - Estimator-correlator: `z = D' x`, `sum l/(l + n) z^2` with `l = s * lambda`
//!   where `s = max(var(x) - n, 0)` is the kernel's estimated signal variance.
//!   Colored-noise statistics are divided by `n` so they match the SNR-only curves.

use nalgebra::{DMatrix, DVectorView};
use rayon::prelude::*;
use snafu::ensure;
use tracing::{debug, instrument};

use crate::eigen::EigenData;
use crate::error::{DetectorError, DimensionMismatchSnafu, InvalidParameterSnafu, Result};
use crate::types::{DetectorType, NoiseType};

/// Unbiased sample variance of one kernel
pub fn kernel_variance(x: DVectorView<'_, f64>) -> f64 {
    let n = x.len();
    if n < 2 {
        return 0.0;
    }
    let mean = x.mean();
    x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Estimated signal variance per kernel, `max(var(x) - n, 0)`
pub fn signal_variances(segments: &DMatrix<f64>, noise_variances: &[f64]) -> Vec<f64> {
    segments
        .column_iter()
        .zip(noise_variances)
        .map(|(column, &n)| (kernel_variance(column) - n).max(0.0))
        .collect()
}

/// Test statistic of every kernel
///
/// # Arguments
/// * `segments` - `samples x kernels` matrix
/// * `detector_type` - Statistic family
/// * `noise_variances` - Background noise variance per kernel
/// * `eigen` - Eigen data, required by the estimator-correlator
///
/// # Errors
/// * `DimensionMismatch` when the variances or eigen data disagree with `segments`
/// * `MissingEigenData` / `InvalidParameter` for an estimator-correlator without
///   matching eigen data
#[instrument(skip_all, fields(detector = %detector_type, kernels = segments.ncols()))]
pub fn compute(segments: &DMatrix<f64>, detector_type: DetectorType, noise_variances: &[f64], eigen: Option<&EigenData>) -> Result<Vec<f64>> {
    ensure!(
        noise_variances.len() == segments.ncols(),
        DimensionMismatchSnafu { what: "noise variances per kernel", expected: segments.ncols(), actual: noise_variances.len() }
    );

    let statistics = match detector_type.noise_type() {
        None => segments.column_iter().map(|c| c.norm_squared()).collect(),
        Some(noise_type) => {
            let eigen = eigen.ok_or(DetectorError::MissingEigenData { detector: "estimator-correlator" })?;
            ensure!(
                eigen.noise_type() == noise_type,
                InvalidParameterSnafu { name: "eigen data", reason: format!("{:?} noise eigen data used for {detector_type}", eigen.noise_type()) }
            );
            ensure!(
                eigen.n_samples() == segments.nrows(),
                DimensionMismatchSnafu { what: "kernel samples", expected: eigen.n_samples(), actual: segments.nrows() }
            );
            correlator(segments, noise_type, noise_variances, eigen)
        }
    };
    debug!(kernels = segments.ncols(), "statistics computed");
    Ok(statistics)
}

fn correlator(segments: &DMatrix<f64>, noise_type: NoiseType, noise_variances: &[f64], eigen: &EigenData) -> Vec<f64> {
    let decorrelated = eigen.decorrelation_matrix().tr_mul(segments);
    let eigenvalues = eigen.signal_eigenvalues_norm();
    let signal = signal_variances(segments, noise_variances);

    (0..segments.ncols())
        .into_par_iter()
        .map(|k| {
            let n = noise_variances[k];
            let s = signal[k];
            let z = decorrelated.column(k);
            let stat: f64 = eigenvalues
                .iter()
                .zip(z.iter())
                .map(|(&lambda, &zk)| {
                    let l = s * lambda;
                    let weight = if l + n > 0.0 { l / (l + n) } else { 0.0 };
                    weight * zk * zk
                })
                .sum();
            match noise_type {
                NoiseType::White => stat,
                NoiseType::Colored if n > 0.0 => stat / n,
                NoiseType::Colored => 0.0,
            }
        })
        .collect()
}
