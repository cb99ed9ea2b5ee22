//! Eigendecomposition of signal and noise covariance
//!
//! **White noise**: the signal covariance is decomposed directly.
//!
//! **Colored noise**: the noise covariance `Cn = Vn Dn Vn'` is decomposed first and
//! used to whiten the signal covariance:
//! - `A = Vn Dn^(-1/2)`
//! - `B = A' Cs A`, symmetrized as `(B + B') / 2`
//! - `B = Vs Ds Vs'`
//!
//! Eigenvalues are clamped to at least [`MIN_EIGENVALUE`]. No ordering or sign
//! convention is imposed on the eigenpairs.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use snafu::ensure;
use tracing::{debug, info, instrument};

use crate::covariance::CovarianceData;
use crate::error::{MismatchedKernelsSnafu, Result};
use crate::types::NoiseType;

/// Floor applied to every eigenvalue
pub const MIN_EIGENVALUE: f64 = 1e-10;

/// Eigenbasis of the noise covariance (colored-noise mode only)
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseBasis {
    pub eigenvectors: DMatrix<f64>,
    pub eigenvalues_norm: DVector<f64>,
}

/// Eigen data for the estimator-correlator
#[derive(Debug, Clone, PartialEq)]
pub struct EigenData {
    kernel_duration: f64,
    sample_rate: f64,
    signal_eigenvectors: DMatrix<f64>,
    signal_eigenvalues_norm: DVector<f64>,
    noise: Option<NoiseBasis>,
}

impl EigenData {
    pub fn kernel_duration(&self) -> f64 {
        self.kernel_duration
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn noise_type(&self) -> NoiseType {
        if self.noise.is_some() {
            NoiseType::Colored
        } else {
            NoiseType::White
        }
    }

    pub fn n_samples(&self) -> usize {
        self.signal_eigenvalues_norm.len()
    }

    pub fn signal_eigenvectors(&self) -> &DMatrix<f64> {
        &self.signal_eigenvectors
    }

    /// Normalized signal eigenvalues (of `Cs` or of the whitened `B`)
    pub fn signal_eigenvalues_norm(&self) -> &DVector<f64> {
        &self.signal_eigenvalues_norm
    }

    pub fn noise(&self) -> Option<&NoiseBasis> {
        self.noise.as_ref()
    }

    /// Matrix whose transpose maps a kernel onto decorrelated components
    ///
    /// `Vs` for white noise, `Vn Dn^(-1/2) Vs` for colored noise.
    pub fn decorrelation_matrix(&self) -> DMatrix<f64> {
        match &self.noise {
            None => self.signal_eigenvectors.clone(),
            Some(noise) => whitening(noise) * &self.signal_eigenvectors,
        }
    }
}

/// `Vn Dn^(-1/2)`
fn whitening(noise: &NoiseBasis) -> DMatrix<f64> {
    let inv_sqrt = noise.eigenvalues_norm.map(|d| 1.0 / d.sqrt());
    let mut a = noise.eigenvectors.clone();
    for (j, mut column) in a.column_iter_mut().enumerate() {
        column *= inv_sqrt[j];
    }
    a
}

fn clamped_eigen(matrix: DMatrix<f64>) -> (DMatrix<f64>, DVector<f64>) {
    let eigen = SymmetricEigen::new(matrix);
    let clamped = eigen
        .eigenvalues
        .iter()
        .filter(|&&v| !(v >= MIN_EIGENVALUE))
        .count();
    if clamped > 0 {
        debug!(clamped, floor = MIN_EIGENVALUE, "eigenvalues clamped");
    }
    let values = eigen.eigenvalues.map(|v| if v >= MIN_EIGENVALUE { v } else { MIN_EIGENVALUE });
    (eigen.eigenvectors, values)
}

/// `(B + B') / 2`, exactly symmetric
pub(crate) fn symmetrize(b: &DMatrix<f64>) -> DMatrix<f64> {
    (b + b.transpose()) * 0.5
}

/// Whitened compound matrix `B = A' Cs A` (symmetrized) for a given noise basis
pub(crate) fn compound_matrix(signal: &DMatrix<f64>, noise: &NoiseBasis) -> DMatrix<f64> {
    let a = whitening(noise);
    symmetrize(&(a.transpose() * signal * &a))
}

/// Decompose signal (and optionally noise) covariance into estimator-correlator eigen data
///
/// # Arguments
/// * `signal` - Normalized signal covariance
/// * `noise` - Normalized noise covariance; `None` selects white-noise mode
///
/// # Errors
/// `MismatchedKernels` if the two covariances were built for different kernels
#[instrument(skip_all, fields(n = signal.n_samples(), colored = noise.is_some()))]
pub fn decompose(signal: &CovarianceData, noise: Option<&CovarianceData>) -> Result<EigenData> {
    let noise_basis = match noise {
        None => None,
        Some(noise) => {
            ensure!(
                signal.same_kernel(noise),
                MismatchedKernelsSnafu {
                    signal_duration: signal.kernel_duration(),
                    signal_rate: signal.sample_rate(),
                    noise_duration: noise.kernel_duration(),
                    noise_rate: noise.sample_rate(),
                }
            );
            let (eigenvectors, eigenvalues_norm) = clamped_eigen(noise.matrix().clone());
            Some(NoiseBasis { eigenvectors, eigenvalues_norm })
        }
    };

    let target = match &noise_basis {
        None => signal.matrix().clone(),
        Some(basis) => compound_matrix(signal.matrix(), basis),
    };
    let (signal_eigenvectors, signal_eigenvalues_norm) = clamped_eigen(target);
    info!(
        n = signal_eigenvalues_norm.len(),
        max_eigenvalue = signal_eigenvalues_norm.max(),
        "eigen data computed"
    );

    Ok(EigenData {
        kernel_duration: signal.kernel_duration(),
        sample_rate: signal.sample_rate(),
        signal_eigenvectors,
        signal_eigenvalues_norm,
        noise: noise_basis,
    })
}
