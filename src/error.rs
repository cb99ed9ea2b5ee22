//! Typed failures for the detector core
//!
//! Every variant aborts the single covariance / eigen / curve / threshold computation
//! in progress. Batch drivers skip the failed unit and carry on; nothing here is retried.

use snafu::Snafu;

/// Largest kernel (in samples) a covariance matrix may describe.
pub const MAX_KERNEL_SAMPLES: usize = 10_000;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DetectorError {
    /// Kernel would produce a covariance matrix larger than the hard cap
    #[snafu(display(
        "kernel of {samples} samples exceeds the {max}x{max} covariance limit"
    ))]
    CovarianceTooLarge { samples: usize, max: usize },

    /// Signal and noise artifacts were built for different kernels
    #[snafu(display(
        "signal kernel ({signal_duration} s @ {signal_rate} Hz) does not match noise kernel ({noise_duration} s @ {noise_rate} Hz)"
    ))]
    MismatchedKernels {
        signal_duration: f64,
        signal_rate: f64,
        noise_duration: f64,
        noise_rate: f64,
    },

    /// Detector type string not recognised
    #[snafu(display("unsupported detector type '{name}'"))]
    UnknownDetectorType { name: String },

    /// Estimator kind string not recognised
    #[snafu(display("unsupported covariance estimator '{name}'"))]
    UnknownEstimator { name: String },

    /// A configuration value is out of its valid range
    #[snafu(display("invalid {name}: {reason}"))]
    InvalidParameter { name: &'static str, reason: String },

    /// Two inputs that must agree in size do not
    #[snafu(display("{what}: expected {expected}, got {actual}"))]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Too few usable training observations to form any covariance
    #[snafu(display(
        "only {usable} usable observations, at least {required} required"
    ))]
    NotEnoughObservations { usable: usize, required: usize },

    /// Covariance diagonal sums to zero (all-zero or non-finite training data)
    #[snafu(display("covariance matrix has no variance to normalize by"))]
    DegenerateCovariance,

    /// Estimator-correlator requested without eigen data
    #[snafu(display("{detector} requires eigen data"))]
    MissingEigenData { detector: &'static str },

    /// Bandpass design rejected by biquad
    #[snafu(display("filter design failed: {reason}"))]
    FilterDesign { reason: String },
}

pub type Result<T, E = DetectorError> = std::result::Result<T, E>;
