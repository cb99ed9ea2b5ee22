use core::f64::consts::PI;

use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::covariance::{Bandpass, FilterMode};
use crate::error::Result;

/// Population variance of a sample sequence
pub fn variance(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    let n = signal.len() as f64;
    let mean = signal.iter().sum::<f64>() / n;
    signal.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
}

fn scale_to_variance(signal: &mut [f64], target: f64) {
    let current = variance(signal);
    if current > 0.0 {
        let gain = (target / current).sqrt();
        signal.iter_mut().for_each(|x| *x *= gain);
    }
}

/// Gaussian white noise with standard deviation `sigma`
pub fn white_noise(num_samples: usize, sigma: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..num_samples)
        .map(|_| {
            let z: f64 = rng.sample(StandardNormal);
            z * sigma
        })
        .collect()
}

/// Unit-variance noise band-limited by a Butterworth bandpass
///
/// `cutoffs` are normalized to the Nyquist frequency of `sample_rate`.
///
/// # Errors
/// `InvalidParameter` / `FilterDesign` for unusable cutoffs
pub fn colored_noise(num_samples: usize, sample_rate: f64, cutoffs: [f64; 2], seed: u64) -> Result<Vec<f64>> {
    let filter = Bandpass { cutoffs, mode: FilterMode::Forward };
    filter.validate()?;
    let white = white_noise(num_samples, 1.0, seed);
    let mut colored = filter.apply(&white, sample_rate, sample_rate)?;
    scale_to_variance(&mut colored, 1.0);
    Ok(colored)
}

/// Hann-windowed band-limited Gaussian burst with unit variance
///
/// # Errors
/// As [`colored_noise`]
pub fn gaussian_burst(num_samples: usize, sample_rate: f64, cutoffs: [f64; 2], seed: u64) -> Result<Vec<f64>> {
    let mut burst = colored_noise(num_samples, sample_rate, cutoffs, seed)?;
    let n = num_samples.max(2) as f64;
    for (i, sample) in burst.iter_mut().enumerate() {
        *sample *= 0.5 * (1.0 - (2.0 * PI * i as f64 / (n - 1.0)).cos());
    }
    scale_to_variance(&mut burst, 1.0);
    Ok(burst)
}

/// Add `burst` to `samples` at `start_index` with power `noise_variance * 10^(snr/10)`
///
/// Samples past the end of `samples` are dropped.
pub fn embed_burst(samples: &mut [f64], burst: &[f64], start_index: usize, snr_db: f64, noise_variance: f64) {
    let desired = noise_variance * 10f64.powf(snr_db / 10.0);
    let current = variance(burst);
    if current <= 0.0 {
        return;
    }
    let gain = (desired / current).sqrt();
    for (target, &b) in samples.iter_mut().skip(start_index).zip(burst) {
        *target += b * gain;
    }
}
