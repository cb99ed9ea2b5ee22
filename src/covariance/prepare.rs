//! Observation preparation: bandpass filtering and FFT resampling

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F64};
use nalgebra::DMatrix;
use rustfft::{num_complex::Complex, FftPlanner};
use snafu::ensure;
use tracing::trace;

use super::CovarianceConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{DetectorError, InvalidParameterSnafu, Result};

/// How a bandpass filter is run over a sample sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Single causal pass
    #[default]
    Forward,
    /// Forward then backward pass (no phase distortion, squared magnitude response)
    ZeroPhase,
}

/// Butterworth bandpass described by cutoffs normalized to the target Nyquist frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bandpass {
    /// `[low, high]` in `[0, 1]`; `low = 0` disables the high-pass section and
    /// `high = 1` disables the low-pass section
    pub cutoffs: [f64; 2],
    pub mode: FilterMode,
}

impl Bandpass {
    pub(crate) fn validate(&self) -> Result<()> {
        let [low, high] = self.cutoffs;
        ensure!(
            low.is_finite() && high.is_finite() && (0.0..=1.0).contains(&low) && (0.0..=1.0).contains(&high) && low < high,
            InvalidParameterSnafu {
                name: "cutoff frequencies",
                reason: format!("[{low}, {high}] must satisfy 0 <= low < high <= 1"),
            }
        );
        Ok(())
    }

    /// Filter `samples` recorded at `input_rate`; cutoffs refer to `target_rate`
    ///
    /// Sections whose cutoff falls at or beyond the input Nyquist frequency are skipped.
    pub(crate) fn apply(&self, samples: &[f64], input_rate: f64, target_rate: f64) -> Result<Vec<f64>> {
        let nyquist_in = input_rate / 2.0;
        let low_hz = self.cutoffs[0] * target_rate / 2.0;
        let high_hz = self.cutoffs[1] * target_rate / 2.0;

        let mut sections = Vec::with_capacity(2);
        if self.cutoffs[0] > 0.0 && low_hz < nyquist_in {
            sections.push(design(Type::HighPass, input_rate, low_hz)?);
        }
        if self.cutoffs[1] < 1.0 && high_hz < nyquist_in {
            sections.push(design(Type::LowPass, input_rate, high_hz)?);
        }
        if sections.is_empty() {
            return Ok(samples.to_vec());
        }

        let mut output = run_sections(&sections, samples.iter().copied());
        if self.mode == FilterMode::ZeroPhase {
            output = run_sections(&sections, output.into_iter().rev());
            output.reverse();
        }
        Ok(output)
    }
}

fn design(kind: Type<f64>, sample_rate: f64, cutoff: f64) -> Result<Coefficients<f64>> {
    Coefficients::<f64>::from_params(kind, sample_rate.hz(), cutoff.hz(), Q_BUTTERWORTH_F64)
        .map_err(|e| DetectorError::FilterDesign { reason: format!("{e:?} at {cutoff} Hz / {sample_rate} Hz") })
}

fn run_sections(sections: &[Coefficients<f64>], samples: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut filters: Vec<DirectForm2Transposed<f64>> =
        sections.iter().map(|&c| DirectForm2Transposed::<f64>::new(c)).collect();
    samples
        .map(|x| filters.iter_mut().fold(x, |acc, filter| filter.run(acc)))
        .collect()
}

/// Length of an observation up to its first non-finite sample
pub(crate) fn usable_length(row: &[f64]) -> usize {
    row.iter().position(|v| !v.is_finite()).unwrap_or(row.len())
}

/// FFT resampler reusing plans across observations
pub(crate) struct Resampler {
    planner: FftPlanner<f64>,
}

impl Resampler {
    pub(crate) fn new() -> Self {
        Self { planner: FftPlanner::new() }
    }

    /// Resample `samples` (one kernel at the input rate) to exactly `n_out` samples
    ///
    /// Band-limited interpolation: the spectrum is truncated (down-sampling) or extended
    /// with zeros (up-sampling); the time-domain sequence itself is never padded.
    pub(crate) fn resample(&mut self, samples: &[f64], n_out: usize) -> Vec<f64> {
        let n_in = samples.len();
        if n_in == n_out || n_in == 0 {
            return samples.to_vec();
        }

        let mut spectrum: Vec<Complex<f64>> = samples.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.planner.plan_fft_forward(n_in).process(&mut spectrum);

        let mut resized = vec![Complex::new(0.0, 0.0); n_out];
        let shared = n_in.min(n_out);
        let half = (shared - 1) / 2;
        resized[0] = spectrum[0];
        for k in 1..=half {
            resized[k] = spectrum[k];
            resized[n_out - k] = spectrum[n_in - k];
        }
        if shared % 2 == 0 {
            let k = shared / 2;
            if n_out < n_in {
                // Fold both halves of the input into the output Nyquist bin
                resized[k] = spectrum[k] + spectrum[n_in - k];
            } else {
                // Split the input Nyquist bin across the mirrored output bins
                resized[k] = spectrum[k] * 0.5;
                resized[n_out - k] = spectrum[k] * 0.5;
            }
        }

        self.planner.plan_fft_inverse(n_out).process(&mut resized);
        let scale = 1.0 / n_in as f64;
        resized.iter().map(|c| c.re * scale).collect()
    }
}

/// Turn ragged raw observations into an `observations x n_samples` matrix
pub(crate) fn prepare_observations(
    raw_scores: &[Vec<f64>],
    config: &CovarianceConfig,
    n_samples: usize,
    diagnostics: &mut Diagnostics,
) -> Result<DMatrix<f64>> {
    let n_input = super::kernel_samples(config.kernel_duration, config.input_rate).max(1);
    let mut resampler = Resampler::new();
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(raw_scores.len());

    for (index, row) in raw_scores.iter().enumerate() {
        let usable = usable_length(row);
        if usable < n_input {
            diagnostics.data_quality(format!(
                "observation {index} has {usable} samples, shorter than the kernel ({n_input}); skipped"
            ));
            continue;
        }

        let filtered = match &config.filter {
            Some(filter) => filter.apply(&row[..usable], config.input_rate, config.sample_rate)?,
            None => row[..usable].to_vec(),
        };
        let kernel = resampler.resample(&filtered[..n_input], n_samples);
        if kernel.iter().any(|v| !v.is_finite()) {
            diagnostics.data_quality(format!("observation {index} is not finite after filtering; skipped"));
            continue;
        }
        trace!(index, usable, "observation prepared");
        rows.push(kernel);
    }

    Ok(DMatrix::from_fn(rows.len(), n_samples, |i, j| rows[i][j]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f64::consts::PI;

    fn tone(freq: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / rate).sin()).collect()
    }

    #[test]
    fn test_resample_preserves_low_frequency_tone() {
        // 8 cycles over 64 samples at 64 Hz -> 32 samples at 32 Hz
        let input = tone(8.0, 64.0, 64);
        let mut resampler = Resampler::new();
        let output = resampler.resample(&input, 32);
        let expected = tone(8.0, 32.0, 32);
        for (a, b) in output.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn test_upsample_round_trips_through_downsample() {
        let input = tone(3.0, 32.0, 32);
        let mut resampler = Resampler::new();
        let up = resampler.resample(&input, 96);
        let back = resampler.resample(&up, 32);
        for (a, b) in back.iter().zip(input.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_usable_length_stops_at_nan() {
        assert_eq!(usable_length(&[1.0, 2.0, f64::NAN, 3.0]), 2);
        assert_eq!(usable_length(&[1.0, 2.0]), 2);
        assert_eq!(usable_length(&[]), 0);
    }

    #[test]
    fn test_lowpass_attenuates_high_tone() {
        let rate = 1000.0;
        let filter = Bandpass { cutoffs: [0.0, 0.1], mode: FilterMode::ZeroPhase };
        let high = filter.apply(&tone(400.0, rate, 2000), rate, rate).unwrap();
        let low = filter.apply(&tone(10.0, rate, 2000), rate, rate).unwrap();
        let power = |x: &[f64]| x[500..1500].iter().map(|v| v * v).sum::<f64>() / 1000.0;
        assert!(power(&high) < 1e-3 * power(&low));
    }

    #[test]
    fn test_invalid_cutoffs_rejected() {
        let filter = Bandpass { cutoffs: [0.5, 0.2], mode: FilterMode::Forward };
        assert!(filter.validate().is_err());
    }
}
