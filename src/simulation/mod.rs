//! Synthetic data for tests and benchmarks
//!
//! Seeded so every run sees the same samples.

mod noise;

pub use noise::{colored_noise, embed_burst, gaussian_burst, variance, white_noise};
