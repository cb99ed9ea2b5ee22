//! One-dimensional interpolation over tabulated curves
//!
//! - [`linear`]: piecewise linear, `None` outside the table
//! - [`Pchip`]: shape-preserving piecewise cubic Hermite (Fritsch-Carlson slopes),
//!   extrapolating with the end polynomials
//! - [`inverse_right_tail`]: statistic value at which a non-increasing right-tail
//!   curve reaches a probability

use snafu::ensure;

use crate::error::{InvalidParameterSnafu, Result};

/// Index `i` with `x[i] <= xi <= x[i + 1]`, clamped to the end intervals
fn interval(x: &[f64], xi: f64) -> usize {
    let upper = x.partition_point(|&v| v <= xi);
    upper.saturating_sub(1).min(x.len().saturating_sub(2))
}

/// Linear interpolation of `y(x)` at `xi`
///
/// `x` must be strictly ascending. Returns `None` for `xi` outside `[x[0], x[n-1]]`
/// or a non-finite `xi`.
pub fn linear(x: &[f64], y: &[f64], xi: f64) -> Option<f64> {
    let (&first, &last) = (x.first()?, x.last()?);
    if !(xi >= first && xi <= last) {
        return None;
    }
    if x.len() == 1 {
        return y.first().copied();
    }
    let i = interval(x, xi);
    let t = (xi - x[i]) / (x[i + 1] - x[i]);
    Some(y[i] + t * (y[i + 1] - y[i]))
}

/// Shape-preserving cubic interpolant
#[derive(Debug, Clone, PartialEq)]
pub struct Pchip {
    x: Vec<f64>,
    y: Vec<f64>,
    slopes: Vec<f64>,
}

impl Pchip {
    /// # Errors
    /// `InvalidParameter` unless `x` is strictly ascending, finite, at least two points
    /// long and matches `y` in length
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        ensure!(
            x.len() >= 2 && x.len() == y.len(),
            InvalidParameterSnafu { name: "interpolation table", reason: format!("{} abscissae, {} ordinates", x.len(), y.len()) }
        );
        ensure!(
            x.iter().all(|v| v.is_finite()) && x.windows(2).all(|w| w[0] < w[1]),
            InvalidParameterSnafu { name: "interpolation table", reason: "abscissae must be finite and strictly ascending".to_string() }
        );
        let slopes = fritsch_carlson_slopes(&x, &y);
        Ok(Self { x, y, slopes })
    }

    /// Evaluate at `xi`; outside the table the end cubic is extended
    pub fn eval(&self, xi: f64) -> f64 {
        let i = interval(&self.x, xi);
        let h = self.x[i + 1] - self.x[i];
        let t = (xi - self.x[i]) / h;
        let t2 = t * t;
        let t3 = t2 * t;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        h00 * self.y[i] + h10 * h * self.slopes[i] + h01 * self.y[i + 1] + h11 * h * self.slopes[i + 1]
    }
}

/// Interior slopes are weighted harmonic means of the neighbouring secants (zero at
/// local extrema); end slopes use the one-sided three-point formula, limited to keep
/// the shape.
fn fritsch_carlson_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();

    if n == 2 {
        return vec![delta[0]; 2];
    }

    let mut d = vec![0.0; n];
    for k in 1..n - 1 {
        if delta[k - 1] * delta[k] > 0.0 {
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            d[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
        }
    }
    d[0] = end_slope(h[0], h[1], delta[0], delta[1]);
    d[n - 1] = end_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
    d
}

fn end_slope(h0: f64, h1: f64, del0: f64, del1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * del0 - h0 * del1) / (h0 + h1);
    if d.signum() != del0.signum() {
        0.0
    } else if del0.signum() != del1.signum() && d.abs() > (3.0 * del0).abs() {
        3.0 * del0
    } else {
        d
    }
}

/// Statistic value where a right-tail curve falls to `probability`
///
/// `rtp` is non-increasing along the ascending `axis`. The first sample at or below
/// the probability is located and the crossing is interpolated linearly from the
/// sample before it. A probability at or above `rtp[0]` maps to the start of the
/// axis; one below the whole curve maps to its end.
pub fn inverse_right_tail(axis: &[f64], rtp: &[f64], probability: f64) -> f64 {
    let Some(i) = rtp.iter().position(|&r| r <= probability) else {
        return axis.last().copied().unwrap_or(0.0);
    };
    if i == 0 {
        return axis[0];
    }
    let (r0, r1) = (rtp[i - 1], rtp[i]);
    let (t0, t1) = (axis[i - 1], axis[i]);
    t0 + (probability - r0) * (t1 - t0) / (r1 - r0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_inside_and_outside() {
        let x = [0.0, 1.0, 3.0];
        let y = [0.0, 2.0, 6.0];
        assert_eq!(linear(&x, &y, 0.5), Some(1.0));
        assert_eq!(linear(&x, &y, 2.0), Some(4.0));
        assert_eq!(linear(&x, &y, 3.0), Some(6.0));
        assert_eq!(linear(&x, &y, -0.1), None);
        assert_eq!(linear(&x, &y, 3.5), None);
        assert_eq!(linear(&x, &y, f64::NAN), None);
    }

    #[test]
    fn test_pchip_reproduces_nodes_and_lines() {
        let x: Vec<f64> = (0..6).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v - 1.0).collect();
        let p = Pchip::new(x.clone(), y.clone()).unwrap();
        for (&xi, &yi) in x.iter().zip(&y) {
            assert!((p.eval(xi) - yi).abs() < 1e-12);
        }
        // Linear data extrapolates linearly
        assert!((p.eval(7.5) - 14.0).abs() < 1e-12);
        assert!((p.eval(-2.0) + 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_pchip_preserves_monotonicity() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y = vec![0.0, 0.1, 5.0, 5.1, 5.2];
        let p = Pchip::new(x, y).unwrap();
        let samples: Vec<f64> = (0..=400).map(|i| p.eval(i as f64 * 0.01)).collect();
        assert!(samples.windows(2).all(|w| w[1] >= w[0] - 1e-12));
        assert!(samples.iter().all(|&v| (-1e-12..=5.2 + 1e-12).contains(&v)));
    }

    #[test]
    fn test_pchip_rejects_bad_tables() {
        assert!(Pchip::new(vec![0.0], vec![1.0]).is_err());
        assert!(Pchip::new(vec![0.0, 0.0], vec![1.0, 2.0]).is_err());
        assert!(Pchip::new(vec![0.0, 1.0], vec![1.0]).is_err());
    }

    #[test]
    fn test_inverse_right_tail() {
        let axis = [0.0, 1.0, 2.0, 3.0];
        let rtp = [1.0, 0.5, 0.5, 0.1];
        assert_eq!(inverse_right_tail(&axis, &rtp, 0.75), 0.5);
        // Plateau: first sample at the probability
        assert_eq!(inverse_right_tail(&axis, &rtp, 0.5), 1.0);
        assert!((inverse_right_tail(&axis, &rtp, 0.3) - 2.5).abs() < 1e-12);
        assert_eq!(inverse_right_tail(&axis, &rtp, 1.0), 0.0);
        assert_eq!(inverse_right_tail(&axis, &rtp, 0.01), 3.0);
    }
}
