//! Scaled non-central chi-squared distribution
//!
//! `T = w * X` with `X ~ chi2'(k, lambda)`. For `lambda > 0` the density is the Poisson
//! mixture `sum_j Pois(j; lambda/2) chi2(x; k + 2j)`, truncated where the Poisson
//! weights become negligible.

use statrs::distribution::{ChiSquared, Continuous, ContinuousCDF};

use super::StatisticModel;
use crate::error::{DetectorError, Result};

/// Poisson terms below this weight are dropped from the mixture
const MIN_POISSON_WEIGHT: f64 = 1e-17;

#[derive(Debug, Clone)]
pub struct ScaledChiSquared {
    dof: f64,
    noncentrality: f64,
    scale: f64,
    /// `(weight, central component)` pairs
    terms: Vec<(f64, ChiSquared)>,
}

fn chi_squared(dof: f64) -> Result<ChiSquared> {
    ChiSquared::new(dof).map_err(|e| DetectorError::InvalidParameter {
        name: "degrees of freedom",
        reason: format!("{dof}: {e}"),
    })
}

impl ScaledChiSquared {
    /// # Errors
    /// `InvalidParameter` for non-positive degrees of freedom or scale, or negative
    /// non-centrality
    pub fn new(dof: f64, noncentrality: f64, scale: f64) -> Result<Self> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(DetectorError::InvalidParameter { name: "chi-squared scale", reason: format!("{scale}") });
        }
        if !(noncentrality >= 0.0 && noncentrality.is_finite()) {
            return Err(DetectorError::InvalidParameter { name: "non-centrality", reason: format!("{noncentrality}") });
        }

        let terms = if noncentrality == 0.0 {
            vec![(1.0, chi_squared(dof)?)]
        } else {
            let mu = noncentrality / 2.0;
            let spread = 12.0 * mu.sqrt() + 5.0;
            let first = (mu - spread).floor().max(0.0) as u64;
            let last = (mu + spread).ceil() as u64;
            let mut terms = Vec::with_capacity((last - first + 1) as usize);
            for j in first..=last {
                let jf = j as f64;
                let log_weight = -mu + jf * mu.ln() - libm::lgamma(jf + 1.0);
                let weight = log_weight.exp();
                if weight >= MIN_POISSON_WEIGHT {
                    terms.push((weight, chi_squared(dof + 2.0 * jf)?));
                }
            }
            terms
        };

        Ok(Self { dof, noncentrality, scale, terms })
    }

    pub fn dof(&self) -> f64 {
        self.dof
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// `P(T > t)`
    pub fn right_tail(&self, t: f64) -> f64 {
        let x = t / self.scale;
        if x <= 0.0 {
            return 1.0;
        }
        self.terms.iter().map(|(w, c)| w * c.sf(x)).sum::<f64>().min(1.0)
    }
}

impl StatisticModel for ScaledChiSquared {
    fn mean(&self) -> f64 {
        self.scale * (self.dof + self.noncentrality)
    }

    fn std_dev(&self) -> f64 {
        self.scale * (2.0 * (self.dof + 2.0 * self.noncentrality)).sqrt()
    }

    fn density(&self, t: f64) -> f64 {
        let x = t / self.scale;
        if x < 0.0 {
            return 0.0;
        }
        self.terms.iter().map(|(w, c)| w * c.pdf(x)).sum::<f64>() / self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_central_moments() {
        let d = ScaledChiSquared::new(10.0, 0.0, 2.0).unwrap();
        assert!((d.mean() - 20.0).abs() < 1e-12);
        assert!((d.std_dev() - 2.0 * 20f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_chi2_two_dof_is_exponential() {
        // chi2(2) scaled by w is exponential with mean 2w
        let d = ScaledChiSquared::new(2.0, 0.0, 3.0).unwrap();
        for &t in &[0.5f64, 3.0, 10.0] {
            let expected_pdf = (-t / 6.0).exp() / 6.0;
            assert!((d.density(t) - expected_pdf).abs() < 1e-12);
            assert!((d.right_tail(t) - (-t / 6.0).exp()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_noncentral_mixture_integrates_to_one() {
        let d = ScaledChiSquared::new(4.0, 6.0, 1.0).unwrap();
        let step = 0.01;
        let total: f64 = (0..20_000).map(|i| d.density(i as f64 * step) * step).sum();
        assert!((total - 1.0).abs() < 1e-3);
        assert!((d.mean() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(ScaledChiSquared::new(0.0, 0.0, 1.0).is_err());
        assert!(ScaledChiSquared::new(3.0, -1.0, 1.0).is_err());
        assert!(ScaledChiSquared::new(3.0, 0.0, 0.0).is_err());
    }
}
