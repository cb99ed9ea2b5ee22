//! Detector families shared across the pipeline

use core::fmt;
use core::str::FromStr;

use crate::error::DetectorError;

/// Background noise model used by the estimator-correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoiseType {
    White,
    Colored,
}

/// Neyman-Pearson detector family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorType {
    /// Sum of squares of the kernel samples
    EnergyDetector,
    /// Covariance-weighted quadratic form, white background
    EstimatorCorrelatorWhite,
    /// Covariance-weighted quadratic form after noise whitening
    EstimatorCorrelatorColored,
}

impl DetectorType {
    pub const ALL: [DetectorType; 3] = [
        DetectorType::EnergyDetector,
        DetectorType::EstimatorCorrelatorWhite,
        DetectorType::EstimatorCorrelatorColored,
    ];

    /// Noise model, `None` for the energy detector
    pub fn noise_type(self) -> Option<NoiseType> {
        match self {
            DetectorType::EnergyDetector => None,
            DetectorType::EstimatorCorrelatorWhite => Some(NoiseType::White),
            DetectorType::EstimatorCorrelatorColored => Some(NoiseType::Colored),
        }
    }

    /// True when the curves are built at unit noise variance and thresholds must be
    /// multiplied by the actual noise variance
    pub fn scales_with_noise(self) -> bool {
        !matches!(self, DetectorType::EstimatorCorrelatorColored)
    }

    /// Short tag used in artifact keys
    pub fn tag(self) -> &'static str {
        match self {
            DetectorType::EnergyDetector => "ED",
            DetectorType::EstimatorCorrelatorWhite => "ECW",
            DetectorType::EstimatorCorrelatorColored => "ECC",
        }
    }
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorType::EnergyDetector => "energy detector",
            DetectorType::EstimatorCorrelatorWhite => "estimator-correlator (white noise)",
            DetectorType::EstimatorCorrelatorColored => "estimator-correlator (colored noise)",
        };
        f.write_str(name)
    }
}

impl FromStr for DetectorType {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ed" | "energy" | "energy-detector" => Ok(DetectorType::EnergyDetector),
            "ecw" | "ec-white" | "estimator-correlator-white" => Ok(DetectorType::EstimatorCorrelatorWhite),
            "ecc" | "ec-colored" | "ec-coloured" | "estimator-correlator-colored" => {
                Ok(DetectorType::EstimatorCorrelatorColored)
            }
            _ => Err(DetectorError::UnknownDetectorType { name: s.to_string() }),
        }
    }
}

impl FromStr for NoiseType {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(NoiseType::White),
            "colored" | "coloured" => Ok(NoiseType::Colored),
            _ => Err(DetectorError::UnknownDetectorType { name: format!("noise type '{s}'") }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detector_types() {
        assert_eq!("ED".parse::<DetectorType>().unwrap(), DetectorType::EnergyDetector);
        assert_eq!("ec-white".parse::<DetectorType>().unwrap(), DetectorType::EstimatorCorrelatorWhite);
        assert_eq!(
            "estimator-correlator-colored".parse::<DetectorType>().unwrap(),
            DetectorType::EstimatorCorrelatorColored
        );
    }

    #[test]
    fn test_unknown_detector_type_is_config_error() {
        let err = "matched-filter".parse::<DetectorType>().unwrap_err();
        assert!(matches!(err, DetectorError::UnknownDetectorType { .. }));
    }

    #[test]
    fn test_noise_scaling_rule() {
        assert!(DetectorType::EnergyDetector.scales_with_noise());
        assert!(DetectorType::EstimatorCorrelatorWhite.scales_with_noise());
        assert!(!DetectorType::EstimatorCorrelatorColored.scales_with_noise());
    }
}
