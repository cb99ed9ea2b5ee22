//! Neyman-Pearson detection of transient acoustic events
//!
//! Covariance models of a target signal and background noise are built from training
//! observations, turned into performance curves of the detector's test statistic, and
//! inverted into adaptive per-kernel thresholds. Kernels whose statistic exceeds the
//! threshold are grouped into event windows.
//!
//! Pipeline: [`covariance`] -> [`eigen`] -> [`performance`] -> [`threshold`];
//! [`statistic`] and [`grouping`] run per recording. [`detector`] wires them together.

pub mod covariance;
pub mod detector;
pub mod diagnostics;
pub mod eigen;
pub mod error;
pub mod grouping;
pub mod interp;
pub mod performance;
pub mod simulation;
pub mod statistic;
pub mod store;
pub mod threshold;
pub mod tracing_init;
pub mod types;

pub use covariance::{estimate, Bandpass, CovarianceConfig, CovarianceData, EstimatorKind, FilterMode};
pub use detector::{BuiltDetector, Detection, DetectorConfig, NeymanPearsonDetector, TrainingData};
pub use diagnostics::{Diagnosed, Diagnostics, NoProgress, ProgressObserver, SearchKind, SearchOutcome, Warning};
pub use eigen::{decompose, EigenData};
pub use error::{DetectorError, Result};
pub use grouping::{group, DetectionEvent, EventWindow, KernelSpan};
pub use performance::{build_curve_set, CurveConfig, CurveSource, PerformanceCurveSet, PerformanceRecord, Precision};
pub use store::{Artifact, ArtifactKey, ArtifactKind, ArtifactStore, MemoryStore, NoStore};
pub use threshold::{solve, ThresholdConfig, Thresholds};
pub use types::{DetectorType, NoiseType};
