//! Artifact naming and lookup
//!
//! Covariance, eigen and curve artifacts are expensive to build and reused across
//! runs. They are identified by a deterministic name derived from the parameters that
//! produced them. Persistence belongs to the caller: the detector reads through
//! [`ArtifactStore`] and hands newly built artifacts back for saving.

use core::fmt;
use std::collections::HashMap;

use crate::covariance::{CovarianceData, EstimatorKind};
use crate::eigen::EigenData;
use crate::performance::PerformanceCurveSet;
use crate::types::DetectorType;

/// What an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Covariance,
    Eigen,
    Curves,
}

impl ArtifactKind {
    fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Covariance => "COV",
            ArtifactKind::Eigen => "EIG",
            ArtifactKind::Curves => "PERF",
        }
    }
}

/// Parameters identifying an artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactKey {
    /// Training class name, or `signal~noise` for artifacts built from both
    pub source: String,
    pub detector_type: DetectorType,
    /// Bandpass cutoffs normalized to Nyquist
    pub cutoff_freqs: [f64; 2],
    /// Target sample rate in Hz
    pub resample_rate: f64,
    /// Kernel duration in seconds
    pub kernel_duration: f64,
    pub estimator: EstimatorKind,
}

impl ArtifactKey {
    /// Deterministic store name for one kind of artifact
    pub fn name(&self, kind: ArtifactKind) -> String {
        format!("{}_{}", kind.prefix(), self)
    }

    /// Same parameters, different source
    pub fn with_source(&self, source: impl Into<String>) -> Self {
        Self { source: source.into(), ..self.clone() }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}-{}_{}Hz_{}s_{}",
            self.source,
            self.detector_type.tag(),
            self.cutoff_freqs[0],
            self.cutoff_freqs[1],
            self.resample_rate,
            self.kernel_duration,
            self.estimator.tag()
        )
    }
}

/// A stored artifact
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Covariance(CovarianceData),
    Eigen(EigenData),
    Curves(PerformanceCurveSet),
}

/// Keyed artifact storage provided by the caller
pub trait ArtifactStore {
    fn load(&self, name: &str) -> Option<Artifact>;

    fn save(&mut self, name: String, artifact: Artifact);
}

/// Store that never hits
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStore;

impl ArtifactStore for NoStore {
    fn load(&self, _name: &str) -> Option<Artifact> {
        None
    }

    fn save(&mut self, _name: String, _artifact: Artifact) {}
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    artifacts: HashMap<String, Artifact>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }
}

impl ArtifactStore for MemoryStore {
    fn load(&self, name: &str) -> Option<Artifact> {
        self.artifacts.get(name).cloned()
    }

    fn save(&mut self, name: String, artifact: Artifact) {
        self.artifacts.insert(name, artifact);
    }
}
