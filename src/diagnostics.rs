//! Non-fatal diagnostics and progress reporting
//!
//! Numeric searches that run out of iterations and training sets with bad rows do not
//! abort processing. They produce a [`Warning`], which is logged through `tracing` and
//! collected into a [`Diagnostics`] value returned next to the result.

use core::fmt;
use tracing::warn;

/// Which bounded numeric search produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    /// Upper statistic limit of an energy-detector curve
    EnergyTimeLimit,
    /// Frequency truncation of an estimator-correlator characteristic function
    FrequencyLimit,
    /// Peak location of an estimator-correlator density
    PeakLocation,
    /// Upper statistic limit of an estimator-correlator curve
    CorrelatorTimeLimit,
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchKind::EnergyTimeLimit => "energy time-limit search",
            SearchKind::FrequencyLimit => "frequency-limit search",
            SearchKind::PeakLocation => "peak search",
            SearchKind::CorrelatorTimeLimit => "correlator time-limit search",
        };
        f.write_str(name)
    }
}

/// Result of an iteration-capped search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOutcome {
    /// Best estimate found
    pub value: f64,
    /// False when the iteration cap was hit before the tolerance was met
    pub converged: bool,
    /// Iterations spent
    pub iterations: usize,
}

impl SearchOutcome {
    pub(crate) fn converged(value: f64, iterations: usize) -> Self {
        Self { value, converged: true, iterations }
    }

    pub(crate) fn exhausted(value: f64, iterations: usize) -> Self {
        Self { value, converged: false, iterations }
    }
}

/// A degraded-but-usable condition
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A numeric-limit search hit its iteration cap
    Precision {
        search: SearchKind,
        snr_db: Option<f64>,
        value: f64,
        iterations: usize,
    },
    /// Training data was short, malformed or too small for the requested estimator
    DataQuality { message: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Precision { search, snr_db: Some(snr), value, iterations } => write!(
                f,
                "{search} did not converge at {snr} dB after {iterations} iterations (using {value})"
            ),
            Warning::Precision { search, snr_db: None, value, iterations } => write!(
                f,
                "{search} did not converge after {iterations} iterations (using {value})"
            ),
            Warning::DataQuality { message } => f.write_str(message),
        }
    }
}

/// Collected warnings for one operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and emit it as a `tracing` event
    pub fn push(&mut self, warning: Warning) {
        warn!(%warning, "degraded result");
        self.warnings.push(warning);
    }

    pub(crate) fn data_quality(&mut self, message: impl Into<String>) {
        self.push(Warning::DataQuality { message: message.into() });
    }

    /// Record a precision warning if the search did not converge
    pub(crate) fn check_search(&mut self, search: SearchKind, snr_db: Option<f64>, outcome: &SearchOutcome) {
        if !outcome.converged {
            self.push(Warning::Precision {
                search,
                snr_db,
                value: outcome.value,
                iterations: outcome.iterations,
            });
        }
    }

    /// Merge warnings from a sub-operation without logging them twice
    pub fn absorb(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn precision_warnings(&self) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(|w| matches!(w, Warning::Precision { .. }))
    }
}

/// A value together with the warnings raised while producing it
#[derive(Debug, Clone)]
pub struct Diagnosed<T> {
    pub value: T,
    pub diagnostics: Diagnostics,
}

impl<T> Diagnosed<T> {
    pub fn new(value: T, diagnostics: Diagnostics) -> Self {
        Self { value, diagnostics }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Diagnosed<U> {
        Diagnosed { value: f(self.value), diagnostics: self.diagnostics }
    }

    /// Move the warnings into `sink` and return the bare value
    pub fn into_value(self, sink: &mut Diagnostics) -> T {
        sink.absorb(self.diagnostics);
        self.value
    }
}

/// Receives progress updates from long batch computations
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, completed: usize, total: usize);
}

/// Observer that ignores every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}
}
