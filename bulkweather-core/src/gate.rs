//! Failure-isolating gates in front of remote dependencies.
//!
//! One gate exists per named service, shared by everything that calls that
//! service. A gate tracks a rolling error rate; too many counted failures
//! open it, an open gate rejects immediately, and after a cooldown a single
//! trial call decides whether it closes again.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::GateSettings;
use crate::error::ResolveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed,
    Open,
    HalfOpen,
}

/// Returns `true` when an error must NOT count toward the rolling error
/// rate. The default excludes the gate's own open signal and plain
/// business outcomes (unknown city, bad input) so they cannot
/// self-reinforce an open circuit.
pub type ErrorFilter = fn(&ResolveError) -> bool;

pub fn default_error_filter(error: &ResolveError) -> bool {
    matches!(
        error,
        ResolveError::CircuitOpen(_)
            | ResolveError::CityNotFound(_)
            | ResolveError::InvalidCityName(_)
    )
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Rolling window the error rate is computed over.
    pub window: Duration,
    /// Open when the windowed error percentage exceeds this.
    pub error_threshold_pct: f64,
    /// Time an open gate waits before allowing a half-open trial.
    pub reset_timeout: Duration,
    /// Per-call deadline; exceeding it counts as a failure.
    pub call_timeout: Duration,
    pub error_filter: ErrorFilter,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            error_threshold_pct: 80.0,
            reset_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(4),
            error_filter: default_error_filter,
        }
    }
}

impl From<&GateSettings> for GateConfig {
    fn from(settings: &GateSettings) -> Self {
        Self {
            window: Duration::from_secs(settings.window_secs),
            error_threshold_pct: settings.error_threshold_pct,
            reset_timeout: Duration::from_secs(settings.reset_timeout_secs),
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
            error_filter: default_error_filter,
        }
    }
}

#[derive(Debug)]
struct GateInner {
    state: GateState,
    opened_at: Option<Instant>,
    /// (when, failed) samples inside the rolling window.
    samples: VecDeque<(Instant, bool)>,
    /// A half-open trial call is in flight.
    probing: bool,
}

#[derive(Debug)]
pub struct CircuitGate {
    name: String,
    config: GateConfig,
    inner: Mutex<GateInner>,
}

impl CircuitGate {
    pub fn new(name: impl Into<String>, config: GateConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(GateInner {
                state: GateState::Closed,
                opened_at: None,
                samples: VecDeque::new(),
                probing: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> GateState {
        self.inner.lock().unwrap().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == GateState::Open
    }

    /// Run `fut` through the gate. Rejected immediately with
    /// [`ResolveError::CircuitOpen`] while open; otherwise the call is
    /// bounded by the configured timeout and its outcome feeds the rolling
    /// error rate (subject to the error filter).
    pub async fn call<T, F>(&self, fut: F) -> Result<T, ResolveError>
    where
        F: Future<Output = Result<T, ResolveError>>,
    {
        self.before_call()?;

        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                self.on_failure(&error);
                Err(error)
            }
            Err(_elapsed) => {
                let error = ResolveError::Internal(format!(
                    "call through gate '{}' timed out after {:?}",
                    self.name, self.config.call_timeout
                ));
                self.on_failure(&error);
                Err(error)
            }
        }
    }

    fn before_call(&self) -> Result<(), ResolveError> {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            GateState::Closed => Ok(()),
            GateState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|t| t.elapsed() >= self.config.reset_timeout);
                if cooled_down {
                    inner.state = GateState::HalfOpen;
                    inner.probing = true;
                    info!(gate = %self.name, "circuit half-open, allowing trial call");
                    Ok(())
                } else {
                    Err(ResolveError::CircuitOpen(self.name.clone()))
                }
            }
            GateState::HalfOpen => {
                if inner.probing {
                    Err(ResolveError::CircuitOpen(self.name.clone()))
                } else {
                    inner.probing = true;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            GateState::HalfOpen => {
                inner.state = GateState::Closed;
                inner.opened_at = None;
                inner.probing = false;
                inner.samples.clear();
                info!(gate = %self.name, "circuit closed after successful trial");
            }
            GateState::Closed => {
                Self::push_sample(&mut inner, self.config.window, false);
            }
            GateState::Open => {}
        }
    }

    fn on_failure(&self, error: &ResolveError) {
        if (self.config.error_filter)(error) {
            return;
        }

        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            GateState::HalfOpen => {
                inner.state = GateState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probing = false;
                warn!(gate = %self.name, "trial call failed, circuit reopened");
            }
            GateState::Closed => {
                Self::push_sample(&mut inner, self.config.window, true);

                let total = inner.samples.len();
                let failed = inner.samples.iter().filter(|(_, f)| *f).count();
                let rate = failed as f64 / total as f64 * 100.0;
                if rate > self.config.error_threshold_pct {
                    inner.state = GateState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        gate = %self.name,
                        error_rate = rate,
                        "error rate over threshold, circuit opened"
                    );
                }
            }
            GateState::Open => {}
        }
    }

    fn push_sample(inner: &mut GateInner, window: Duration, failed: bool) {
        let now = Instant::now();
        inner.samples.push_back((now, failed));
        inner.samples.retain(|(t, _)| now.duration_since(*t) <= window);
    }
}

/// The fixed set of gates for this process, keyed by service name and built
/// once from config at the composition root. Unregistered names are a usage
/// error, never a fallback.
#[derive(Debug)]
pub struct GateRegistry {
    gates: HashMap<String, Arc<CircuitGate>>,
}

impl GateRegistry {
    pub fn from_settings(settings: &GateSettings) -> Self {
        let config = GateConfig::from(settings);
        let gates = settings
            .services
            .iter()
            .map(|name| (name.clone(), Arc::new(CircuitGate::new(name.clone(), config.clone()))))
            .collect();
        Self { gates }
    }

    pub fn gate(&self, name: &str) -> Result<Arc<CircuitGate>, ResolveError> {
        self.gates
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownGate(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.gates.keys().map(String::as_str).collect()
    }
}
