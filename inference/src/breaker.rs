use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Dwell time in OPEN before a recovery probe is admitted.
    pub recovery: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of one model's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct ModelState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// HALF_OPEN admits exactly one in-flight probe, serialized across
    /// concurrent requests. Released when the probe's outcome is recorded.
    probe_in_flight: bool,
}

impl ModelState {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Per-model health state machine shared by all concurrent requests.
///
/// Pure state updates under one lock; every transition is a short critical
/// section and no method can fail. Timing uses the monotonic clock.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    states: Mutex<HashMap<String, ModelState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request may go to `model` right now. An OPEN circuit past
    /// its recovery window lazily moves to HALF_OPEN and this call claims
    /// the single recovery probe.
    pub fn is_allowed(&self, model: &str) -> bool {
        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(model.to_string())
            .or_insert_with(ModelState::new);

        match state.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                let expired = state
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.recovery);
                if expired {
                    state.status = CircuitStatus::HalfOpen;
                    state.probe_in_flight = true;
                    info!(model, "circuit half-open, admitting recovery probe");
                    true
                } else {
                    false
                }
            }
            CircuitStatus::HalfOpen => {
                if state.probe_in_flight {
                    false
                } else {
                    state.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self, model: &str) {
        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(model.to_string())
            .or_insert_with(ModelState::new);

        state.consecutive_failures = 0;
        if state.status == CircuitStatus::HalfOpen {
            state.status = CircuitStatus::Closed;
            state.opened_at = None;
            state.probe_in_flight = false;
            info!(model, "circuit closed after successful recovery");
        }
    }

    pub fn record_failure(&self, model: &str) {
        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(model.to_string())
            .or_insert_with(ModelState::new);

        match state.status {
            CircuitStatus::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.status = CircuitStatus::Open;
                    state.opened_at = Some(Instant::now());
                    warn!(
                        model,
                        failures = state.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            CircuitStatus::HalfOpen => {
                state.consecutive_failures += 1;
                state.status = CircuitStatus::Open;
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = false;
                warn!(model, "circuit re-opened after failed recovery probe");
            }
            CircuitStatus::Open => {
                state.consecutive_failures += 1;
            }
        }
    }

    /// Current state of a model's circuit, applying the lazy OPEN →
    /// HALF_OPEN transition without claiming the probe.
    pub fn status(&self, model: &str) -> CircuitSnapshot {
        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(model.to_string())
            .or_insert_with(ModelState::new);

        if state.status == CircuitStatus::Open {
            let expired = state
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.recovery);
            if expired {
                state.status = CircuitStatus::HalfOpen;
            }
        }

        CircuitSnapshot {
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
