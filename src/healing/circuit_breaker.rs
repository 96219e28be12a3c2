//! # Circuit Breaker
//!
//! Per-resource three-state protector. CLOSED counts consecutive
//! failures and trips to OPEN at the threshold; OPEN fails fast until
//! the timeout elapses, then HALF_OPEN admits a bounded number of
//! probes; enough consecutive successes close the circuit again.

use crate::utils::error::{SwarmError, SwarmResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before it closes.
    pub success_threshold: u32,
    /// Seconds an open circuit waits before probing.
    pub timeout_seconds: u64,
    /// Probe calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_seconds: 60,
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_calls: u32,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            half_open_calls: 0,
        }
    }
}

/// Keyed circuit breaker; each resource gets its own state machine.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<String, Circuit>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    /// Admission check before touching the resource. An expired OPEN
    /// transitions to HALF_OPEN and admits the caller as a probe.
    pub async fn check(&self, resource: &str) -> SwarmResult<CircuitState> {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(resource.to_string()).or_default();

        match circuit.state {
            CircuitState::Closed => Ok(CircuitState::Closed),
            CircuitState::Open => {
                let expired = circuit
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= Duration::from_secs(self.config.timeout_seconds));
                if expired {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_calls = 1;
                    circuit.consecutive_successes = 0;
                    tracing::info!("Circuit for {resource} half-open, probing");
                    Ok(CircuitState::HalfOpen)
                } else {
                    Err(SwarmError::CircuitOpen {
                        resource: resource.to_string(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_calls >= self.config.half_open_max_calls {
                    Err(SwarmError::CircuitOpen {
                        resource: resource.to_string(),
                    })
                } else {
                    circuit.half_open_calls += 1;
                    Ok(CircuitState::HalfOpen)
                }
            }
        }
    }

    /// Record a failed interaction; returns the resulting state.
    pub async fn record_failure(&self, resource: &str) -> CircuitState {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(resource.to_string()).or_default();

        circuit.consecutive_successes = 0;
        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                    tracing::warn!(
                        "Circuit for {resource} opened after {} consecutive failures",
                        circuit.consecutive_failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                // A failed probe reopens immediately.
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.half_open_calls = 0;
                tracing::warn!("Circuit for {resource} reopened on failed probe");
            }
            CircuitState::Open => {}
        }
        circuit.state
    }

    /// Record a successful interaction; returns the resulting state.
    pub async fn record_success(&self, resource: &str) -> CircuitState {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(resource.to_string()).or_default();

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                circuit.consecutive_successes += 1;
                if circuit.consecutive_successes >= self.config.success_threshold {
                    *circuit = Circuit::default();
                    tracing::info!("Circuit for {resource} closed");
                }
            }
            CircuitState::Open => {}
        }
        circuit.state
    }

    pub async fn state(&self, resource: &str) -> CircuitState {
        self.circuits
            .read()
            .await
            .get(resource)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    pub async fn failure_count(&self, resource: &str) -> u32 {
        self.circuits
            .read()
            .await
            .get(resource)
            .map_or(0, |c| c.consecutive_failures)
    }
}
