use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use conductor_domain::entities::CircuitState;
use conductor_domain::errors::{ConductorError, ConductorResult};

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe
    pub cooldown: Duration,
    /// Maximum call duration; a timeout counts as a failure
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// One observed state change, reported to the caller so it can be written
/// to the agent registry and the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Result of a call made through the breaker, together with the state
/// transitions the call caused.
#[derive(Debug)]
pub struct CallReport<T> {
    pub outcome: ConductorResult<T>,
    pub transitions: Vec<BreakerTransition>,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    /// Half-open admits exactly one probe at a time.
    probe_in_flight: bool,
    total_calls: u64,
    failed_calls: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            probe_in_flight: false,
            total_calls: 0,
            failed_calls: 0,
        }
    }
}

/// Per-key fault-isolation state machine.
///
/// Closed passes calls through; Open short-circuits them with a fast
/// [`ConductorError::CircuitOpen`] so callers never wait out a network
/// timeout against a known-failing dependency; HalfOpen admits a single
/// probe whose outcome decides between Closed and Open.
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Arc<RwLock<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Arc::new(RwLock::new(BreakerInner::new())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Execute an operation under breaker protection and a bounded call
    /// timeout. The report carries every transition the call caused.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> CallReport<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ConductorResult<T>>,
    {
        let mut transitions = Vec::new();

        match self.admit(&mut transitions).await {
            Admission::Denied => {
                let (state, consecutive_failures) = self.state_snapshot().await;
                return CallReport {
                    outcome: Err(ConductorError::CircuitOpen {
                        key: self.key.clone(),
                    }),
                    transitions,
                    state,
                    consecutive_failures,
                };
            }
            Admission::Allowed => {}
        }

        let result = tokio::time::timeout(self.config.call_timeout, operation()).await;

        let outcome = match result {
            Ok(Ok(value)) => {
                self.record_success(&mut transitions).await;
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure(&mut transitions).await;
                Err(error)
            }
            Err(_) => {
                self.record_failure(&mut transitions).await;
                Err(ConductorError::Timeout(format!(
                    "call through breaker {} exceeded {:?}",
                    self.key, self.config.call_timeout
                )))
            }
        };

        let (state, consecutive_failures) = self.state_snapshot().await;
        CallReport {
            outcome,
            transitions,
            state,
            consecutive_failures,
        }
    }

    /// Whether a call made right now would be admitted. Used by consumer
    /// loops to skip claiming work while their breaker is open, without
    /// consuming the half-open probe slot.
    pub async fn call_permitted(&self) -> bool {
        let inner = self.inner.read().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !inner.probe_in_flight,
            CircuitState::Open => inner
                .last_failure_at
                .map(|at| at.elapsed() >= self.config.cooldown)
                .unwrap_or(true),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.read().await.consecutive_failures
    }

    /// Lifetime call counters, `(total, failed)`.
    pub async fn stats(&self) -> (u64, u64) {
        let inner = self.inner.read().await;
        (inner.total_calls, inner.failed_calls)
    }

    async fn state_snapshot(&self) -> (CircuitState, u32) {
        let inner = self.inner.read().await;
        (inner.state, inner.consecutive_failures)
    }

    async fn admit(&self, transitions: &mut Vec<BreakerTransition>) -> Admission {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    transitions.push(BreakerTransition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    });
                    Admission::Allowed
                } else {
                    Admission::Denied
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Denied
                } else {
                    inner.probe_in_flight = true;
                    Admission::Allowed
                }
            }
        }
    }

    async fn record_success(&self, transitions: &mut Vec<BreakerTransition>) {
        let mut inner = self.inner.write().await;
        inner.total_calls += 1;
        inner.probe_in_flight = false;
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            transitions.push(BreakerTransition {
                from: inner.state,
                to: CircuitState::Closed,
            });
            inner.state = CircuitState::Closed;
        }
    }

    async fn record_failure(&self, transitions: &mut Vec<BreakerTransition>) {
        let mut inner = self.inner.write().await;
        inner.total_calls += 1;
        inner.failed_calls += 1;
        inner.probe_in_flight = false;
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    transitions.push(BreakerTransition {
                        from: CircuitState::Closed,
                        to: CircuitState::Open,
                    });
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                // A failed probe re-opens the circuit and restarts the cooldown.
                transitions.push(BreakerTransition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                });
                inner.state = CircuitState::Open;
            }
            CircuitState::Open => {}
        }
    }
}

enum Admission {
    Allowed,
    Denied,
}

/// Explicitly owned, injectable collection of breakers keyed by agent or
/// provider name, so one faulty dependency cannot stall unrelated work.
/// Time checks are lazy; teardown is dropping the registry.
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(key) {
                return Arc::clone(breaker);
            }
        }
        let mut breakers = self.breakers.write().await;
        Arc::clone(
            breakers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone()))),
        )
    }

    /// Current state per key, for tier-health reporting.
    pub async fn states(&self) -> HashMap<String, CircuitState> {
        let breakers = self.breakers.read().await;
        let mut states = HashMap::with_capacity(breakers.len());
        for (key, breaker) in breakers.iter() {
            states.insert(key.clone(), breaker.state().await);
        }
        states
    }
}
