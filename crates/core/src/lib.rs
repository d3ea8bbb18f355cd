//! Cross-cutting runtime pieces: the circuit breaker and its per-key
//! registry, configuration loading, and logging initialization.

pub mod circuit_breaker;
pub mod config;
pub mod logging;

pub use circuit_breaker::{
    BreakerRegistry, BreakerTransition, CallReport, CircuitBreaker, CircuitBreakerConfig,
};
pub use config::AppConfig;
