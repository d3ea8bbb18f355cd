use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ConductorError {
    #[error("database operation failed: {0}")]
    DatabaseOperation(String),
    #[error("task not found: id={id}")]
    TaskNotFound { id: i64 },
    #[error("agent not found: name={name}")]
    AgentNotFound { name: String },
    #[error("stale claim: task {task_id} is no longer owned by agent {agent}")]
    StaleClaim { task_id: i64, agent: String },
    #[error("circuit breaker open for {key}")]
    CircuitOpen { key: String },
    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },
    #[error("all routing tiers exhausted: {diagnostic}")]
    AllTiersExhausted { diagnostic: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ConductorResult<T> = Result<T, ConductorError>;

impl ConductorError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// A stale claim or a lost claim race is expected under concurrency and
    /// must never be treated as a fault.
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, ConductorError::StaleClaim { .. })
    }

    /// Breaker-open short-circuits are fast, cheap failures distinguishable
    /// from real provider errors.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ConductorError::CircuitOpen { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConductorError::DatabaseOperation(_)
                | ConductorError::Provider { .. }
                | ConductorError::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConductorError::Internal(_) | ConductorError::Configuration(_)
        )
    }
}

impl From<sqlx::Error> for ConductorError {
    fn from(err: sqlx::Error) -> Self {
        ConductorError::DatabaseOperation(err.to_string())
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        ConductorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ConductorError {
    fn from(err: anyhow::Error) -> Self {
        ConductorError::Internal(err.to_string())
    }
}
