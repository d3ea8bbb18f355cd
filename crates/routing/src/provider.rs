//! The inference provider abstraction the router dispatches through.

use async_trait::async_trait;
use thiserror::Error;

/// A single piece of work sent to a provider.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Optional hint used for provider affinity in the first tier.
    pub task_type: Option<String>,
}

/// Successful provider result plus the accounting the registry needs.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    /// Cost of this call in configured units (dollars per the cost rate).
    pub cost_units: f64,
    pub elapsed_ms: u64,
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited")]
    RateLimited,

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn from_reqwest(e: reqwest::Error, timeout_seconds: u64) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(timeout_seconds)
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// One upstream inference backend. Implementations are HTTP adapters in
/// [`crate::adapters`]; tests substitute scripted fakes.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    /// Cost rate used both for accounting and for the optional
    /// cheapest-first ordering inside a tier.
    fn cost_per_1k_tokens(&self) -> f64;

    /// Task types this provider should be preferred for. Empty means no
    /// affinity.
    fn preferred_task_types(&self) -> &[String];

    async fn call(&self, request: &InferenceRequest) -> Result<ProviderResponse, ProviderError>;
}
