//! HTTP adapters for the upstream inference APIs.

pub mod anthropic;
pub mod openai_compat;

use std::sync::Arc;

use conductor_core::config::{ProviderKind, ProviderSpec};
use conductor_domain::errors::{ConductorError, ConductorResult};

use crate::provider::ProviderClient;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;

/// Build a provider from its configuration entry. The API key is resolved
/// from the environment here, once, so a missing key fails at startup
/// instead of on the first routed task.
pub fn build_provider(spec: &ProviderSpec) -> ConductorResult<Arc<dyn ProviderClient>> {
    let api_key = match &spec.api_key_env {
        Some(var) => Some(std::env::var(var).map_err(|_| {
            ConductorError::Configuration(format!(
                "provider {} requires the {var} environment variable",
                spec.name
            ))
        })?),
        None => None,
    };

    let provider: Arc<dyn ProviderClient> = match spec.kind {
        ProviderKind::Anthropic => {
            let key = api_key.ok_or_else(|| {
                ConductorError::Configuration(format!(
                    "provider {} needs an api_key_env entry",
                    spec.name
                ))
            })?;
            Arc::new(AnthropicProvider::new(spec, key))
        }
        ProviderKind::OpenAiCompat => Arc::new(OpenAiCompatProvider::new(spec, api_key)),
    };

    Ok(provider)
}
