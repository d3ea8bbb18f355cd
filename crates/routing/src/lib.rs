//! Provider abstraction and the tiered failover router.

pub mod adapters;
pub mod provider;
pub mod router;

pub use provider::{InferenceRequest, ProviderClient, ProviderError, ProviderResponse};
pub use router::{RoutingAttempt, RoutingFailure, RoutingResult, Tier, TieredRouter};
