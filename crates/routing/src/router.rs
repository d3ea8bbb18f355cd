//! Tiered failover routing across inference providers.
//!
//! Tiers are ordered by preference. Within a tier providers are attempted
//! in configured order; a provider whose circuit breaker is open is skipped
//! at no cost, while a genuine call failure abandons the whole tier and
//! moves on to the next one. Tier order itself is never reshuffled.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use conductor_core::circuit_breaker::BreakerRegistry;
use conductor_domain::entities::CircuitState;
use conductor_domain::errors::ConductorError;

use crate::provider::{InferenceRequest, ProviderClient, ProviderResponse};

/// One ordered group of interchangeable providers.
#[derive(Clone)]
pub struct Tier {
    pub providers: Vec<Arc<dyn ProviderClient>>,
}

/// Record of a single provider attempt, kept for diagnostics and the
/// event log.
#[derive(Debug, Clone)]
pub struct RoutingAttempt {
    pub tier: usize,
    pub provider: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success,
    /// The provider's breaker was open; the call was never made.
    SkippedOpen,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RoutingResult {
    pub text: String,
    pub provider: String,
    pub tier: usize,
    pub cost_units: f64,
    pub elapsed_ms: u64,
    pub attempts: Vec<RoutingAttempt>,
}

/// Every tier was either skipped or failed.
#[derive(Debug, Clone)]
pub struct RoutingFailure {
    pub attempts: Vec<RoutingAttempt>,
}

impl RoutingFailure {
    /// Compact per-attempt summary for error messages and the event log.
    pub fn diagnostic(&self) -> String {
        if self.attempts.is_empty() {
            return "no providers were available".to_string();
        }
        self.attempts
            .iter()
            .map(|a| {
                let outcome = match &a.outcome {
                    AttemptOutcome::Success => "ok".to_string(),
                    AttemptOutcome::SkippedOpen => "circuit open".to_string(),
                    AttemptOutcome::Failed(reason) => reason.clone(),
                };
                format!("tier {} {}: {}", a.tier + 1, a.provider, outcome)
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl From<RoutingFailure> for ConductorError {
    fn from(failure: RoutingFailure) -> Self {
        ConductorError::AllTiersExhausted {
            diagnostic: failure.diagnostic(),
        }
    }
}

/// Per-tier breaker states, for status reporting.
#[derive(Debug, Clone)]
pub struct TierHealth {
    pub tier: usize,
    pub providers: Vec<(String, CircuitState)>,
}

pub struct TieredRouter {
    tiers: Vec<Tier>,
    breakers: Arc<BreakerRegistry>,
    prioritize_cost: bool,
    max_tokens: u32,
    temperature: f32,
}

impl TieredRouter {
    pub fn new(
        tiers: Vec<Tier>,
        breakers: Arc<BreakerRegistry>,
        prioritize_cost: bool,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            tiers,
            breakers,
            prioritize_cost,
            max_tokens,
            temperature,
        }
    }

    fn breaker_key(provider: &str) -> String {
        format!("provider:{provider}")
    }

    /// Attempt order within one tier. Cheapest-first applies to every tier
    /// when enabled; task-type affinity only promotes within the first
    /// tier, so a preference can never drag work down to a cheaper tier.
    fn order_tier(
        &self,
        tier_index: usize,
        tier: &Tier,
        task_type: Option<&str>,
    ) -> Vec<Arc<dyn ProviderClient>> {
        let mut providers = tier.providers.clone();
        if self.prioritize_cost {
            providers.sort_by(|a, b| {
                a.cost_per_1k_tokens()
                    .partial_cmp(&b.cost_per_1k_tokens())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if tier_index == 0 {
            if let Some(task_type) = task_type {
                let (preferred, rest): (Vec<_>, Vec<_>) = providers
                    .into_iter()
                    .partition(|p| p.preferred_task_types().iter().any(|t| t == task_type));
                providers = preferred.into_iter().chain(rest).collect();
            }
        }
        providers
    }

    /// Route one request through the tiers. Returns the first successful
    /// provider response or a failure carrying every attempt made.
    pub async fn route(
        &self,
        prompt: &str,
        task_type: Option<&str>,
    ) -> Result<RoutingResult, RoutingFailure> {
        let request = InferenceRequest {
            prompt: prompt.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            task_type: task_type.map(str::to_string),
        };

        let mut attempts = Vec::new();

        for (tier_index, tier) in self.tiers.iter().enumerate() {
            for provider in self.order_tier(tier_index, tier, task_type) {
                let name = provider.name().to_string();
                let breaker = self.breakers.get_or_create(&Self::breaker_key(&name)).await;

                if !breaker.call_permitted().await {
                    debug!(provider = %name, tier = tier_index + 1, "skipping provider, circuit open");
                    counter!("router_attempts_total", "provider" => name.clone(), "outcome" => "skipped").increment(1);
                    attempts.push(RoutingAttempt {
                        tier: tier_index,
                        provider: name,
                        outcome: AttemptOutcome::SkippedOpen,
                    });
                    continue;
                }

                let report = breaker
                    .execute(|| async {
                        provider.call(&request).await.map_err(|e| {
                            ConductorError::Provider {
                                provider: provider.name().to_string(),
                                message: e.to_string(),
                            }
                        })
                    })
                    .await;

                for transition in &report.transitions {
                    info!(
                        provider = %name,
                        from = transition.from.as_str(),
                        to = transition.to.as_str(),
                        "provider breaker transition"
                    );
                }

                match report.outcome {
                    Ok(response) => {
                        counter!("router_attempts_total", "provider" => name.clone(), "outcome" => "success").increment(1);
                        attempts.push(RoutingAttempt {
                            tier: tier_index,
                            provider: name.clone(),
                            outcome: AttemptOutcome::Success,
                        });
                        return Ok(self.finish(tier_index, name, response, attempts));
                    }
                    Err(ConductorError::CircuitOpen { .. }) => {
                        // Lost the half-open probe slot to a concurrent call.
                        counter!("router_attempts_total", "provider" => name.clone(), "outcome" => "skipped").increment(1);
                        attempts.push(RoutingAttempt {
                            tier: tier_index,
                            provider: name,
                            outcome: AttemptOutcome::SkippedOpen,
                        });
                        continue;
                    }
                    Err(e) => {
                        warn!(provider = %name, tier = tier_index + 1, error = %e, "provider call failed, abandoning tier");
                        counter!("router_attempts_total", "provider" => name.clone(), "outcome" => "failure").increment(1);
                        attempts.push(RoutingAttempt {
                            tier: tier_index,
                            provider: name,
                            outcome: AttemptOutcome::Failed(e.to_string()),
                        });
                        break;
                    }
                }
            }
        }

        counter!("router_exhausted_total").increment(1);
        Err(RoutingFailure { attempts })
    }

    fn finish(
        &self,
        tier: usize,
        provider: String,
        response: ProviderResponse,
        attempts: Vec<RoutingAttempt>,
    ) -> RoutingResult {
        RoutingResult {
            text: response.text,
            provider,
            tier,
            cost_units: response.cost_units,
            elapsed_ms: response.elapsed_ms,
            attempts,
        }
    }

    pub async fn tier_health(&self) -> Vec<TierHealth> {
        let mut out = Vec::with_capacity(self.tiers.len());
        for (tier_index, tier) in self.tiers.iter().enumerate() {
            let mut providers = Vec::with_capacity(tier.providers.len());
            for provider in &tier.providers {
                let breaker = self
                    .breakers
                    .get_or_create(&Self::breaker_key(provider.name()))
                    .await;
                providers.push((provider.name().to_string(), breaker.state().await));
            }
            out.push(TierHealth {
                tier: tier_index,
                providers,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use conductor_core::circuit_breaker::CircuitBreakerConfig;

    use crate::provider::{ProviderClient, ProviderError};

    use super::*;

    struct ScriptedProvider {
        name: String,
        cost: f64,
        task_types: Vec<String>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn ok(name: &str, cost: f64) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                cost,
                task_types: Vec::new(),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str, cost: f64) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                cost,
                task_types: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn with_task_types(name: &str, cost: f64, task_types: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                cost,
                task_types: task_types.iter().map(|s| s.to_string()).collect(),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn cost_per_1k_tokens(&self) -> f64 {
            self.cost
        }

        fn preferred_task_types(&self) -> &[String] {
            &self.task_types
        }

        async fn call(
            &self,
            _request: &InferenceRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderError::Api {
                    status: 500,
                    message: "scripted failure".to_string(),
                })
            } else {
                Ok(ProviderResponse {
                    text: format!("answer from {}", self.name),
                    cost_units: self.cost / 1000.0,
                    elapsed_ms: 5,
                })
            }
        }
    }

    fn registry(threshold: u32) -> Arc<BreakerRegistry> {
        Arc::new(BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_secs(60),
            call_timeout: Duration::from_secs(5),
        }))
    }

    fn router(tiers: Vec<Tier>, breakers: Arc<BreakerRegistry>) -> TieredRouter {
        TieredRouter::new(tiers, breakers, false, 256, 0.5)
    }

    #[tokio::test]
    async fn first_healthy_provider_wins() {
        let primary = ScriptedProvider::ok("primary", 3.0);
        let fallback = ScriptedProvider::ok("fallback", 0.0);
        let r = router(
            vec![
                Tier {
                    providers: vec![primary.clone()],
                },
                Tier {
                    providers: vec![fallback.clone()],
                },
            ],
            registry(5),
        );

        let result = r.route("hello", None).await.unwrap();
        assert_eq!(result.provider, "primary");
        assert_eq!(result.tier, 0);
        assert_eq!(fallback.call_count(), 0);
    }

    #[tokio::test]
    async fn tier_failure_falls_through_to_next_tier() {
        let primary = ScriptedProvider::failing("primary", 3.0);
        let sibling = ScriptedProvider::ok("sibling", 2.0);
        let fallback = ScriptedProvider::ok("fallback", 0.0);
        let r = router(
            vec![
                Tier {
                    providers: vec![primary.clone(), sibling.clone()],
                },
                Tier {
                    providers: vec![fallback.clone()],
                },
            ],
            registry(5),
        );

        let result = r.route("hello", None).await.unwrap();
        // A genuine failure abandons the tier, so the sibling is never tried.
        assert_eq!(result.provider, "fallback");
        assert_eq!(result.tier, 1);
        assert_eq!(sibling.call_count(), 0);
        assert_eq!(result.attempts.len(), 2);
        assert!(matches!(
            result.attempts[0].outcome,
            AttemptOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn open_breaker_skips_provider_without_calling_it() {
        let flaky = ScriptedProvider::failing("flaky", 3.0);
        let fallback = ScriptedProvider::ok("fallback", 0.0);
        let breakers = registry(1);
        let r = router(
            vec![
                Tier {
                    providers: vec![flaky.clone()],
                },
                Tier {
                    providers: vec![fallback.clone()],
                },
            ],
            breakers,
        );

        // First pass trips the breaker on the single allowed failure.
        let _ = r.route("hello", None).await.unwrap();
        assert_eq!(flaky.call_count(), 1);

        // Second pass must skip the provider entirely.
        let result = r.route("hello", None).await.unwrap();
        assert_eq!(flaky.call_count(), 1);
        assert!(matches!(
            result.attempts[0].outcome,
            AttemptOutcome::SkippedOpen
        ));
        assert_eq!(result.provider, "fallback");
    }

    #[tokio::test]
    async fn skipped_provider_does_not_abandon_tier() {
        let flaky = ScriptedProvider::failing("flaky", 3.0);
        let sibling = ScriptedProvider::ok("sibling", 2.0);
        let breakers = registry(1);
        let r = router(
            vec![Tier {
                providers: vec![flaky.clone(), sibling.clone()],
            }],
            breakers,
        );

        let first = r.route("hello", None).await.unwrap();
        assert_eq!(first.provider, "sibling");

        // flaky's breaker is now open; the skip stays within the tier.
        let second = r.route("hello", None).await.unwrap();
        assert_eq!(second.provider, "sibling");
        assert_eq!(flaky.call_count(), 1);
    }

    #[tokio::test]
    async fn task_type_promotes_within_first_tier_only() {
        let general = ScriptedProvider::ok("general", 1.0);
        let coder = ScriptedProvider::with_task_types("coder", 3.0, &["code"]);
        let r = router(
            vec![Tier {
                providers: vec![general.clone(), coder.clone()],
            }],
            registry(5),
        );

        let result = r.route("write a function", Some("code")).await.unwrap();
        assert_eq!(result.provider, "coder");
        assert_eq!(general.call_count(), 0);

        // No matching task type keeps the configured order.
        let result = r.route("summarize", Some("prose")).await.unwrap();
        assert_eq!(result.provider, "general");
    }

    #[tokio::test]
    async fn cost_priority_reorders_within_tier() {
        let pricey = ScriptedProvider::ok("pricey", 5.0);
        let cheap = ScriptedProvider::ok("cheap", 0.5);
        let r = TieredRouter::new(
            vec![Tier {
                providers: vec![pricey.clone(), cheap.clone()],
            }],
            registry(5),
            true,
            256,
            0.5,
        );

        let result = r.route("hello", None).await.unwrap();
        assert_eq!(result.provider, "cheap");
        assert_eq!(pricey.call_count(), 0);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_attempt() {
        let a = ScriptedProvider::failing("a", 3.0);
        let b = ScriptedProvider::failing("b", 1.0);
        let r = router(
            vec![
                Tier {
                    providers: vec![a.clone()],
                },
                Tier {
                    providers: vec![b.clone()],
                },
            ],
            registry(5),
        );

        let failure = r.route("hello", None).await.unwrap_err();
        assert_eq!(failure.attempts.len(), 2);
        let diagnostic = failure.diagnostic();
        assert!(diagnostic.contains("tier 1 a"));
        assert!(diagnostic.contains("tier 2 b"));
    }

    #[tokio::test]
    async fn tier_health_reflects_breaker_states() {
        let flaky = ScriptedProvider::failing("flaky", 3.0);
        let steady = ScriptedProvider::ok("steady", 0.0);
        let breakers = registry(1);
        let r = router(
            vec![
                Tier {
                    providers: vec![flaky.clone()],
                },
                Tier {
                    providers: vec![steady.clone()],
                },
            ],
            breakers,
        );

        let _ = r.route("hello", None).await.unwrap();

        let health = r.tier_health().await;
        assert_eq!(health.len(), 2);
        assert_eq!(health[0].providers[0].1, CircuitState::Open);
        assert_eq!(health[1].providers[0].1, CircuitState::Closed);
    }
}
