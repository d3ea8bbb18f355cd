//! Read-only aggregate view over the registry, the queue and the router.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use conductor_domain::entities::{AgentSnapshot, EventLogEntry};
use conductor_domain::errors::ConductorResult;
use conductor_domain::repositories::{AgentRegistry, EventLog, TaskQueue};
use conductor_routing::TieredRouter;

#[derive(Debug, Serialize)]
pub struct StatusOverview {
    pub agents: Vec<AgentSnapshot>,
    pub pending_tasks: i64,
    pub tiers: Vec<TierStatus>,
}

#[derive(Debug, Serialize)]
pub struct TierStatus {
    pub tier: usize,
    pub providers: Vec<ProviderStatus>,
}

#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub circuit_state: String,
}

pub struct StatusService {
    registry: Arc<dyn AgentRegistry>,
    queue: Arc<dyn TaskQueue>,
    events: Arc<dyn EventLog>,
    router: Arc<TieredRouter>,
    liveness_timeout: Duration,
}

impl StatusService {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        queue: Arc<dyn TaskQueue>,
        events: Arc<dyn EventLog>,
        router: Arc<TieredRouter>,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            queue,
            events,
            router,
            liveness_timeout,
        }
    }

    /// Snapshot of everything an operator needs at a glance. Agent states
    /// already carry the liveness override.
    pub async fn overview(&self) -> ConductorResult<StatusOverview> {
        let agents = self.registry.snapshot(self.liveness_timeout).await?;
        let pending_tasks = self.queue.pending_count().await?;
        let tiers = self
            .router
            .tier_health()
            .await
            .into_iter()
            .map(|tier| TierStatus {
                tier: tier.tier + 1,
                providers: tier
                    .providers
                    .into_iter()
                    .map(|(name, state)| ProviderStatus {
                        name,
                        circuit_state: state.as_str().to_string(),
                    })
                    .collect(),
            })
            .collect();

        Ok(StatusOverview {
            agents,
            pending_tasks,
            tiers,
        })
    }

    pub async fn recent_events(&self, limit: i64) -> ConductorResult<Vec<EventLogEntry>> {
        self.events.recent(limit).await
    }
}
