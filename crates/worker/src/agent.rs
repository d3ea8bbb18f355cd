//! One autonomous consumer loop: heartbeat, claim, route, settle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use rand::Rng;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

use conductor_core::circuit_breaker::{BreakerRegistry, CircuitBreaker};
use conductor_domain::entities::{AgentHeartbeat, AgentState, CircuitState, Task, TaskOutcome};
use conductor_domain::errors::{ConductorError, ConductorResult};
use conductor_domain::events;
use conductor_domain::repositories::{AgentRegistry, EventLog, TaskQueue};
use conductor_routing::router::AttemptOutcome;
use conductor_routing::TieredRouter;

/// Heartbeat payload fields that change as the loop moves between idle
/// and working. Shared with the heartbeat ticker task.
#[derive(Debug, Clone, Copy)]
struct LoopState {
    agent_state: AgentState,
    current_task: Option<i64>,
}

pub struct AgentWorker {
    name: String,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<dyn AgentRegistry>,
    events: Arc<dyn EventLog>,
    router: Arc<TieredRouter>,
    breaker: Arc<CircuitBreaker>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    started_at: Instant,
    state: Arc<RwLock<LoopState>>,
}

impl AgentWorker {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        name: impl Into<String>,
        queue: Arc<dyn TaskQueue>,
        registry: Arc<dyn AgentRegistry>,
        events: Arc<dyn EventLog>,
        router: Arc<TieredRouter>,
        breakers: &BreakerRegistry,
        poll_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        let name = name.into();
        let breaker = breakers.get_or_create(&format!("agent:{name}")).await;
        Self {
            name,
            queue,
            registry,
            events,
            router,
            breaker,
            poll_interval,
            heartbeat_interval,
            started_at: Instant::now(),
            state: Arc::new(RwLock::new(LoopState {
                agent_state: AgentState::Idle,
                current_task: None,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until the shutdown signal arrives. Heartbeats tick on their own
    /// task so a long provider call cannot starve liveness reporting.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> ConductorResult<()> {
        self.send_heartbeat().await?;
        self.events
            .append(&self.name, events::AGENT_STARTED, json!({}))
            .await?;
        info!(agent = %self.name, "agent started");

        let heartbeat_handle = self.spawn_heartbeat_ticker(shutdown.resubscribe());

        // Staggered polling keeps a fleet of agents from hitting the queue
        // in lockstep.
        let jitter_ms = rand::rng().random_range(0..=self.poll_interval.as_millis() as u64 / 4);
        let mut poll = tokio::time::interval(self.poll_interval + Duration::from_millis(jitter_ms));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(agent = %self.name, error = %e, "poll iteration failed");
                    }
                }
            }
        }

        heartbeat_handle.abort();
        self.set_state(AgentState::Offline, None).await;
        self.send_heartbeat().await?;
        self.events
            .append(&self.name, events::AGENT_STOPPED, json!({}))
            .await?;
        info!(agent = %self.name, "agent stopped");
        Ok(())
    }

    fn spawn_heartbeat_ticker(
        &self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.state);
        let name = self.name.clone();
        let started_at = self.started_at;
        let interval = self.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let snapshot = *state.read().await;
                        let beat = AgentHeartbeat::new(&name, snapshot.agent_state)
                            .with_current_task(snapshot.current_task)
                            .with_uptime_seconds(started_at.elapsed().as_secs() as i64);
                        if let Err(e) = registry.heartbeat(&beat).await {
                            warn!(agent = %name, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        })
    }

    async fn set_state(&self, agent_state: AgentState, current_task: Option<i64>) {
        let mut state = self.state.write().await;
        state.agent_state = agent_state;
        state.current_task = current_task;
    }

    async fn send_heartbeat(&self) -> ConductorResult<()> {
        let snapshot = *self.state.read().await;
        let beat = AgentHeartbeat::new(&self.name, snapshot.agent_state)
            .with_current_task(snapshot.current_task)
            .with_uptime_seconds(self.started_at.elapsed().as_secs() as i64);
        self.registry.heartbeat(&beat).await
    }

    /// One scheduling step: refresh liveness, claim at most one task and
    /// settle it. Public so the binary's supervisor and the integration
    /// tests can drive the loop directly.
    pub async fn poll_once(&self) -> ConductorResult<()> {
        // Liveness must be refreshed even when no work is claimable.
        self.send_heartbeat().await?;

        // While this agent's breaker is open, claiming would only turn
        // claimed tasks into failures. Leave them for healthier agents and
        // report the error state until the breaker closes again.
        if !self.breaker.call_permitted().await {
            counter!("agent_polls_skipped_total", "agent" => self.name.clone()).increment(1);
            self.set_state(AgentState::Error, None).await;
            self.send_heartbeat().await?;
            return Ok(());
        }

        let Some(task) = self.queue.claim_next(&self.name).await? else {
            return Ok(());
        };

        self.set_state(AgentState::Active, Some(task.id)).await;
        self.send_heartbeat().await?;
        self.events
            .append(
                &self.name,
                events::TASK_CLAIMED,
                json!({"task_id": task.id, "title": task.title}),
            )
            .await?;

        let result = self.execute(&task).await;

        // A task that tripped the breaker leaves the agent in the error
        // state rather than back at idle.
        let after = match self.breaker.state().await {
            CircuitState::Closed => AgentState::Idle,
            CircuitState::Open | CircuitState::HalfOpen => AgentState::Error,
        };
        self.set_state(after, None).await;
        self.send_heartbeat().await?;
        result
    }

    /// Route the task through the provider tiers under this agent's
    /// breaker and settle the queue row and the registry counters.
    async fn execute(&self, task: &Task) -> ConductorResult<()> {
        let router = Arc::clone(&self.router);
        let prompt = task.prompt.clone();
        let task_type = task.task_type.clone();

        let report = self
            .breaker
            .execute(|| async move {
                router
                    .route(&prompt, task_type.as_deref())
                    .await
                    .map_err(ConductorError::from)
            })
            .await;

        self.persist_breaker_transitions(&report.transitions, report.state, report.consecutive_failures)
            .await?;

        match report.outcome {
            Ok(routed) => {
                let attempts: Vec<_> = routed
                    .attempts
                    .iter()
                    .map(|a| {
                        json!({
                            "tier": a.tier + 1,
                            "provider": a.provider,
                            "outcome": attempt_label(&a.outcome),
                        })
                    })
                    .collect();
                self.events
                    .append(
                        &self.name,
                        events::ROUTING_ATTEMPT,
                        json!({
                            "task_id": task.id,
                            "provider": routed.provider,
                            "tier": routed.tier + 1,
                            "attempts": attempts,
                        }),
                    )
                    .await?;

                match self.queue.complete(task.id, &self.name, &routed.text).await {
                    Ok(()) => {}
                    Err(e) if e.is_claim_conflict() => {
                        // The recovery monitor requeued this task while we
                        // were working; the new owner's result wins.
                        warn!(agent = %self.name, task_id = task.id, "lost claim before completion");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }

                self.registry
                    .record_outcome(
                        &self.name,
                        &TaskOutcome {
                            success: true,
                            latency_ms: routed.elapsed_ms as i64,
                            cost: routed.cost_units,
                        },
                    )
                    .await?;
                self.events
                    .append(
                        &self.name,
                        events::TASK_COMPLETED,
                        json!({
                            "task_id": task.id,
                            "provider": routed.provider,
                            "latency_ms": routed.elapsed_ms,
                            "cost": routed.cost_units,
                        }),
                    )
                    .await?;
                counter!("agent_tasks_total", "agent" => self.name.clone(), "outcome" => "completed").increment(1);
                info!(agent = %self.name, task_id = task.id, provider = %routed.provider, "task completed");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                match self.queue.fail(task.id, &self.name, &reason).await {
                    Ok(()) => {}
                    Err(conflict) if conflict.is_claim_conflict() => {
                        warn!(agent = %self.name, task_id = task.id, "lost claim before failing");
                        return Ok(());
                    }
                    Err(other) => return Err(other),
                }

                self.registry
                    .record_outcome(
                        &self.name,
                        &TaskOutcome {
                            success: false,
                            latency_ms: 0,
                            cost: 0.0,
                        },
                    )
                    .await?;
                self.events
                    .append(
                        &self.name,
                        events::TASK_FAILED,
                        json!({"task_id": task.id, "reason": reason}),
                    )
                    .await?;
                counter!("agent_tasks_total", "agent" => self.name.clone(), "outcome" => "failed").increment(1);
                warn!(agent = %self.name, task_id = task.id, reason, "task failed");
                Ok(())
            }
        }
    }

    async fn persist_breaker_transitions(
        &self,
        transitions: &[conductor_core::circuit_breaker::BreakerTransition],
        state: CircuitState,
        consecutive_failures: u32,
    ) -> ConductorResult<()> {
        if transitions.is_empty() {
            return Ok(());
        }

        self.registry
            .record_breaker(&self.name, state, i64::from(consecutive_failures))
            .await?;

        for transition in transitions {
            let kind = match transition.to {
                CircuitState::Open => events::BREAKER_OPENED,
                CircuitState::HalfOpen => events::BREAKER_HALF_OPEN,
                CircuitState::Closed => events::BREAKER_CLOSED,
            };
            self.events
                .append(
                    &self.name,
                    kind,
                    json!({
                        "from": transition.from.as_str(),
                        "to": transition.to.as_str(),
                        "consecutive_failures": consecutive_failures,
                    }),
                )
                .await?;
            info!(
                agent = %self.name,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                "agent breaker transition"
            );
        }
        Ok(())
    }
}

fn attempt_label(outcome: &AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::Success => "success",
        AttemptOutcome::SkippedOpen => "skipped",
        AttemptOutcome::Failed(_) => "failed",
    }
}
