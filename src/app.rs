use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use conductor_core::circuit_breaker::BreakerRegistry;
use conductor_core::config::AppConfig;
use conductor_domain::entities::{NewTask, Task};
use conductor_domain::repositories::{AgentRegistry, EventLog, TaskQueue};
use conductor_infrastructure::{
    connect, ensure_schema, SqliteAgentRegistry, SqliteEventLog, SqliteTaskQueue,
};
use conductor_routing::adapters::build_provider;
use conductor_routing::{Tier, TieredRouter};
use conductor_worker::{AgentWorker, RecoveryMonitor, StatusService};

/// Wires the repositories, the router and the worker fleet together.
pub struct Application {
    config: AppConfig,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<dyn AgentRegistry>,
    events: Arc<dyn EventLog>,
    router: Arc<TieredRouter>,
    breakers: Arc<BreakerRegistry>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = connect(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("failed to connect to {}", config.database.url))?;
        ensure_schema(&pool).await.context("schema setup failed")?;

        let mut tiers = Vec::with_capacity(config.router.tiers.len());
        for tier in &config.router.tiers {
            let mut providers = Vec::with_capacity(tier.providers.len());
            for spec in &tier.providers {
                providers.push(build_provider(spec)?);
            }
            tiers.push(Tier { providers });
        }

        let breakers = Arc::new(BreakerRegistry::new(config.breaker.to_breaker_config()));
        let router = Arc::new(TieredRouter::new(
            tiers,
            Arc::clone(&breakers),
            config.router.prioritize_cost,
            config.router.max_tokens,
            config.router.temperature,
        ));

        Ok(Self {
            queue: Arc::new(SqliteTaskQueue::new(pool.clone())),
            registry: Arc::new(SqliteAgentRegistry::new(pool.clone())),
            events: Arc::new(SqliteEventLog::new(pool)),
            router,
            breakers,
            config,
        })
    }

    /// Run the agent fleet and the recovery monitor until shutdown.
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "conductor".to_string());

        let mut handles = Vec::new();

        for index in 1..=self.config.worker.agents {
            let worker = AgentWorker::new(
                format!("{host}-agent-{index}"),
                Arc::clone(&self.queue),
                Arc::clone(&self.registry),
                Arc::clone(&self.events),
                Arc::clone(&self.router),
                &self.breakers,
                self.config.worker.poll_interval(),
                self.config.worker.heartbeat_interval(),
            )
            .await;
            let shutdown_rx = shutdown_rx.resubscribe();

            handles.push(tokio::spawn(async move {
                if let Err(e) = worker.run(shutdown_rx).await {
                    error!(agent = worker.name(), error = %e, "agent loop failed");
                }
            }));
        }

        let monitor = RecoveryMonitor::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.events),
            self.config.worker.recovery_interval(),
            self.config.worker.liveness_timeout(),
        );
        let monitor_rx = shutdown_rx.resubscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = monitor.run(monitor_rx).await {
                error!(error = %e, "recovery monitor failed");
            }
        }));

        info!(agents = self.config.worker.agents, "all components started");

        for handle in handles {
            let _ = handle.await;
        }

        info!("all components stopped");
        Ok(())
    }

    pub async fn enqueue(&self, task: NewTask) -> Result<Task> {
        let task = self.queue.enqueue(&task).await?;
        Ok(task)
    }

    pub fn status_service(&self) -> StatusService {
        StatusService::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.queue),
            Arc::clone(&self.events),
            Arc::clone(&self.router),
            self.config.worker.liveness_timeout(),
        )
    }
}
