use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use conductor_domain::entities::{
    AgentHeartbeat, AgentSnapshot, AgentState, AgentStatus, CircuitState, TaskOutcome,
};
use conductor_domain::errors::{ConductorError, ConductorResult};
use conductor_domain::repositories::AgentRegistry;

const AGENT_COLUMNS: &str = "name, state, last_heartbeat, current_task, circuit_state, consecutive_errors, uptime_seconds, memory_usage_mb, last_latency_ms, tasks_completed, tasks_failed, cost_spent, registered_at";

pub struct SqliteAgentRegistry {
    pool: SqlitePool,
}

impl SqliteAgentRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_status(row: &sqlx::sqlite::SqliteRow) -> ConductorResult<AgentStatus> {
        Ok(AgentStatus {
            name: row.try_get("name")?,
            state: row.try_get("state")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            current_task: row.try_get("current_task")?,
            circuit_state: row.try_get("circuit_state")?,
            consecutive_errors: row.try_get("consecutive_errors")?,
            uptime_seconds: row.try_get("uptime_seconds")?,
            memory_usage_mb: row.try_get("memory_usage_mb")?,
            last_latency_ms: row.try_get("last_latency_ms")?,
            tasks_completed: row.try_get("tasks_completed")?,
            tasks_failed: row.try_get("tasks_failed")?,
            cost_spent: row.try_get("cost_spent")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

#[async_trait]
impl AgentRegistry for SqliteAgentRegistry {
    async fn heartbeat(&self, beat: &AgentHeartbeat) -> ConductorResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO agent_status (name, state, last_heartbeat, current_task, uptime_seconds, memory_usage_mb, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT(name) DO UPDATE SET
                state = excluded.state,
                last_heartbeat = excluded.last_heartbeat,
                current_task = excluded.current_task,
                uptime_seconds = excluded.uptime_seconds,
                memory_usage_mb = excluded.memory_usage_mb
            "#,
        )
        .bind(&beat.name)
        .bind(beat.state)
        .bind(now)
        .bind(beat.current_task)
        .bind(beat.uptime_seconds)
        .bind(beat.memory_usage_mb)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(agent = %beat.name, state = beat.state.as_str(), "heartbeat recorded");
        Ok(())
    }

    async fn record_outcome(&self, name: &str, outcome: &TaskOutcome) -> ConductorResult<()> {
        let updated = if outcome.success {
            sqlx::query(
                r#"
                UPDATE agent_status
                SET tasks_completed = tasks_completed + 1,
                    consecutive_errors = 0,
                    last_latency_ms = $1,
                    cost_spent = cost_spent + $2
                WHERE name = $3
                "#,
            )
            .bind(outcome.latency_ms)
            .bind(outcome.cost)
            .bind(name)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE agent_status
                SET tasks_failed = tasks_failed + 1,
                    consecutive_errors = consecutive_errors + 1,
                    last_latency_ms = $1,
                    cost_spent = cost_spent + $2
                WHERE name = $3
                "#,
            )
            .bind(outcome.latency_ms)
            .bind(outcome.cost)
            .bind(name)
            .execute(&self.pool)
            .await?
        };

        if updated.rows_affected() == 0 {
            return Err(ConductorError::AgentNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn record_breaker(
        &self,
        name: &str,
        state: CircuitState,
        consecutive_errors: i64,
    ) -> ConductorResult<()> {
        let updated = sqlx::query(
            "UPDATE agent_status SET circuit_state = $1, consecutive_errors = $2 WHERE name = $3",
        )
        .bind(state)
        .bind(consecutive_errors)
        .bind(name)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(ConductorError::AgentNotFound {
                name: name.to_string(),
            });
        }
        debug!(agent = name, state = state.as_str(), "breaker state recorded");
        Ok(())
    }

    async fn get(&self, name: &str) -> ConductorResult<Option<AgentStatus>> {
        let row = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agent_status WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_status).transpose()
    }

    async fn snapshot(
        &self,
        liveness_timeout: std::time::Duration,
    ) -> ConductorResult<Vec<AgentSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agent_status ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let timeout_seconds = liveness_timeout.as_secs() as i64;
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            let status = Self::row_to_status(row)?;
            // Stored state is only trusted while the heartbeat is fresh.
            let state = if status.is_heartbeat_expired(timeout_seconds) {
                AgentState::Offline
            } else {
                status.state
            };
            snapshots.push(AgentSnapshot {
                name: status.name,
                state,
                last_heartbeat: status.last_heartbeat,
                current_task: status.current_task,
                circuit_state: status.circuit_state,
                consecutive_errors: status.consecutive_errors,
            });
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::database::test_pool;

    use super::*;

    fn beat(name: &str, state: AgentState) -> AgentHeartbeat {
        AgentHeartbeat::new(name, state)
    }

    #[tokio::test]
    async fn heartbeat_upserts_and_refreshes() {
        let pool = test_pool().await;
        let registry = SqliteAgentRegistry::new(pool);

        registry.heartbeat(&beat("a1", AgentState::Idle)).await.unwrap();
        let first = registry.get("a1").await.unwrap().unwrap();
        assert_eq!(first.state, AgentState::Idle);
        assert_eq!(first.circuit_state, CircuitState::Closed);

        registry
            .heartbeat(
                &beat("a1", AgentState::Active)
                    .with_current_task(Some(7))
                    .with_uptime_seconds(120),
            )
            .await
            .unwrap();
        let second = registry.get("a1").await.unwrap().unwrap();
        assert_eq!(second.state, AgentState::Active);
        assert_eq!(second.current_task, Some(7));
        assert_eq!(second.uptime_seconds, 120);
        // Registration time survives the upsert.
        assert_eq!(second.registered_at, first.registered_at);
        assert!(second.last_heartbeat >= first.last_heartbeat);
    }

    #[tokio::test]
    async fn outcomes_fold_into_counters() {
        let pool = test_pool().await;
        let registry = SqliteAgentRegistry::new(pool);
        registry.heartbeat(&beat("a1", AgentState::Active)).await.unwrap();

        registry
            .record_outcome(
                "a1",
                &TaskOutcome {
                    success: false,
                    latency_ms: 900,
                    cost: 0.0,
                },
            )
            .await
            .unwrap();
        registry
            .record_outcome(
                "a1",
                &TaskOutcome {
                    success: true,
                    latency_ms: 450,
                    cost: 0.021,
                },
            )
            .await
            .unwrap();

        let status = registry.get("a1").await.unwrap().unwrap();
        assert_eq!(status.tasks_completed, 1);
        assert_eq!(status.tasks_failed, 1);
        // A success resets the consecutive error streak.
        assert_eq!(status.consecutive_errors, 0);
        assert_eq!(status.last_latency_ms, Some(450));
        assert!((status.cost_spent - 0.021).abs() < 1e-9);
    }

    #[tokio::test]
    async fn outcome_for_unknown_agent_is_an_error() {
        let pool = test_pool().await;
        let registry = SqliteAgentRegistry::new(pool);

        let err = registry
            .record_outcome(
                "ghost",
                &TaskOutcome {
                    success: true,
                    latency_ms: 1,
                    cost: 0.0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::AgentNotFound { .. }));
    }

    #[tokio::test]
    async fn breaker_state_is_persisted() {
        let pool = test_pool().await;
        let registry = SqliteAgentRegistry::new(pool);
        registry.heartbeat(&beat("a1", AgentState::Active)).await.unwrap();

        registry
            .record_breaker("a1", CircuitState::Open, 5)
            .await
            .unwrap();

        let status = registry.get("a1").await.unwrap().unwrap();
        assert_eq!(status.circuit_state, CircuitState::Open);
        assert_eq!(status.consecutive_errors, 5);
    }

    #[tokio::test]
    async fn snapshot_reports_stale_agents_offline() {
        let pool = test_pool().await;
        let registry = SqliteAgentRegistry::new(pool.clone());

        registry.heartbeat(&beat("fresh", AgentState::Active)).await.unwrap();
        registry.heartbeat(&beat("stale", AgentState::Active)).await.unwrap();

        let old = Utc::now() - chrono::Duration::seconds(600);
        sqlx::query("UPDATE agent_status SET last_heartbeat = $1 WHERE name = 'stale'")
            .bind(old)
            .execute(&pool)
            .await
            .unwrap();

        let snapshots = registry.snapshot(Duration::from_secs(90)).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        let fresh = snapshots.iter().find(|s| s.name == "fresh").unwrap();
        let stale = snapshots.iter().find(|s| s.name == "stale").unwrap();
        assert_eq!(fresh.state, AgentState::Active);
        assert_eq!(stale.state, AgentState::Offline);
    }
}
