use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use conductor_domain::entities::{NewTask, Task, TaskStatus};
use conductor_domain::errors::{ConductorError, ConductorResult};
use conductor_domain::repositories::TaskQueue;

const TASK_COLUMNS: &str = "id, title, prompt, task_type, status, assigned_agent, priority_rank, result, error_message, created_at, updated_at";

/// How many lost claim races one `claim_next` call absorbs before giving
/// up and letting the caller's next poll retry.
const CLAIM_RACE_RETRIES: usize = 5;

pub struct SqliteTaskQueue {
    pool: SqlitePool,
}

impl SqliteTaskQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> ConductorResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            prompt: row.try_get("prompt")?,
            task_type: row.try_get("task_type")?,
            status: row.try_get("status")?,
            assigned_agent: row.try_get("assigned_agent")?,
            priority_rank: row.try_get("priority_rank")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Distinguish a missing task from a claim lost to another agent when
    /// a guarded update touched zero rows.
    async fn claim_conflict(&self, task_id: i64, agent: &str) -> ConductorError {
        match sqlx::query("SELECT 1 FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(_)) => ConductorError::StaleClaim {
                task_id,
                agent: agent.to_string(),
            },
            Ok(None) => ConductorError::TaskNotFound { id: task_id },
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn enqueue(&self, task: &NewTask) -> ConductorResult<Task> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tasks (title, prompt, task_type, status, priority_rank, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(&task.title)
        .bind(&task.prompt)
        .bind(&task.task_type)
        .bind(TaskStatus::NotStarted)
        .bind(task.priority_rank)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let task = Self::row_to_task(&row)?;
        debug!(task_id = task.id, rank = task.priority_rank, "task enqueued");
        Ok(task)
    }

    async fn get(&self, id: i64) -> ConductorResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn claim_next(&self, agent: &str) -> ConductorResult<Option<Task>> {
        for _ in 0..CLAIM_RACE_RETRIES {
            let candidate = sqlx::query(
                "SELECT id FROM tasks WHERE status = $1 ORDER BY priority_rank ASC, id ASC LIMIT 1",
            )
            .bind(TaskStatus::NotStarted)
            .fetch_optional(&self.pool)
            .await?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };
            let candidate_id: i64 = candidate.try_get("id")?;

            // The status guard makes the claim exclusive: of N concurrent
            // agents racing for this row, exactly one update matches.
            let row = sqlx::query(&format!(
                r#"
                UPDATE tasks
                SET status = $1, assigned_agent = $2, updated_at = $3
                WHERE id = $4 AND status = $5
                RETURNING {TASK_COLUMNS}
                "#,
            ))
            .bind(TaskStatus::Processing)
            .bind(agent)
            .bind(Utc::now())
            .bind(candidate_id)
            .bind(TaskStatus::NotStarted)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                let task = Self::row_to_task(&row)?;
                debug!(task_id = task.id, agent, "task claimed");
                return Ok(Some(task));
            }
            // Lost the race; pick the next candidate.
        }
        Ok(None)
    }

    async fn complete(&self, task_id: i64, agent: &str, result: &str) -> ConductorResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, result = $2, error_message = NULL, updated_at = $3
            WHERE id = $4 AND assigned_agent = $5 AND status = $6
            "#,
        )
        .bind(TaskStatus::Completed)
        .bind(result)
        .bind(Utc::now())
        .bind(task_id)
        .bind(agent)
        .bind(TaskStatus::Processing)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.claim_conflict(task_id, agent).await);
        }
        debug!(task_id, agent, "task completed");
        Ok(())
    }

    async fn fail(&self, task_id: i64, agent: &str, reason: &str) -> ConductorResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, error_message = $2, updated_at = $3
            WHERE id = $4 AND assigned_agent = $5 AND status = $6
            "#,
        )
        .bind(TaskStatus::Failed)
        .bind(reason)
        .bind(Utc::now())
        .bind(task_id)
        .bind(agent)
        .bind(TaskStatus::Processing)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.claim_conflict(task_id, agent).await);
        }
        debug!(task_id, agent, reason, "task failed");
        Ok(())
    }

    async fn requeue_stale(
        &self,
        liveness_timeout: std::time::Duration,
    ) -> ConductorResult<Vec<i64>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(liveness_timeout)
                .map_err(|e| ConductorError::Internal(format!("invalid liveness timeout: {e}")))?;

        // A task is orphaned when its agent never registered or has missed
        // its heartbeat deadline.
        let rows = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, assigned_agent = NULL, updated_at = $2
            WHERE status = $3
              AND (
                assigned_agent IS NULL
                OR assigned_agent NOT IN (SELECT name FROM agent_status)
                OR assigned_agent IN (
                    SELECT name FROM agent_status WHERE last_heartbeat < $4
                )
              )
            RETURNING id
            "#,
        )
        .bind(TaskStatus::NotStarted)
        .bind(Utc::now())
        .bind(TaskStatus::Processing)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("id")?);
        }
        Ok(ids)
    }

    async fn pending_count(&self) -> ConductorResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM tasks WHERE status = $1")
            .bind(TaskStatus::NotStarted)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use crate::database::test_pool;

    use super::*;

    async fn register_agent(pool: &SqlitePool, name: &str, heartbeat_age_seconds: i64) {
        let heartbeat = Utc::now() - chrono::Duration::seconds(heartbeat_age_seconds);
        sqlx::query(
            r#"
            INSERT INTO agent_status (name, state, last_heartbeat, registered_at)
            VALUES ($1, 'IDLE', $2, $3)
            "#,
        )
        .bind(name)
        .bind(heartbeat)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn enqueue_then_get_roundtrips() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool);

        let created = queue
            .enqueue(&NewTask::new("title", "do the thing", 10).with_task_type("code"))
            .await
            .unwrap();
        assert_eq!(created.status, TaskStatus::NotStarted);
        assert!(created.assigned_agent.is_none());

        let fetched = queue.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "title");
        assert_eq!(fetched.task_type.as_deref(), Some("code"));
        assert_eq!(fetched.priority_rank, 10);
    }

    #[tokio::test]
    async fn get_missing_task_returns_none() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool);
        assert!(queue.get(12345).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_follow_priority_then_insertion_order() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool);

        queue.enqueue(&NewTask::new("late", "p", 30)).await.unwrap();
        queue.enqueue(&NewTask::new("first", "p", 10)).await.unwrap();
        queue.enqueue(&NewTask::new("second", "p", 10)).await.unwrap();

        let a = queue.claim_next("agent-1").await.unwrap().unwrap();
        let b = queue.claim_next("agent-1").await.unwrap().unwrap();
        let c = queue.claim_next("agent-1").await.unwrap().unwrap();
        assert_eq!(a.title, "first");
        assert_eq!(b.title, "second");
        assert_eq!(c.title, "late");

        assert!(queue.claim_next("agent-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_assigns_exactly_one_agent() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool);

        queue.enqueue(&NewTask::new("only", "p", 10)).await.unwrap();

        let first = queue.claim_next("agent-1").await.unwrap();
        let second = queue.claim_next("agent-2").await.unwrap();

        let task = first.expect("first claim wins");
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.assigned_agent.as_deref(), Some("agent-1"));
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn concurrent_claimers_produce_exactly_one_winner() {
        // A single connection keeps every racer on the same in-memory
        // database; the spawned tasks still interleave between the
        // candidate select and the guarded update.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        crate::database::ensure_schema(&pool).await.unwrap();
        let queue = Arc::new(SqliteTaskQueue::new(pool));

        let task = queue
            .enqueue(&NewTask::new("contested", "p", 10))
            .await
            .unwrap();

        let mut claimers = Vec::new();
        for i in 0..8 {
            let queue = Arc::clone(&queue);
            claimers.push(tokio::spawn(async move {
                queue.claim_next(&format!("agent-{i}")).await.unwrap()
            }));
        }

        let mut winners = Vec::new();
        for claimer in claimers {
            if let Some(claimed) = claimer.await.unwrap() {
                winners.push(claimed);
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].id, task.id);

        let row = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Processing);
        assert_eq!(row.assigned_agent, winners[0].assigned_agent);
    }

    #[tokio::test]
    async fn complete_rejects_non_owner() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool);

        let task = queue.enqueue(&NewTask::new("t", "p", 10)).await.unwrap();
        queue.claim_next("agent-1").await.unwrap().unwrap();

        let err = queue.complete(task.id, "agent-2", "done").await.unwrap_err();
        assert!(err.is_claim_conflict());

        queue.complete(task.id, "agent-1", "done").await.unwrap();
        let task = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn complete_unknown_task_is_not_found() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool);

        let err = queue.complete(99, "agent-1", "done").await.unwrap_err();
        assert!(matches!(err, ConductorError::TaskNotFound { id: 99 }));
    }

    #[tokio::test]
    async fn fail_records_reason() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool);

        let task = queue.enqueue(&NewTask::new("t", "p", 10)).await.unwrap();
        queue.claim_next("agent-1").await.unwrap().unwrap();
        queue.fail(task.id, "agent-1", "all tiers down").await.unwrap();

        let task = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("all tiers down"));
    }

    #[tokio::test]
    async fn requeue_stale_targets_only_orphaned_tasks() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool.clone());

        register_agent(&pool, "live", 0).await;
        register_agent(&pool, "dead", 600).await;

        queue.enqueue(&NewTask::new("a", "p", 10)).await.unwrap();
        queue.enqueue(&NewTask::new("b", "p", 20)).await.unwrap();
        queue.enqueue(&NewTask::new("c", "p", 30)).await.unwrap();

        let live_task = queue.claim_next("live").await.unwrap().unwrap();
        let dead_task = queue.claim_next("dead").await.unwrap().unwrap();
        let ghost_task = queue.claim_next("never-registered").await.unwrap().unwrap();

        let requeued = queue.requeue_stale(Duration::from_secs(90)).await.unwrap();
        assert_eq!(requeued.len(), 2);
        assert!(requeued.contains(&dead_task.id));
        assert!(requeued.contains(&ghost_task.id));

        let live_task = queue.get(live_task.id).await.unwrap().unwrap();
        assert_eq!(live_task.status, TaskStatus::Processing);

        let dead_task = queue.get(dead_task.id).await.unwrap().unwrap();
        assert_eq!(dead_task.status, TaskStatus::NotStarted);
        assert!(dead_task.assigned_agent.is_none());
    }

    #[tokio::test]
    async fn requeued_task_can_be_claimed_again() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool);

        let task = queue.enqueue(&NewTask::new("t", "p", 10)).await.unwrap();
        queue.claim_next("vanished").await.unwrap().unwrap();
        queue.requeue_stale(Duration::from_secs(90)).await.unwrap();

        let reclaimed = queue.claim_next("agent-2").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, task.id);
        assert_eq!(reclaimed.assigned_agent.as_deref(), Some("agent-2"));

        // The original owner's completion must now be rejected.
        let err = queue.complete(task.id, "vanished", "late").await.unwrap_err();
        assert!(err.is_claim_conflict());
    }

    #[tokio::test]
    async fn pending_count_tracks_queue_depth() {
        let pool = test_pool().await;
        let queue = SqliteTaskQueue::new(pool);

        assert_eq!(queue.pending_count().await.unwrap(), 0);
        queue.enqueue(&NewTask::new("a", "p", 10)).await.unwrap();
        queue.enqueue(&NewTask::new("b", "p", 10)).await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 2);

        queue.claim_next("agent-1").await.unwrap().unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }
}
