use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use conductor_domain::entities::EventLogEntry;
use conductor_domain::errors::ConductorResult;
use conductor_domain::repositories::EventLog;

pub struct SqliteEventLog {
    pool: SqlitePool,
}

impl SqliteEventLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> ConductorResult<EventLogEntry> {
        let detail: String = row.try_get("detail")?;
        Ok(EventLogEntry {
            id: row.try_get("id")?,
            agent: row.try_get("agent")?,
            kind: row.try_get("kind")?,
            detail: serde_json::from_str(&detail)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(
        &self,
        agent: &str,
        kind: &str,
        detail: serde_json::Value,
    ) -> ConductorResult<()> {
        sqlx::query(
            "INSERT INTO event_log (agent, kind, detail, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(agent)
        .bind(kind)
        .bind(detail.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: i64) -> ConductorResult<Vec<EventLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, agent, kind, detail, created_at FROM event_log ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use conductor_domain::events;

    use crate::database::test_pool;

    use super::*;

    #[tokio::test]
    async fn append_then_recent_returns_newest_first() {
        let pool = test_pool().await;
        let log = SqliteEventLog::new(pool);

        log.append("a1", events::TASK_CLAIMED, json!({"task_id": 1}))
            .await
            .unwrap();
        log.append("a1", events::TASK_COMPLETED, json!({"task_id": 1, "latency_ms": 42}))
            .await
            .unwrap();
        log.append("a2", events::BREAKER_OPENED, json!({"consecutive_errors": 5}))
            .await
            .unwrap();

        let entries = log.recent(10).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, events::BREAKER_OPENED);
        assert_eq!(entries[0].agent, "a2");
        assert_eq!(entries[2].kind, events::TASK_CLAIMED);
        assert_eq!(entries[1].detail["latency_ms"], 42);
    }

    #[tokio::test]
    async fn recent_respects_limit() {
        let pool = test_pool().await;
        let log = SqliteEventLog::new(pool);

        for i in 0..5 {
            log.append("a1", events::TASK_CLAIMED, json!({"task_id": i}))
                .await
                .unwrap();
        }

        let entries = log.recent(2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].detail["task_id"], 4);
    }
}
