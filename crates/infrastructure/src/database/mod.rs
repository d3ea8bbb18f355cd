//! Connection setup and schema management for the SQLite store.

pub mod sqlite_agent_registry;
pub mod sqlite_event_log;
pub mod sqlite_task_queue;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use conductor_domain::errors::ConductorResult;

pub use sqlite_agent_registry::SqliteAgentRegistry;
pub use sqlite_event_log::SqliteEventLog;
pub use sqlite_task_queue::SqliteTaskQueue;

pub async fn connect(url: &str, max_connections: u32) -> ConductorResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    info!(url, "connected to database");
    Ok(pool)
}

/// Create the tables and indexes if they are missing. Idempotent; run once
/// at startup before any repository is handed the pool.
pub async fn ensure_schema(pool: &SqlitePool) -> ConductorResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            prompt TEXT NOT NULL,
            task_type TEXT,
            status TEXT NOT NULL DEFAULT 'NOT_STARTED',
            assigned_agent TEXT,
            priority_rank INTEGER NOT NULL DEFAULT 100,
            result TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks (status, priority_rank, id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_status (
            name TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            last_heartbeat TEXT NOT NULL,
            current_task INTEGER,
            circuit_state TEXT NOT NULL DEFAULT 'CLOSED',
            consecutive_errors INTEGER NOT NULL DEFAULT 0,
            uptime_seconds INTEGER NOT NULL DEFAULT 0,
            memory_usage_mb REAL,
            last_latency_ms INTEGER,
            tasks_completed INTEGER NOT NULL DEFAULT 0,
            tasks_failed INTEGER NOT NULL DEFAULT 0,
            cost_spent REAL NOT NULL DEFAULT 0,
            registered_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent TEXT NOT NULL,
            kind TEXT NOT NULL,
            detail TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:")
        .await
        .expect("in-memory sqlite");
    ensure_schema(&pool).await.expect("schema");
    pool
}
