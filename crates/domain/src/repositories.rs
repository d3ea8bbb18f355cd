//! Repository abstractions for the durable stores the core coordinates
//! through. Implementations live in the infrastructure crate; the core
//! depends only on these operations, not on any schema engine.

use std::time::Duration;

use async_trait::async_trait;

use crate::entities::{
    AgentHeartbeat, AgentSnapshot, AgentStatus, CircuitState, EventLogEntry, NewTask, Task,
    TaskOutcome,
};
use crate::errors::ConductorResult;

/// Durable, priority-ordered work list with exclusive-claim semantics.
///
/// All mutations are row-scoped compare-and-set writes; no caller ever
/// takes a lock across the whole queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Insert a task on behalf of an external producer.
    async fn enqueue(&self, task: &NewTask) -> ConductorResult<Task>;

    async fn get(&self, id: i64) -> ConductorResult<Option<Task>>;

    /// Atomically claim the lowest-rank `NOT_STARTED` task (FIFO within a
    /// priority band). Returns `None` when the queue is empty or every
    /// candidate was claimed by a concurrent poller first; a lost race is
    /// not an error.
    async fn claim_next(&self, agent: &str) -> ConductorResult<Option<Task>>;

    /// Mark a claimed task completed. Rejected with
    /// [`ConductorError::StaleClaim`] when `agent` no longer owns the task.
    ///
    /// [`ConductorError::StaleClaim`]: crate::errors::ConductorError::StaleClaim
    async fn complete(&self, task_id: i64, agent: &str, result: &str) -> ConductorResult<()>;

    /// Mark a claimed task failed with a human-readable reason. Same
    /// ownership check as [`TaskQueue::complete`].
    async fn fail(&self, task_id: i64, agent: &str, reason: &str) -> ConductorResult<()>;

    /// Reset `PROCESSING` tasks whose owning agent missed its heartbeat
    /// deadline back to `NOT_STARTED` with no assigned agent. The sole
    /// recovery mechanism for crashed workers. Returns the requeued ids.
    async fn requeue_stale(&self, liveness_timeout: Duration) -> ConductorResult<Vec<i64>>;

    async fn pending_count(&self) -> ConductorResult<i64>;
}

/// Durable record of every worker's liveness, breaker state and counters.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Upsert liveness for an agent. Always called before claim attempts so
    /// liveness stays visible even when no work is available.
    async fn heartbeat(&self, beat: &AgentHeartbeat) -> ConductorResult<()>;

    /// Fold a task outcome into the agent's performance counters. Success
    /// resets `consecutive_errors`; failure increments it.
    async fn record_outcome(&self, name: &str, outcome: &TaskOutcome) -> ConductorResult<()>;

    /// Persist a circuit breaker transition.
    async fn record_breaker(
        &self,
        name: &str,
        state: CircuitState,
        consecutive_errors: i64,
    ) -> ConductorResult<()>;

    async fn get(&self, name: &str) -> ConductorResult<Option<AgentStatus>>;

    /// Read-only snapshot with the liveness override applied: agents whose
    /// heartbeat is older than `liveness_timeout` are reported Offline no
    /// matter what their stored state says.
    async fn snapshot(&self, liveness_timeout: Duration) -> ConductorResult<Vec<AgentSnapshot>>;
}

/// Append-only record of state transitions for observability and audit.
/// Never mutated or deleted by the core; retention is an external concern.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(
        &self,
        agent: &str,
        kind: &str,
        detail: serde_json::Value,
    ) -> ConductorResult<()>;

    async fn recent(&self, limit: i64) -> ConductorResult<Vec<EventLogEntry>>;
}
