use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work waiting in the durable queue.
///
/// Tasks are created by external producers; the orchestration core only
/// claims, completes, fails or re-queues them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub prompt: String,
    /// Free-form tag influencing tier-1 provider selection.
    pub task_type: Option<String>,
    pub status: TaskStatus,
    pub assigned_agent: Option<String>,
    /// Lower rank = higher priority.
    pub priority_rank: i32,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "NOT_STARTED")]
    NotStarted,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "NOT_STARTED" => Ok(TaskStatus::NotStarted),
            "PROCESSING" => Ok(TaskStatus::Processing),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn entity_description(&self) -> String {
        format!("task '{}' (id: {}, rank: {})", self.title, self.id, self.priority_rank)
    }
}

/// Producer-side view of a task before it gets a sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub prompt: String,
    pub task_type: Option<String>,
    pub priority_rank: i32,
}

impl NewTask {
    pub fn new(title: impl Into<String>, prompt: impl Into<String>, priority_rank: i32) -> Self {
        Self {
            title: title.into(),
            prompt: prompt.into(),
            task_type: None,
            priority_rank,
        }
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }
}

/// Durable liveness and health record for one worker agent.
///
/// Rows are upserted on startup and on every heartbeat tick and are never
/// hard-deleted; offline agents stay visible with stale timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub state: AgentState,
    pub last_heartbeat: DateTime<Utc>,
    pub current_task: Option<i64>,
    pub circuit_state: CircuitState,
    pub consecutive_errors: i64,
    pub uptime_seconds: i64,
    pub memory_usage_mb: Option<f64>,
    pub last_latency_ms: Option<i64>,
    pub tasks_completed: i64,
    pub tasks_failed: i64,
    pub cost_spent: f64,
    pub registered_at: DateTime<Utc>,
}

impl AgentStatus {
    /// A stored `state` must not be trusted past the liveness timeout.
    pub fn is_heartbeat_expired(&self, timeout_seconds: i64) -> bool {
        (Utc::now() - self.last_heartbeat).num_seconds() > timeout_seconds
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentState {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "OFFLINE")]
    Offline,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Active => "ACTIVE",
            AgentState::Idle => "IDLE",
            AgentState::Error => "ERROR",
            AgentState::Offline => "OFFLINE",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for AgentState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for AgentState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "ACTIVE" => Ok(AgentState::Active),
            "IDLE" => Ok(AgentState::Idle),
            "ERROR" => Ok(AgentState::Error),
            "OFFLINE" => Ok(AgentState::Offline),
            _ => Err(format!("Invalid agent state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for AgentState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// Circuit breaker state, persisted per agent (and tracked in memory per
/// provider key by the routing layer).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CircuitState {
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "HALF_OPEN")]
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for CircuitState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for CircuitState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Invalid circuit state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for CircuitState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// Heartbeat payload upserted into the agent registry. Breaker fields and
/// outcome counters are managed through their own registry operations.
#[derive(Debug, Clone)]
pub struct AgentHeartbeat {
    pub name: String,
    pub state: AgentState,
    pub current_task: Option<i64>,
    pub uptime_seconds: i64,
    pub memory_usage_mb: Option<f64>,
}

impl AgentHeartbeat {
    pub fn new(name: impl Into<String>, state: AgentState) -> Self {
        Self {
            name: name.into(),
            state,
            current_task: None,
            uptime_seconds: 0,
            memory_usage_mb: None,
        }
    }

    pub fn with_current_task(mut self, task_id: Option<i64>) -> Self {
        self.current_task = task_id;
        self
    }

    pub fn with_uptime_seconds(mut self, uptime: i64) -> Self {
        self.uptime_seconds = uptime;
        self
    }
}

/// Per-task outcome folded into an agent's performance counters.
#[derive(Debug, Clone, Copy)]
pub struct TaskOutcome {
    pub success: bool,
    pub latency_ms: i64,
    pub cost: f64,
}

/// Read-only view served by the status query surface. `state` already has
/// the liveness override applied: an agent whose heartbeat is older than
/// the timeout is reported Offline regardless of its stored state.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub name: String,
    pub state: AgentState,
    pub last_heartbeat: DateTime<Utc>,
    pub current_task: Option<i64>,
    pub circuit_state: CircuitState,
    pub consecutive_errors: i64,
}

/// Append-only audit record of a state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: i64,
    pub agent: String,
    pub kind: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
