//! Event kinds written by the orchestration core. Free-form tags by
//! contract, but the core sticks to this fixed vocabulary so the log is
//! greppable.

pub const AGENT_STARTED: &str = "agent_started";
pub const AGENT_STOPPED: &str = "agent_stopped";
pub const TASK_CLAIMED: &str = "task_claimed";
pub const TASK_COMPLETED: &str = "task_completed";
pub const TASK_FAILED: &str = "task_failed";
pub const TASK_REQUEUED: &str = "task_requeued";
pub const ROUTING_ATTEMPT: &str = "routing_attempt";
pub const BREAKER_OPENED: &str = "breaker_opened";
pub const BREAKER_HALF_OPEN: &str = "breaker_half_open";
pub const BREAKER_CLOSED: &str = "breaker_closed";
