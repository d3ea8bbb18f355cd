//! The agent consumer loop, the stale-task recovery monitor and the
//! read-only status surface.

pub mod agent;
pub mod recovery;
pub mod status;

pub use agent::AgentWorker;
pub use recovery::RecoveryMonitor;
pub use status::{StatusOverview, StatusService};
