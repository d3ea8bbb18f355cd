//! Domain layer: entities, error taxonomy and repository abstractions
//! shared by every other crate in the workspace.

pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;

pub use entities::*;
pub use errors::{ConductorError, ConductorResult};
pub use repositories::{AgentRegistry, EventLog, TaskQueue};
