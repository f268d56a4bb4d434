//! Domain model module declarations.

pub mod agent;
pub mod cycle;
pub mod session;
pub mod task;

pub use agent::{Agent, AgentReport, AgentStatus, MergeStatus, Provider, ReportKind};
pub use cycle::OrchestratorCycle;
pub use session::{Session, SessionStatus};
pub use task::{Task, TaskStatus};
