//! 核心层：错误分类、会话监管、Agent 构建

pub mod builder;
pub mod error;
pub mod session_supervisor;

pub use builder::AgentBuilder;
pub use error::{ErrorKind, OrchestratorError};
pub use session_supervisor::SessionSupervisor;
