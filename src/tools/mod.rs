//! 工具箱：注册表、执行器与内置工具（echo、create_poll、schedule_message、多供应商工具族）

pub mod echo;
pub mod executor;
pub mod poll;
pub mod provider;
pub mod registry;
pub mod schedule;
pub mod schema;

pub use echo::EchoTool;
pub use executor::{validate_required, ToolExecutor};
pub use poll::CreatePollTool;
pub use provider::{pinned_provider, HttpProviderBackend, ProviderBackend, ProviderTool};
pub use registry::{Tool, ToolContext, ToolDeclaration, ToolRegistry, ToolResult};
pub use schedule::{
    parse_send_time, IdempotencyCache, InMemoryTaskStore, ScheduleMessageTool, ScheduledTask,
    TaskStore,
};
pub use schema::plan_schema_json;
