//! Bee Conductor - 会话自动化 Agent 的工具调用编排与回退引擎
//!
//! 模块划分：
//! - **agent**: 会话 Agent 门面（run_plan / run_tool / retry）
//! - **channel**: 消息通道（控制台、录制、WhatsApp）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、会话监管、Agent 构建
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化
//! - **orchestrator**: 计划执行、单步执行、上下文、预告、结果发送、供应商回退
//! - **retry**: 最近命令的记录、持久化与重放
//! - **tools**: 工具注册表、执行器与内置工具

pub mod agent;
pub mod channel;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod orchestrator;
pub mod retry;
pub mod tools;

pub use agent::{create_agent, ConversationAgent};
pub use core::{AgentBuilder, OrchestratorError};
