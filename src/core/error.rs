//! 编排错误类型与错误分类
//!
//! 三类错误：Validation（参数缺失，立即报告、不回退）、Provider（后端失败，可跨供应商回退）、
//! Orchestration（意外错误、存储损坏、重放过滤为空等），均在步骤边界转为用户可见消息。

use thiserror::Error;

/// 错误大类（用于决定是否允许供应商回退以及日志分级）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Provider,
    Orchestration,
}

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("Missing required argument '{arg}' for {tool}")]
    MissingArgument { tool: String, arg: String },

    #[error("Invalid argument for {tool}: {message}")]
    InvalidArgument { tool: String, message: String },

    #[error("[{provider}] {message}")]
    Provider { provider: String, message: String },

    /// 全部供应商失败，内容为逐行的尝试记录
    #[error("All providers failed:\n{0}")]
    AllProvidersFailed(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool panicked: {0}")]
    ToolPanicked(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("No matching step to retry")]
    NoMatchingStep,

    #[error("Nothing to retry: no previous command in this conversation")]
    NoLastCommand,

    #[error("Malformed stored command: {0}")]
    MalformedCommand(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingArgument { .. } | Self::InvalidArgument { .. } => ErrorKind::Validation,
            Self::Provider { .. } | Self::AllProvidersFailed(_) | Self::ToolExecutionFailed(_) => {
                ErrorKind::Provider
            }
            _ => ErrorKind::Orchestration,
        }
    }

    pub fn missing(tool: impl Into<String>, arg: impl Into<String>) -> Self {
        Self::MissingArgument {
            tool: tool.into(),
            arg: arg.into(),
        }
    }
}

impl From<rusqlite::Error> for OrchestratorError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedCommand(e.to_string())
    }
}
