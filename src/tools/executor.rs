//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时；execute 先按参数 schema 校验必填项，再在超时内调用工具，
//! 超时 / 异常 / panic 统一转为 OrchestratorError；每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::OrchestratorError;
use crate::tools::{Tool, ToolContext, ToolRegistry, ToolResult};

/// 工具执行器：校验参数、施加超时，并将结果映射为 OrchestratorError
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行指定工具。
    ///
    /// Ok(ToolResult) 可能仍是字段级失败（success=false），由调用方归一化；
    /// Err 覆盖未知工具、参数缺失、超时、工具返回 Err 与 panic。
    pub async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, OrchestratorError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| OrchestratorError::UnknownTool(tool_name.to_string()))?;
        validate_required(tool_name, &tool.parameters_schema(), &args)?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let call = AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind();
        let result = timeout(self.timeout, call).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(Ok(r))) if !r.is_failure() => (true, "ok"),
            Ok(Ok(Ok(_))) => (false, "failed"),
            Ok(Ok(Err(_))) => (false, "error"),
            Ok(Err(_)) => (false, "panic"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "conversation": ctx.conversation_id,
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(Ok(r))) => Ok(r),
            Ok(Ok(Err(e))) => Err(OrchestratorError::ToolExecutionFailed(e)),
            Ok(Err(panic)) => Err(OrchestratorError::ToolPanicked(panic_message(panic))),
            Err(_) => Err(OrchestratorError::ToolTimeout(tool_name.to_string())),
        }
    }
}

/// 按 schema 的 required 列表检查参数；空字符串与 null 视为缺失
pub fn validate_required(
    tool_name: &str,
    schema: &Value,
    args: &Value,
) -> Result<(), OrchestratorError> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    for key in required.iter().filter_map(|k| k.as_str()) {
        let present = match args.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(OrchestratorError::missing(tool_name, key));
        }
    }
    Ok(())
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
