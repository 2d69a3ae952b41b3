//! Echo 工具（测试与演示用）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Echo 工具：回显 text；未给出时回显 instruction（即带上下文的当前任务）
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text (for testing). Args: {\"text\": \"message\"}"
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
        let text = args
            .get("text")
            .or_else(|| args.get("instruction"))
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(ToolResult::ok_text(text))
    }
}
