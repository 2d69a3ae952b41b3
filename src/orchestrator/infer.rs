//! 单步推理：步骤未指定工具时，由 LLM 根据指令选一个工具（或直接作答）
//!
//! LLM 输出为 JSON Tool Call（{"tool": "create_image", "args": {...}}）或纯文本回复；
//! parse_llm_output 从文本中提取 JSON 并解析。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::OrchestratorError;
use crate::llm::{LlmClient, Message};
use crate::tools::ToolDeclaration;

/// LLM 返回的 Tool Call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// 推理输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 直接回复用户
    Response(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 解析 LLM 输出：含有效 JSON 且 tool 非空则为 ToolCall，否则为 Response
///
/// 只有 ```json 代码块解析失败才报错；正文里恰好出现的花括号按纯文本回复处理。
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, OrchestratorError> {
    let trimmed = output.trim();
    let response = || PlannerOutput::Response(trimmed.to_string());

    let call = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let json_str = rest
            .find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim());
        serde_json::from_str::<ToolCall>(json_str).map_err(|e| {
            OrchestratorError::LlmError(format!("unparseable tool call: {e}: {json_str}"))
        })?
    } else {
        let span = match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => &trimmed[start..=end],
            _ => return Ok(response()),
        };
        match serde_json::from_str::<ToolCall>(span) {
            Ok(call) => call,
            Err(e) => {
                tracing::debug!(error = %e, "braces in plain answer, not a tool call");
                return Ok(response());
            }
        }
    };

    if call.tool.trim().is_empty() {
        Ok(response())
    } else {
        Ok(PlannerOutput::ToolCall(call))
    }
}

/// 工具推断器
#[async_trait]
pub trait ToolInferrer: Send + Sync {
    async fn infer(
        &self,
        instruction: &str,
        tools: &[ToolDeclaration],
    ) -> Result<PlannerOutput, OrchestratorError>;
}

const INFER_PROMPT: &str = "You pick exactly one tool for the user's task.\n\
Available tools (JSON schema):\n{tools}\n\n\
Reply with a single JSON object {\"tool\": \"<name>\", \"args\": {...}} using only the tools above.\n\
If no tool fits, answer the task directly in plain text.";

/// 基于 LlmClient 的推断器
pub struct LlmToolInferrer {
    llm: Arc<dyn LlmClient>,
}

impl LlmToolInferrer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn system_prompt(tools: &[ToolDeclaration]) -> String {
        let schema = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
        INFER_PROMPT.replace("{tools}", &schema)
    }
}

#[async_trait]
impl ToolInferrer for LlmToolInferrer {
    async fn infer(
        &self,
        instruction: &str,
        tools: &[ToolDeclaration],
    ) -> Result<PlannerOutput, OrchestratorError> {
        let messages = vec![
            Message::system(Self::system_prompt(tools)),
            Message::user(instruction),
        ];
        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(OrchestratorError::LlmError)?;
        tracing::debug!(output = %raw, "tool inference");
        parse_llm_output(&raw)
    }
}
