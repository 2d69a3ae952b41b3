//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时做必填参数校验、加超时并统一转 OrchestratorError。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::orchestrator::{AckEmitter, PollData};

/// 工具原始输出：success / error 与可同时存在的多种产物
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    /// 非文本的结构化输出（部分工具用 data 代替 text）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn ok_text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_image(mut self, url: impl Into<String>, caption: Option<String>) -> Self {
        self.image_url = Some(url.into());
        self.image_caption = caption;
        self
    }

    pub fn with_video(mut self, url: impl Into<String>) -> Self {
        self.video_url = Some(url.into());
        self
    }

    pub fn with_audio(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }

    pub fn with_poll(mut self, poll: PollData) -> Self {
        self.poll = Some(poll);
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64, info: Option<String>) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self.location_info = info;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider_used = Some(provider.into());
        self
    }

    /// 字段级失败：success=false 或带 error
    pub fn is_failure(&self) -> bool {
        !self.success || self.error.is_some()
    }
}

/// 单次工具调用的上下文：所属会话、被引用消息、原始请求，以及回退时发预告用的 AckEmitter
#[derive(Clone, Default)]
pub struct ToolContext {
    pub conversation_id: String,
    pub quoted_message_id: Option<String>,
    pub original_request: Option<String>,
    pub ack: Option<Arc<AckEmitter>>,
}

impl ToolContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Default::default()
        }
    }

    pub fn with_quoted(mut self, message_id: Option<String>) -> Self {
        self.quoted_message_id = message_id;
        self
    }

    pub fn with_request(mut self, request: Option<String>) -> Self {
        self.original_request = request;
        self
    }

    pub fn with_ack(mut self, ack: Arc<AckEmitter>) -> Self {
        self.ack = Some(ack);
        self
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
///
/// 返回 Err 表示执行异常；Ok 但 success=false 表示字段级失败，两者在回退策略里同等对待。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（Plan 中 step.tool 的取值）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；`required` 列表在执行前校验
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, String>;
}

/// 工具声明（供推理 prompt 使用）
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按名称排序的工具声明列表
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<ToolDeclaration> = self
            .tools
            .iter()
            .map(|(name, tool)| ToolDeclaration {
                name: name.clone(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.declarations()).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[test]
    fn test_tool_result_failure_detection() {
        assert!(ToolResult::failure("boom").is_failure());
        assert!(!ToolResult::ok_text("fine").is_failure());
        let odd = ToolResult {
            success: true,
            error: Some("partial".into()),
            ..Default::default()
        };
        assert!(odd.is_failure());
    }

    #[test]
    fn test_tool_result_deserializes_partial_json() {
        let r: ToolResult =
            serde_json::from_str(r#"{"success": true, "imageUrl": "https://x/y.png"}"#).unwrap();
        assert!(r.success);
        assert_eq!(r.image_url.as_deref(), Some("https://x/y.png"));
        assert!(r.text.is_none());
    }

    #[test]
    fn test_registry_declarations_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg.register(crate::tools::CreatePollTool);
        let names: Vec<String> = reg.declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["create_poll", "echo"]);
        assert!(reg.contains("echo"));
        assert!(reg.get("nope").is_none());
    }
}
