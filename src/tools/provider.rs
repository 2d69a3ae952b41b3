//! 多供应商工具族（create_image / create_video / edit_image ...）
//!
//! 每个族对外是一个工具，内部持有若干 ProviderBackend，按配置的规范顺序交给
//! ProviderFallbackPolicy 依次尝试。参数：
//! - `provider` / `service`：显式指定供应商，只尝试它一个
//! - `avoid_providers`：本次排除的供应商（字符串或数组）
//! - 主要输入的参数名由族配置决定（默认 `prompt`，语音族为 `text`）

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::FamilySection;
use crate::core::OrchestratorError;
use crate::orchestrator::ProviderFallbackPolicy;
use crate::tools::{Tool, ToolContext, ToolResult};

/// 单个供应商后端
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// 用指定供应商执行一次；Err 与 success=false 在回退策略中同等处理
    async fn call(&self, provider: &str, args: &Value, ctx: &ToolContext)
        -> Result<ToolResult, String>;
}

/// 工具族：名称、描述与规范顺序来自配置
pub struct ProviderTool {
    name: String,
    description: String,
    prompt_key: String,
    policy: ProviderFallbackPolicy,
    backends: HashMap<String, Arc<dyn ProviderBackend>>,
}

impl ProviderTool {
    pub fn new(family: &FamilySection) -> Self {
        Self {
            name: family.tool.clone(),
            description: family
                .description
                .clone()
                .unwrap_or_else(|| format!("Run {} through its configured providers", family.tool)),
            prompt_key: family.prompt_key.clone(),
            policy: ProviderFallbackPolicy::from_family(family),
            backends: HashMap::new(),
        }
    }

    /// 限制回退链中每个供应商单次尝试的时长
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.policy = self.policy.with_attempt_timeout(timeout);
        self
    }

    /// 注册某个供应商的后端（名称不区分大小写）
    pub fn with_backend(mut self, provider: &str, backend: Arc<dyn ProviderBackend>) -> Self {
        self.backends.insert(provider.to_lowercase(), backend);
        self
    }

    pub fn policy(&self) -> &ProviderFallbackPolicy {
        &self.policy
    }

    pub fn providers(&self) -> &[String] {
        self.policy.canonical_order()
    }
}

/// 从参数读取显式指定的供应商
pub fn pinned_provider(args: &Map<String, Value>) -> Option<&str> {
    ["provider", "service"]
        .iter()
        .find_map(|k| args.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

fn avoid_list(args: &Value) -> Vec<String> {
    match args.get("avoid_providers") {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Tool for ProviderTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        let mut schema = serde_json::json!({
            "type": "object",
            "properties": {
                "provider": {
                    "type": "string",
                    "enum": self.policy.canonical_order(),
                    "description": "Pin one provider; no fallback when set"
                },
                "avoid_providers": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Providers to skip this time"
                }
            },
            "required": [self.prompt_key]
        });
        schema["properties"][self.prompt_key.as_str()] =
            serde_json::json!({ "type": "string", "description": "What to generate" });
        schema
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, String> {
        let pinned = args.as_object().and_then(pinned_provider).map(String::from);
        let avoid = avoid_list(&args);
        let args = &args;
        let outcome = self
            .policy
            .try_with_fallback(&self.name, ctx, &avoid, pinned.as_deref(), |provider| {
                let backend = self.backends.get(&provider.to_lowercase()).cloned();
                async move {
                    match backend {
                        Some(b) => b.call(&provider, args, ctx).await,
                        None => Err(format!("provider {provider} is not configured")),
                    }
                }
            })
            .await;
        if !outcome.result.is_failure() {
            return Ok(outcome.result);
        }
        // 失败时带上供应商标签：单次尝试给出该供应商的错误，多次给出完整记录
        let error = match outcome.ledger.entries() {
            [] => return Ok(outcome.result),
            [only] => OrchestratorError::Provider {
                provider: only.provider.clone(),
                message: only.message.clone(),
            },
            _ => OrchestratorError::AllProvidersFailed(outcome.ledger.render()),
        };
        Ok(ToolResult::failure(error.to_string()))
    }
}

/// HTTP 后端：把参数以 JSON POST 到配置的端点，响应按 ToolResult 解码
pub struct HttpProviderBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProviderBackend {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ProviderBackend for HttpProviderBackend {
    async fn call(
        &self,
        provider: &str,
        args: &Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, String> {
        let body = serde_json::json!({
            "provider": provider,
            "conversationId": ctx.conversation_id,
            "args": args,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(format!("HTTP {status}: {snippet}"));
        }
        resp.json::<ToolResult>()
            .await
            .map_err(|e| format!("invalid response: {e}"))
    }
}
