//! RetryLedger：记录并重放每个会话的最近一次命令
//!
//! 重放只负责「重建命令」：单步命令得到 (工具, 参数)，多步命令得到筛选并重新编号后的新 Plan，
//! 由 PlanExecutor 按原路径执行。原始 Plan 永不修改。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::{FamilySection, ProvidersSection};
use crate::core::OrchestratorError;
use crate::orchestrator::Plan;
use crate::retry::{CommandStore, LastCommand};

/// 一次重试请求
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayRequest {
    /// 追加到 prompt 与 action 末尾的修改说明
    pub modifications: Option<String>,
    pub provider_override: Option<String>,
    pub step_numbers: Vec<usize>,
    pub step_tools: Vec<String>,
}

impl ReplayRequest {
    pub fn with_modifications(mut self, text: impl Into<String>) -> Self {
        self.modifications = Some(text.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider_override = Some(provider.into());
        self
    }

    pub fn steps(mut self, numbers: impl IntoIterator<Item = usize>) -> Self {
        self.step_numbers.extend(numbers);
        self
    }

    pub fn tools<S: Into<String>>(mut self, tools: impl IntoIterator<Item = S>) -> Self {
        self.step_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    fn is_filtered(&self) -> bool {
        !self.step_numbers.is_empty() || !self.step_tools.is_empty()
    }

    fn modification(&self) -> Option<&str> {
        self.modifications
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    fn provider(&self) -> Option<&str> {
        self.provider_override
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// 重建出的待执行命令
#[derive(Debug, Clone, PartialEq)]
pub enum Replay {
    Single { tool: String, args: Value },
    Multi(Plan),
}

pub struct RetryLedger {
    store: Arc<dyn CommandStore>,
    families: HashMap<String, FamilySection>,
}

impl RetryLedger {
    pub fn new(store: Arc<dyn CommandStore>, providers: &ProvidersSection) -> Self {
        Self {
            store,
            families: providers.families.clone(),
        }
    }

    pub async fn record_command(
        &self,
        conversation_id: &str,
        command: &LastCommand,
    ) -> Result<(), OrchestratorError> {
        tracing::debug!(conversation = %conversation_id, command = %command.summary(), "record last command");
        self.store.record_command(conversation_id, command).await
    }

    pub async fn get_last_command(
        &self,
        conversation_id: &str,
    ) -> Result<Option<LastCommand>, OrchestratorError> {
        self.store.get_last_command(conversation_id).await
    }

    /// 重建最近一次命令；没有记录时报 NoLastCommand
    pub async fn replay(
        &self,
        conversation_id: &str,
        request: &ReplayRequest,
    ) -> Result<Replay, OrchestratorError> {
        let command = self
            .get_last_command(conversation_id)
            .await?
            .ok_or(OrchestratorError::NoLastCommand)?;
        tracing::info!(conversation = %conversation_id, command = %command.summary(), "replaying last command");
        match command {
            LastCommand::SingleStep { tool, args, .. } => self.replay_single(tool, args, request),
            LastCommand::MultiStep { plan, .. } => self.replay_multi(&plan, request),
        }
    }

    fn replay_single(
        &self,
        tool: String,
        args: Value,
        request: &ReplayRequest,
    ) -> Result<Replay, OrchestratorError> {
        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(OrchestratorError::MalformedCommand(format!(
                    "arguments of {tool} are not an object: {other}"
                )))
            }
        };
        let tool = self.resolve_legacy(tool, &mut args);

        if let Some(mods) = request.modification() {
            let key = prompt_key(&args).unwrap_or("prompt");
            append_text(&mut args, key, mods);
        }
        if let Some(provider) = request.provider() {
            set_provider(&mut args, provider);
        }
        Ok(Replay::Single {
            tool,
            args: Value::Object(args),
        })
    }

    fn replay_multi(&self, plan: &Plan, request: &ReplayRequest) -> Result<Replay, OrchestratorError> {
        let mut selected = if request.is_filtered() {
            plan.select(&request.step_numbers, &request.step_tools)
        } else {
            plan.clone()
        };
        if selected.is_empty() {
            return Err(OrchestratorError::NoMatchingStep);
        }

        for step in &mut selected.steps {
            if let Some(tool) = step.tool.take() {
                step.tool = Some(self.resolve_legacy(tool, &mut step.parameters));
            }
            if let Some(provider) = request.provider() {
                if step.tool.as_deref().is_some_and(|t| self.is_creation_tool(t)) {
                    set_provider(&mut step.parameters, provider);
                }
            }
            if let Some(mods) = request.modification() {
                if let Some(key) = prompt_key(&step.parameters) {
                    append_text(&mut step.parameters, key, mods);
                }
                step.action = if step.action.trim().is_empty() {
                    mods.to_string()
                } else {
                    format!("{} {}", step.action, mods)
                };
            }
        }
        Ok(Replay::Multi(selected))
    }

    /// provider 覆盖只作用于内容创作族（image / video / edit）
    pub fn is_creation_tool(&self, tool: &str) -> bool {
        self.families
            .values()
            .any(|f| f.creation && f.tool.eq_ignore_ascii_case(tool))
    }

    /// 旧版「供应商_族」工具名（如 openai_image）解析为族工具 + provider；已有 provider 参数时不动
    fn resolve_legacy(&self, tool: String, args: &mut Map<String, Value>) -> String {
        if provider_key(args).is_some() || self.families.values().any(|f| f.tool == tool) {
            return tool;
        }
        let lower = tool.to_lowercase();
        for (name, family) in &self.families {
            for provider in &family.providers {
                if lower == format!("{}_{}", provider.to_lowercase(), name) {
                    tracing::debug!(legacy = %tool, tool = %family.tool, provider = %provider, "resolved legacy tool name");
                    args.insert("provider".to_string(), Value::String(provider.clone()));
                    return family.tool.clone();
                }
            }
        }
        tool
    }
}

fn prompt_key(args: &Map<String, Value>) -> Option<&'static str> {
    ["prompt", "text"]
        .into_iter()
        .find(|k| args.get(*k).is_some_and(Value::is_string))
}

fn provider_key(args: &Map<String, Value>) -> Option<&'static str> {
    ["provider", "service"]
        .into_iter()
        .find(|k| args.get(*k).is_some_and(|v| !v.is_null()))
}

fn append_text(args: &mut Map<String, Value>, key: &str, mods: &str) {
    let combined = match args.get(key).and_then(Value::as_str) {
        Some(original) if !original.trim().is_empty() => format!("{original} {mods}"),
        _ => mods.to_string(),
    };
    args.insert(key.to_string(), Value::String(combined));
}

fn set_provider(args: &mut Map<String, Value>, provider: &str) {
    let key = provider_key(args).unwrap_or("provider");
    args.insert(key.to_string(), Value::String(provider.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Step;
    use crate::retry::InMemoryCommandStore;
    use serde_json::json;

    fn ledger() -> RetryLedger {
        RetryLedger::new(Arc::new(InMemoryCommandStore::new()), &ProvidersSection::default())
    }

    fn plan() -> Plan {
        Plan::new(vec![
            Step::new(1, Some("create_image"), "draw a castle").with_param("prompt", "a castle"),
            Step::new(2, Some("create_poll"), "ask about it"),
            Step::new(3, Some("create_video"), "fly around it").with_param("prompt", "castle flyover"),
        ])
    }

    #[tokio::test]
    async fn test_nothing_to_retry() {
        let l = ledger();
        assert_eq!(
            l.replay("c1", &ReplayRequest::default()).await,
            Err(OrchestratorError::NoLastCommand)
        );
    }

    #[tokio::test]
    async fn test_single_step_modifications_and_provider() {
        let l = ledger();
        l.record_command("c1", &LastCommand::single("create_image", json!({"prompt": "a fox", "service": "grok"}), None))
            .await
            .unwrap();

        let plain = l.replay("c1", &ReplayRequest::default().with_modifications("in blue")).await.unwrap();
        assert_eq!(
            plain,
            Replay::Single {
                tool: "create_image".into(),
                args: json!({"prompt": "a fox in blue", "service": "grok"})
            }
        );

        let overridden = l.replay("c1", &ReplayRequest::default().with_provider("openai")).await.unwrap();
        assert_eq!(
            overridden,
            Replay::Single {
                tool: "create_image".into(),
                args: json!({"prompt": "a fox", "service": "openai"})
            }
        );
    }

    #[tokio::test]
    async fn test_single_step_text_argument() {
        let l = ledger();
        l.record_command("c1", &LastCommand::single("text_to_speech", json!({"text": "good morning"}), None))
            .await
            .unwrap();
        let r = l.replay("c1", &ReplayRequest::default().with_modifications("everyone")).await.unwrap();
        assert_eq!(
            r,
            Replay::Single {
                tool: "text_to_speech".into(),
                args: json!({"text": "good morning everyone"})
            }
        );
    }

    #[tokio::test]
    async fn test_legacy_prefix_resolved() {
        let l = ledger();
        l.record_command("c1", &LastCommand::single("openai_image", json!({"prompt": "a cat"}), None))
            .await
            .unwrap();
        let r = l.replay("c1", &ReplayRequest::default()).await.unwrap();
        assert_eq!(
            r,
            Replay::Single {
                tool: "create_image".into(),
                args: json!({"prompt": "a cat", "provider": "openai"})
            }
        );
    }

    #[tokio::test]
    async fn test_multi_step_filter_renumbers() {
        let l = ledger();
        l.record_command("c1", &LastCommand::multi(plan(), Vec::new())).await.unwrap();

        let Replay::Multi(only_two) = l.replay("c1", &ReplayRequest::default().steps([2])).await.unwrap() else {
            panic!("expected plan");
        };
        assert_eq!(only_two.len(), 1);
        assert_eq!(only_two.steps[0].step_number, 1);
        assert_eq!(only_two.steps[0].tool.as_deref(), Some("create_poll"));

        let Replay::Multi(union) = l
            .replay("c1", &ReplayRequest::default().steps([1]).tools(["create_video"]))
            .await
            .unwrap()
        else {
            panic!("expected plan");
        };
        assert_eq!(union.len(), 2);

        assert_eq!(
            l.replay("c1", &ReplayRequest::default().steps([7])).await,
            Err(OrchestratorError::NoMatchingStep)
        );
    }

    #[tokio::test]
    async fn test_provider_override_only_touches_creation_steps() {
        let l = ledger();
        l.record_command("c1", &LastCommand::multi(plan(), Vec::new())).await.unwrap();
        let Replay::Multi(p) = l
            .replay("c1", &ReplayRequest::default().with_provider("openai").with_modifications("at night"))
            .await
            .unwrap()
        else {
            panic!("expected plan");
        };
        assert_eq!(p.steps[0].parameters["provider"], "openai");
        assert!(p.steps[1].parameters.get("provider").is_none());
        assert_eq!(p.steps[2].parameters["provider"], "openai");
        assert_eq!(p.steps[0].parameters["prompt"], "a castle at night");
        assert_eq!(p.steps[1].action, "ask about it at night");
        assert!(p.steps[1].parameters.get("prompt").is_none());
    }
}
