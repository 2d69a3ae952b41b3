//! Agent 构建器：统一的初始化逻辑
//!
//! 命令行、WhatsApp 与测试共用同一套工具注册、存储与推理配置；各组件均可替换。

use std::sync::Arc;
use std::time::Duration;

use crate::agent::ConversationAgent;
use crate::channel::MessagingChannel;
use crate::config::AppConfig;
use crate::core::OrchestratorError;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::orchestrator::{
    AckEmitter, ContextThreader, LlmToolInferrer, PlanExecutor, StepExecutor,
};
use crate::retry::{CommandStore, InMemoryCommandStore, RetryLedger, SqliteCommandStore};
use crate::tools::{
    CreatePollTool, EchoTool, HttpProviderBackend, InMemoryTaskStore, ProviderBackend,
    ProviderTool, ScheduleMessageTool, TaskStore, Tool, ToolExecutor, ToolRegistry,
};

/// 某个族、某个供应商的后端
struct BackendEntry {
    family: String,
    provider: String,
    backend: Arc<dyn ProviderBackend>,
}

pub struct AgentBuilder {
    config: AppConfig,
    channel: Arc<dyn MessagingChannel>,
    store: Option<Arc<dyn CommandStore>>,
    llm: Option<Arc<dyn LlmClient>>,
    task_store: Option<Arc<dyn TaskStore>>,
    backends: Vec<BackendEntry>,
    extra_tools: Vec<Arc<dyn Tool>>,
    enable_inference: bool,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, channel: Arc<dyn MessagingChannel>) -> Self {
        Self {
            config,
            channel,
            store: None,
            llm: None,
            task_store: None,
            backends: Vec::new(),
            extra_tools: Vec::new(),
            enable_inference: true,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn with_store(mut self, store: Arc<dyn CommandStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.task_store = Some(store);
        self
    }

    /// 为族内某个供应商指定后端（覆盖配置中的 HTTP 端点）
    pub fn with_backend(
        mut self,
        family: &str,
        provider: &str,
        backend: Arc<dyn ProviderBackend>,
    ) -> Self {
        self.backends.push(BackendEntry {
            family: family.to_string(),
            provider: provider.to_string(),
            backend,
        });
        self
    }

    /// 额外注册的工具；与内置工具同名时替换之
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    /// 是否为未指定工具的步骤启用单步推理
    pub fn with_inference(mut self, enable: bool) -> Self {
        self.enable_inference = enable;
        self
    }

    fn provider_tool(&self, family_name: &str) -> Option<ProviderTool> {
        let family = self.config.providers.families.get(family_name)?;
        let provider_timeout = self.config.tools.provider_timeout_secs;
        let mut tool =
            ProviderTool::new(family).with_attempt_timeout(Duration::from_secs(provider_timeout));
        let endpoints = self.config.providers.endpoints.get(family_name);
        for provider in &family.providers {
            if let Some(endpoint) = endpoints.and_then(|e| e.get(provider)) {
                tool = tool.with_backend(
                    provider,
                    Arc::new(HttpProviderBackend::new(endpoint.clone(), provider_timeout)),
                );
            }
        }
        for entry in self.backends.iter().filter(|b| b.family == family_name) {
            tool = tool.with_backend(&entry.provider, entry.backend.clone());
        }
        Some(tool)
    }

    /// 构建工具注册表：内置工具 + 每个供应商族一个工具 + 额外工具
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register(CreatePollTool);

        let task_store = self
            .task_store
            .clone()
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        tools.register(ScheduleMessageTool::new(
            task_store,
            self.config.scheduler.dedup_window_secs,
            self.config.scheduler.gc_threshold,
        ));

        let mut families: Vec<&String> = self.config.providers.families.keys().collect();
        families.sort();
        for name in families {
            if let Some(tool) = self.provider_tool(name) {
                tools.register(tool);
            }
        }

        for tool in &self.extra_tools {
            tools.register_arc(tool.clone());
        }
        tools
    }

    /// 构建命令存储：显式指定优先，否则按 [store].backend
    pub fn build_store(&self) -> Result<Arc<dyn CommandStore>, OrchestratorError> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        match self.config.store.backend.to_lowercase().as_str() {
            "memory" => Ok(Arc::new(InMemoryCommandStore::new())),
            "sqlite" => {
                let path = self.config.store_path();
                tracing::info!(path = %path.display(), "Using SQLite command store");
                Ok(Arc::new(SqliteCommandStore::open(path)?))
            }
            other => Err(OrchestratorError::ConfigError(format!(
                "unknown store backend: {other}"
            ))),
        }
    }

    pub fn build(self) -> Result<ConversationAgent, OrchestratorError> {
        let registry = self.build_tool_registry();
        tracing::info!(tools = ?registry.tool_names(), "tool registry ready");
        let tools = Arc::new(ToolExecutor::new(registry, self.config.tools.tool_timeout_secs));

        let mut steps = StepExecutor::new(tools);
        if self.enable_inference {
            let llm = self
                .llm
                .clone()
                .unwrap_or_else(|| create_llm_from_config(&self.config));
            steps = steps.with_inferrer(Arc::new(LlmToolInferrer::new(llm)));
        }

        let ledger = Arc::new(RetryLedger::new(self.build_store()?, &self.config.providers));
        let ack = Arc::new(AckEmitter::new(self.channel.clone(), &self.config.ack));
        let executor = PlanExecutor::new(
            steps,
            ack,
            ContextThreader::new(&self.config.context),
            ledger,
        );
        Ok(ConversationAgent::new(executor))
    }
}
