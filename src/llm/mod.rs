//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock），供单步推理选择工具

pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;

use crate::config::AppConfig;

/// 按 [llm] 配置与环境变量创建客户端；没有任何 Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        "deepseek" if has_deepseek_key || has_openai_key => {
            let model = cfg.llm.model.as_deref().unwrap_or(DEEPSEEK_CHAT);
            tracing::info!(model, "Using DeepSeek LLM");
            Arc::new(create_deepseek_client(Some(model), cfg.llm.base_url.as_deref()))
        }
        "openai" if has_openai_key => {
            let model = cfg.llm.model.as_deref().unwrap_or("gpt-4o-mini");
            tracing::info!(model, "Using OpenAI LLM");
            Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), model, None))
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}
