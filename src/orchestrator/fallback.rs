//! ProviderFallbackPolicy：按规范顺序依次尝试供应商，首个成功即返回
//!
//! - 显式指定（pinned）供应商时只尝试它一个，失败就如实报错，不静默换后端
//! - 否则尝试「规范顺序 - 排除集」，同一会话内每个供应商最多尝试一次
//! - 第二次及之后的尝试前发预告（附带上一次失败原因）
//! - 每次尝试可单独限时，超时记为该供应商的失败并继续下一个
//! - 全部失败时错误内容为逐行的尝试记录

use std::future::Future;
use std::time::Duration;

use crate::config::FamilySection;
use crate::tools::{ToolContext, ToolResult};

/// 单次失败尝试
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub message: String,
}

/// 单次回退会话的失败记录，会话结束即丢弃
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptLedger {
    entries: Vec<ProviderAttempt>,
}

impl AttemptLedger {
    pub fn push(&mut self, provider: &str, message: impl Into<String>) {
        self.entries.push(ProviderAttempt {
            provider: provider.to_string(),
            message: message.into(),
        });
    }

    pub fn entries(&self) -> &[ProviderAttempt] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_line(&self) -> Option<String> {
        self.entries.last().map(format_attempt)
    }

    /// 每个供应商一行
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(format_attempt)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn format_attempt(a: &ProviderAttempt) -> String {
    format!("❌ {}: {}", a.provider, a.message)
}

/// 一次回退会话的结果
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub result: ToolResult,
    pub ledger: AttemptLedger,
    /// 实际尝试过的供应商（按顺序）
    pub attempted: Vec<String>,
}

/// 供应商回退策略；规范顺序来自配置
#[derive(Debug, Clone)]
pub struct ProviderFallbackPolicy {
    canonical_order: Vec<String>,
    attempt_timeout: Option<Duration>,
}

impl ProviderFallbackPolicy {
    pub fn new<S: Into<String>>(canonical_order: impl IntoIterator<Item = S>) -> Self {
        Self {
            canonical_order: canonical_order.into_iter().map(Into::into).collect(),
            attempt_timeout: None,
        }
    }

    /// 单次尝试的时限
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    pub fn from_family(family: &FamilySection) -> Self {
        Self::new(family.providers.iter().cloned())
    }

    pub fn canonical_order(&self) -> &[String] {
        &self.canonical_order
    }

    /// 计算本次尝试列表
    pub fn attempt_list(&self, avoid: &[String], pinned: Option<&str>) -> Vec<String> {
        if let Some(p) = pinned.map(str::trim).filter(|p| !p.is_empty()) {
            return vec![p.to_string()];
        }
        let mut list: Vec<String> = Vec::new();
        for provider in &self.canonical_order {
            let avoided = avoid.iter().any(|a| a.eq_ignore_ascii_case(provider));
            let seen = list.iter().any(|p| p.eq_ignore_ascii_case(provider));
            if !avoided && !seen {
                list.push(provider.clone());
            }
        }
        list
    }

    /// 依次尝试；attempt 的 Err 与字段级失败同等处理
    pub async fn try_with_fallback<F, Fut>(
        &self,
        tool: &str,
        ctx: &ToolContext,
        avoid: &[String],
        pinned: Option<&str>,
        mut attempt: F,
    ) -> FallbackOutcome
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<ToolResult, String>>,
    {
        let providers = self.attempt_list(avoid, pinned);
        let mut ledger = AttemptLedger::default();
        let mut attempted = Vec::new();

        if providers.is_empty() {
            return FallbackOutcome {
                result: ToolResult::failure(format!("{tool}: no provider available")),
                ledger,
                attempted,
            };
        }

        for (i, provider) in providers.into_iter().enumerate() {
            if i > 0 {
                if let Some(ack) = &ctx.ack {
                    ack.provider_ack(
                        &ctx.conversation_id,
                        tool,
                        &provider,
                        ledger.last_line().as_deref(),
                        ctx.quoted_message_id.as_deref(),
                    )
                    .await;
                }
            }

            attempted.push(provider.clone());
            tracing::info!(conversation = %ctx.conversation_id, tool, provider = %provider, attempt = i + 1, "provider attempt");

            let call = attempt(provider.clone());
            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(r) => r,
                    Err(_) => Err(format!("timed out after {}s", limit.as_secs_f32())),
                },
                None => call.await,
            };
            match outcome {
                Ok(result) if !result.is_failure() => {
                    let result = if result.provider_used.is_none() {
                        result.with_provider(provider)
                    } else {
                        result
                    };
                    return FallbackOutcome {
                        result,
                        ledger,
                        attempted,
                    };
                }
                Ok(result) => {
                    let message = result
                        .error
                        .unwrap_or_else(|| "returned no result".to_string());
                    tracing::warn!(tool, provider = %provider, error = %message, "provider failed");
                    ledger.push(&provider, message);
                }
                Err(e) => {
                    tracing::warn!(tool, provider = %provider, error = %e, "provider errored");
                    ledger.push(&provider, e);
                }
            }
        }

        FallbackOutcome {
            result: ToolResult::failure(ledger.render()),
            ledger,
            attempted,
        }
    }
}
