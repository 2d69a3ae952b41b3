//! 会话 Agent 门面
//!
//! 供命令行、WhatsApp 等前端调用：run_plan / run_tool / retry / last_command。
//! 同一会话的命令经 SessionSupervisor 串行执行，不同会话并发。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OwnedMutexGuard;

use crate::channel::MessagingChannel;
use crate::config::AppConfig;
use crate::core::{AgentBuilder, OrchestratorError, SessionSupervisor};
use crate::orchestrator::{Plan, PlanExecutor, PlanOutcome, RunOptions, RunOutcome, SingleOutcome};
use crate::retry::{LastCommand, ReplayRequest};

pub struct ConversationAgent {
    executor: PlanExecutor,
    supervisor: SessionSupervisor,
}

impl ConversationAgent {
    pub fn new(executor: PlanExecutor) -> Self {
        Self {
            executor,
            supervisor: SessionSupervisor::new(),
        }
    }

    pub fn executor(&self) -> &PlanExecutor {
        &self.executor
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// 释放会话锁并清理无人等待的锁，锁表只保留正在使用的会话
    fn release(&self, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let pruned = self.supervisor.prune_idle();
        if pruned > 0 {
            tracing::debug!(pruned, active = self.supervisor.active_count(), "pruned idle session locks");
        }
    }

    pub async fn run_plan(
        &self,
        conversation_id: &str,
        plan: Plan,
        opts: &RunOptions,
    ) -> Result<PlanOutcome, OrchestratorError> {
        let guard = self.supervisor.acquire(conversation_id).await;
        let outcome = self.executor.execute_plan(conversation_id, plan, opts).await;
        self.release(guard);
        outcome
    }

    /// 解析 Planner 输出的 Plan JSON 后执行
    pub async fn run_plan_json(
        &self,
        conversation_id: &str,
        json: &str,
        opts: &RunOptions,
    ) -> Result<PlanOutcome, OrchestratorError> {
        let plan = Plan::from_json(json)?;
        self.run_plan(conversation_id, plan, opts).await
    }

    pub async fn run_tool(
        &self,
        conversation_id: &str,
        tool: &str,
        args: Value,
        opts: &RunOptions,
    ) -> SingleOutcome {
        let guard = self.supervisor.acquire(conversation_id).await;
        let outcome = self
            .executor
            .execute_single(conversation_id, tool, args, opts)
            .await;
        self.release(guard);
        outcome
    }

    /// 重放最近一次命令
    pub async fn retry(
        &self,
        conversation_id: &str,
        request: &ReplayRequest,
        opts: &RunOptions,
    ) -> Result<RunOutcome, OrchestratorError> {
        let guard = self.supervisor.acquire(conversation_id).await;
        let outcome = match self.executor.ledger().replay(conversation_id, request).await {
            Ok(replay) => self.executor.run_replay(conversation_id, replay, opts).await,
            Err(e) => Err(e),
        };
        self.release(guard);
        outcome
    }

    pub async fn last_command(
        &self,
        conversation_id: &str,
    ) -> Result<Option<LastCommand>, OrchestratorError> {
        self.executor.ledger().get_last_command(conversation_id).await
    }
}

/// 按配置构建 Agent（内置工具、配置中的供应商端点、按配置选择的存储与 LLM）
pub fn create_agent(
    config: AppConfig,
    channel: Arc<dyn MessagingChannel>,
) -> Result<ConversationAgent, OrchestratorError> {
    AgentBuilder::new(config, channel).build()
}
