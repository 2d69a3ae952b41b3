//! PlanExecutor：顺序执行计划中的每一步
//!
//! 每步：预告 → 拼上下文 → 执行 → 立即发送产物（或带步骤号的错误）。失败不阻塞后续步骤；
//! 结果只追加不修改。全部结束后把 {plan, stepResults} 记为该会话的 LastCommand。

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::core::OrchestratorError;
use crate::orchestrator::{
    AckEmitter, ContextThreader, Plan, ResultSender, RunOptions, Step, StepExecutor, StepResult,
};
use crate::retry::{LastCommand, Replay, RetryLedger};
use crate::tools::ToolContext;

/// 一次计划运行的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub step_results: Vec<StepResult>,
    pub attempted: usize,
    pub succeeded: usize,
    /// 各步文本按行去重后的拼接
    pub combined_text: String,
}

impl PlanOutcome {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// 单步命令的运行结果
#[derive(Debug, Clone, PartialEq)]
pub struct SingleOutcome {
    pub tool: String,
    pub args: Value,
    pub result: StepResult,
}

/// 顶层命令的运行结果
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Single(SingleOutcome),
    Multi(PlanOutcome),
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            RunOutcome::Single(s) => s.result.success,
            RunOutcome::Multi(m) => m.attempted > 0 && m.succeeded == m.attempted,
        }
    }
}

pub struct PlanExecutor {
    steps: StepExecutor,
    ack: Arc<AckEmitter>,
    sender: ResultSender,
    threader: ContextThreader,
    ledger: Arc<RetryLedger>,
}

impl PlanExecutor {
    pub fn new(
        steps: StepExecutor,
        ack: Arc<AckEmitter>,
        threader: ContextThreader,
        ledger: Arc<RetryLedger>,
    ) -> Self {
        let sender = ResultSender::new(ack.channel().clone());
        Self {
            steps,
            ack,
            sender,
            threader,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<RetryLedger> {
        &self.ledger
    }

    pub fn step_executor(&self) -> &StepExecutor {
        &self.steps
    }

    fn tool_context(&self, conversation_id: &str, opts: &RunOptions) -> ToolContext {
        ToolContext::new(conversation_id)
            .with_quoted(opts.quoted_message_id.clone())
            .with_request(opts.original_request.clone())
            .with_ack(self.ack.clone())
    }

    /// 执行整个计划；只有计划本身不合法时返回 Err（此时一步都不会执行）
    pub async fn execute_plan(
        &self,
        conversation_id: &str,
        plan: Plan,
        opts: &RunOptions,
    ) -> Result<PlanOutcome, OrchestratorError> {
        plan.validate()?;
        tracing::info!(conversation = %conversation_id, steps = plan.len(), "executing plan");

        let ctx = self.tool_context(conversation_id, opts);
        let quoted = opts.quoted_message_id.as_deref();
        let mut results: Vec<StepResult> = Vec::with_capacity(plan.len());

        for index in 0..plan.steps.len() {
            let input = self.threader.enrich(&plan.steps, index, &results);
            let step = &input.step;
            tracing::info!(conversation = %conversation_id, step = step.step_number, tool = step.tool_label(), "step started");

            self.ack.step_ack(conversation_id, step, opts).await;
            let result = self.steps.execute(&input, &ctx).await;

            if result.success {
                self.sender
                    .send_step_results(conversation_id, &result, step.step_number, quoted)
                    .await;
            } else {
                let tool = result
                    .tools_used
                    .first()
                    .map(String::as_str)
                    .unwrap_or(step.tool_label());
                let error = result.error.as_deref().unwrap_or("unknown error");
                tracing::warn!(conversation = %conversation_id, step = step.step_number, tool, error, "step failed");
                self.sender
                    .send_step_failure(conversation_id, step.step_number, tool, error, quoted)
                    .await;
            }
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let outcome = PlanOutcome {
            attempted: results.len(),
            succeeded,
            combined_text: combine_text(&results),
            plan,
            step_results: results,
        };
        tracing::info!(
            conversation = %conversation_id,
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            "plan finished"
        );

        let command = LastCommand::multi(outcome.plan.clone(), outcome.step_results.clone());
        if let Err(e) = self.ledger.record_command(conversation_id, &command).await {
            tracing::error!(conversation = %conversation_id, error = %e, "failed to record last command");
        }
        Ok(outcome)
    }

    /// 单步命令：同一条 StepExecutor / ResultSender 路径，记为 SingleStep
    pub async fn execute_single(
        &self,
        conversation_id: &str,
        tool: &str,
        args: Value,
        opts: &RunOptions,
    ) -> SingleOutcome {
        let mut step = Step::new(1, Some(tool), "");
        if let Value::Object(map) = &args {
            step.parameters = map.clone();
        }
        self.ack.step_ack(conversation_id, &step, opts).await;

        let ctx = self.tool_context(conversation_id, opts);
        let quoted = opts.quoted_message_id.as_deref();
        let result = self.steps.execute_tool(tool, args.clone(), &ctx, 1).await;
        if result.success {
            self.sender
                .send_step_results(conversation_id, &result, 1, quoted)
                .await;
        } else {
            let error = result.error.as_deref().unwrap_or("unknown error");
            self.sender
                .send_step_failure(conversation_id, 1, tool, error, quoted)
                .await;
        }

        let command = LastCommand::single(tool, args.clone(), Some(result.clone()));
        if let Err(e) = self.ledger.record_command(conversation_id, &command).await {
            tracing::error!(conversation = %conversation_id, error = %e, "failed to record last command");
        }
        SingleOutcome {
            tool: tool.to_string(),
            args,
            result,
        }
    }

    /// 执行重建出的命令；重放本身也会成为新的 LastCommand
    pub async fn run_replay(
        &self,
        conversation_id: &str,
        replay: Replay,
        opts: &RunOptions,
    ) -> Result<RunOutcome, OrchestratorError> {
        match replay {
            Replay::Single { tool, args } => Ok(RunOutcome::Single(
                self.execute_single(conversation_id, &tool, args, opts).await,
            )),
            Replay::Multi(plan) => Ok(RunOutcome::Multi(
                self.execute_plan(conversation_id, plan, opts).await?,
            )),
        }
    }
}

/// 拼接各成功步骤的文本，跨步骤重复的行只保留第一次出现
fn combine_text(results: &[StepResult]) -> String {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for text in results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.text.as_deref())
    {
        for line in text.lines() {
            let key = line.trim();
            if key.is_empty() {
                continue;
            }
            if seen.insert(key.to_string()) {
                lines.push(line.trim_end());
            }
        }
    }
    lines.join("\n")
}
