//! StepExecutor：执行计划中的单个步骤
//!
//! 解析工具（显式指定，或经单步推理从 action 推断），把带上下文的指令并入参数后调用 ToolExecutor，
//! 结果归一化为 StepResult。任何失败（校验、供应商、超时、panic）都转成 success=false 的结果，不向外抛错。

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::{ErrorKind, OrchestratorError};
use crate::orchestrator::infer::{PlannerOutput, ToolInferrer};
use crate::orchestrator::{StepInput, StepResult};
use crate::tools::{ToolContext, ToolExecutor};

pub struct StepExecutor {
    tools: Arc<ToolExecutor>,
    inferrer: Option<Arc<dyn ToolInferrer>>,
}

impl StepExecutor {
    pub fn new(tools: Arc<ToolExecutor>) -> Self {
        Self {
            tools,
            inferrer: None,
        }
    }

    pub fn with_inferrer(mut self, inferrer: Arc<dyn ToolInferrer>) -> Self {
        self.inferrer = Some(inferrer);
        self
    }

    pub fn tools(&self) -> &Arc<ToolExecutor> {
        &self.tools
    }

    /// 执行一个计划步骤
    pub async fn execute(&self, input: &StepInput, ctx: &ToolContext) -> StepResult {
        let step = &input.step;
        let mut args = step.parameters.clone();
        let mut iterations = 1;

        let named = step
            .tool
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);
        let tool = match named {
            Some(tool) => tool,
            None => {
                let Some(inferrer) = &self.inferrer else {
                    return StepResult::failure(
                        step.tool_label(),
                        "no tool specified and no tool inference configured",
                    );
                };
                let declarations = self.tools.registry().declarations();
                match inferrer.infer(&input.instruction, &declarations).await {
                    Ok(PlannerOutput::ToolCall(call)) => {
                        iterations = 2;
                        if let Value::Object(inferred) = call.args {
                            for (k, v) in inferred {
                                args.entry(k).or_insert(v);
                            }
                        }
                        call.tool
                    }
                    Ok(PlannerOutput::Response(text)) => {
                        return StepResult {
                            success: true,
                            text: Some(text),
                            tools_used: vec![step.tool_label().to_string()],
                            iterations: 1,
                            ..Default::default()
                        };
                    }
                    Err(e) => {
                        tracing::warn!(conversation = %ctx.conversation_id, step = step.step_number, error = %e, "tool inference failed");
                        return StepResult::failure(step.tool_label(), e.to_string());
                    }
                }
            }
        };

        self.merge_instruction(&tool, &mut args, &input.instruction);
        self.execute_tool(&tool, Value::Object(args), ctx, iterations)
            .await
    }

    /// `instruction` 总是带上下文的指令；工具声明了 prompt（或必填 text）而步骤没给时也用它填充
    fn merge_instruction(&self, tool: &str, args: &mut Map<String, Value>, instruction: &str) {
        if instruction.trim().is_empty() {
            return;
        }
        args.insert("instruction".to_string(), Value::String(instruction.to_string()));

        let Some(schema) = self.tools.get_tool(tool).map(|t| t.parameters_schema()) else {
            return;
        };
        let requires = |key: &str| {
            schema["required"]
                .as_array()
                .is_some_and(|r| r.iter().any(|k| k == key))
        };
        let input_key = if schema.pointer("/properties/prompt").is_some() {
            "prompt"
        } else if requires("text") {
            "text"
        } else {
            return;
        };
        let missing = match args.get(input_key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            args.insert(input_key.to_string(), Value::String(instruction.to_string()));
        }
    }

    /// 直接执行一个工具（单步命令与计划步骤共用）
    pub async fn execute_tool(
        &self,
        tool: &str,
        args: Value,
        ctx: &ToolContext,
        iterations: u32,
    ) -> StepResult {
        match self.tools.execute(tool, args, ctx).await {
            Ok(raw) => StepResult::from_tool_result(tool, raw, iterations),
            Err(e) => {
                log_failure(ctx, tool, &e);
                let mut failed = StepResult::failure(tool, e.to_string());
                failed.iterations = iterations;
                failed
            }
        }
    }
}

fn log_failure(ctx: &ToolContext, tool: &str, e: &OrchestratorError) {
    match e.kind() {
        ErrorKind::Validation => {
            tracing::info!(conversation = %ctx.conversation_id, tool, error = %e, "tool rejected arguments")
        }
        ErrorKind::Provider => {
            tracing::warn!(conversation = %ctx.conversation_id, tool, error = %e, "tool failed")
        }
        ErrorKind::Orchestration => {
            tracing::error!(conversation = %ctx.conversation_id, tool, error = %e, "tool errored")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::orchestrator::infer::LlmToolInferrer;
    use crate::orchestrator::Step;
    use crate::tools::{EchoTool, Tool, ToolRegistry, ToolResult};
    use async_trait::async_trait;

    /// 回显收到的 prompt
    struct PromptTool;

    #[async_trait]
    impl Tool for PromptTool {
        fn name(&self) -> &str {
            "create_image"
        }
        fn description(&self) -> &str {
            "draw"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"prompt": {"type": "string"}}, "required": ["prompt"]})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
            let prompt = args["prompt"].as_str().unwrap_or_default();
            Ok(ToolResult::ok().with_image("https://x/1.png", Some(prompt.to_string())))
        }
    }

    /// 必填 text 的语音类工具，回显收到的 text
    struct SpeakTool;

    #[async_trait]
    impl Tool for SpeakTool {
        fn name(&self) -> &str {
            "text_to_speech"
        }
        fn description(&self) -> &str {
            "speak"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
            Ok(ToolResult::ok_text(args["text"].as_str().unwrap_or_default()))
        }
    }

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
            panic!("kaboom")
        }
    }

    fn executor() -> StepExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg.register(PromptTool);
        reg.register(SpeakTool);
        reg.register(Panicky);
        StepExecutor::new(Arc::new(ToolExecutor::new(reg, 5)))
    }

    fn input(step: Step, instruction: &str) -> StepInput {
        StepInput {
            step,
            instruction: instruction.to_string(),
        }
    }

    #[tokio::test]
    async fn test_instruction_fills_missing_prompt() {
        let ex = executor();
        let step = Step::new(2, Some("create_image"), "draw it bigger");
        let r = ex
            .execute(&input(step, "CONTEXT ...\n\nCURRENT TASK: draw it bigger"), &ToolContext::new("c1"))
            .await;
        assert!(r.success);
        assert_eq!(r.image_caption.as_deref(), Some("CONTEXT ...\n\nCURRENT TASK: draw it bigger"));
        assert_eq!(r.tools_used, vec!["create_image"]);
        assert_eq!(r.iterations, 1);
    }

    #[tokio::test]
    async fn test_instruction_fills_required_text() {
        let ex = executor();
        let step = Step::new(1, Some("text_to_speech"), "say good morning");
        let r = ex.execute(&input(step, "say good morning"), &ToolContext::new("c1")).await;
        assert!(r.success);
        assert_eq!(r.text.as_deref(), Some("say good morning"));
    }

    #[tokio::test]
    async fn test_explicit_prompt_is_kept() {
        let ex = executor();
        let step = Step::new(1, Some("create_image"), "draw").with_param("prompt", "a heron");
        let r = ex.execute(&input(step, "draw"), &ToolContext::new("c1")).await;
        assert_eq!(r.image_caption.as_deref(), Some("a heron"));
    }

    #[tokio::test]
    async fn test_failures_become_step_results() {
        let ex = executor();
        let unknown = ex
            .execute(&input(Step::new(1, Some("nope"), "x"), "x"), &ToolContext::new("c1"))
            .await;
        assert!(!unknown.success);
        assert_eq!(unknown.tools_used, vec!["nope"]);
        assert!(unknown.error.unwrap().contains("Unknown tool"));

        let panicked = ex
            .execute(&input(Step::new(1, Some("explode"), "x"), "x"), &ToolContext::new("c1"))
            .await;
        assert!(!panicked.success);
        assert!(panicked.error.unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_missing_tool_without_inferrer_fails() {
        let ex = executor();
        let r = ex
            .execute(&input(Step::new(1, None, "hello"), "hello"), &ToolContext::new("c1"))
            .await;
        assert!(!r.success);
        assert_eq!(r.tools_used, vec!["assistant"]);
    }

    #[tokio::test]
    async fn test_inferred_tool_counts_two_iterations() {
        let llm = Arc::new(MockLlmClient::new());
        let ex = executor().with_inferrer(Arc::new(LlmToolInferrer::new(llm)));
        let r = ex
            .execute(&input(Step::new(1, None, "say hi"), "say hi"), &ToolContext::new("c1"))
            .await;
        assert!(r.success);
        assert_eq!(r.tools_used, vec!["echo"]);
        assert_eq!(r.iterations, 2);
        assert_eq!(r.text.as_deref(), Some("say hi"));
    }

    #[tokio::test]
    async fn test_plain_answer_from_inference() {
        let llm = Arc::new(MockLlmClient::with_replies(["It is sunny today."]));
        let ex = executor().with_inferrer(Arc::new(LlmToolInferrer::new(llm)));
        let r = ex
            .execute(&input(Step::new(1, None, "weather?"), "weather?"), &ToolContext::new("c1"))
            .await;
        assert!(r.success);
        assert_eq!(r.text.as_deref(), Some("It is sunny today."));
        assert_eq!(r.tools_used, vec!["assistant"]);
    }
}
