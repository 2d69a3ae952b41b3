//! create_poll 工具：由问题与选项构造投票产物

use async_trait::async_trait;
use serde_json::Value;

use crate::orchestrator::PollData;
use crate::tools::{Tool, ToolContext, ToolResult};

/// 投票选项数量限制（与主流 IM 一致）
const MIN_OPTIONS: usize = 2;
const MAX_OPTIONS: usize = 12;

pub struct CreatePollTool;

#[async_trait]
impl Tool for CreatePollTool {
    fn name(&self) -> &str {
        "create_poll"
    }

    fn description(&self) -> &str {
        "Create a poll in the chat. Args: question (string), options (array of 2-12 strings)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "Poll question" },
                "options": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Answer options"
                }
            },
            "required": ["question", "options"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        let mut options: Vec<String> = Vec::new();
        for opt in args
            .get("options")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            if !options.iter().any(|o| o.eq_ignore_ascii_case(opt)) {
                options.push(opt.to_string());
            }
        }

        if options.len() < MIN_OPTIONS {
            return Ok(ToolResult::failure(format!(
                "create_poll: at least {MIN_OPTIONS} distinct options are required"
            )));
        }
        options.truncate(MAX_OPTIONS);

        Ok(ToolResult::ok().with_poll(PollData { question, options }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_dedupes_options() {
        let r = CreatePollTool
            .execute(
                serde_json::json!({"question": "Pizza?", "options": ["Yes", "yes", " No ", ""]}),
                &ToolContext::new("c"),
            )
            .await
            .unwrap();
        let poll = r.poll.unwrap();
        assert_eq!(poll.question, "Pizza?");
        assert_eq!(poll.options, vec!["Yes", "No"]);
    }

    #[tokio::test]
    async fn test_poll_needs_two_options() {
        let r = CreatePollTool
            .execute(
                serde_json::json!({"question": "Pizza?", "options": ["Yes"]}),
                &ToolContext::new("c"),
            )
            .await
            .unwrap();
        assert!(r.is_failure());
    }
}
