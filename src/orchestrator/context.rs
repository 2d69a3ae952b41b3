//! ContextThreader：把前序步骤的产出摘要拼到当前步骤指令前
//!
//! 摘要只含每步产出的资产种类与有界的文本摘录，不传完整内容。

use crate::config::ContextSection;
use crate::orchestrator::ack::excerpt;
use crate::orchestrator::{Step, StepResult};

/// 单步的不可变输入：原步骤 + 已拼好上下文的指令
#[derive(Debug, Clone, PartialEq)]
pub struct StepInput {
    pub step: Step,
    pub instruction: String,
}

#[derive(Debug, Clone)]
pub struct ContextThreader {
    excerpt_chars: usize,
}

impl Default for ContextThreader {
    fn default() -> Self {
        Self::new(&ContextSection::default())
    }
}

impl ContextThreader {
    pub fn new(config: &ContextSection) -> Self {
        Self {
            excerpt_chars: config.excerpt_chars.max(1),
        }
    }

    /// 前序步骤摘要，每步一行；`prior` 与 `steps` 按下标对应
    pub fn digest(&self, steps: &[Step], prior: &[StepResult]) -> String {
        prior
            .iter()
            .enumerate()
            .map(|(i, result)| {
                let (number, tool) = steps
                    .get(i)
                    .map(|s| (s.step_number, s.tool_label().to_string()))
                    .unwrap_or((i + 1, "assistant".to_string()));
                self.digest_line(number, &tool, result)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn digest_line(&self, number: usize, tool: &str, result: &StepResult) -> String {
        if !result.success {
            let err = result.error.as_deref().unwrap_or("unknown error");
            return format!(
                "Step {number} ({tool}): failed: {}",
                excerpt(&one_line(err), self.excerpt_chars)
            );
        }
        let assets: Vec<&str> = result
            .asset_kinds()
            .into_iter()
            .filter(|k| *k != "text")
            .collect();
        let mut line = format!("Step {number} ({tool}): ");
        if assets.is_empty() {
            line.push_str("completed");
        } else {
            line.push_str(&format!("produced {}", assets.join(", ")));
        }
        let text = result
            .text
            .as_deref()
            .or(result.image_caption.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(text) = text {
            line.push_str(&format!(
                "; text: \"{}\"",
                excerpt(&one_line(text), self.excerpt_chars)
            ));
        }
        line
    }

    /// 生成第 index 步（0 起）的指令；第一步原样返回 action
    pub fn enrich(&self, steps: &[Step], index: usize, prior: &[StepResult]) -> StepInput {
        let step = steps[index].clone();
        let instruction = if index == 0 || prior.is_empty() {
            step.action.clone()
        } else {
            format!(
                "CONTEXT from previous steps: {}\n\nCURRENT TASK: {}",
                self.digest(steps, &prior[..index.min(prior.len())]),
                step.action
            )
        };
        StepInput { step, instruction }
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;

    fn steps() -> Vec<Step> {
        vec![
            Step::new(1, Some("create_image"), "draw a lighthouse"),
            Step::new(2, Some("create_poll"), "ask which color"),
            Step::new(3, None, "summarize everything"),
        ]
    }

    #[test]
    fn test_first_step_gets_bare_action() {
        let t = ContextThreader::default();
        let input = t.enrich(&steps(), 0, &[]);
        assert_eq!(input.instruction, "draw a lighthouse");
    }

    #[test]
    fn test_later_step_sees_digest_of_prior_assets() {
        let t = ContextThreader::default();
        let image = StepResult::from_tool_result(
            "create_image",
            ToolResult::ok().with_image("https://x/1.png", Some("A red lighthouse".into())),
            1,
        );
        let failed = StepResult::failure("create_poll", "options missing");
        let input = t.enrich(&steps(), 2, &[image, failed]);
        assert_eq!(
            input.instruction,
            "CONTEXT from previous steps: Step 1 (create_image): produced image; text: \"A red lighthouse\"\n\
             Step 2 (create_poll): failed: options missing\n\nCURRENT TASK: summarize everything"
        );
        assert_eq!(input.step.step_number, 3);
    }

    #[test]
    fn test_digest_excerpt_is_bounded() {
        let t = ContextThreader::new(&ContextSection { excerpt_chars: 10 });
        let long = StepResult::from_tool_result("echo", ToolResult::ok_text("x".repeat(500)), 1);
        let digest = t.digest(&steps(), &[long]);
        assert_eq!(digest, format!("Step 1 (create_image): completed; text: \"{}…\"", "x".repeat(10)));
    }
}
