//! LastCommand：每个会话最近一次顶层命令的可重放记录
//!
//! 新格式是带 `kind` 标签的 JSON；旧存储里的三种形态（裸参数、`{toolArgs, result}`、
//! `{isMultiStep, plan, stepResults}`）只在加载时解析一次，之后统一按枚举处理。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::OrchestratorError;
use crate::orchestrator::{Plan, StepResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LastCommand {
    #[serde(rename_all = "camelCase")]
    SingleStep {
        tool: String,
        args: Value,
        #[serde(default)]
        result: Option<StepResult>,
    },
    #[serde(rename_all = "camelCase")]
    MultiStep {
        plan: Plan,
        #[serde(default)]
        step_results: Vec<StepResult>,
    },
}

impl LastCommand {
    pub fn single(tool: impl Into<String>, args: Value, result: Option<StepResult>) -> Self {
        Self::SingleStep {
            tool: tool.into(),
            args,
            result,
        }
    }

    pub fn multi(plan: Plan, step_results: Vec<StepResult>) -> Self {
        Self::MultiStep { plan, step_results }
    }

    pub fn is_multi_step(&self) -> bool {
        matches!(self, Self::MultiStep { .. })
    }

    /// 简短描述，用于日志与 CLI 展示
    pub fn summary(&self) -> String {
        match self {
            Self::SingleStep { tool, .. } => format!("single-step {tool}"),
            Self::MultiStep { plan, .. } => {
                let tools: Vec<&str> = plan.steps.iter().map(|s| s.tool_label()).collect();
                format!("{}-step plan [{}]", plan.len(), tools.join(", "))
            }
        }
    }

    pub fn to_json(&self) -> Result<String, OrchestratorError> {
        Ok(serde_json::to_string(self)?)
    }

    /// 从存储解析；`tool` 是与载荷分开存放的工具名（旧格式需要）
    pub fn from_stored(tool: Option<&str>, payload: &str) -> Result<Self, OrchestratorError> {
        let raw: Value = serde_json::from_str(payload)?;
        Self::from_stored_value(tool, raw)
    }

    pub fn from_stored_value(tool: Option<&str>, raw: Value) -> Result<Self, OrchestratorError> {
        let Value::Object(obj) = raw else {
            return Err(OrchestratorError::MalformedCommand(
                "stored command is not a JSON object".into(),
            ));
        };

        if obj.contains_key("kind") {
            let cmd: LastCommand = serde_json::from_value(Value::Object(obj))?;
            if let Self::MultiStep { plan, .. } = &cmd {
                plan.validate()
                    .map_err(|e| OrchestratorError::MalformedCommand(e.to_string()))?;
            }
            return Ok(cmd);
        }

        if obj.get("isMultiStep").and_then(Value::as_bool) == Some(true) {
            let plan_value = obj.get("plan").cloned().ok_or_else(|| {
                OrchestratorError::MalformedCommand("multi-step command without plan".into())
            })?;
            let plan: Plan = serde_json::from_value(plan_value)?;
            plan.validate()
                .map_err(|e| OrchestratorError::MalformedCommand(e.to_string()))?;
            let step_results = match obj.get("stepResults") {
                Some(v) => serde_json::from_value(v.clone())?,
                None => Vec::new(),
            };
            return Ok(Self::MultiStep { plan, step_results });
        }

        let tool = tool
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| obj.get("tool").and_then(Value::as_str))
            .ok_or_else(|| {
                OrchestratorError::MalformedCommand("single-step command without tool".into())
            })?
            .to_string();

        if let Some(args) = obj.get("toolArgs") {
            let result = match obj.get("result") {
                Some(Value::Null) | None => None,
                Some(v) => serde_json::from_value(v.clone()).ok(),
            };
            return Ok(Self::SingleStep {
                tool,
                args: args.clone(),
                result,
            });
        }

        // 最早的格式：载荷就是参数本身
        let mut args = obj;
        args.remove("tool");
        Ok(Self::SingleStep {
            tool,
            args: Value::Object(args),
            result: None,
        })
    }
}
