//! 计划与步骤结果的数据类型
//!
//! Plan / Step 的 JSON 格式沿用 Planner 的 camelCase（stepNumber）；StepResult 同时作为
//! LastCommand 快照的一部分持久化。

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::OrchestratorError;
use crate::tools::ToolResult;

/// 投票产物
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollData {
    pub question: String,
    pub options: Vec<String>,
}

/// 计划中的单个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// 从 1 开始连续编号
    pub step_number: usize,
    /// 工具名；为空时由单步推理根据 action 选择工具
    #[serde(default)]
    pub tool: Option<String>,
    /// 工具参数（prompt、provider、question 等）
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// 自然语言指令
    #[serde(default)]
    pub action: String,
}

impl Step {
    pub fn new(step_number: usize, tool: Option<&str>, action: impl Into<String>) -> Self {
        Self {
            step_number,
            tool: tool.map(String::from),
            parameters: Map::new(),
            action: action.into(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// 用于日志与错误消息的工具标签；未指定工具时为 "assistant"
    pub fn tool_label(&self) -> &str {
        self.tool.as_deref().unwrap_or("assistant")
    }
}

/// 计划：严格线性的步骤序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default, JsonSchema)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn from_json(json: &str) -> Result<Self, OrchestratorError> {
        let plan: Plan = serde_json::from_str(json)
            .map_err(|e| OrchestratorError::InvalidPlan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 步骤编号必须从 1 开始连续且唯一
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.steps.is_empty() {
            return Err(OrchestratorError::InvalidPlan("plan has no steps".into()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.step_number != i + 1 {
                return Err(OrchestratorError::InvalidPlan(format!(
                    "step numbers must be dense and 1-based: position {} has stepNumber {}",
                    i + 1,
                    step.step_number
                )));
            }
        }
        Ok(())
    }

    /// 按编号或工具名筛选步骤（并集），返回重新编号为 1..k 的新计划；原计划不变
    pub fn select(&self, step_numbers: &[usize], step_tools: &[String]) -> Plan {
        let numbers: HashSet<usize> = step_numbers.iter().copied().collect();
        let steps = self
            .steps
            .iter()
            .filter(|s| {
                numbers.contains(&s.step_number)
                    || s.tool.as_ref().is_some_and(|t| step_tools.iter().any(|w| w == t))
            })
            .cloned()
            .enumerate()
            .map(|(i, mut s)| {
                s.step_number = i + 1;
                s
            })
            .collect();
        Plan { steps }
    }
}

/// 单步执行结果（归一化后的产物形态）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    pub tools_used: Vec<String>,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn failure(tool: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            tools_used: vec![tool.to_string()],
            iterations: 1,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// 把工具原始输出归一化为 StepResult；text 缺失时回落到 data 的字符串形式
    pub fn from_tool_result(tool: &str, raw: ToolResult, iterations: u32) -> Self {
        if raw.is_failure() {
            let error = raw
                .error
                .unwrap_or_else(|| format!("{tool} reported failure without details"));
            let mut failed = Self::failure(tool, error);
            failed.iterations = iterations;
            failed.provider_used = raw.provider_used;
            return failed;
        }
        let text = raw.text.filter(|t| !t.trim().is_empty()).or_else(|| {
            raw.data.as_ref().map(|d| match d {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        });
        Self {
            success: true,
            text,
            image_url: raw.image_url,
            image_caption: raw.image_caption,
            video_url: raw.video_url,
            audio_url: raw.audio_url,
            poll: raw.poll,
            latitude: raw.latitude,
            longitude: raw.longitude,
            location_info: raw.location_info,
            provider_used: raw.provider_used,
            tools_used: vec![tool.to_string()],
            iterations,
            error: None,
        }
    }

    pub fn has_location(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// 产出的资产种类（按发送优先级）
    pub fn asset_kinds(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        if self.image_url.is_some() {
            kinds.push("image");
        }
        if self.video_url.is_some() {
            kinds.push("video");
        }
        if self.audio_url.is_some() {
            kinds.push("audio");
        }
        if self.poll.is_some() {
            kinds.push("poll");
        }
        if self.has_location() {
            kinds.push("location");
        }
        if self.text.as_deref().is_some_and(|t| !t.trim().is_empty()) {
            kinds.push("text");
        }
        kinds
    }
}

/// 一次顶层命令的运行选项（调用方提供，执行期间不可变）
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// 被引用（回复）的原始消息 ID
    pub quoted_message_id: Option<String>,
    /// 原始用户请求文本，用于预告引用
    pub original_request: Option<String>,
    /// 本轮已在上游展示过进度的工具，不再发预告（如音频已转写）
    pub skip_ack_tools: Vec<String>,
}

impl RunOptions {
    pub fn quoting(message_id: impl Into<String>) -> Self {
        Self {
            quoted_message_id: Some(message_id.into()),
            ..Default::default()
        }
    }

    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.original_request = Some(request.into());
        self
    }

    pub fn skip_ack_for(mut self, tool: impl Into<String>) -> Self {
        self.skip_ack_tools.push(tool.into());
        self
    }
}
