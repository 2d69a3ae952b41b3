//! Plan JSON Schema 生成（schemars）
//!
//! 用于将「合法 Plan」的 JSON 结构注入 Planner 的 system prompt，减少 LLM 输出格式错误。
//! Schema 直接从 `orchestrator::Plan` 派生，与反序列化格式保持一致。

use schemars::schema_for;

use crate::orchestrator::Plan;

/// 返回 Plan 的 JSON Schema 字符串，可拼入 system prompt
pub fn plan_schema_json() -> String {
    let schema = schema_for!(Plan);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
