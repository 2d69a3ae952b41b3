//! 编排层：计划执行、单步执行、上下文串联、预告、结果发送与供应商回退
//!
//! 数据流：Plan → PlanExecutor →（每步）AckEmitter → StepExecutor（ToolExecutor / ProviderFallbackPolicy）
//! → ResultSender → RetryLedger 记录快照。

pub mod ack;
pub mod context;
pub mod executor;
pub mod fallback;
pub mod infer;
pub mod sender;
pub mod step;
pub mod types;

pub use ack::{tool_label, AckEmitter};
pub use context::{ContextThreader, StepInput};
pub use executor::{PlanExecutor, PlanOutcome, RunOutcome, SingleOutcome};
pub use fallback::{AttemptLedger, FallbackOutcome, ProviderAttempt, ProviderFallbackPolicy};
pub use infer::{parse_llm_output, LlmToolInferrer, PlannerOutput, ToolCall, ToolInferrer};
pub use sender::{ResultSender, SentKind};
pub use step::StepExecutor;
pub use types::{Plan, PollData, RunOptions, Step, StepResult};
