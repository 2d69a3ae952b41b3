//! schedule_message 工具：定时发送消息
//!
//! 任务本身写入外部 TaskStore（持久化任务库，非本模块职责）。Planner 在同一轮里可能重复发出
//! 相同的调度调用，因此按 (会话, 消息, 时间, 收件人) 做短时幂等缓存：窗口内重复调用直接返回首次结果。

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::tools::{Tool, ToolContext, ToolResult};

/// 已持久化的定时任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub conversation_id: String,
    pub recipient: String,
    pub message: String,
    pub send_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// 定时任务存储接口
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: ScheduledTask) -> Result<ScheduledTask, String>;

    async fn list(&self, conversation_id: &str) -> Vec<ScheduledTask>;
}

/// 内存任务存储
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<Vec<ScheduledTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: ScheduledTask) -> Result<ScheduledTask, String> {
        self.tasks.write().await.push(task.clone());
        Ok(task)
    }

    async fn list(&self, conversation_id: &str) -> Vec<ScheduledTask> {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

type Slot<V> = Arc<tokio::sync::Mutex<Option<(Instant, V)>>>;

/// 短时幂等缓存：每个 key 一把异步锁，检查与写入在锁内完成；条目数超过阈值时顺带清理过期项
pub struct IdempotencyCache<K, V> {
    window: Duration,
    gc_threshold: usize,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> IdempotencyCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(window: Duration, gc_threshold: usize) -> Self {
        Self {
            window,
            gc_threshold,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// 窗口内命中则返回缓存值；否则执行 create，仅缓存成功结果。第二个返回值表示是否命中缓存。
    pub async fn get_or_create<F, Fut, E>(&self, key: K, create: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key).or_default().clone()
        };

        let mut entry = slot.lock().await;
        if let Some((at, value)) = entry.as_ref() {
            if at.elapsed() < self.window {
                return Ok((value.clone(), true));
            }
        }
        let value = create().await?;
        *entry = Some((Instant::now(), value.clone()));
        drop(entry);

        self.collect_garbage();
        Ok((value, false))
    }

    fn collect_garbage(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.len() <= self.gc_threshold {
            return;
        }
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(entry) => matches!(entry.as_ref(), Some((at, _)) if at.elapsed() < self.window),
            // 正在使用中的条目保留
            Err(_) => true,
        });
        tracing::debug!(removed = before - slots.len(), "idempotency cache collected");
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScheduleKey {
    conversation: String,
    message: String,
    time: String,
    recipient: String,
}

/// 调度工具
pub struct ScheduleMessageTool {
    store: Arc<dyn TaskStore>,
    cache: IdempotencyCache<ScheduleKey, ToolResult>,
}

impl ScheduleMessageTool {
    pub fn new(store: Arc<dyn TaskStore>, dedup_window_secs: u64, gc_threshold: usize) -> Self {
        Self::with_window(store, Duration::from_secs(dedup_window_secs), gc_threshold)
    }

    pub fn with_window(store: Arc<dyn TaskStore>, window: Duration, gc_threshold: usize) -> Self {
        Self {
            store,
            cache: IdempotencyCache::new(window, gc_threshold),
        }
    }
}

/// 解析 RFC3339 或 "YYYY-MM-DD HH:MM[:SS]"（按 UTC）
pub fn parse_send_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|n| n.and_utc())
}

#[async_trait]
impl Tool for ScheduleMessageTool {
    fn name(&self) -> &str {
        "schedule_message"
    }

    fn description(&self) -> &str {
        "Schedule a message to be sent later. Args: message (string), time (RFC3339 or 'YYYY-MM-DD HH:MM' UTC), recipient (optional, defaults to this chat)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "Text to send" },
                "time": { "type": "string", "description": "When to send it" },
                "recipient": { "type": "string", "description": "Target chat or contact" }
            },
            "required": ["message", "time"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, String> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let raw_time = args.get("time").and_then(|v| v.as_str()).unwrap_or("");
        let recipient = args
            .get("recipient")
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(ctx.conversation_id.as_str())
            .to_string();

        let Some(send_at) = parse_send_time(raw_time) else {
            return Ok(ToolResult::failure(format!(
                "schedule_message: cannot parse time '{raw_time}'"
            )));
        };
        if send_at <= Utc::now() {
            return Ok(ToolResult::failure(format!(
                "schedule_message: {} is in the past",
                send_at.to_rfc3339()
            )));
        }

        let key = ScheduleKey {
            conversation: ctx.conversation_id.clone(),
            message: message.clone(),
            time: send_at.to_rfc3339(),
            recipient: recipient.clone(),
        };

        let store = self.store.clone();
        let conversation_id = ctx.conversation_id.clone();
        let (result, cached) = self
            .cache
            .get_or_create(key, || async move {
                let task = ScheduledTask {
                    id: format!("sched_{}", uuid::Uuid::new_v4()),
                    conversation_id,
                    recipient,
                    message,
                    send_at,
                    created_at: Utc::now(),
                };
                let task = store.create(task).await?;
                Ok::<_, String>(
                    ToolResult::ok_text(format!(
                        "⏰ Scheduled message to {} at {}",
                        task.recipient,
                        task.send_at.format("%Y-%m-%d %H:%M UTC")
                    ))
                    .with_data(serde_json::json!({ "taskId": task.id })),
                )
            })
            .await?;

        if cached {
            tracing::info!(conversation = %ctx.conversation_id, "duplicate schedule call absorbed");
        }
        Ok(result)
    }
}
