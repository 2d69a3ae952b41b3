//! AckEmitter：执行前的简短预告
//!
//! 步骤预告在工具执行前同步发送，说明即将运行的工具（及显式指定的供应商），并引用原始请求；
//! 供应商回退时在第二次及之后的尝试前发送「改用 X」预告。

use std::collections::HashSet;
use std::sync::Arc;

use crate::channel::MessagingChannel;
use crate::config::AckSection;
use crate::orchestrator::{RunOptions, Step};
use crate::tools::pinned_provider;

pub struct AckEmitter {
    channel: Arc<dyn MessagingChannel>,
    enabled: bool,
    quote_chars: usize,
    skip_tools: HashSet<String>,
}

impl AckEmitter {
    pub fn new(channel: Arc<dyn MessagingChannel>, config: &AckSection) -> Self {
        Self {
            channel,
            enabled: config.enabled,
            quote_chars: config.quote_chars,
            skip_tools: config.skip_tools.iter().cloned().collect(),
        }
    }

    pub fn with_defaults(channel: Arc<dyn MessagingChannel>) -> Self {
        Self::new(channel, &AckSection::default())
    }

    pub fn channel(&self) -> &Arc<dyn MessagingChannel> {
        &self.channel
    }

    /// 是否应为该步骤发预告：需有明确工具，且不在配置或调用方提供的跳过列表中
    pub fn should_ack(&self, step: &Step, opts: &RunOptions) -> bool {
        let Some(tool) = step.tool.as_deref() else {
            return false;
        };
        self.enabled
            && !self.skip_tools.contains(tool)
            && !opts.skip_ack_tools.iter().any(|t| t == tool)
    }

    /// 发送步骤预告；返回是否实际发送
    pub async fn step_ack(&self, conversation_id: &str, step: &Step, opts: &RunOptions) -> bool {
        if !self.should_ack(step, opts) {
            return false;
        }
        let text = self.step_ack_text(step, opts);
        if let Err(e) = self
            .channel
            .send_text(conversation_id, &text, opts.quoted_message_id.as_deref(), None)
            .await
        {
            tracing::warn!(conversation = %conversation_id, error = %e, "failed to send step ack");
            return false;
        }
        true
    }

    pub fn step_ack_text(&self, step: &Step, opts: &RunOptions) -> String {
        let tool = step.tool_label();
        let mut text = tool_label(tool);
        if let Some(provider) = pinned_provider(&step.parameters) {
            text.push_str(&format!(" with {provider}"));
        }
        text.push_str("...");
        // 没有可引用的消息 ID 时，在正文里摘录原始请求
        if opts.quoted_message_id.is_none() {
            if let Some(req) = opts.original_request.as_deref().filter(|r| !r.trim().is_empty()) {
                text.push_str(&format!("\n> \"{}\"", excerpt(req.trim(), self.quote_chars)));
            }
        }
        text
    }

    /// 回退链中第二次及之后尝试前的预告，附带上一个供应商的失败原因
    pub async fn provider_ack(
        &self,
        conversation_id: &str,
        tool: &str,
        provider: &str,
        previous_failure: Option<&str>,
        quoted_id: Option<&str>,
    ) {
        if !self.enabled {
            return;
        }
        let text = match previous_failure {
            Some(prev) => format!("{prev}\n🔄 Trying {provider} ({tool})..."),
            None => format!("🔄 Trying {provider} ({tool})..."),
        };
        if let Err(e) = self
            .channel
            .send_text(conversation_id, &text, quoted_id, None)
            .await
        {
            tracing::warn!(conversation = %conversation_id, error = %e, "failed to send provider ack");
        }
    }
}

/// 按工具名关键字生成预告标签
pub fn tool_label(tool: &str) -> String {
    let t = tool.to_lowercase();
    let label = if t.contains("edit") {
        "✏️ Editing the image"
    } else if t.contains("image") {
        "🎨 Creating an image"
    } else if t.contains("video") {
        "🎬 Creating a video"
    } else if t.contains("music") || t.contains("song") {
        "🎵 Composing music"
    } else if t.contains("speech") || t.contains("tts") || t.contains("voice") {
        "🗣️ Generating speech"
    } else if t.contains("poll") {
        "📊 Creating a poll"
    } else if t.contains("location") {
        "📍 Looking up the location"
    } else if t.contains("schedule") {
        "⏰ Scheduling the message"
    } else if t.contains("search") {
        "🔍 Searching"
    } else {
        return format!("⚙️ Running {tool}");
    };
    label.to_string()
}

pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}…", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;

    fn emitter(channel: Arc<RecordingChannel>) -> AckEmitter {
        AckEmitter::with_defaults(channel)
    }

    #[tokio::test]
    async fn test_step_ack_names_tool_and_provider() {
        let ch = Arc::new(RecordingChannel::new());
        let ack = emitter(ch.clone());
        let step = Step::new(1, Some("create_image"), "draw").with_param("provider", "openai");
        let opts = RunOptions::default().with_request("draw me a red fox");

        assert!(ack.step_ack("c1", &step, &opts).await);
        assert_eq!(
            ch.texts(),
            vec!["🎨 Creating an image with openai...\n> \"draw me a red fox\""]
        );
    }

    #[test]
    fn test_step_ack_reads_service_key_like_the_tool() {
        let ack = emitter(Arc::new(RecordingChannel::new()));
        let step = Step::new(1, Some("create_video"), "animate").with_param("service", " kling ");
        assert_eq!(
            ack.step_ack_text(&step, &RunOptions::default()),
            "🎬 Creating a video with kling..."
        );
        let blank = Step::new(1, Some("create_video"), "animate").with_param("provider", "  ");
        assert_eq!(ack.step_ack_text(&blank, &RunOptions::default()), "🎬 Creating a video...");
    }

    #[tokio::test]
    async fn test_step_ack_quotes_by_id_when_available() {
        let ch = Arc::new(RecordingChannel::new());
        let ack = emitter(ch.clone());
        let step = Step::new(1, Some("create_video"), "animate");
        let opts = RunOptions::quoting("msg-7").with_request("animate it");

        ack.step_ack("c1", &step, &opts).await;
        match &ch.deliveries()[0] {
            crate::channel::Delivery::Text { text, quoted_id, .. } => {
                assert_eq!(text, "🎬 Creating a video...");
                assert_eq!(quoted_id.as_deref(), Some("msg-7"));
            }
            other => panic!("unexpected delivery {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_step_ack_skipped() {
        let ch = Arc::new(RecordingChannel::new());
        let ack = emitter(ch.clone());
        let opts = RunOptions::default().skip_ack_for("transcribe_audio");

        let skipped = Step::new(1, Some("transcribe_audio"), "transcribe");
        let no_tool = Step::new(2, None, "say hi");
        assert!(!ack.step_ack("c1", &skipped, &opts).await);
        assert!(!ack.step_ack("c1", &no_tool, &opts).await);
        assert!(ch.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_ack_sends_nothing() {
        let ch = Arc::new(RecordingChannel::new());
        let cfg = AckSection {
            enabled: false,
            ..Default::default()
        };
        let ack = AckEmitter::new(ch.clone(), &cfg);
        ack.provider_ack("c1", "create_image", "grok", None, None).await;
        assert!(ch.deliveries().is_empty());
    }

    #[test]
    fn test_tool_labels() {
        assert_eq!(tool_label("edit_image"), "✏️ Editing the image");
        assert_eq!(tool_label("create_music"), "🎵 Composing music");
        assert_eq!(tool_label("translate"), "⚙️ Running translate");
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("héllo world", 5), "héllo…");
        assert_eq!(excerpt("short", 10), "short");
    }
}
