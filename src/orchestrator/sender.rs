//! ResultSender：步骤完成后立即把产物发给用户
//!
//! 发送顺序固定：图片 → 视频 → 音频 → 投票 → 位置 → 剩余文本。通道错误只记日志，不中断计划。

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::channel::MessagingChannel;
use crate::orchestrator::StepResult;

static BOILERPLATE_RE: OnceLock<Regex> = OnceLock::new();

/// 「已完成」一类的样板成功语
fn is_boilerplate(text: &str) -> bool {
    let re = BOILERPLATE_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\W*(done|success(ful(ly)?)?|completed?|all set|here you go|here it is|(your )?(image|picture|photo|video|audio|song|music|speech|poll)( (has been|was|is))? (created|generated|ready|edited|done)( successfully)?)\W*$",
        )
        .unwrap()
    });
    re.is_match(text.trim())
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// 本步实际发出的投递种类，按顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentKind {
    Image,
    Video,
    Audio,
    Poll,
    Location,
    Text,
}

pub struct ResultSender {
    channel: Arc<dyn MessagingChannel>,
}

impl ResultSender {
    pub fn new(channel: Arc<dyn MessagingChannel>) -> Self {
        Self { channel }
    }

    /// 发送一个成功步骤的全部产物，返回实际发出的种类
    pub async fn send_step_results(
        &self,
        conversation_id: &str,
        result: &StepResult,
        step_number: usize,
        quoted_id: Option<&str>,
    ) -> Vec<SentKind> {
        let mut sent = Vec::new();
        let caption = result
            .image_caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let mut captioned = false;

        if let Some(url) = result.image_url.as_deref() {
            let filename = format!("image_{step_number}.png");
            if self
                .file(conversation_id, url, &filename, caption.unwrap_or(""), quoted_id)
                .await
            {
                sent.push(SentKind::Image);
                captioned = caption.is_some();
            }
        }
        if let Some(url) = result.video_url.as_deref() {
            let filename = format!("video_{step_number}.mp4");
            if self.file(conversation_id, url, &filename, "", quoted_id).await {
                sent.push(SentKind::Video);
            }
        }
        if let Some(url) = result.audio_url.as_deref() {
            let filename = format!("audio_{step_number}.mp3");
            if self.file(conversation_id, url, &filename, "", quoted_id).await {
                sent.push(SentKind::Audio);
            }
        }
        if let Some(poll) = &result.poll {
            match self.channel.send_poll(conversation_id, poll, quoted_id).await {
                Ok(()) => sent.push(SentKind::Poll),
                Err(e) => {
                    tracing::warn!(conversation = %conversation_id, step = step_number, error = %e, "failed to send poll")
                }
            }
        }
        if let (Some(lat), Some(lon)) = (result.latitude, result.longitude) {
            match self
                .channel
                .send_location(conversation_id, lat, lon, result.location_info.as_deref(), quoted_id)
                .await
            {
                Ok(()) => sent.push(SentKind::Location),
                Err(e) => {
                    tracing::warn!(conversation = %conversation_id, step = step_number, error = %e, "failed to send location")
                }
            }
        }

        let text = result.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
        if let Some(text) = text {
            let duplicates_caption = captioned && caption.is_some_and(|c| same_text(c, text));
            let redundant = captioned && is_boilerplate(text);
            if duplicates_caption || redundant {
                tracing::debug!(conversation = %conversation_id, step = step_number, "suppressed redundant text");
            } else if self.text(conversation_id, text, quoted_id).await {
                sent.push(SentKind::Text);
            }
        }
        sent
    }

    /// 发送带步骤号与工具标签的错误行
    pub async fn send_step_failure(
        &self,
        conversation_id: &str,
        step_number: usize,
        tool: &str,
        error: &str,
        quoted_id: Option<&str>,
    ) {
        let text = format!("❌ Step {step_number} ({tool}) failed: {error}");
        self.text(conversation_id, &text, quoted_id).await;
    }

    async fn file(
        &self,
        conversation_id: &str,
        url: &str,
        filename: &str,
        caption: &str,
        quoted_id: Option<&str>,
    ) -> bool {
        match self
            .channel
            .send_file(conversation_id, url, filename, caption, quoted_id, None)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, file = %filename, error = %e, "failed to send file");
                false
            }
        }
    }

    async fn text(&self, conversation_id: &str, text: &str, quoted_id: Option<&str>) -> bool {
        match self.channel.send_text(conversation_id, text, quoted_id, None).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, error = %e, "failed to send text");
                false
            }
        }
    }
}
