//! WhatsApp Cloud API 出站通道
//!
//! 文本按 4000 字符分段发送；文件以媒体链接消息发送（image / video / audio / document）；
//! 引用回复通过 `context.message_id` 实现。Cloud API 没有原生投票，投票走默认文本渲染。
//!
//! 环境变量:
//! - WHATSAPP_ACCESS_TOKEN: Meta WhatsApp API 访问令牌
//! - WHATSAPP_PHONE_NUMBER_ID: 企业电话号码 ID

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::channel::MessagingChannel;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";
/// WhatsApp 单条消息上限 4096，留出余量
const MAX_TEXT_CHARS: usize = 4000;

pub struct WhatsappChannel {
    client: reqwest::Client,
    access_token: String,
    phone_number_id: String,
    api_base: String,
}

impl WhatsappChannel {
    pub fn new(access_token: impl Into<String>, phone_number_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.into(),
            phone_number_id: phone_number_id.into(),
            api_base: GRAPH_API_BASE.to_string(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let access_token = std::env::var("WHATSAPP_ACCESS_TOKEN")
            .map_err(|_| anyhow::anyhow!("WHATSAPP_ACCESS_TOKEN must be set"))?;
        let phone_number_id = std::env::var("WHATSAPP_PHONE_NUMBER_ID")
            .map_err(|_| anyhow::anyhow!("WHATSAPP_PHONE_NUMBER_ID must be set"))?;
        Ok(Self::new(access_token, phone_number_id))
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    async fn post(&self, to: &str, quoted_id: Option<&str>, mut body: Value) -> anyhow::Result<()> {
        body["messaging_product"] = json!("whatsapp");
        body["to"] = json!(to.replace('+', ""));
        if let Some(id) = quoted_id {
            body["context"] = json!({ "message_id": id });
        }
        let url = format!("{}/{}/messages", self.api_base, self.phone_number_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let text = resp.text().await?;
            anyhow::bail!("WhatsApp API error: {}", text);
        }
        Ok(())
    }
}

/// 按字符分段
pub fn chunk_text(body: &str, max_chars: usize) -> Vec<String> {
    if body.chars().count() <= max_chars {
        return vec![body.to_string()];
    }
    body.chars()
        .collect::<Vec<_>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

/// 按文件扩展名选择媒体消息类型
fn media_kind(filename: &str) -> &'static str {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "webp" => "image",
        "mp4" | "3gp" | "mov" => "video",
        "mp3" | "ogg" | "aac" | "m4a" | "amr" => "audio",
        _ => "document",
    }
}

fn media_body(url: &str, filename: &str, caption: &str) -> Value {
    let kind = media_kind(filename);
    let mut media = json!({ "link": url });
    // audio 不支持 caption
    if kind != "audio" && !caption.is_empty() {
        media["caption"] = json!(caption);
    }
    if kind == "document" {
        media["filename"] = json!(filename);
    }
    let mut body = json!({ "type": kind });
    body[kind] = media;
    body
}

#[async_trait]
impl MessagingChannel for WhatsappChannel {
    async fn send_text(
        &self,
        conversation_id: &str,
        text: &str,
        quoted_id: Option<&str>,
        delay: Option<Duration>,
    ) -> anyhow::Result<()> {
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        for (i, chunk) in chunk_text(text, MAX_TEXT_CHARS).into_iter().enumerate() {
            // 只有第一段引用原消息
            let quoted = if i == 0 { quoted_id } else { None };
            self.post(
                conversation_id,
                quoted,
                json!({ "type": "text", "text": { "body": chunk } }),
            )
            .await?;
        }
        Ok(())
    }

    async fn send_file(
        &self,
        conversation_id: &str,
        url: &str,
        filename: &str,
        caption: &str,
        quoted_id: Option<&str>,
        delay: Option<Duration>,
    ) -> anyhow::Result<()> {
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        self.post(conversation_id, quoted_id, media_body(url, filename, caption))
            .await?;
        if media_kind(filename) == "audio" && !caption.is_empty() {
            self.send_text(conversation_id, caption, None, None).await?;
        }
        Ok(())
    }

    async fn send_location(
        &self,
        conversation_id: &str,
        latitude: f64,
        longitude: f64,
        info: Option<&str>,
        quoted_id: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut location = json!({ "latitude": latitude, "longitude": longitude });
        if let Some(info) = info.filter(|i| !i.trim().is_empty()) {
            location["name"] = json!(info.trim());
        }
        self.post(
            conversation_id,
            quoted_id,
            json!({ "type": "location", "location": location }),
        )
        .await
    }
}
