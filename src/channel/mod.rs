//! 消息通道：编排器向用户投递文本、文件、投票与位置的唯一出口
//!
//! 传输层（WhatsApp 等）实现 MessagingChannel；投票与位置有默认的文本渲染，不支持原生类型的通道无需实现。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::orchestrator::PollData;

#[cfg(feature = "whatsapp")]
pub mod whatsapp;

#[cfg(feature = "whatsapp")]
pub use whatsapp::WhatsappChannel;

/// 消息通道 trait
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn send_text(
        &self,
        conversation_id: &str,
        text: &str,
        quoted_id: Option<&str>,
        delay: Option<Duration>,
    ) -> anyhow::Result<()>;

    async fn send_file(
        &self,
        conversation_id: &str,
        url: &str,
        filename: &str,
        caption: &str,
        quoted_id: Option<&str>,
        delay: Option<Duration>,
    ) -> anyhow::Result<()>;

    async fn send_poll(
        &self,
        conversation_id: &str,
        poll: &PollData,
        quoted_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.send_text(conversation_id, &render_poll(poll), quoted_id, None)
            .await
    }

    async fn send_location(
        &self,
        conversation_id: &str,
        latitude: f64,
        longitude: f64,
        info: Option<&str>,
        quoted_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.send_text(
            conversation_id,
            &render_location(latitude, longitude, info),
            quoted_id,
            None,
        )
        .await
    }
}

pub fn render_poll(poll: &PollData) -> String {
    let mut out = format!("📊 {}", poll.question);
    for (i, opt) in poll.options.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, opt));
    }
    out
}

pub fn render_location(latitude: f64, longitude: f64, info: Option<&str>) -> String {
    let link = format!("https://maps.google.com/?q={latitude},{longitude}");
    match info {
        Some(info) if !info.trim().is_empty() => format!("📍 {}\n{}", info.trim(), link),
        _ => format!("📍 {link}"),
    }
}

/// 标准输出通道（命令行运行）
#[derive(Debug, Default)]
pub struct ConsoleChannel;

#[async_trait]
impl MessagingChannel for ConsoleChannel {
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
        match quoted_id {
            Some(q) => println!("[{conversation_id}] (↩ {q}) {text}"),
            None => println!("[{conversation_id}] {text}"),
        }
        Ok(())
    }

    async fn send_file(
        &self,
        conversation_id: &str,
        url: &str,
        filename: &str,
        caption: &str,
        _quoted_id: Option<&str>,
        delay: Option<Duration>,
    ) -> anyhow::Result<()> {
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if caption.is_empty() {
            println!("[{conversation_id}] 📎 {filename} <{url}>");
        } else {
            println!("[{conversation_id}] 📎 {filename} <{url}>\n    {caption}");
        }
        Ok(())
    }
}

/// 一次投递记录
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Text {
        conversation_id: String,
        text: String,
        quoted_id: Option<String>,
    },
    File {
        conversation_id: String,
        url: String,
        filename: String,
        caption: String,
        quoted_id: Option<String>,
    },
    Poll {
        conversation_id: String,
        poll: PollData,
    },
    Location {
        conversation_id: String,
        latitude: f64,
        longitude: f64,
        info: Option<String>,
    },
}

impl Delivery {
    pub fn text(&self) -> Option<&str> {
        match self {
            Delivery::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// 记录所有投递（测试与空跑用）
#[derive(Debug, Default)]
pub struct RecordingChannel {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, d: Delivery) {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(d);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.deliveries()
            .iter()
            .filter_map(|d| d.text().map(String::from))
            .collect()
    }

    pub fn clear(&self) {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl MessagingChannel for RecordingChannel {
    async fn send_text(
        &self,
        conversation_id: &str,
        text: &str,
        quoted_id: Option<&str>,
        _delay: Option<Duration>,
    ) -> anyhow::Result<()> {
        self.push(Delivery::Text {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            quoted_id: quoted_id.map(String::from),
        });
        Ok(())
    }

    async fn send_file(
        &self,
        conversation_id: &str,
        url: &str,
        filename: &str,
        caption: &str,
        quoted_id: Option<&str>,
        _delay: Option<Duration>,
    ) -> anyhow::Result<()> {
        self.push(Delivery::File {
            conversation_id: conversation_id.to_string(),
            url: url.to_string(),
            filename: filename.to_string(),
            caption: caption.to_string(),
            quoted_id: quoted_id.map(String::from),
        });
        Ok(())
    }

    async fn send_poll(
        &self,
        conversation_id: &str,
        poll: &PollData,
        _quoted_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.push(Delivery::Poll {
            conversation_id: conversation_id.to_string(),
            poll: poll.clone(),
        });
        Ok(())
    }

    async fn send_location(
        &self,
        conversation_id: &str,
        latitude: f64,
        longitude: f64,
        info: Option<&str>,
        _quoted_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.push(Delivery::Location {
            conversation_id: conversation_id.to_string(),
            latitude,
            longitude,
            info: info.map(String::from),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_poll() {
        let poll = PollData {
            question: "Lunch?".into(),
            options: vec!["Sushi".into(), "Tacos".into()],
        };
        assert_eq!(render_poll(&poll), "📊 Lunch?\n1. Sushi\n2. Tacos");
    }

    #[test]
    fn test_render_location() {
        assert_eq!(
            render_location(1.5, -2.25, Some(" Old Town ")),
            "📍 Old Town\nhttps://maps.google.com/?q=1.5,-2.25"
        );
        assert_eq!(
            render_location(0.0, 0.0, None),
            "📍 https://maps.google.com/?q=0,0"
        );
    }

    #[tokio::test]
    async fn test_default_poll_rendering_goes_through_send_text() {
        struct TextOnly(RecordingChannel);

        #[async_trait]
        impl MessagingChannel for TextOnly {
            async fn send_text(
                &self,
                c: &str,
                t: &str,
                q: Option<&str>,
                d: Option<Duration>,
            ) -> anyhow::Result<()> {
                self.0.send_text(c, t, q, d).await
            }
            async fn send_file(
                &self,
                c: &str,
                u: &str,
                f: &str,
                cap: &str,
                q: Option<&str>,
                d: Option<Duration>,
            ) -> anyhow::Result<()> {
                self.0.send_file(c, u, f, cap, q, d).await
            }
        }

        let ch = TextOnly(RecordingChannel::new());
        let poll = PollData {
            question: "Q".into(),
            options: vec!["a".into(), "b".into()],
        };
        ch.send_poll("c1", &poll, None).await.unwrap();
        assert_eq!(ch.0.texts(), vec!["📊 Q\n1. a\n2. b"]);
    }
}
