//! Instant-message delivery through the Telegram Bot API
//! (`POST /bot<token>/sendMessage`).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::Transport;
use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use crate::notification::{one_line, Notification};

/// Content longer than this many characters is cut.
const CONTENT_PREVIEW_CHARS: usize = 150;

pub struct TelegramTransport {
    client: Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig, client: Client) -> Self {
        Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
            chat_id: config.destination.clone(),
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": render_text(notification),
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                // The request url embeds the bot token.
                Error::delivery(format!("telegram request failed: {}", e.without_url()))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::delivery(format!("telegram returned {status}: {body}")))
    }
}

/// `title - content preview`, a blank line, then the link.
pub fn render_text(notification: &Notification) -> String {
    let mut text = format!("{} - ", notification.subject());

    let content = notification.item.content.trim();
    if content.chars().count() > CONTENT_PREVIEW_CHARS {
        text.extend(content.chars().take(CONTENT_PREVIEW_CHARS));
        text.push_str("\n...");
    } else {
        text.push_str(content);
    }

    if let Some(link) = &notification.item.link {
        text.push_str("\n\n");
        text.push_str(&one_line(link));
    }
    text
}
