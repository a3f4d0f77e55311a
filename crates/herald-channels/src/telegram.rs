//! Telegram Bot API channel — message sending via `sendMessage`.
//!
//! The recipient's external handle is its Telegram chat id. Markdown
//! metacharacters in the notification text are escaped so participant
//! supplied content cannot break formatting.

use async_trait::async_trait;
use serde::Deserialize;

use herald_core::{DeliveryChannel, HeraldError, Result, TelegramChannelConfig};

/// Telegram Bot API delivery channel.
pub struct TelegramChannel {
    config: TelegramChannelConfig,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.config.bot_token, method
        )
    }

    /// Verify the bot token by calling `getMe`.
    pub async fn check(&self) -> Result<String> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| HeraldError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| HeraldError::Channel(format!("Invalid getMe response: {e}")))?;
        body.result
            .and_then(|u| u.username)
            .ok_or_else(|| HeraldError::Channel("No bot info".into()))
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": escape_markdown(text),
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| HeraldError::Channel(format!("sendMessage failed: {e}")))?;

        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| HeraldError::Channel(format!("Invalid send response: {e}")))?;

        if !result.ok {
            return Err(HeraldError::Channel(format!(
                "Telegram API error: {}",
                result.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, handle: &str, text: &str) -> Result<()> {
        self.send_message(handle, text).await
    }
}

/// Escape Telegram Markdown metacharacters in user-supplied text.
fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Deserialize)]
struct TelegramApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    #[allow(dead_code)]
    id: i64,
    username: Option<String>,
}
