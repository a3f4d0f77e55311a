//! Generic HTTP webhook channel — JSON POST per recipient.
//!
//! Useful for deployments that bridge to an in-house bot or a platform
//! Herald has no native channel for. The receiving end is expected to
//! answer with a 2xx; anything else is a channel failure.

use async_trait::async_trait;
use serde::Serialize;

use herald_core::{DeliveryChannel, HeraldError, Result, WebhookChannelConfig};

/// Outbound webhook delivery channel.
pub struct WebhookChannel {
    config: WebhookChannelConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    handle: &'a str,
    text: &'a str,
}

impl WebhookChannel {
    pub fn new(config: WebhookChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, handle: &str, text: &str) -> Result<()> {
        let mut req = self
            .client
            .post(&self.config.url)
            .json(&WebhookPayload { handle, text });
        for (key, value) in &self.config.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| HeraldError::Channel(format!("Webhook POST failed: {e}")))?;
        if !response.status().is_success() {
            return Err(HeraldError::Channel(format!(
                "Webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
