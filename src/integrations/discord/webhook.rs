// src/integrations/discord/webhook.rs
//
// Webhook emitter for diagnostics and announcements
//
// Components never reach for a global webhook: they receive an `Emitter`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::error::{AppError, AppResult};

/// Discord rejects longer message bodies
const MAX_MESSAGE_CHARS: usize = 2000;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn send(&self, message: &str) -> AppResult<()>;
}

/// Posts to a Discord webhook; logs only when no url is configured
pub struct WebhookEmitter {
    url: Option<String>,
    http_client: Client,
}

impl WebhookEmitter {
    pub fn new(url: Option<String>) -> AppResult<Self> {
        let http_client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { url, http_client })
    }
}

/// Trim to the webhook limit on a char boundary
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

#[async_trait]
impl Emitter for WebhookEmitter {
    async fn send(&self, message: &str) -> AppResult<()> {
        let url = match &self.url {
            Some(url) => url,
            None => {
                log::warn!("[WEBHOOK] (not configured) {}", message);
                return Ok(());
            }
        };

        let response = self
            .http_client
            .post(url)
            .json(&json!({ "content": truncate_message(message) }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Other(format!(
                "Webhook returned status: {}",
                response.status()
            )));
        }
        Ok(())
    }
}
