/// Minimal Telegram Bot API client
/// Covers the three methods the watcher needs: getMe (liveness probe),
/// sendMessage and getUpdates (long polling for commands).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Long-poll wait requested from the Telegram side, in seconds.
pub const LONG_POLL_SECS: u64 = 30;

/// Production Bot API host.
pub const API_BASE: &str = "https://api.telegram.org";

/// Per-request client timeout. Must exceed LONG_POLL_SECS or every
/// getUpdates call would be cut off mid-poll.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Clone)]
pub struct TelegramApi {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl TelegramApi {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(token, API_BASE)
    }

    /// Same as `new` against an alternate API host; tests point this at a
    /// local endpoint.
    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            client,
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Liveness probe. A successful getMe confirms the token is valid and
    /// the API is reachable.
    pub async fn get_me(&self) -> Result<User> {
        let response = self
            .client
            .get(self.url("getMe"))
            .send()
            .await
            .context("getMe request failed")?;
        let body: ApiResponse<User> = response
            .json()
            .await
            .context("Invalid getMe response")?;
        if !body.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            );
        }
        body.result.context("getMe returned no user")
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        // Plain text on purpose: schedule expressions and raw page snippets
        // contain characters Telegram's Markdown parser rejects.
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let response = self
            .client
            .post(self.url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .context("sendMessage request failed")?;
        let body: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .context("Invalid sendMessage response")?;
        if !body.ok {
            anyhow::bail!(
                "sendMessage rejected: {}",
                body.description.unwrap_or_default()
            );
        }
        debug!("Telegram message delivered to chat {}", chat_id);
        Ok(())
    }

    /// Fetch updates newer than `offset` using long polling.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(self.url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", LONG_POLL_SECS.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .send()
            .await
            .context("getUpdates request failed")?;
        let body: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .context("Invalid getUpdates response")?;
        if !body.ok {
            anyhow::bail!(
                "getUpdates rejected: {}",
                body.description.unwrap_or_default()
            );
        }
        Ok(body.result.unwrap_or_default())
    }
}
