//! Telegram channel: getUpdates long poll, webhook registration and sendMessage via Bot API.

use super::messenger::{Messenger, OutboundMessage};
use super::{ChannelError, ChatId, MessageId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Extra time on top of the long-poll timeout before the HTTP request itself gives up.
const LONG_POLL_SLACK: Duration = Duration::from_secs(10);

/// Only plain messages are relayed; other update kinds are not requested.
const ALLOWED_UPDATES: &[&str] = &["message"];

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: MessageId,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: ChatId,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

/// Telegram Bot API client.
pub struct TelegramChannel {
    token: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// `api_base` defaults to the public Bot API endpoint.
    pub fn new(token: impl Into<String>, api_base: Option<String>) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_string());
        Self {
            token: token.into(),
            api_base,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// POST a Bot API method and unwrap the `{ ok, result, description }` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, ChannelError> {
        let mut req = self.client.post(self.api_url(method)).json(body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;
        match serde_json::from_str::<ApiResponse<T>>(&text) {
            Ok(ApiResponse {
                ok: true,
                result: Some(result),
                ..
            }) => Ok(result),
            Ok(ApiResponse { description, .. }) => Err(ChannelError::Api(format!(
                "{} failed: {} {}",
                method,
                status,
                description.unwrap_or_default()
            ))),
            Err(_) => Err(ChannelError::Api(format!(
                "{} failed: {} {}",
                method, status, text
            ))),
        }
    }

    /// Call getUpdates (long poll). Returns raw update objects so one malformed update
    /// does not spoil the whole batch.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<serde_json::Value>, ChannelError> {
        let mut body = serde_json::json!({
            "timeout": timeout_secs,
            "allowed_updates": ALLOWED_UPDATES,
        });
        if let Some(off) = offset {
            body["offset"] = serde_json::Value::from(off);
        }
        self.call(
            "getUpdates",
            &body,
            Some(Duration::from_secs(timeout_secs) + LONG_POLL_SLACK),
        )
        .await
    }

    /// Set webhook URL (and optional secret). While set, Telegram POSTs updates to the URL
    /// and getUpdates is refused.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": ALLOWED_UPDATES,
        });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        let _: bool = self.call("setWebhook", &body, None).await?;
        Ok(())
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        let _: bool = self
            .call("deleteWebhook", &serde_json::json!({}), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Messenger for TelegramChannel {
    async fn send_message(&self, message: OutboundMessage) -> Result<MessageId, ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": message.chat_id,
            "text": message.text,
        });
        if let Some(mode) = message.parse_mode {
            body["parse_mode"] = serde_json::Value::String(mode.as_str().to_string());
        }
        if let Some(id) = message.reply_to {
            body["reply_parameters"] = serde_json::json!({
                "message_id": id,
                "allow_sending_without_reply": true,
            });
        }
        let sent: SentMessage = self.call("sendMessage", &body, None).await?;
        Ok(sent.message_id)
    }
}
