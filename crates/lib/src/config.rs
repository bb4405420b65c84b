//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.hush/config.json`) and environment.
//! Secrets and identities (bot token, operator and developer ids) are usually supplied
//! through the environment or a `.env` file rather than the config file.

use crate::channels::ChatId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Run mode, webhook listener and shutdown settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (Telegram bot credentials and webhook registration).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Operator/developer identities and user-facing texts.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Correlation store location.
    #[serde(default)]
    pub store: StoreConfig,
}

/// How updates reach the process: long-poll `getUpdates` or webhook POSTs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Long-poll getUpdates.
    #[default]
    Pull,

    /// Telegram POSTs updates to the registered webhook URL.
    Push,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Pull => "pull",
            TransportMode::Push => "push",
        }
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" | "poll" | "polling" => Ok(TransportMode::Pull),
            "push" | "webhook" => Ok(TransportMode::Push),
            other => Err(format!("unknown mode {:?} (expected \"pull\" or \"push\")", other)),
        }
    }
}

/// Gateway bind, port, mode and drain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Ingestion mode (default pull).
    #[serde(default)]
    pub mode: TransportMode,

    /// Port for the webhook listener (push mode only; default 8080).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address for the webhook listener (default "127.0.0.1", i.e. behind a TLS proxy).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Seconds to keep processing already-queued events after a shutdown signal.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_drain_timeout_secs() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// Bot API base URL (default https://api.telegram.org). Useful for a local Bot API server or tests.
    pub api_base: Option<String>,
    /// Externally reachable base URL for push mode (e.g. "https://relay.example.com"). The webhook
    /// path is appended. Overridden by HUSH_WEBHOOK_URL env when set.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token).
    pub webhook_secret: Option<String>,
}

/// Relay identities and texts. Templates accept `{user_id}` and `{text}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Operator ("admin") user id; also the chat relayed copies are sent to. Overridden by ADMIN_CHAT_ID.
    pub operator_id: Option<ChatId>,
    /// Chat that receives error reports. Overridden by DEVELOPER_CHAT_ID.
    pub developer_chat_id: Option<ChatId>,
    /// When set, every forward and reply is mirrored here. Overridden by AUDIT_CHAT_ID.
    pub audit_chat_id: Option<ChatId>,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_forward_template")]
    pub forward_template: String,
    #[serde(default = "default_reply_template")]
    pub reply_template: String,
    /// Audit copy of an operator reply.
    #[serde(default = "default_mirror_reply_template")]
    pub mirror_reply_template: String,
    #[serde(default = "default_ack_success")]
    pub ack_success: String,
    #[serde(default = "default_ack_not_found")]
    pub ack_not_found: String,
    #[serde(default = "default_ack_failure")]
    pub ack_failure: String,
    #[serde(default = "default_ack_unknown_command")]
    pub ack_unknown_command: String,
}

fn default_greeting() -> String {
    "Hello! Send me a message, and I'll forward it to the admin.".to_string()
}

fn default_forward_template() -> String {
    "🆕 New message from user ID {user_id}:\n\n{text}".to_string()
}

fn default_reply_template() -> String {
    "🆕 New message from the admin:\n\n{text}".to_string()
}

fn default_mirror_reply_template() -> String {
    "↩️ Reply to user ID {user_id}:\n\n{text}".to_string()
}

fn default_ack_success() -> String {
    "✅ Message sent successfully!".to_string()
}

fn default_ack_not_found() -> String {
    "User not found or message was not forwarded.".to_string()
}

fn default_ack_failure() -> String {
    "❌ Message could not be delivered. Please try again later.".to_string()
}

fn default_ack_unknown_command() -> String {
    "Unknown command. Send /start for help.".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            operator_id: None,
            developer_chat_id: None,
            audit_chat_id: None,
            greeting: default_greeting(),
            forward_template: default_forward_template(),
            reply_template: default_reply_template(),
            mirror_reply_template: default_mirror_reply_template(),
            ack_success: default_ack_success(),
            ack_not_found: default_ack_not_found(),
            ack_failure: default_ack_failure(),
            ack_unknown_command: default_ack_unknown_command(),
        }
    }
}

/// Correlation store config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// JSON-lines file holding relayed message id -> user id (default ~/.hush/correlations.jsonl).
    pub path: Option<PathBuf>,
}

/// Non-empty trimmed value of an environment variable.
fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Chat id from an environment variable; an unparsable value is an error rather than silently ignored.
fn env_chat_id(name: &str) -> Result<Option<ChatId>> {
    match env_trimmed(name) {
        Some(s) => s
            .parse::<ChatId>()
            .map(Some)
            .with_context(|| format!("{} is not a valid chat id: {:?}", name, s)),
        None => Ok(None),
    }
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    env_trimmed("TELEGRAM_BOT_TOKEN").or_else(|| {
        config
            .channels
            .telegram
            .bot_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the webhook base URL: env HUSH_WEBHOOK_URL overrides config.
pub fn resolve_webhook_url(config: &Config) -> Option<String> {
    env_trimmed("HUSH_WEBHOOK_URL").or_else(|| {
        config
            .channels
            .telegram
            .webhook_url
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Operator identity, developer chat and optional audit chat after env overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayIdentities {
    pub operator_id: ChatId,
    pub developer_chat_id: ChatId,
    pub audit_chat_id: Option<ChatId>,
}

/// Resolve relay identities: ADMIN_CHAT_ID, DEVELOPER_CHAT_ID and AUDIT_CHAT_ID override config.
/// Operator and developer ids are required.
pub fn resolve_identities(config: &Config) -> Result<RelayIdentities> {
    let operator_id = env_chat_id("ADMIN_CHAT_ID")?
        .or(config.relay.operator_id)
        .context("operator id not configured (set relay.operatorId or ADMIN_CHAT_ID)")?;
    let developer_chat_id = env_chat_id("DEVELOPER_CHAT_ID")?
        .or(config.relay.developer_chat_id)
        .context("developer chat id not configured (set relay.developerChatId or DEVELOPER_CHAT_ID)")?;
    let audit_chat_id = env_chat_id("AUDIT_CHAT_ID")?.or(config.relay.audit_chat_id);
    Ok(RelayIdentities {
        operator_id,
        developer_chat_id,
        audit_chat_id,
    })
}

/// Hush home directory (~/.hush), falling back to the working directory.
fn hush_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".hush"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HUSH_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| hush_dir().join("config.json"))
}

/// Resolve the correlation store path (config or ~/.hush/correlations.jsonl).
pub fn resolve_store_path(config: &Config) -> PathBuf {
    config
        .store
        .path
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| hush_dir().join("correlations.jsonl"))
}

/// Load config from the given path (or HUSH_CONFIG_PATH / default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
