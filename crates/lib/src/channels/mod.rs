//! Communication channels (Telegram).
//!
//! The Telegram client covers update ingestion (getUpdates, webhook registration) and
//! outbound sends. Updates are normalized into [`InboundEvent`]s before they reach the relay.

mod inbound;
mod messenger;
mod telegram;

pub use inbound::{normalize_update, BotCommand, InboundEvent, RelayEvent, TransportError};
pub use messenger::{Messenger, OutboundMessage, ParseMode};
pub use telegram::{TelegramChannel, TelegramChat, TelegramMessage, TelegramUpdate, TelegramUser};

/// Telegram chat id. For private chats this equals the user id.
pub type ChatId = i64;

/// Telegram message id (unique within a chat).
pub type MessageId = i64;

/// Errors from the messaging platform.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("telegram request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("telegram api error: {0}")]
    Api(String),
}
