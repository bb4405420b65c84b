//! Inbound event from either transport: a normalized Telegram message plus its classification.

use super::telegram::TelegramUpdate;
use super::{ChatId, MessageId};

/// Bot command recognized at the start of a message (`/start`, `/help@my_bot`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Unknown(String),
}

impl BotCommand {
    /// Parse a leading `/command[@bot]` token. Returns None for ordinary text.
    pub fn parse(text: &str) -> Option<Self> {
        let first = text.trim_start().split_whitespace().next()?;
        let name = first.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        if name.is_empty() {
            return None;
        }
        Some(match name.to_ascii_lowercase().as_str() {
            "start" => BotCommand::Start,
            "help" => BotCommand::Help,
            _ => BotCommand::Unknown(name.to_string()),
        })
    }
}

/// What the relay should do with an event, decided once when the event is normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Stateless directive; never touches the correlation store.
    Command(BotCommand),
    /// Ordinary user message (replies from non-operators included).
    UserMessage,
    /// Operator reply to a message in the operator chat.
    OperatorReply { replied_to: MessageId },
    /// Operator message without a reply reference; relayed like a user message.
    OperatorPlainMessage,
}

impl RelayEvent {
    pub fn classify(text: &str, is_from_operator: bool, replied_to: Option<MessageId>) -> Self {
        if let Some(cmd) = BotCommand::parse(text) {
            return RelayEvent::Command(cmd);
        }
        match (is_from_operator, replied_to) {
            (true, Some(replied_to)) => RelayEvent::OperatorReply { replied_to },
            (true, None) => RelayEvent::OperatorPlainMessage,
            (false, _) => RelayEvent::UserMessage,
        }
    }
}

/// One message handed from the transport to the relay engine.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub update_id: i64,
    /// Chat the message arrived in; replies to the user are sent here.
    pub source_channel_id: ChatId,
    pub sender_id: i64,
    pub is_from_operator: bool,
    pub message_id: MessageId,
    pub text: String,
    pub replied_to_message_id: Option<MessageId>,
    pub kind: RelayEvent,
    /// Original update JSON, kept for error reports.
    pub raw_envelope: serde_json::Value,
}

/// Why an update was dropped before reaching the relay.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("malformed update: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("update {0} carries no message")]
    NoMessage(i64),
    #[error("message in update {0} has no text")]
    NoText(i64),
    #[error("message in update {0} has no sender")]
    NoSender(i64),
}

/// Parse one raw update and normalize it. `operator_id` decides `is_from_operator`.
pub fn normalize_update(
    raw: serde_json::Value,
    operator_id: i64,
) -> Result<InboundEvent, TransportError> {
    let update: TelegramUpdate = serde_json::from_value(raw.clone())?;
    let message = update
        .message
        .ok_or(TransportError::NoMessage(update.update_id))?;
    let text = message
        .text
        .ok_or(TransportError::NoText(update.update_id))?;
    let sender_id = message
        .from
        .map(|u| u.id)
        .ok_or(TransportError::NoSender(update.update_id))?;
    let is_from_operator = sender_id == operator_id;
    let replied_to_message_id = message.reply_to_message.map(|m| m.message_id);
    let kind = RelayEvent::classify(&text, is_from_operator, replied_to_message_id);
    Ok(InboundEvent {
        update_id: update.update_id,
        source_channel_id: message.chat.id,
        sender_id,
        is_from_operator,
        message_id: message.message_id,
        text,
        replied_to_message_id,
        kind,
        raw_envelope: raw,
    })
}
