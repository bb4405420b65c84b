//! Outbound send capability used by the relay engine and escalation reporter.

use super::{ChannelError, ChatId, MessageId};
use async_trait::async_trait;

/// Text formatting mode for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
        }
    }
}

/// A message to send: target chat, text, optional formatting and quoted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub parse_mode: Option<ParseMode>,
    pub reply_to: Option<MessageId>,
}

impl OutboundMessage {
    /// Plain text message.
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: None,
            reply_to: None,
        }
    }

    /// HTML-formatted message. Caller is responsible for escaping.
    pub fn html(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            parse_mode: Some(ParseMode::Html),
            ..Self::text(chat_id, text)
        }
    }

    /// Quote the given message in the same chat.
    pub fn replying_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// Sends messages to the platform and returns the id the platform assigned.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, message: OutboundMessage) -> Result<MessageId, ChannelError>;
}
