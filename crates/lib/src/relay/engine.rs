//! Relay engine: one inbound event in, one [`RelayResult`] out.
//!
//! The engine keeps no state of its own. Routing depends only on the event and the
//! correlation store, so the same engine serves both transports.

use super::escalation::Escalator;
use crate::channels::{
    BotCommand, ChannelError, ChatId, InboundEvent, MessageId, Messenger, OutboundMessage,
    RelayEvent,
};
use crate::config::{RelayConfig, RelayIdentities};
use crate::store::{CorrelationEntry, CorrelationStore, StoreError};
use std::sync::Arc;

/// Failure inside a forward or reply transition. Always escalated.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("sending {what} to chat {chat_id} failed")]
    Send {
        what: &'static str,
        chat_id: ChatId,
        #[source]
        source: ChannelError,
    },
    #[error("recording correlation {relayed_message_id} -> {originating_user_id} failed")]
    Store {
        relayed_message_id: MessageId,
        originating_user_id: ChatId,
        #[source]
        source: StoreError,
    },
}

/// Why an event was answered with a negative acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Operator replied to a message the relay never forwarded.
    NotForwarded { replied_to: MessageId },
    UnknownCommand(String),
}

/// Outcome of processing one event.
#[derive(Debug)]
pub enum RelayResult {
    /// Start/help greeting sent.
    Greeted,
    /// User text copied to the operator chat and correlated.
    Forwarded(CorrelationEntry),
    /// Operator reply delivered to this user.
    Replied(ChatId),
    Rejected(RejectReason),
    Escalated(RelayError),
}

/// Identities and texts the engine needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Operator identity; also the chat relayed copies go to.
    pub operator_id: ChatId,
    /// Optional mirror of every forward and reply.
    pub audit_chat_id: Option<ChatId>,
    pub greeting: String,
    pub forward_template: String,
    pub reply_template: String,
    pub mirror_reply_template: String,
    pub ack_success: String,
    pub ack_not_found: String,
    pub ack_failure: String,
    pub ack_unknown_command: String,
}

impl RelaySettings {
    pub fn new(relay: &RelayConfig, identities: &RelayIdentities) -> Self {
        Self {
            operator_id: identities.operator_id,
            audit_chat_id: identities.audit_chat_id,
            greeting: relay.greeting.clone(),
            forward_template: relay.forward_template.clone(),
            reply_template: relay.reply_template.clone(),
            mirror_reply_template: relay.mirror_reply_template.clone(),
            ack_success: relay.ack_success.clone(),
            ack_not_found: relay.ack_not_found.clone(),
            ack_failure: relay.ack_failure.clone(),
            ack_unknown_command: relay.ack_unknown_command.clone(),
        }
    }
}

/// Fill `{user_id}` and `{text}` placeholders.
fn render(template: &str, user_id: ChatId, text: &str) -> String {
    template
        .replace("{user_id}", &user_id.to_string())
        .replace("{text}", text)
}

pub struct RelayEngine {
    settings: RelaySettings,
    store: Arc<dyn CorrelationStore>,
    messenger: Arc<dyn Messenger>,
    escalator: Escalator,
}

impl RelayEngine {
    pub fn new(
        settings: RelaySettings,
        store: Arc<dyn CorrelationStore>,
        messenger: Arc<dyn Messenger>,
        escalator: Escalator,
    ) -> Self {
        Self {
            settings,
            store,
            messenger,
            escalator,
        }
    }

    /// Process one event. Never fails: errors become an acknowledgment plus an escalation.
    pub async fn handle(&self, event: &InboundEvent) -> RelayResult {
        let result = match &event.kind {
            RelayEvent::Command(BotCommand::Start | BotCommand::Help) => self.greet(event).await,
            RelayEvent::Command(BotCommand::Unknown(name)) => {
                self.ack(event, &self.settings.ack_unknown_command).await;
                RelayResult::Rejected(RejectReason::UnknownCommand(name.clone()))
            }
            RelayEvent::UserMessage | RelayEvent::OperatorPlainMessage => {
                self.forward(event).await
            }
            RelayEvent::OperatorReply { replied_to } => self.reply(event, *replied_to).await,
        };
        match &result {
            RelayResult::Forwarded(entry) => log::info!(
                "update {}: forwarded from {} as {}",
                event.update_id,
                entry.originating_user_id,
                entry.relayed_message_id
            ),
            RelayResult::Replied(user) => {
                log::info!("update {}: operator reply delivered to {}", event.update_id, user)
            }
            RelayResult::Rejected(reason) => {
                log::info!("update {}: rejected ({:?})", event.update_id, reason)
            }
            RelayResult::Greeted => log::debug!("update {}: greeted", event.update_id),
            RelayResult::Escalated(_) => {
                log::warn!("update {}: failed and escalated", event.update_id)
            }
        }
        result
    }

    async fn greet(&self, event: &InboundEvent) -> RelayResult {
        let message = OutboundMessage::text(event.source_channel_id, self.settings.greeting.clone());
        if let Err(e) = self.messenger.send_message(message).await {
            log::warn!("greeting to {} failed: {}", event.source_channel_id, e);
        }
        RelayResult::Greeted
    }

    /// Copy the text into the operator chat, record the correlation, then acknowledge.
    async fn forward(&self, event: &InboundEvent) -> RelayResult {
        let user = event.source_channel_id;
        let operator_chat = self.settings.operator_id;
        let copy = render(&self.settings.forward_template, user, &event.text);
        let relayed_message_id = match self
            .messenger
            .send_message(OutboundMessage::text(operator_chat, copy.clone()))
            .await
        {
            Ok(id) => id,
            Err(source) => {
                return self
                    .fail(
                        event,
                        RelayError::Send {
                            what: "relayed copy",
                            chat_id: operator_chat,
                            source,
                        },
                    )
                    .await
            }
        };
        if let Err(source) = self.store.put(relayed_message_id, user).await {
            return self
                .fail(
                    event,
                    RelayError::Store {
                        relayed_message_id,
                        originating_user_id: user,
                        source,
                    },
                )
                .await;
        }
        self.mirror(copy).await;
        self.ack(event, &self.settings.ack_success).await;
        RelayResult::Forwarded(CorrelationEntry {
            relayed_message_id,
            originating_user_id: user,
        })
    }

    /// Route an operator reply to the user who sent the quoted copy.
    async fn reply(&self, event: &InboundEvent, replied_to: MessageId) -> RelayResult {
        let Some(user) = self.store.get(replied_to).await else {
            self.ack(event, &self.settings.ack_not_found).await;
            return RelayResult::Rejected(RejectReason::NotForwarded { replied_to });
        };
        let text = render(&self.settings.reply_template, user, &event.text);
        if let Err(source) = self
            .messenger
            .send_message(OutboundMessage::text(user, text))
            .await
        {
            return self
                .fail(
                    event,
                    RelayError::Send {
                        what: "operator reply",
                        chat_id: user,
                        source,
                    },
                )
                .await;
        }
        self.mirror(render(&self.settings.mirror_reply_template, user, &event.text))
            .await;
        self.ack(event, &self.settings.ack_success).await;
        RelayResult::Replied(user)
    }

    /// Negative ack to the initiator, one escalation report.
    async fn fail(&self, event: &InboundEvent, error: RelayError) -> RelayResult {
        self.ack(event, &self.settings.ack_failure).await;
        self.escalator.report(event, &error).await;
        RelayResult::Escalated(error)
    }

    /// Acknowledge to the sender, quoting their message. Ack failures are only logged;
    /// there is nobody left to tell.
    async fn ack(&self, event: &InboundEvent, text: &str) {
        let message =
            OutboundMessage::text(event.source_channel_id, text).replying_to(event.message_id);
        if let Err(e) = self.messenger.send_message(message).await {
            log::warn!(
                "acknowledgment for update {} to {} failed: {}",
                event.update_id,
                event.source_channel_id,
                e
            );
        }
    }

    async fn mirror(&self, text: String) {
        let Some(audit) = self.settings.audit_chat_id else {
            return;
        };
        if let Err(e) = self
            .messenger
            .send_message(OutboundMessage::text(audit, text))
            .await
        {
            log::warn!("audit mirror to {} failed: {}", audit, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_placeholders() {
        assert_eq!(
            render("ID {user_id}:\n\n{text}", 1001, "hello"),
            "ID 1001:\n\nhello"
        );
        assert_eq!(render("no placeholders", 1, "x"), "no placeholders");
    }
}
