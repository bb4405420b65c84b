//! Push mode: webhook POST bodies are normalized and queued in receipt order.

use super::{EventSource, UpdateDeduplicator};
use crate::channels::{normalize_update, InboundEvent};
use crate::config::TransportMode;
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Accepting half: owned by the HTTP handler.
#[derive(Clone)]
pub struct WebhookIngress {
    tx: mpsc::Sender<InboundEvent>,
    operator_id: i64,
    secret: Option<String>,
    dedup: Arc<Mutex<UpdateDeduplicator>>,
}

/// Consuming half: drained by the relay loop.
pub struct WebhookSource {
    rx: mpsc::Receiver<InboundEvent>,
}

/// Create a connected ingress/source pair with a queue of `capacity` events.
pub fn webhook_channel(
    operator_id: i64,
    secret: Option<String>,
    capacity: usize,
) -> (WebhookIngress, WebhookSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let ingress = WebhookIngress {
        tx,
        operator_id,
        secret: secret.filter(|s| !s.is_empty()),
        dedup: Arc::new(Mutex::new(UpdateDeduplicator::default())),
    };
    (ingress, WebhookSource { rx })
}

impl WebhookIngress {
    /// Handle one POSTed update. Verifies the optional secret, then queues the event.
    /// Malformed or irrelevant updates are logged and answered with 200 so Telegram does
    /// not redeliver them; 503 only when the relay is no longer accepting.
    pub async fn accept(&self, headers: &HeaderMap, body: &[u8]) -> StatusCode {
        if let Some(ref expected) = self.secret {
            let provided = headers
                .get(WEBHOOK_SECRET_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if provided != expected.as_str() {
                log::warn!("telegram webhook: rejected request with bad secret token");
                return StatusCode::FORBIDDEN;
            }
        }
        let raw: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("telegram webhook: dropping malformed body: {}", e);
                return StatusCode::OK;
            }
        };
        let event = match normalize_update(raw, self.operator_id) {
            Ok(ev) => ev,
            Err(e) => {
                log::debug!("telegram webhook: dropping update: {}", e);
                return StatusCode::OK;
            }
        };
        // Held across the send so queue order matches admission order.
        let mut dedup = self.dedup.lock().await;
        if !dedup.admit(event.update_id) {
            log::debug!("telegram webhook: dropping duplicate update {}", event.update_id);
            return StatusCode::OK;
        }
        if self.tx.send(event).await.is_err() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        StatusCode::OK
    }
}

#[async_trait]
impl EventSource for WebhookSource {
    async fn next_event(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Push
    }
}
