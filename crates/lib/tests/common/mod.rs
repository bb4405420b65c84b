//! Shared test doubles: an in-process messenger and a fake Telegram Bot API server.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use lib::channels::{
    normalize_update, ChannelError, ChatId, InboundEvent, MessageId, Messenger, OutboundMessage,
};
use lib::config::{RelayConfig, RelayIdentities};
use lib::relay::{Escalator, RelayEngine, RelaySettings};
use lib::store::CorrelationStore;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const OPERATOR: ChatId = 42;
pub const DEVELOPER: ChatId = 99;

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

pub fn temp_store_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("hush-test-{}", uuid::Uuid::new_v4()))
        .join("correlations.jsonl")
}

/// Raw update JSON for a text message from `from` (private chat, so chat id == user id).
pub fn update_json(update_id: i64, from: i64, text: &str, reply_to: Option<MessageId>) -> Value {
    let mut message = json!({
        "message_id": update_id * 10,
        "date": 1700000000,
        "chat": { "id": from, "type": "private" },
        "from": { "id": from, "is_bot": false, "first_name": "t" },
        "text": text,
    });
    if let Some(id) = reply_to {
        message["reply_to_message"] = json!({
            "message_id": id,
            "date": 1700000000,
            "chat": { "id": from, "type": "private" },
            "text": "quoted copy",
        });
    }
    json!({ "update_id": update_id, "message": message })
}

pub fn event(update_id: i64, from: i64, text: &str, reply_to: Option<MessageId>) -> InboundEvent {
    normalize_update(update_json(update_id, from, text, reply_to), OPERATOR).expect("valid update")
}

/// Records every send attempt; assigns increasing message ids; fails sends to chosen chats.
pub struct FakeMessenger {
    next_id: AtomicI64,
    sent: Mutex<Vec<(MessageId, OutboundMessage)>>,
    attempts: Mutex<Vec<OutboundMessage>>,
    failing: Mutex<HashSet<ChatId>>,
}

impl FakeMessenger {
    pub fn new(first_id: MessageId) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(first_id),
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_chat(&self, chat_id: ChatId) {
        self.failing.lock().unwrap().insert(chat_id);
    }

    pub fn sent(&self) -> Vec<(MessageId, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|(_, m)| m.chat_id == chat_id)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn attempts_to(&self, chat_id: ChatId) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .count()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_message(&self, message: OutboundMessage) -> Result<MessageId, ChannelError> {
        self.attempts.lock().unwrap().push(message.clone());
        if self.failing.lock().unwrap().contains(&message.chat_id) {
            return Err(ChannelError::Api(
                "sendMessage failed: 403 Forbidden: bot was blocked by the user".to_string(),
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push((id, message));
        Ok(id)
    }
}

pub fn settings(audit_chat_id: Option<ChatId>) -> RelaySettings {
    RelaySettings::new(
        &RelayConfig::default(),
        &RelayIdentities {
            operator_id: OPERATOR,
            developer_chat_id: DEVELOPER,
            audit_chat_id,
        },
    )
}

pub fn engine(
    messenger: Arc<FakeMessenger>,
    store: Arc<dyn CorrelationStore>,
    audit_chat_id: Option<ChatId>,
) -> RelayEngine {
    let escalator = Escalator::new(messenger.clone(), DEVELOPER, store.clone());
    RelayEngine::new(settings(audit_chat_id), store, messenger, escalator)
}

#[derive(Default)]
struct FakeApiState {
    calls: Mutex<Vec<(String, Value)>>,
    batches: Mutex<VecDeque<Vec<Value>>>,
    fail_get_updates: AtomicUsize,
    next_message_id: AtomicI64,
    send_delay_ms: AtomicU64,
}

/// Fake Telegram Bot API on a free local port. Records every call (method, body).
/// getUpdates serves scripted batches, then empty results after a short delay.
#[derive(Clone)]
pub struct FakeBotApi {
    pub base: String,
    state: Arc<FakeApiState>,
}

async fn fake_method(
    State(state): State<Arc<FakeApiState>>,
    Path((_bot, method)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state
        .calls
        .lock()
        .unwrap()
        .push((method.clone(), body.clone()));
    match method.as_str() {
        "getUpdates" => {
            let fail = state
                .fail_get_updates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "ok": false, "error_code": 502, "description": "Bad Gateway" })),
                );
            }
            let batch = state.batches.lock().unwrap().pop_front();
            let batch = match batch {
                Some(b) => b,
                None => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Vec::new()
                }
            };
            (StatusCode::OK, Json(json!({ "ok": true, "result": batch })))
        }
        "sendMessage" => {
            let delay = state.send_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let id = state.next_message_id.fetch_add(1, Ordering::SeqCst);
            (
                StatusCode::OK,
                Json(json!({ "ok": true, "result": { "message_id": id, "date": 0, "chat": { "id": body["chat_id"] } } })),
            )
        }
        _ => (StatusCode::OK, Json(json!({ "ok": true, "result": true }))),
    }
}

impl FakeBotApi {
    pub async fn start(first_message_id: MessageId) -> Self {
        let state = Arc::new(FakeApiState {
            next_message_id: AtomicI64::new(first_message_id),
            ..Default::default()
        });
        let app = Router::new()
            .route("/:bot/:method", post(fake_method))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake api");
        let base = format!("http://{}", listener.local_addr().expect("local_addr"));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { base, state }
    }

    pub fn push_batch(&self, updates: Vec<Value>) {
        self.state.batches.lock().unwrap().push_back(updates);
    }

    pub fn fail_next_get_updates(&self, n: usize) {
        self.state.fail_get_updates.store(n, Ordering::SeqCst);
    }

    /// Make every sendMessage take `delay` before answering.
    pub fn delay_sends(&self, delay: Duration) {
        self.state
            .send_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.state
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<Value> {
        self.calls("sendMessage")
            .into_iter()
            .filter(|b| b["chat_id"].as_i64() == Some(chat_id))
            .collect()
    }

    /// Poll until `cond` holds (5s max).
    pub async fn wait_for(&self, what: &str, cond: impl Fn(&Self) -> bool) {
        for _ in 0..250 {
            if cond(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {}", what);
    }
}
