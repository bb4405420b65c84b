//! Pull mode: getUpdates long poll with offset acknowledgment and retry backoff.

use super::{EventSource, UpdateDeduplicator};
use crate::channels::{normalize_update, InboundEvent, TelegramChannel};
use crate::config::TransportMode;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const LONG_POLL_TIMEOUT: u64 = 30;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Long-polls getUpdates. An update is acknowledged (offset advanced past it) only when the
/// consumer asks for the next event, so an update whose processing never finished is
/// delivered again after a restart.
pub struct PollingSource {
    channel: Arc<TelegramChannel>,
    operator_id: i64,
    poll_timeout_secs: u64,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff: Duration,
    offset: Option<i64>,
    pending_ack: Option<i64>,
    buffer: VecDeque<serde_json::Value>,
    dedup: UpdateDeduplicator,
    closed: bool,
}

impl PollingSource {
    pub fn new(channel: Arc<TelegramChannel>, operator_id: i64) -> Self {
        Self {
            channel,
            operator_id,
            poll_timeout_secs: LONG_POLL_TIMEOUT,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            backoff: INITIAL_BACKOFF,
            offset: None,
            pending_ack: None,
            buffer: VecDeque::new(),
            dedup: UpdateDeduplicator::default(),
            closed: false,
        }
    }

    /// Long-poll timeout passed to getUpdates.
    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    /// Retry delay after a failed poll; doubles per failure up to `max`.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self.backoff = initial;
        self
    }

    /// Offset the next getUpdates call will send (everything below it is acknowledged).
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    fn acknowledge(&mut self, update_id: i64) {
        let next = update_id + 1;
        if self.offset.map_or(true, |o| next > o) {
            self.offset = Some(next);
        }
    }

    /// Take buffered updates until one normalizes into an event. Dropped updates are
    /// acknowledged immediately since there is nothing to process.
    fn next_buffered(&mut self) -> Option<InboundEvent> {
        while let Some(raw) = self.buffer.pop_front() {
            let update_id = raw.get("update_id").and_then(|v| v.as_i64());
            match normalize_update(raw, self.operator_id) {
                Ok(event) => {
                    if !self.dedup.admit(event.update_id) {
                        log::debug!("telegram: dropping duplicate update {}", event.update_id);
                        self.acknowledge(event.update_id);
                        continue;
                    }
                    self.pending_ack = Some(event.update_id);
                    return Some(event);
                }
                Err(e) => {
                    log::debug!("telegram: dropping update: {}", e);
                    if let Some(id) = update_id {
                        self.acknowledge(id);
                    }
                }
            }
        }
        None
    }
}

#[async_trait]
impl EventSource for PollingSource {
    async fn next_event(&mut self) -> Option<InboundEvent> {
        if let Some(id) = self.pending_ack.take() {
            self.acknowledge(id);
        }
        loop {
            if self.closed {
                return None;
            }
            if let Some(event) = self.next_buffered() {
                return Some(event);
            }
            match self
                .channel
                .get_updates(self.offset, self.poll_timeout_secs)
                .await
            {
                Ok(batch) => {
                    self.backoff = self.initial_backoff;
                    let mut batch = batch;
                    batch.sort_by_key(|u| u.get("update_id").and_then(|v| v.as_i64()));
                    self.buffer.extend(batch);
                }
                Err(e) => {
                    log::warn!(
                        "telegram getUpdates error: {} (retrying in {:?})",
                        e,
                        self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                    self.backoff = (self.backoff * 2).min(self.max_backoff);
                }
            }
        }
    }

    /// Acknowledge the last handed-off update with Telegram. Buffered updates that were
    /// never handed off stay unacknowledged and are delivered again on the next start.
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(id) = self.pending_ack.take() {
            self.acknowledge(id);
        }
        if let Some(offset) = self.offset {
            if let Err(e) = self.channel.get_updates(Some(offset), 0).await {
                log::warn!("telegram: confirming offset {} on shutdown failed: {}", offset, e);
            }
        }
        log::info!("telegram channel: getUpdates loop stopped");
    }

    fn mode(&self) -> TransportMode {
        TransportMode::Pull
    }
}
