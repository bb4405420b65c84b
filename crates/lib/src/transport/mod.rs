//! Event sources: long-poll (pull) and webhook (push) ingestion behind one interface.
//!
//! Exactly one source is active per process. Both yield events in receipt order and never
//! hand off the same update twice.

mod polling;
mod webhook;

pub use polling::PollingSource;
pub use webhook::{webhook_channel, WebhookIngress, WebhookSource, WEBHOOK_SECRET_HEADER};

use crate::channels::InboundEvent;
use crate::config::TransportMode;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};

/// Ordered stream of inbound events.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, waiting as long as needed. None once the source is closed and empty.
    /// Calling this again acknowledges the previously returned event as handled.
    async fn next_event(&mut self) -> Option<InboundEvent>;

    /// Stop accepting new updates. Events already accepted are still returned by
    /// `next_event` until it yields None.
    async fn close(&mut self);

    fn mode(&self) -> TransportMode;
}

const DEDUP_WINDOW: usize = 1024;

/// Remembers recently admitted update ids so redelivered updates are dropped.
pub struct UpdateDeduplicator {
    seen: HashSet<i64>,
    order: VecDeque<i64>,
    capacity: usize,
}

impl Default for UpdateDeduplicator {
    fn default() -> Self {
        Self::new(DEDUP_WINDOW)
    }
}

impl UpdateDeduplicator {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// True the first time an id is seen within the window.
    pub fn admit(&mut self, update_id: i64) -> bool {
        if !self.seen.insert(update_id) {
            return false;
        }
        self.order.push_back(update_id);
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}
