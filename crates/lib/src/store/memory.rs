//! In-memory correlation store (tests, dry runs). Nothing survives a restart.

use super::{CorrelationStore, StoreError};
use crate::channels::{ChatId, MessageId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryCorrelationStore {
    entries: RwLock<HashMap<MessageId, ChatId>>,
}

impl MemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationStore for MemoryCorrelationStore {
    async fn put(
        &self,
        relayed_message_id: MessageId,
        originating_user_id: ChatId,
    ) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(relayed_message_id, originating_user_id);
        Ok(())
    }

    async fn get(&self, relayed_message_id: MessageId) -> Option<ChatId> {
        self.entries.read().await.get(&relayed_message_id).copied()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
