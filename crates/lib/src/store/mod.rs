//! Correlation store: relayed message id (in the operator chat) -> originating user chat.
//!
//! The relay writes one entry per forwarded message and reads it back when the operator
//! replies. Entries are never removed; the store is expected to stay small for a
//! low-volume relay.

mod file;
mod memory;

pub use file::FileCorrelationStore;
pub use memory::MemoryCorrelationStore;

use crate::channels::{ChatId, MessageId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One correlation: the copy sent into the operator chat and the user it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationEntry {
    pub relayed_message_id: MessageId,
    pub originating_user_id: ChatId,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("correlation store io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("correlation store {} is corrupt at line {line}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding correlation entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable upsert + lookup. Implementations serialize a write with reads of the same key.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Idempotent upsert. Returns only after the entry is durable.
    async fn put(
        &self,
        relayed_message_id: MessageId,
        originating_user_id: ChatId,
    ) -> Result<(), StoreError>;

    /// Lookup; absence is not an error.
    async fn get(&self, relayed_message_id: MessageId) -> Option<ChatId>;

    /// Number of entries.
    async fn len(&self) -> usize;

    /// Flush buffered state to durable storage (called on shutdown).
    async fn flush(&self) -> Result<(), StoreError>;
}
