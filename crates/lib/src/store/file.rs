//! File-backed correlation store: one JSON object per line, appended and synced per write.
//!
//! The whole file is loaded at open. `flush` rewrites a compacted snapshot through a temp
//! file + rename so a crash mid-rewrite leaves the previous file intact.

use super::{CorrelationEntry, CorrelationStore, StoreError};
use crate::channels::{ChatId, MessageId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

struct State {
    entries: HashMap<MessageId, ChatId>,
    log: File,
    /// The log may end in a partial line or point at a replaced file; rewrite it from
    /// `entries` before the next append.
    needs_rewrite: bool,
}

pub struct FileCorrelationStore {
    path: PathBuf,
    state: RwLock<State>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parse the log. A malformed final line is a torn append from a crash and is skipped;
/// a malformed line anywhere else means the file is corrupt. Returns (entries, torn).
fn parse_log(path: &Path, content: &str) -> Result<(HashMap<MessageId, ChatId>, bool), StoreError> {
    let lines: Vec<&str> = content.lines().collect();
    let mut entries = HashMap::new();
    let mut torn = false;
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<CorrelationEntry>(line) {
            Ok(e) => {
                entries.insert(e.relayed_message_id, e.originating_user_id);
            }
            Err(_) if i + 1 == lines.len() && !content.ends_with('\n') => {
                log::warn!(
                    "correlation store {}: ignoring torn final line {}",
                    path.display(),
                    i + 1
                );
                torn = true;
            }
            Err(source) => {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    line: i + 1,
                    source,
                })
            }
        }
    }
    Ok((entries, torn))
}

async fn open_log(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_err(path))
}

/// Append one line and make it durable. Flushing surfaces errors from buffered writes.
async fn append_line(log: &mut File, line: &str) -> std::io::Result<()> {
    log.write_all(line.as_bytes()).await?;
    log.flush().await?;
    log.sync_data().await
}

/// Write all entries to `<path>.tmp`, sync, then rename over `path`.
async fn write_snapshot(path: &Path, entries: &HashMap<MessageId, ChatId>) -> Result<(), StoreError> {
    let mut sorted: Vec<_> = entries.iter().collect();
    sorted.sort_unstable();
    let mut buf = String::new();
    for (&relayed_message_id, &originating_user_id) in sorted {
        buf.push_str(&serde_json::to_string(&CorrelationEntry {
            relayed_message_id,
            originating_user_id,
        })?);
        buf.push('\n');
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    let mut f = File::create(&tmp).await.map_err(io_err(&tmp))?;
    f.write_all(buf.as_bytes()).await.map_err(io_err(&tmp))?;
    f.sync_all().await.map_err(io_err(&tmp))?;
    drop(f);
    tokio::fs::rename(&tmp, path).await.map_err(io_err(path))
}

impl FileCorrelationStore {
    /// Load the store at `path`, creating parent directories and an empty file if missing.
    /// Unreadable or corrupt files are errors; callers treat them as fatal at startup.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(&path)(e)),
        };
        let (entries, torn) = parse_log(&path, &content)?;
        if torn {
            write_snapshot(&path, &entries).await?;
        }
        let log = open_log(&path).await?;
        log::info!(
            "loaded {} correlation(s) from {}",
            entries.len(),
            path.display()
        );
        Ok(Self {
            path,
            state: RwLock::new(State {
                entries,
                log,
                needs_rewrite: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the log with a snapshot of `entries` and append to the new file from now on.
    /// Until both steps succeed the store keeps refusing appends to the old handle.
    async fn rewrite(&self, state: &mut State) -> Result<(), StoreError> {
        state.needs_rewrite = true;
        write_snapshot(&self.path, &state.entries).await?;
        state.log = open_log(&self.path).await?;
        state.needs_rewrite = false;
        Ok(())
    }
}

#[async_trait]
impl CorrelationStore for FileCorrelationStore {
    async fn put(
        &self,
        relayed_message_id: MessageId,
        originating_user_id: ChatId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.entries.get(&relayed_message_id) == Some(&originating_user_id) {
            return Ok(());
        }
        let mut line = serde_json::to_string(&CorrelationEntry {
            relayed_message_id,
            originating_user_id,
        })?;
        line.push('\n');
        if state.needs_rewrite {
            self.rewrite(&mut state).await?;
        }
        if let Err(e) = append_line(&mut state.log, &line).await {
            state.needs_rewrite = true;
            return Err(io_err(&self.path)(e));
        }
        state.entries.insert(relayed_message_id, originating_user_id);
        Ok(())
    }

    async fn get(&self, relayed_message_id: MessageId) -> Option<ChatId> {
        self.state
            .read()
            .await
            .entries
            .get(&relayed_message_id)
            .copied()
    }

    async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.needs_rewrite {
            state.log.sync_all().await.map_err(io_err(&self.path))?;
        }
        self.rewrite(&mut state).await?;
        log::debug!(
            "correlation store flushed ({} entries) to {}",
            state.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}
