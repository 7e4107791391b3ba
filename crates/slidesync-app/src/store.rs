//! Record store seam: streams, session settings and the command log.
//!
//! The display re-reads streams and session settings on every load (and on
//! `reload`); the controller appends every command it sends to a durable log.
//! [`MemoryStore`] backs tests and embedded use; [`JsonFileStore`] reads a
//! JSON document of sessions and appends the log as NDJSON next to it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use slidesync_core::prelude::*;
use slidesync_core::{Command, CommandKind, ContentStream, SessionInfo};

/// Read/append access to persisted slideshow records.
#[trait_variant::make(RecordStore: Send)]
pub trait LocalRecordStore {
    /// All streams of the session, with their items.
    async fn get_streams(&self, session_id: &str) -> Result<Vec<ContentStream>>;

    /// Session-level playback configuration.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] if the store has no such session.
    async fn get_session(&self, session_id: &str) -> Result<SessionInfo>;

    /// Append a sent command to the durable log.
    ///
    /// # Errors
    ///
    /// [`Error::CommandLog`] if the entry could not be written.
    async fn append_command_log(&self, session_id: &str, command: &Command) -> Result<()>;
}

/// One line of the command log.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandLogEntry {
    pub session_id: String,
    pub command: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub timestamp: i64,
}

impl CommandLogEntry {
    pub fn new(session_id: &str, command: &Command) -> Self {
        Self {
            session_id: session_id.to_string(),
            command: command.command,
            payload: command.payload.clone(),
            timestamp: command.timestamp,
        }
    }
}

/// A session together with its streams, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SessionRecord {
    #[serde(flatten)]
    pub info: SessionInfo,

    #[serde(default)]
    pub streams: Vec<ContentStream>,
}

// ─────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryStoreInner {
    sessions: HashMap<String, SessionRecord>,
    log: Vec<CommandLogEntry>,
    fail_command_log: bool,
}

/// In-process store. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session and its streams.
    pub fn insert_session(&self, info: SessionInfo, streams: Vec<ContentStream>) {
        let id = info.id.clone();
        self.lock()
            .sessions
            .insert(id, SessionRecord { info, streams });
    }

    /// Replace the streams of an existing session (e.g. before a `reload`).
    pub fn set_streams(&self, session_id: &str, streams: Vec<ContentStream>) -> Result<()> {
        let mut inner = self.lock();
        let record = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        record.streams = streams;
        Ok(())
    }

    /// Make every subsequent log append fail while `fail` is true.
    pub fn set_fail_command_log(&self, fail: bool) {
        self.lock().fail_command_log = fail;
    }

    /// Snapshot of the command log.
    pub fn command_log(&self) -> Vec<CommandLogEntry> {
        self.lock().log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordStore for MemoryStore {
    async fn get_streams(&self, session_id: &str) -> Result<Vec<ContentStream>> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|record| record.streams.clone())
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|record| record.info.clone())
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    async fn append_command_log(&self, session_id: &str, command: &Command) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_command_log {
            return Err(Error::command_log("store unavailable"));
        }
        inner.log.push(CommandLogEntry::new(session_id, command));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// JsonFileStore
// ─────────────────────────────────────────────────────────────────

/// Document layout of a [`JsonFileStore`] file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

/// Store backed by a JSON document on disk.
///
/// The document is re-read on every query so edits are picked up by the next
/// load or `reload`. The command log is `<file stem>.commands.ndjson` in the
/// same directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    log_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let log_path = path.with_extension("commands.ndjson");
        Self { path, log_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    async fn read_document(&self) -> Result<StoreDocument> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::store(format!("Failed to read {:?}: {}", self.path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::store(format!("Failed to parse {:?}: {}", self.path, e)))
    }

    async fn find_session(&self, session_id: &str) -> Result<SessionRecord> {
        self.read_document()
            .await?
            .sessions
            .into_iter()
            .find(|record| record.info.id == session_id)
            .ok_or_else(|| Error::session_not_found(session_id))
    }
}

impl RecordStore for JsonFileStore {
    async fn get_streams(&self, session_id: &str) -> Result<Vec<ContentStream>> {
        Ok(self.find_session(session_id).await?.streams)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo> {
        Ok(self.find_session(session_id).await?.info)
    }

    async fn append_command_log(&self, session_id: &str, command: &Command) -> Result<()> {
        let mut line = serde_json::to_string(&CommandLogEntry::new(session_id, command))
            .map_err(|e| Error::command_log(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(|e| Error::command_log(format!("{:?}: {}", self.log_path, e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::command_log(format!("{:?}: {}", self.log_path, e)))?;
        file.flush()
            .await
            .map_err(|e| Error::command_log(format!("{:?}: {}", self.log_path, e)))?;
        Ok(())
    }
}
