use crate::model::{EntryMeta, EntryPath};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

/// Why an extraction attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Source is unreadable or corrupt
    BadArchive,
    /// Supplied password was rejected; reopens the challenge instead of failing
    IncorrectPassword,
    /// I/O failure while extracting
    EngineIO,
    /// Event or command arrived that the current state cannot accept
    ProtocolViolation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::BadArchive => "bad archive",
            ErrorKind::IncorrectPassword => "incorrect password",
            ErrorKind::EngineIO => "engine I/O failure",
            ErrorKind::ProtocolViolation => "protocol violation",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No extraction is running")]
    NoActiveJob,
    #[error("Extraction job is gone: {0}")]
    JobClosed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Opaque reference to the archive selected for extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHandle {
    path: PathBuf,
}

impl ArchiveHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// One listed entry. Directory entries arrive with `meta.is_dir` set.
    PathDiscovered { path: EntryPath, meta: EntryMeta },
    PasswordRequired,
    Completed,
    Error { kind: ErrorKind },
}

/// Receiving side of one extraction's event stream.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<EngineEvent>,
}

/// Sending side handed to the engine's worker.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl Subscription {
    pub fn channel(buffer: usize) -> (EventSink, Subscription) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (EventSink { tx }, Subscription { rx })
    }

    pub async fn next(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }
}

impl EventSink {
    /// Returns `false` once the subscription has been dropped.
    pub async fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Blocking variant for engine workers running off the async runtime.
    pub fn blocking_emit(&self, event: EngineEvent) -> bool {
        self.tx.blocking_send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Returns the engine identifier used in logs (e.g., "zip").
    fn engine_id(&self) -> &str;

    /// Starts extracting `archive`, replacing any job the engine is running.
    async fn start_extraction(&self, archive: &ArchiveHandle) -> Result<Subscription, EngineError>;

    /// Answers the outstanding password request of the current job.
    async fn submit_password(&self, password: String) -> Result<(), EngineError>;

    /// Aborts the current job. A no-op when nothing is running.
    async fn cancel(&self) -> Result<(), EngineError>;
}
