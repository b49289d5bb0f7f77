//! Zip backend for [`ExtractionEngine`].
//!
//! Each `start_extraction` spawns one blocking job that walks the archive in
//! listing order and streams an event per entry. Encrypted entries are first
//! tried with passwords the job has already accepted; otherwise the job emits
//! `PasswordRequired` and parks until the controller replies or cancels.

use async_trait::async_trait;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::config::AppConfig;
use crate::executor::ExtractionExecutor;
use crate::model::{EntryMeta, EntryPath};
use crate::traits::{
    ArchiveHandle, EngineError, EngineEvent, ErrorKind, EventSink, ExtractionEngine, Subscription,
};

#[derive(Debug)]
enum Reply {
    Password(Vec<u8>),
    Cancel,
}

/// Control side of the running job.
#[derive(Debug)]
struct JobControl {
    replies: mpsc::Sender<Reply>,
    cancelled: Arc<AtomicBool>,
}

impl JobControl {
    fn abort(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // wakes the job if it is parked on a password prompt
        let _ = self.replies.try_send(Reply::Cancel);
    }
}

pub struct ZipEngine {
    executor: ExtractionExecutor,
    event_buffer: usize,
    current: Mutex<Option<JobControl>>,
}

impl ZipEngine {
    pub fn new(executor: ExtractionExecutor) -> Self {
        Self {
            executor,
            event_buffer: 64,
            current: Mutex::new(None),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(ExtractionExecutor::new(config.max_concurrent_extractions))
            .with_event_buffer(config.event_buffer)
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }
}

impl Default for ZipEngine {
    fn default() -> Self {
        Self::new(ExtractionExecutor::new(1))
    }
}

#[async_trait]
impl ExtractionEngine for ZipEngine {
    fn engine_id(&self) -> &str {
        "zip"
    }

    #[instrument(skip(self))]
    async fn start_extraction(&self, archive: &ArchiveHandle) -> Result<Subscription, EngineError> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            debug!("Aborting previous zip job");
            previous.abort();
        }

        let (sink, subscription) = Subscription::channel(self.event_buffer);
        // one password reply in flight plus a cancel
        let (replies_tx, replies_rx) = mpsc::channel(2);
        let cancelled = Arc::new(AtomicBool::new(false));

        let job = ZipJob {
            path: archive.path().to_path_buf(),
            sink,
            replies: replies_rx,
            cancelled: cancelled.clone(),
        };
        self.executor
            .spawn(archive.path().display().to_string(), move || job.run());

        *current = Some(JobControl {
            replies: replies_tx,
            cancelled,
        });
        Ok(subscription)
    }

    async fn submit_password(&self, password: String) -> Result<(), EngineError> {
        // the lock is released before waiting on the job
        let replies = self
            .current
            .lock()
            .await
            .as_ref()
            .map(|job| job.replies.clone())
            .ok_or(EngineError::NoActiveJob)?;
        replies
            .send(Reply::Password(password.into_bytes()))
            .await
            .map_err(|e| EngineError::JobClosed(e.to_string()))
    }

    async fn cancel(&self) -> Result<(), EngineError> {
        if let Some(job) = self.current.lock().await.take() {
            info!("Cancelling zip job");
            job.abort();
        }
        Ok(())
    }
}

// ============================================================================
// Blocking job
// ============================================================================

enum Lookup {
    /// `None` for entries whose name escapes the archive root
    Found(Option<(EntryPath, EntryMeta)>),
    Locked,
    Broken(String),
}

struct ZipJob {
    path: PathBuf,
    sink: EventSink,
    replies: mpsc::Receiver<Reply>,
    cancelled: Arc<AtomicBool>,
}

impl ZipJob {
    fn run(mut self) {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Cannot open archive");
                self.sink.blocking_emit(EngineEvent::Error {
                    kind: ErrorKind::EngineIO,
                });
                return;
            }
        };
        let mut archive = match ZipArchive::new(file) {
            Ok(archive) => archive,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Not a readable zip archive");
                self.sink.blocking_emit(EngineEvent::Error {
                    kind: ErrorKind::BadArchive,
                });
                return;
            }
        };

        let mut accepted: Vec<Vec<u8>> = Vec::new();
        for index in 0..archive.len() {
            if self.cancelled.load(Ordering::SeqCst) {
                debug!("Zip job cancelled");
                return;
            }

            let Some(outcome) = self.unlock(&mut archive, index, &mut accepted) else {
                return;
            };
            match outcome {
                Ok(Some((path, meta))) => {
                    if !self
                        .sink
                        .blocking_emit(EngineEvent::PathDiscovered { path, meta })
                    {
                        debug!("Subscription dropped, stopping zip job");
                        return;
                    }
                }
                Ok(None) => {}
                Err(reason) => {
                    error!(index, %reason, "Failed to read zip entry");
                    self.sink.blocking_emit(EngineEvent::Error {
                        kind: ErrorKind::BadArchive,
                    });
                    return;
                }
            }
        }

        self.sink.blocking_emit(EngineEvent::Completed);
    }

    /// Reads entry `index`, trying accepted passwords first and then
    /// prompting until one works. `None` means the job should stop.
    fn unlock(
        &mut self,
        archive: &mut ZipArchive<File>,
        index: usize,
        accepted: &mut Vec<Vec<u8>>,
    ) -> Option<Result<Option<(EntryPath, EntryMeta)>, String>> {
        let mut candidates = accepted.clone().into_iter();
        let mut password: Option<Vec<u8>> = None;
        loop {
            match read_entry(archive, index, password.as_deref()) {
                Lookup::Found(entry) => {
                    if let Some(password) = password {
                        if !accepted.contains(&password) {
                            accepted.push(password);
                        }
                    }
                    return Some(Ok(entry));
                }
                Lookup::Broken(reason) => return Some(Err(reason)),
                Lookup::Locked => {}
            }
            password = match candidates.next() {
                Some(known) => Some(known),
                None => Some(self.ask_password()?),
            };
        }
    }

    /// Emits a prompt and parks until a reply arrives. `None` means stop.
    fn ask_password(&mut self) -> Option<Vec<u8>> {
        if self.cancelled.load(Ordering::SeqCst)
            || !self.sink.blocking_emit(EngineEvent::PasswordRequired)
        {
            return None;
        }
        match self.replies.blocking_recv() {
            Some(Reply::Password(password)) => Some(password),
            Some(Reply::Cancel) | None => {
                debug!("Password prompt abandoned");
                None
            }
        }
    }
}

fn read_entry(archive: &mut ZipArchive<File>, index: usize, password: Option<&[u8]>) -> Lookup {
    let result = match password {
        Some(password) => archive.by_index_decrypt(index, password),
        None => archive.by_index(index),
    };
    match result {
        Ok(file) => match file.enclosed_name() {
            Some(name) => {
                let meta = if file.is_dir() {
                    EntryMeta::dir()
                } else {
                    EntryMeta::file(file.size())
                };
                Lookup::Found(EntryPath::from_path(&name).map(|path| (path, meta)))
            }
            None => {
                error!(
                    "`SECURITY ISSUE` bad file path (breaks out of root directory): {}",
                    file.name()
                );
                Lookup::Found(None)
            }
        },
        Err(ZipError::UnsupportedArchive(detail)) if detail == ZipError::PASSWORD_REQUIRED => {
            Lookup::Locked
        }
        Err(ZipError::InvalidPassword) => {
            warn!(index, "Incorrect password for zip entry");
            Lookup::Locked
        }
        Err(e) => Lookup::Broken(e.to_string()),
    }
}
