//! Upload queue for listing photos and documents.
//!
//! Items move `Pending -> Uploading -> {Complete, Error}`. A pass uploads one item at a time;
//! removing an item or clearing the queue aborts its in-flight upload and releases its preview.

use super::storage::StorageError;
use async_trait::async_trait;
use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }
}

/// Local preview of a queued file. The release callback runs exactly once, when the preview is
/// dropped.
pub struct Preview {
    handle: String,
    release: Option<Box<dyn FnOnce(&str) + Send>>,
}

impl Preview {
    pub fn new(handle: impl Into<String>, release: impl FnOnce(&str) + Send + 'static) -> Self {
        Self {
            handle: handle.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn detached(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            release: None,
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }
}

impl fmt::Debug for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preview").field("handle", &self.handle).finish()
    }
}

impl Drop for Preview {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(&self.handle);
        }
    }
}

#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    /// Stores the file and returns its public URL.
    async fn upload(&self, file: &UploadFile) -> Result<String, StorageError>;

    fn preview(&self, file: &UploadFile) -> Preview {
        Preview::detached(format!("preview://{}", file.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Complete,
    Error,
}

struct UploadItem {
    id: Uuid,
    file: Arc<UploadFile>,
    status: UploadStatus,
    progress: u8,
    url: Option<String>,
    error: Option<String>,
    preview: Preview,
    /// Dropping the sender aborts the in-flight upload.
    cancel: Option<oneshot::Sender<()>>,
}

/// Read-only copy of an item for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSnapshot {
    pub id: Uuid,
    pub name: String,
    pub status: UploadStatus,
    pub progress: u8,
    pub url: Option<String>,
    pub error: Option<String>,
    pub preview: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("an upload pass is already running")]
    AlreadyRunning,
}

pub struct UploadQueueController<S> {
    storage: Arc<S>,
    items: Mutex<Vec<UploadItem>>,
    running: AtomicBool,
}

struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<S: FileStorage> UploadQueueController<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            items: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UploadItem>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_files(&self, files: Vec<UploadFile>) -> Vec<Uuid> {
        let mut items = self.lock();
        files
            .into_iter()
            .map(|file| {
                let id = Uuid::new_v4();
                let preview = self.storage.preview(&file);
                items.push(UploadItem {
                    id,
                    file: Arc::new(file),
                    status: UploadStatus::Pending,
                    progress: 0,
                    url: None,
                    error: None,
                    preview,
                    cancel: None,
                });
                id
            })
            .collect()
    }

    /// Drops the item, aborting its upload if one is in flight.
    pub fn remove(&self, id: Uuid) -> bool {
        let removed = {
            let mut items = self.lock();
            items
                .iter()
                .position(|item| item.id == id)
                .map(|index| items.remove(index))
        };
        match removed {
            Some(item) => {
                debug!(target = "pricectx.upload", id = %id, name = %item.file.name, status = ?item.status, "upload item removed");
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let drained: Vec<UploadItem> = self.lock().drain(..).collect();
        if !drained.is_empty() {
            debug!(target = "pricectx.upload", count = drained.len(), "upload queue cleared");
        }
    }

    pub fn items(&self) -> Vec<UploadSnapshot> {
        self.lock()
            .iter()
            .map(|item| UploadSnapshot {
                id: item.id,
                name: item.file.name.clone(),
                status: item.status,
                progress: item.progress,
                url: item.url.clone(),
                error: item.error.clone(),
                preview: item.preview.handle().to_string(),
            })
            .collect()
    }

    /// Uploads every `Pending` or `Error` item once, in queue order. `Complete` items are skipped.
    pub async fn upload_all(&self) -> Result<UploadSummary, UploadError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(UploadError::AlreadyRunning);
        }
        let _pass = PassGuard(&self.running);
        let mut attempted = HashSet::new();
        let mut summary = UploadSummary::default();

        loop {
            let next = {
                let mut items = self.lock();
                items
                    .iter_mut()
                    .find(|item| {
                        matches!(item.status, UploadStatus::Pending | UploadStatus::Error)
                            && !attempted.contains(&item.id)
                    })
                    .map(|item| {
                        let (cancel, cancelled) = oneshot::channel();
                        item.status = UploadStatus::Uploading;
                        item.progress = 50;
                        item.error = None;
                        item.cancel = Some(cancel);
                        (item.id, item.file.clone(), cancelled)
                    })
            };
            let Some((id, file, cancelled)) = next else {
                break;
            };
            attempted.insert(id);

            let result = tokio::select! {
                result = self.storage.upload(&file) => result,
                _ = cancelled => {
                    debug!(target = "pricectx.upload", id = %id, name = %file.name, "upload aborted");
                    summary.cancelled += 1;
                    continue;
                }
            };

            let mut items = self.lock();
            let Some(item) = items.iter_mut().find(|item| item.id == id) else {
                summary.cancelled += 1;
                continue;
            };
            item.cancel = None;
            match result {
                Ok(url) => {
                    item.status = UploadStatus::Complete;
                    item.progress = 100;
                    item.url = Some(url);
                    summary.uploaded += 1;
                }
                Err(err) => {
                    warn!(target = "pricectx.upload", id = %id, name = %file.name, error = %err, "upload failed");
                    item.status = UploadStatus::Error;
                    item.progress = 0;
                    item.error = Some(err.to_string());
                    summary.failed += 1;
                }
            }
        }

        info!(
            target = "pricectx.upload",
            uploaded = summary.uploaded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "upload pass finished"
        );
        Ok(summary)
    }
}
