use std::sync::Arc;

use dashmap::mapref::one::RefMut;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, UploadError};
use crate::models::{
    Added, Cancelled, CancelledAll, Completed, Failed, FileRecord, LocalId, LocalIdAllocator,
    ProgressUpdated, Removed, ServerId, UploadEvent, UploaderId,
};
use crate::registry::{FileRegistry, NewFile};
use crate::tracker::Tracker;
use crate::transport::{
    FileStamp, SelectedFile, TransportEvent, TransportHandle, UploadRequest, UploadTransport,
};
use crate::view::{FileList, UploadView, ViewHandle};

pub const BACKEND_ERROR: &str = "Upload failed: Undefined backend error.";
pub const CONNECTION_ERROR: &str = "Upload failed: connection error.";
pub const MALFORMED_RESULT: &str = "Upload failed: malformed server response.";

/// Turns transport events into registry, tracker and view updates.
///
/// Every handler commits its changes in a single view transaction and only
/// then fires the matching listener, at most once per event. Handlers
/// whose view has been dropped still update the registry and tracker.
pub struct UploadService {
    registry: Arc<FileRegistry>,
    transport: Arc<dyn UploadTransport>,
    ids: LocalIdAllocator,
}

impl UploadService {
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        Self::with_registry(Arc::new(FileRegistry::new()), transport)
    }

    pub fn with_registry(registry: Arc<FileRegistry>, transport: Arc<dyn UploadTransport>) -> Self {
        Self {
            registry,
            transport,
            ids: LocalIdAllocator::new(),
        }
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    /// Links a (possibly re-created) view to its uploader. Uploads still in
    /// flight from an earlier view are merged into its list, flagged as
    /// resuming. Returns how many were restored.
    pub fn attach(&self, view: &Arc<ViewHandle>) -> usize {
        let uploader_id = view.ensure_uploader_id();
        self.registry.link_view(&uploader_id, view);

        if !self.registry.has_active_uploads(&uploader_id) {
            tracing::debug!("Linked view for uploader {}", uploader_id);
            return 0;
        }

        let active = self.registry.get_active_uploads(&uploader_id);
        let restored = active.len();
        view.transaction(|v| {
            v.files.extend(active);
            v.has_files = true;
        });
        tracing::info!("Linked view for uploader {}, resumed {} uploads", uploader_id, restored);
        restored
    }

    /// Unlinks `view`; its uploads keep running in the background.
    pub fn detach(&self, view: &Arc<ViewHandle>) {
        let uploader_id = view.uploader_id();
        self.registry.unlink_view(&uploader_id, view);
        tracing::debug!("Detached view for uploader {}", uploader_id);
    }

    /// Registers a selected file, fires `on_add`, then submits it.
    pub fn add(&self, file: SelectedFile, view: &Arc<ViewHandle>) -> FileRecord {
        let uploader_id = view.ensure_uploader_id();
        let local_id = self.ids.next();
        let handle = TransportHandle::new();
        let filename = file.name.clone();
        tracing::debug!("Adding {} to uploader {} as {}", filename, uploader_id, local_id);

        self.registry.link_view(&uploader_id, view);
        let (record, url, form_data) = view.transaction(|v| {
            let record = self.registry.add_file(
                NewFile {
                    uploader_id: uploader_id.clone(),
                    local_id,
                    filename: filename.clone(),
                    handle: Some(handle.clone()),
                },
                Some(v),
            );
            (record, v.url.clone(), v.form_data.clone())
        });

        view.listeners().fire(&UploadEvent::Added(Added {
            uploader_id: uploader_id.clone(),
            local_id,
            filename,
            file: record.clone(),
        }));

        tracing::info!("📤 Submitting {} ({})", record.original_name, local_id);
        self.transport.submit(
            UploadRequest {
                stamp: FileStamp { uploader_id, local_id },
                file,
                url,
                form_data,
            },
            handle,
        );
        record
    }

    pub fn progress(&self, stamp: &FileStamp, loaded: u64, total: u64) -> Result<i32> {
        let progress = if total == 0 {
            0.0
        } else {
            ((loaded as f64 / total as f64) * 100.0).floor().min(100.0)
        };
        tracing::trace!("Upload {} at {}%", stamp.local_id, progress);

        let (percentage, view) = self.commit(&stamp.uploader_id, |v| {
            self.registry
                .set_progress(&stamp.uploader_id, stamp.local_id, progress, v)
        });
        let percentage = percentage?;

        fire(
            view,
            UploadEvent::ProgressUpdated(ProgressUpdated {
                uploader_id: stamp.uploader_id.clone(),
                local_id: stamp.local_id,
                percentage,
                loaded,
                total,
            }),
        );
        Ok(percentage)
    }

    /// Handles a finished request. A result without a server id is a
    /// backend-reported failure: the file goes through the error path and
    /// the failure is returned.
    pub fn done(&self, stamp: &FileStamp, result: &str) -> Result<FileRecord> {
        tracing::debug!("Upload {} done", stamp.local_id);

        let parsed: serde_json::Value = match serde_json::from_str(result) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Upload {} returned an unreadable result: {}", stamp.local_id, e);
                return self.reject(stamp, MALFORMED_RESULT);
            }
        };

        let Some(server_id) = ServerId::from_result(&parsed) else {
            let message = parsed
                .get("file")
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or(BACKEND_ERROR)
                .to_string();
            return self.reject(stamp, &message);
        };

        let (record, view) = self.commit(&stamp.uploader_id, |v| {
            self.registry
                .set_done(&stamp.uploader_id, stamp.local_id, server_id.clone(), v)
        });
        let record = record?;
        tracing::info!("✅ Upload {} stored as {}", stamp.local_id, server_id);

        fire(
            view,
            UploadEvent::Completed(Completed {
                uploader_id: stamp.uploader_id.clone(),
                local_id: stamp.local_id,
                server_id,
                result: parsed,
                file: record.clone(),
            }),
        );
        Ok(record)
    }

    /// Handles a failed request; the message comes from the `error` field of
    /// the response body when there is one.
    pub fn fail(&self, stamp: &FileStamp, response: &str) -> Result<FileRecord> {
        let message = serde_json::from_str::<serde_json::Value>(response)
            .ok()
            .and_then(|body| body.get("error")?.as_str().map(str::to_string))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| CONNECTION_ERROR.to_string());
        tracing::warn!("❌ Upload {} failed: {}", stamp.local_id, message);

        self.mark_failed(stamp, &message)
    }

    /// Cancels one upload. `on_cancel` fires right away; the abort and the
    /// cleanup run on the next scheduler tick so a transport callback can
    /// cancel its own upload. The cleanup clears tracking for the whole
    /// uploader, not just this file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn cancel(&self, file: &FileRecord) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let uploader_id = file.uploader_id.clone();
        let local_id = file.local_id;
        let handle = file
            .handle
            .clone()
            .or_else(|| registry.record(&uploader_id, local_id).and_then(|r| r.handle));

        let task = tokio::spawn(async move {
            tokio::task::yield_now().await;

            if let Some(handle) = handle {
                handle.abort();
            }

            let clean = |list: &mut FileList| {
                let removed = registry.remove(local_id, list, &uploader_id);
                registry.discard(&uploader_id, local_id);
                registry.tracking(&uploader_id).clear();
                removed
            };

            let view = registry.resolve_view(&uploader_id);
            let removed = match &view {
                Some(view) => view.transaction(|v| {
                    let removed = clean(&mut v.files);
                    if v.files.is_empty() {
                        v.has_files = false;
                    }
                    removed
                }),
                None => clean(&mut FileList::new()),
            };
            if let Some(record) = removed {
                fire(view, removed_event(&record));
            }
            tracing::info!("🛑 Cancelled upload {} for uploader {}", local_id, uploader_id);
        });

        fire(
            self.registry.resolve_view(&file.uploader_id),
            UploadEvent::Cancelled(Cancelled { file: file.clone() }),
        );
        task
    }

    /// Cancels every active upload of `uploader_id`, then fires
    /// `on_cancel_all`. The returned tasks finish when each cleanup is done.
    pub fn cancel_all(&self, uploader_id: &UploaderId) -> Vec<JoinHandle<()>> {
        let active = self.registry.get_active_uploads(uploader_id);
        tracing::debug!("Cancelling {} uploads for uploader {}", active.len(), uploader_id);

        let tasks: Vec<_> = active.values().map(|file| self.cancel(file)).collect();

        fire(
            self.registry.resolve_view(uploader_id),
            UploadEvent::CancelledAll(CancelledAll {
                uploader_id: uploader_id.clone(),
                cancelled: tasks.len(),
            }),
        );
        tasks
    }

    /// Removes a file from the linked view (if any) and from the registry.
    /// `on_remove` fires only for files the registry held.
    pub fn remove(&self, uploader_id: &UploaderId, local_id: LocalId) -> Option<FileRecord> {
        let (removed, view) = self.commit(uploader_id, |v| match v {
            Some(v) => {
                let removed = self.registry.remove(local_id, &mut v.files, uploader_id);
                if v.files.is_empty() {
                    v.has_files = false;
                }
                removed
            }
            None => self.registry.remove(local_id, &mut FileList::new(), uploader_id),
        });

        let record = removed?;
        fire(view, removed_event(&record));
        Some(record)
    }

    pub fn tracking(&self, uploader_id: &UploaderId) -> RefMut<'_, UploaderId, Tracker> {
        self.registry.tracking(uploader_id)
    }

    pub fn exists(&self, local_id: LocalId, uploader_id: &UploaderId) -> bool {
        self.registry.exists(local_id, uploader_id)
    }

    pub fn has_active_uploads(&self, uploader_id: &UploaderId) -> bool {
        self.registry.has_active_uploads(uploader_id)
    }

    pub fn get_active_uploads(&self, uploader_id: &UploaderId) -> FileList {
        self.registry.get_active_uploads(uploader_id)
    }

    /// Routes one transport event to its handler.
    pub fn dispatch(&self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Progress { stamp, loaded, total } => {
                self.progress(&stamp, loaded, total).map(|_| ())
            }
            TransportEvent::Done { stamp, result } => self.done(&stamp, &result).map(|_| ()),
            TransportEvent::Fail { stamp, response } => self.fail(&stamp, &response).map(|_| ()),
        }
    }

    /// Applies transport events one at a time until every sender is gone.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        tracing::debug!("Upload event loop started");
        while let Some(event) = events.recv().await {
            match self.dispatch(event) {
                Ok(()) => {}
                // late events for cancelled or removed files
                Err(e @ UploadError::UnknownUpload { .. }) => tracing::debug!("Dropped event: {}", e),
                Err(e) => tracing::debug!("Upload ended in error: {}", e),
            }
        }
        tracing::debug!("Upload event loop stopped");
    }

    fn reject(&self, stamp: &FileStamp, message: &str) -> Result<FileRecord> {
        tracing::warn!("❌ Upload {} rejected by backend: {}", stamp.local_id, message);
        self.mark_failed(stamp, message)?;
        Err(UploadError::Backend {
            message: message.to_string(),
        })
    }

    fn mark_failed(&self, stamp: &FileStamp, message: &str) -> Result<FileRecord> {
        let (record, view) = self.commit(&stamp.uploader_id, |v| {
            self.registry
                .set_error(&stamp.uploader_id, stamp.local_id, message, v)
        });
        let record = record?;

        fire(
            view,
            UploadEvent::Failed(Failed {
                uploader_id: stamp.uploader_id.clone(),
                local_id: stamp.local_id,
                error: record.error.clone().unwrap_or_else(|| message.to_string()),
                file: record.clone(),
            }),
        );
        Ok(record)
    }

    // runs `apply` inside the linked view's transaction, or bare if none
    fn commit<R>(
        &self,
        uploader_id: &UploaderId,
        apply: impl FnOnce(Option<&mut UploadView>) -> R,
    ) -> (R, Option<Arc<ViewHandle>>) {
        match self.registry.resolve_view(uploader_id) {
            Some(view) => {
                let result = view.transaction(|v| apply(Some(v)));
                (result, Some(view))
            }
            None => (apply(None), None),
        }
    }
}

fn removed_event(record: &FileRecord) -> UploadEvent {
    UploadEvent::Removed(Removed {
        uploader_id: record.uploader_id.clone(),
        local_id: record.local_id,
    })
}

fn fire(view: Option<Arc<ViewHandle>>, event: UploadEvent) {
    if let Some(view) = view {
        view.listeners().fire(&event);
    }
}
