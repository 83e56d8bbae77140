use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::models::{
    Added, Cancelled, CancelledAll, Completed, Failed, FileRecord, LocalId, ProgressUpdated,
    Removed, UploadEvent, UploaderId,
};

/// files as the view shows them, keyed by local id
pub type FileList = BTreeMap<LocalId, FileRecord>;

/// The data a view binds to. Passive: only the service writes to it, always
/// inside [`ViewHandle::transaction`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadView {
    pub uploader_id: UploaderId,
    pub url: String,
    pub form_data: BTreeMap<String, String>,
    pub files: FileList,
    pub has_files: bool,
}

impl UploadView {
    pub fn new(uploader_id: impl Into<UploaderId>, url: impl Into<String>) -> Self {
        Self {
            uploader_id: uploader_id.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_form_data(mut self, form_data: BTreeMap<String, String>) -> Self {
        self.form_data = form_data;
        self
    }
}

type Slot<T> = Option<Arc<dyn Fn(&T) + Send + Sync>>;

/// Optional callbacks a view registers; an empty slot is a no-op.
#[derive(Clone, Default)]
pub struct Listeners {
    on_add: Slot<Added>,
    on_progress: Slot<ProgressUpdated>,
    on_done: Slot<Completed>,
    on_error: Slot<Failed>,
    on_remove: Slot<Removed>,
    on_cancel: Slot<Cancelled>,
    on_cancel_all: Slot<CancelledAll>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_add(mut self, f: impl Fn(&Added) + Send + Sync + 'static) -> Self {
        self.on_add = Some(Arc::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(&ProgressUpdated) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_done(mut self, f: impl Fn(&Completed) + Send + Sync + 'static) -> Self {
        self.on_done = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&Failed) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_remove(mut self, f: impl Fn(&Removed) + Send + Sync + 'static) -> Self {
        self.on_remove = Some(Arc::new(f));
        self
    }

    pub fn on_cancel(mut self, f: impl Fn(&Cancelled) + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Arc::new(f));
        self
    }

    pub fn on_cancel_all(mut self, f: impl Fn(&CancelledAll) + Send + Sync + 'static) -> Self {
        self.on_cancel_all = Some(Arc::new(f));
        self
    }

    /// Invokes the slot matching the event, if one is set.
    pub fn fire(&self, event: &UploadEvent) {
        match event {
            UploadEvent::Added(e) => call(&self.on_add, e),
            UploadEvent::ProgressUpdated(e) => call(&self.on_progress, e),
            UploadEvent::Completed(e) => call(&self.on_done, e),
            UploadEvent::Failed(e) => call(&self.on_error, e),
            UploadEvent::Removed(e) => call(&self.on_remove, e),
            UploadEvent::Cancelled(e) => call(&self.on_cancel, e),
            UploadEvent::CancelledAll(e) => call(&self.on_cancel_all, e),
        }
    }
}

fn call<T>(slot: &Slot<T>, payload: &T) {
    if let Some(f) = slot {
        f(payload);
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("on_add", &self.on_add.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_done", &self.on_done.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_remove", &self.on_remove.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .field("on_cancel_all", &self.on_cancel_all.is_some())
            .finish()
    }
}

/// A live view: its bound data, its listeners and a revision counter that
/// ticks once per committed transaction.
///
/// The registry only keeps a `Weak` to this, so dropping the last `Arc`
/// tears the view down while uploads keep running.
pub struct ViewHandle {
    state: Mutex<UploadView>,
    listeners: Listeners,
    revision: watch::Sender<u64>,
}

impl ViewHandle {
    pub fn new(view: UploadView, listeners: Listeners) -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(view),
            listeners,
            revision,
        })
    }

    fn lock(&self) -> MutexGuard<'_, UploadView> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` as one unit and then signals a refresh. Readers going
    /// through [`snapshot`](Self::snapshot) see either the old or the new
    /// state.
    ///
    /// `f` must not call back into this view's `transaction` or `snapshot`.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut UploadView) -> R) -> R {
        let result = {
            let mut view = self.lock();
            f(&mut view)
        };
        self.revision.send_modify(|rev| *rev += 1);
        result
    }

    pub fn snapshot(&self) -> UploadView {
        self.lock().clone()
    }

    pub fn uploader_id(&self) -> UploaderId {
        self.lock().uploader_id.clone()
    }

    /// Returns the uploader id, generating one first if the view has none.
    pub fn ensure_uploader_id(&self) -> UploaderId {
        let mut view = self.lock();
        if view.uploader_id.is_empty() {
            view.uploader_id = UploaderId::generate();
        }
        view.uploader_id.clone()
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// change feed for whatever renders this view
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandle")
            .field("state", &*self.lock())
            .field("listeners", &self.listeners)
            .field("revision", &self.revision())
            .finish()
    }
}
