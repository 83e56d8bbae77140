use std::sync::{Arc, Weak};

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;

use crate::error::{Result, UploadError};
use crate::models::{FileRecord, LocalId, ServerId, UploaderId, PERCENTAGE_HIDDEN};
use crate::tracker::Tracker;
use crate::transport::TransportHandle;
use crate::view::{FileList, UploadView, ViewHandle};

/// error stored when a failure arrives without a message
pub const DEFAULT_ERROR: &str = "Upload failed.";

// a freshly selected file about to be registered
#[derive(Debug, Clone)]
pub struct NewFile {
    pub uploader_id: UploaderId,
    pub local_id: LocalId,
    pub filename: String,
    pub handle: Option<TransportHandle>,
}

/// Canonical file records per uploader, the per-uploader trackers, and a
/// non-owning table of the views currently linked to each uploader.
///
/// Entries are created lazily and live as long as the registry, so uploads
/// survive their view being dropped and re-linked.
///
/// The `view` arguments are the caller's already-locked view data; a `None`
/// view updates only the registry side.
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: DashMap<UploaderId, FileList>,
    trackers: DashMap<UploaderId, Tracker>,
    views: DashMap<UploaderId, Weak<ViewHandle>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker for `uploader_id`, created on first use. Do not hold the
    /// returned guard across other registry calls for the same uploader.
    pub fn tracking(&self, uploader_id: &UploaderId) -> RefMut<'_, UploaderId, Tracker> {
        self.trackers.entry(uploader_id.clone()).or_default()
    }

    pub fn has_active_uploads(&self, uploader_id: &UploaderId) -> bool {
        self.trackers
            .get(uploader_id)
            .map(|t| t.has_active_uploads())
            .unwrap_or(false)
    }

    pub fn has_new_files(&self, uploader_id: &UploaderId) -> bool {
        self.trackers
            .get(uploader_id)
            .map(|t| t.has_new_files())
            .unwrap_or(false)
    }

    pub fn active_uploads_count(&self, uploader_id: &UploaderId) -> usize {
        self.trackers
            .get(uploader_id)
            .map(|t| t.active_uploads_count())
            .unwrap_or(0)
    }

    pub fn new_files_count(&self, uploader_id: &UploaderId) -> usize {
        self.trackers
            .get(uploader_id)
            .map(|t| t.new_files_count())
            .unwrap_or(0)
    }

    pub fn link_view(&self, uploader_id: &UploaderId, view: &Arc<ViewHandle>) {
        self.views.insert(uploader_id.clone(), Arc::downgrade(view));
    }

    /// Forgets the view, unless a newer one has been linked since.
    pub fn unlink_view(&self, uploader_id: &UploaderId, view: &Arc<ViewHandle>) {
        self.views
            .remove_if(uploader_id, |_, linked| std::ptr::eq(linked.as_ptr(), Arc::as_ptr(view)));
    }

    pub fn resolve_view(&self, uploader_id: &UploaderId) -> Option<Arc<ViewHandle>> {
        let weak = self.views.get(uploader_id)?.value().clone();
        weak.upgrade()
    }

    /// Registers a new file in the view list and the registry and starts
    /// tracking it.
    pub fn add_file(&self, new: NewFile, view: Option<&mut UploadView>) -> FileRecord {
        let mut record = FileRecord::new(new.uploader_id.clone(), new.local_id, new.filename);
        record.handle = new.handle;

        if let Some(view) = view {
            view.files.insert(record.local_id, record.clone());
            view.has_files = true;
        }

        self.files
            .entry(new.uploader_id.clone())
            .or_default()
            .insert(record.local_id, record.clone());

        self.tracking(&new.uploader_id).add(record.local_id);
        tracing::debug!("Registered file {} for uploader {}", record.local_id, new.uploader_id);
        record
    }

    /// Stores `progress` rounded to the nearest integer. Tracking is untouched.
    pub fn set_progress(
        &self,
        uploader_id: &UploaderId,
        local_id: LocalId,
        progress: f64,
        view: Option<&mut UploadView>,
    ) -> Result<i32> {
        let percentage = progress.round() as i32;
        self.update(uploader_id, local_id, |record| record.percentage = percentage)?;

        if let Some(file) = view.and_then(|v| v.files.get_mut(&local_id)) {
            file.percentage = percentage;
        }
        Ok(percentage)
    }

    pub fn set_done(
        &self,
        uploader_id: &UploaderId,
        local_id: LocalId,
        server_id: ServerId,
        view: Option<&mut UploadView>,
    ) -> Result<FileRecord> {
        let record = self.update(uploader_id, local_id, |record| {
            record.server_id = Some(server_id.clone());
            record.active = false;
        })?;

        if let Some(file) = view.and_then(|v| v.files.get_mut(&local_id)) {
            file.server_id = Some(server_id);
            file.active = false;
        }

        self.tracking(uploader_id).deactivate(local_id);
        Ok(record)
    }

    /// Annotates the file with `error` and hides its percentage. The file is
    /// untracked but stays listed until it is removed explicitly.
    pub fn set_error(
        &self,
        uploader_id: &UploaderId,
        local_id: LocalId,
        error: &str,
        view: Option<&mut UploadView>,
    ) -> Result<FileRecord> {
        let error = if error.is_empty() { DEFAULT_ERROR } else { error };

        let record = self.update(uploader_id, local_id, |record| {
            record.error = Some(error.to_string());
            record.percentage = PERCENTAGE_HIDDEN;
            record.active = false;
        })?;

        if let Some(file) = view.and_then(|v| v.files.get_mut(&local_id)) {
            file.error = Some(error.to_string());
            file.percentage = PERCENTAGE_HIDDEN;
        }

        self.tracking(uploader_id).remove(local_id);
        Ok(record)
    }

    pub fn exists(&self, local_id: LocalId, uploader_id: &UploaderId) -> bool {
        self.files
            .get(uploader_id)
            .map(|files| files.contains_key(&local_id))
            .unwrap_or(false)
    }

    /// Drops the file from `list` unconditionally. Files the registry owns
    /// are also untracked and discarded; pre-existing files only ever live
    /// in the list. Returns the discarded record so the caller can fire
    /// `on_remove` once the view's transaction has been released.
    pub fn remove(
        &self,
        local_id: LocalId,
        list: &mut FileList,
        uploader_id: &UploaderId,
    ) -> Option<FileRecord> {
        list.remove(&local_id);

        if !self.exists(local_id, uploader_id) {
            return None;
        }

        self.tracking(uploader_id).remove(local_id);
        self.discard(uploader_id, local_id)
    }

    /// Drops the registry entry without touching tracking or any view.
    pub fn discard(&self, uploader_id: &UploaderId, local_id: LocalId) -> Option<FileRecord> {
        self.files.get_mut(uploader_id)?.remove(&local_id)
    }

    /// Active uploads for `uploader_id`, each marked as resuming.
    pub fn get_active_uploads(&self, uploader_id: &UploaderId) -> FileList {
        let Some(mut files) = self.files.get_mut(uploader_id) else {
            return FileList::new();
        };

        files
            .values_mut()
            .filter(|record| record.active)
            .map(|record| {
                record.resuming = true;
                (record.local_id, record.clone())
            })
            .collect()
    }

    pub fn record(&self, uploader_id: &UploaderId, local_id: LocalId) -> Option<FileRecord> {
        self.files.get(uploader_id)?.get(&local_id).cloned()
    }

    pub fn files(&self, uploader_id: &UploaderId) -> FileList {
        self.files
            .get(uploader_id)
            .map(|files| files.value().clone())
            .unwrap_or_default()
    }

    fn update(
        &self,
        uploader_id: &UploaderId,
        local_id: LocalId,
        apply: impl FnOnce(&mut FileRecord),
    ) -> Result<FileRecord> {
        let mut files = self
            .files
            .get_mut(uploader_id)
            .ok_or_else(|| UploadError::unknown(uploader_id, local_id))?;
        let record = files
            .get_mut(&local_id)
            .ok_or_else(|| UploadError::unknown(uploader_id, local_id))?;
        apply(record);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Listeners;
    use std::sync::Mutex;

    fn new_file(uploader: &str, id: u64) -> NewFile {
        NewFile {
            uploader_id: UploaderId::from(uploader),
            local_id: LocalId(id),
            filename: format!("file-{}.mp4", id),
            handle: None,
        }
    }

    #[test]
    fn test_add_file_fills_both_copies() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        let mut view = UploadView::new("w1", "http://upload.test");

        let record = registry.add_file(new_file("w1", 1001), Some(&mut view));

        assert_eq!(record.percentage, 0);
        assert!(record.active);
        assert!(view.has_files);
        assert_eq!(view.files.get(&LocalId(1001)), Some(&record));
        assert!(registry.exists(LocalId(1001), &w1));
        assert!(registry.has_active_uploads(&w1));
        assert_eq!(registry.new_files_count(&w1), 1);
    }

    #[test]
    fn test_exists_for_unknown_keys() {
        let registry = FileRegistry::new();
        registry.add_file(new_file("w1", 1), None);

        assert!(!registry.exists(LocalId(2), &UploaderId::from("w1")));
        assert!(!registry.exists(LocalId(1), &UploaderId::from("never-seen")));
    }

    #[test]
    fn test_set_progress_rounds() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        let mut view = UploadView::new("w1", "");
        registry.add_file(new_file("w1", 1001), Some(&mut view));

        let pct = registry
            .set_progress(&w1, LocalId(1001), 47.6, Some(&mut view))
            .unwrap();

        assert_eq!(pct, 48);
        assert_eq!(view.files[&LocalId(1001)].percentage, 48);
        assert_eq!(registry.record(&w1, LocalId(1001)).unwrap().percentage, 48);
        assert_eq!(registry.active_uploads_count(&w1), 1);
    }

    #[test]
    fn test_set_done_deactivates() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        let mut view = UploadView::new("w1", "");
        registry.add_file(new_file("w1", 1001), Some(&mut view));
        assert!(registry.has_active_uploads(&w1));

        registry
            .set_done(&w1, LocalId(1001), ServerId::new("srv-42"), Some(&mut view))
            .unwrap();

        let shown = &view.files[&LocalId(1001)];
        assert!(!shown.active);
        assert_eq!(shown.server_id, Some(ServerId::new("srv-42")));
        assert!(!registry.has_active_uploads(&w1));
        assert_eq!(registry.new_files_count(&w1), 1);
    }

    #[test]
    fn test_set_error_untracks_but_keeps_listing() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        let mut view = UploadView::new("w1", "");
        registry.add_file(new_file("w1", 1002), Some(&mut view));

        registry
            .set_error(&w1, LocalId(1002), "disk full", Some(&mut view))
            .unwrap();

        let shown = &view.files[&LocalId(1002)];
        assert_eq!(shown.error.as_deref(), Some("disk full"));
        assert_eq!(shown.percentage, PERCENTAGE_HIDDEN);
        assert_eq!(registry.new_files_count(&w1), 0);
        assert_eq!(registry.active_uploads_count(&w1), 0);
        assert!(!registry.record(&w1, LocalId(1002)).unwrap().active);
    }

    #[test]
    fn test_set_error_defaults_message() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        registry.add_file(new_file("w1", 5), None);

        let record = registry.set_error(&w1, LocalId(5), "", None).unwrap();
        assert_eq!(record.error.as_deref(), Some(DEFAULT_ERROR));
    }

    #[test]
    fn test_updates_on_unknown_file_fail() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");

        let err = registry.set_progress(&w1, LocalId(1), 10.0, None).unwrap_err();
        assert!(matches!(err, UploadError::UnknownUpload { .. }));
    }

    #[test]
    fn test_remove_registered_file_leaves_listeners_to_caller() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = removed.clone();
        let handle = ViewHandle::new(
            UploadView::new("w1", ""),
            Listeners::new().on_remove(move |e| sink.lock().unwrap().push(e.clone())),
        );
        registry.link_view(&w1, &handle);

        let mut list = FileList::new();
        let mut view = UploadView::new("w1", "");
        registry.add_file(new_file("w1", 1), Some(&mut view));
        list.append(&mut view.files);

        let gone = registry.remove(LocalId(1), &mut list, &w1).unwrap();

        assert_eq!(gone.local_id, LocalId(1));
        assert!(list.is_empty());
        assert!(!registry.exists(LocalId(1), &w1));
        assert_eq!(registry.new_files_count(&w1), 0);
        assert!(removed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_pre_existing_file_only_touches_list() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        registry.add_file(new_file("w1", 1), None);

        let mut list = FileList::new();
        list.insert(LocalId(50), FileRecord::new(w1.clone(), LocalId(50), "old.mp4"));

        assert!(registry.remove(LocalId(50), &mut list, &w1).is_none());
        assert!(list.is_empty());
        assert_eq!(registry.new_files_count(&w1), 1);
    }

    #[test]
    fn test_get_active_uploads_marks_resuming() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        registry.add_file(new_file("w1", 1), None);
        registry.add_file(new_file("w1", 2), None);
        registry.set_done(&w1, LocalId(2), ServerId::new("s2"), None).unwrap();

        let first = registry.get_active_uploads(&w1);
        let second = registry.get_active_uploads(&w1);

        assert_eq!(first.len(), 1);
        assert!(first[&LocalId(1)].resuming);
        assert!(first[&LocalId(1)].active);
        assert_eq!(first, second);
        assert!(registry.get_active_uploads(&UploaderId::from("nobody")).is_empty());
    }

    #[test]
    fn test_unlink_keeps_newer_view() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        let old = ViewHandle::new(UploadView::new("w1", ""), Listeners::new());
        let new = ViewHandle::new(UploadView::new("w1", ""), Listeners::new());

        registry.link_view(&w1, &old);
        registry.link_view(&w1, &new);
        registry.unlink_view(&w1, &old);
        assert!(registry.resolve_view(&w1).is_some());

        registry.unlink_view(&w1, &new);
        assert!(registry.resolve_view(&w1).is_none());
    }

    #[test]
    fn test_dropped_view_no_longer_resolves() {
        let registry = FileRegistry::new();
        let w1 = UploaderId::from("w1");
        let view = ViewHandle::new(UploadView::new("w1", ""), Listeners::new());
        registry.link_view(&w1, &view);

        drop(view);
        assert!(registry.resolve_view(&w1).is_none());
    }
}
