use std::collections::HashMap;

use crate::models::LocalId;

/// Counts added and active uploads for one uploader so views can ask
/// "anything in flight?" without scanning the registry.
///
/// Files the tracker never saw (pre-existing files shown by a view) are
/// ignored by `remove` and `deactivate`.
#[derive(Debug, Default, Clone)]
pub struct Tracker {
    added_count: usize,
    active_count: usize,
    /// local id -> still in flight
    tracked_files: HashMap<LocalId, bool>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a newly selected file. Not idempotent: call once per
    /// observed upload.
    pub fn add(&mut self, id: LocalId) {
        self.tracked_files.insert(id, true);
        self.added_count += 1;
        self.active_count += 1;
    }

    pub fn remove(&mut self, id: LocalId) {
        if let Some(active) = self.tracked_files.remove(&id) {
            if active {
                self.active_count = self.active_count.saturating_sub(1);
            }
            self.added_count = self.added_count.saturating_sub(1);
        }
    }

    /// Marks a finished upload inactive; it stays counted as added.
    pub fn deactivate(&mut self, id: LocalId) {
        if let Some(active) = self.tracked_files.get_mut(&id) {
            if *active {
                *active = false;
                self.active_count = self.active_count.saturating_sub(1);
            }
        }
    }

    pub fn clear(&mut self) {
        self.added_count = 0;
        self.active_count = 0;
        self.tracked_files.clear();
    }

    pub fn has_new_files(&self) -> bool {
        self.added_count > 0
    }

    pub fn has_active_uploads(&self) -> bool {
        self.active_count > 0
    }

    pub fn new_files_count(&self) -> usize {
        self.added_count
    }

    pub fn active_uploads_count(&self) -> usize {
        self.active_count
    }

    pub fn is_tracked(&self, id: LocalId) -> bool {
        self.tracked_files.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_files_start_active() {
        let mut tracker = Tracker::new();
        for id in 1..=5 {
            tracker.add(LocalId(id));
            assert_eq!(tracker.active_uploads_count(), tracker.new_files_count());
        }
        assert_eq!(tracker.new_files_count(), 5);
        assert!(tracker.has_new_files());
        assert!(tracker.has_active_uploads());
    }

    #[test]
    fn test_deactivate_keeps_file_counted() {
        let mut tracker = Tracker::new();
        tracker.add(LocalId(1));
        tracker.add(LocalId(2));

        tracker.deactivate(LocalId(1));
        assert_eq!(tracker.active_uploads_count(), 1);
        assert_eq!(tracker.new_files_count(), 2);

        // a second deactivate must not push active below added
        tracker.deactivate(LocalId(1));
        assert_eq!(tracker.active_uploads_count(), 1);
    }

    #[test]
    fn test_remove_restores_counts() {
        let mut tracker = Tracker::new();
        tracker.add(LocalId(7));
        tracker.add(LocalId(8));

        tracker.remove(LocalId(8));
        assert_eq!(tracker.new_files_count(), 1);
        assert_eq!(tracker.active_uploads_count(), 1);

        // second remove is a no-op
        tracker.remove(LocalId(8));
        assert_eq!(tracker.new_files_count(), 1);
        assert_eq!(tracker.active_uploads_count(), 1);
    }

    #[test]
    fn test_remove_inactive_only_drops_added() {
        let mut tracker = Tracker::new();
        tracker.add(LocalId(1));
        tracker.deactivate(LocalId(1));
        tracker.remove(LocalId(1));
        assert_eq!(tracker.new_files_count(), 0);
        assert_eq!(tracker.active_uploads_count(), 0);
    }

    #[test]
    fn test_untracked_ids_are_ignored() {
        let mut tracker = Tracker::new();
        tracker.add(LocalId(1));

        tracker.remove(LocalId(99));
        tracker.deactivate(LocalId(99));
        assert_eq!(tracker.new_files_count(), 1);
        assert_eq!(tracker.active_uploads_count(), 1);
        assert!(!tracker.is_tracked(LocalId(99)));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut tracker = Tracker::new();
        tracker.add(LocalId(1));
        tracker.add(LocalId(2));
        tracker.deactivate(LocalId(2));

        tracker.clear();
        assert_eq!(tracker.new_files_count(), 0);
        assert_eq!(tracker.active_uploads_count(), 0);
        assert!(!tracker.has_new_files());
        assert!(!tracker.has_active_uploads());
        assert!(!tracker.is_tracked(LocalId(1)));
    }
}
