#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use upload_tracker::config::Config;
use upload_tracker::transport::{TransportHandle, UploadRequest, UploadTransport};
use upload_tracker::{FileStamp, Listeners, LocalId, UploadEvent};

// records submissions instead of sending anything
#[derive(Default)]
pub struct MockTransport {
    pub submitted: Mutex<Vec<(UploadRequest, TransportHandle)>>,
}

impl UploadTransport for MockTransport {
    fn submit(&self, request: UploadRequest, handle: TransportHandle) {
        self.submitted.lock().unwrap().push((request, handle));
    }
}

impl MockTransport {
    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn stamp(&self, index: usize) -> FileStamp {
        self.submitted.lock().unwrap()[index].0.stamp.clone()
    }

    pub fn handle(&self, local_id: LocalId) -> TransportHandle {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .find(|(req, _)| req.stamp.local_id == local_id)
            .map(|(_, handle)| handle.clone())
            .expect("no submission for local id")
    }
}

// collects every listener invocation in order
#[derive(Clone, Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<UploadEvent>>>,
}

impl Recorder {
    pub fn listeners(&self) -> Listeners {
        let push = |events: Arc<Mutex<Vec<UploadEvent>>>| {
            move |event: UploadEvent| events.lock().unwrap().push(event)
        };
        let (a, p, d, e, r, c, all) = (
            push(self.events.clone()),
            push(self.events.clone()),
            push(self.events.clone()),
            push(self.events.clone()),
            push(self.events.clone()),
            push(self.events.clone()),
            push(self.events.clone()),
        );
        Listeners::new()
            .on_add(move |x| a(UploadEvent::Added(x.clone())))
            .on_progress(move |x| p(UploadEvent::ProgressUpdated(x.clone())))
            .on_done(move |x| d(UploadEvent::Completed(x.clone())))
            .on_error(move |x| e(UploadEvent::Failed(x.clone())))
            .on_remove(move |x| r(UploadEvent::Removed(x.clone())))
            .on_cancel(move |x| c(UploadEvent::Cancelled(x.clone())))
            .on_cancel_all(move |x| all(UploadEvent::CancelledAll(x.clone())))
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| match event {
                UploadEvent::Added(_) => "added",
                UploadEvent::ProgressUpdated(_) => "progress",
                UploadEvent::Completed(_) => "completed",
                UploadEvent::Failed(_) => "failed",
                UploadEvent::Removed(_) => "removed",
                UploadEvent::Cancelled(_) => "cancelled",
                UploadEvent::CancelledAll(_) => "cancelled_all",
            })
            .collect()
    }

    pub fn take(&self) -> Vec<UploadEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

pub fn test_config(api_key: &str) -> Config {
    Config {
        upload_url: "http://127.0.0.1:9/upload".to_string(),
        media_url: "http://127.0.0.1:9/medias.json".to_string(),
        api_token: String::new(),
        project_id: String::new(),
        chunk_size: 4,
        media_poll_interval: std::time::Duration::from_millis(10),
        media_poll_max_attempts: None,
        status_host: "127.0.0.1".to_string(),
        status_port: 0,
        api_key_hash: Config::hash_api_key(api_key),
        max_upload_size: 1024 * 1024,
        worker_threads: 1,
    }
}
