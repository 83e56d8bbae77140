use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::media::MediaClient;
use crate::models::UploaderId;
use crate::reconciler::UploadService;
use crate::view::{Listeners, UploadView, ViewHandle};

/// State of the status api. It hosts the views a remote ui binds to; the
/// service only holds weak links to them, so dropping one here is a view
/// teardown.
pub struct AppState {
    pub service: Arc<UploadService>,
    pub views: DashMap<UploaderId, Arc<ViewHandle>>,
    pub upload_url: String,
    pub form_data: BTreeMap<String, String>,
    pub media: Option<Arc<MediaClient>>,
}

impl AppState {
    pub fn new(service: Arc<UploadService>, upload_url: impl Into<String>) -> Self {
        Self {
            service,
            views: DashMap::new(),
            upload_url: upload_url.into(),
            form_data: BTreeMap::new(),
            media: None,
        }
    }

    pub fn with_form_data(mut self, form_data: BTreeMap<String, String>) -> Self {
        self.form_data = form_data;
        self
    }

    /// watch media processing for completed uploads that report a hashed id
    pub fn with_media(mut self, media: Arc<MediaClient>) -> Self {
        self.media = Some(media);
        self
    }

    /// Returns the hosted view for `uploader_id`, creating and linking one
    /// (which resumes surviving uploads) if none is hosted.
    pub fn view(&self, uploader_id: &UploaderId) -> Arc<ViewHandle> {
        if let Some(view) = self.views.get(uploader_id) {
            return Arc::clone(view.value());
        }

        let view = self
            .views
            .entry(uploader_id.clone())
            .or_insert_with(|| {
                ViewHandle::new(
                    UploadView::new(uploader_id.clone(), self.upload_url.clone())
                        .with_form_data(self.form_data.clone()),
                    self.listeners(),
                )
            })
            .value()
            .clone();
        self.service.attach(&view);
        view
    }

    /// Drops the hosted view. Returns false if none was hosted.
    pub fn teardown(&self, uploader_id: &UploaderId) -> bool {
        match self.views.remove(uploader_id) {
            Some((_, view)) => {
                self.service.detach(&view);
                true
            }
            None => false,
        }
    }

    fn listeners(&self) -> Listeners {
        let listeners = Listeners::new()
            .on_add(|e| tracing::info!("Upload added: {} ({})", e.filename, e.local_id))
            .on_error(|e| tracing::warn!("Upload {} failed: {}", e.local_id, e.error))
            .on_cancel_all(|e| tracing::info!("Cancelled {} uploads for {}", e.cancelled, e.uploader_id));

        let Some(media) = self.media.clone() else {
            return listeners.on_done(|e| tracing::info!("Upload {} done as {}", e.local_id, e.server_id));
        };

        listeners.on_done(move |e| {
            tracing::info!("Upload {} done as {}", e.local_id, e.server_id);
            let Some(hashed_id) = e.result.get("hashed_id").and_then(|h| h.as_str()) else {
                return;
            };
            let media = Arc::clone(&media);
            let hashed_id = hashed_id.to_string();
            tokio::spawn(async move {
                match media.wait_until_processed(&hashed_id).await {
                    Ok(url) => tracing::info!("Media {} ready at {}", hashed_id, url),
                    Err(e) => tracing::warn!("Media {} unavailable: {}", hashed_id, e),
                }
            });
        })
    }
}
