//! Client-side upload tracking: per-uploader counters, a canonical file
//! registry, and the handlers that reconcile transport events with the views
//! bound to each uploader.

pub mod config;
pub mod error;
pub mod handlers;
pub mod media;
pub mod middleware;
pub mod models;
pub mod reconciler;
pub mod registry;
pub mod server;
pub mod state;
pub mod tracker;
pub mod transport;
pub mod utils;
pub mod view;

pub use error::{Result, UploadError};
pub use models::{FileRecord, LocalId, ServerId, UploadEvent, UploaderId};
pub use reconciler::UploadService;
pub use registry::FileRegistry;
pub use tracker::Tracker;
pub use transport::{FileStamp, SelectedFile, TransportEvent, TransportHandle, UploadTransport};
pub use view::{FileList, Listeners, UploadView, ViewHandle};
