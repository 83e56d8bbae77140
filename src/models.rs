use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::transport::TransportHandle;

/// percentage sentinel telling the view to hide the bar and show the error
pub const PERCENTAGE_HIDDEN: i32 = -1;

// identifies one uploader widget instance; scopes everything else
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploaderId(String);

impl UploaderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// fresh id for views that did not bring their own
    pub fn generate() -> Self {
        Self(format!("uploader-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UploaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UploaderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UploaderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// local upload id, assigned the moment a file is selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out time based local ids (unix millis), bumped past the last one
/// issued so two selections in the same millisecond never collide.
#[derive(Debug, Default)]
pub struct LocalIdAllocator {
    last: AtomicU64,
}

impl LocalIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> LocalId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return LocalId(candidate),
                Err(actual) => last = actual,
            }
        }
    }
}

// id assigned by the remote once the upload completes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Reads the `id` field of a completion payload. Null, empty strings,
    /// zero and `false` all count as "no id".
    pub fn from_result(result: &serde_json::Value) -> Option<Self> {
        match result.get("id")? {
            serde_json::Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) if n.as_f64() != Some(0.0) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file known to an uploader. The registry owns the authoritative copy;
/// the view list holds a mirror that may briefly lag on `percentage`,
/// `active` and `error`.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub local_id: LocalId,
    pub uploader_id: UploaderId,
    pub original_name: String,
    pub server_id: Option<ServerId>,
    pub percentage: i32,
    pub active: bool,
    pub error: Option<String>,
    pub resuming: bool,
    #[serde(skip)]
    pub handle: Option<TransportHandle>,
}

impl FileRecord {
    pub fn new(uploader_id: UploaderId, local_id: LocalId, original_name: impl Into<String>) -> Self {
        Self {
            local_id,
            uploader_id,
            original_name: original_name.into(),
            server_id: None,
            percentage: 0,
            active: true,
            error: None,
            resuming: false,
            handle: None,
        }
    }
}

// the transport handle is a capability, not data
impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        self.local_id == other.local_id
            && self.uploader_id == other.uploader_id
            && self.original_name == other.original_name
            && self.server_id == other.server_id
            && self.percentage == other.percentage
            && self.active == other.active
            && self.error == other.error
            && self.resuming == other.resuming
    }
}

// payload for on_add
#[derive(Debug, Clone, Serialize)]
pub struct Added {
    pub uploader_id: UploaderId,
    pub local_id: LocalId,
    pub filename: String,
    pub file: FileRecord,
}

// payload for on_progress
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdated {
    pub uploader_id: UploaderId,
    pub local_id: LocalId,
    pub percentage: i32,
    pub loaded: u64,
    pub total: u64,
}

// payload for on_done
#[derive(Debug, Clone, Serialize)]
pub struct Completed {
    pub uploader_id: UploaderId,
    pub local_id: LocalId,
    pub server_id: ServerId,
    pub result: serde_json::Value,
    pub file: FileRecord,
}

// payload for on_error
#[derive(Debug, Clone, Serialize)]
pub struct Failed {
    pub uploader_id: UploaderId,
    pub local_id: LocalId,
    pub error: String,
    pub file: FileRecord,
}

// payload for on_remove
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Removed {
    pub uploader_id: UploaderId,
    pub local_id: LocalId,
}

// payload for on_cancel
#[derive(Debug, Clone, Serialize)]
pub struct Cancelled {
    pub file: FileRecord,
}

// payload for on_cancel_all
#[derive(Debug, Clone, Serialize)]
pub struct CancelledAll {
    pub uploader_id: UploaderId,
    pub cancelled: usize,
}

/// One lifecycle notification, routed to the matching listener slot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadEvent {
    Added(Added),
    ProgressUpdated(ProgressUpdated),
    Completed(Completed),
    Failed(Failed),
    Removed(Removed),
    Cancelled(Cancelled),
    CancelledAll(CancelledAll),
}

// status api: linked view
#[derive(Serialize, Debug)]
pub struct ViewResponse {
    pub uploader_id: UploaderId,
    pub has_files: bool,
    pub files: Vec<FileRecord>,
    pub revision: u64,
}

// status api: recovery query
#[derive(Serialize, Debug)]
pub struct ActiveUploadsResponse {
    pub uploader_id: UploaderId,
    pub has_active_uploads: bool,
    pub active_count: usize,
    pub new_files_count: usize,
    pub files: Vec<FileRecord>,
}

// status api: file removal
#[derive(Serialize, Debug)]
pub struct RemoveResponse {
    pub success: bool,
    pub uploader_id: UploaderId,
    pub local_id: LocalId,
    pub tracked: bool,
}

// status api: batch cancellation
#[derive(Serialize, Debug)]
pub struct CancelAllResponse {
    pub uploader_id: UploaderId,
    pub cancelled: usize,
}

// generic error response
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
