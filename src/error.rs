use thiserror::Error;

use crate::models::{LocalId, UploaderId};

pub type Result<T> = std::result::Result<T, UploadError>;

// errors raised while tracking or transporting uploads
#[derive(Error, Debug)]
pub enum UploadError {
    /// the backend answered but did not assign a server id
    #[error("{message}")]
    Backend { message: String },

    /// the transport reported a failed request
    #[error("{message}")]
    Transport { message: String },

    /// an event referenced a file the registry does not hold
    #[error("unknown upload {local_id} for uploader {uploader_id}")]
    UnknownUpload {
        uploader_id: UploaderId,
        local_id: LocalId,
    },

    #[error("media {hashed_id} not found")]
    MediaNotFound { hashed_id: String },

    #[error("media {hashed_id} still processing after {attempts} polls")]
    MediaTimeout { hashed_id: String, attempts: u32 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    pub fn unknown(uploader_id: &UploaderId, local_id: LocalId) -> Self {
        UploadError::UnknownUpload {
            uploader_id: uploader_id.clone(),
            local_id,
        }
    }
}
