use std::time::Duration;

use sha2::{Digest, Sha256};

/// configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// remote endpoint receiving the multipart uploads
    pub upload_url: String,
    /// media lookup endpoint of the video host
    pub media_url: String,
    /// video host api token, sent as form data and on media lookups
    pub api_token: String,
    /// video host project receiving uploads
    pub project_id: String,
    /// bytes per streamed upload chunk
    pub chunk_size: usize,
    pub media_poll_interval: Duration,
    /// unset means poll until processed
    pub media_poll_max_attempts: Option<u32>,
    /// status api address
    pub status_host: String,
    pub status_port: u16,
    /// api key for the status api (hashed)
    pub api_key_hash: String,
    /// maximum size of a file handed to the status api, in bytes
    pub max_upload_size: usize,
    /// number of tokio worker threads
    pub worker_threads: usize,
}

impl Config {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let api_key = std::env::var("STATUS_API_KEY").unwrap_or_else(|_| {
            tracing::warn!("⚠️  No STATUS_API_KEY set! Using default 'changeme'");
            "changeme".to_string()
        });

        Self {
            upload_url: std::env::var("UPLOAD_URL")
                .unwrap_or_else(|_| "https://upload.wistia.com/".to_string()),
            media_url: std::env::var("MEDIA_URL")
                .unwrap_or_else(|_| "https://api.wistia.com/v1/medias.json".to_string()),
            api_token: std::env::var("HOSTING_API_TOKEN").unwrap_or_default(),
            project_id: std::env::var("HOSTING_PROJECT_ID").unwrap_or_default(),
            chunk_size: parse_var("CHUNK_SIZE").unwrap_or(1024 * 1024),
            media_poll_interval: Duration::from_secs(parse_var("MEDIA_POLL_INTERVAL_SECS").unwrap_or(5)),
            media_poll_max_attempts: parse_var("MEDIA_POLL_MAX_ATTEMPTS"),
            status_host: std::env::var("STATUS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            status_port: parse_var("STATUS_PORT").unwrap_or(4850),
            api_key_hash: Self::hash_api_key(&api_key),
            max_upload_size: parse_var("MAX_UPLOAD_SIZE").unwrap_or(10 * 1024 * 1024 * 1024), // 10GB default
            worker_threads: parse_var("WORKER_THREADS").unwrap_or(4),
        }
    }

    // hash api key using sha256
    pub fn hash_api_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// form fields sent with every upload
    pub fn upload_form_data(&self) -> std::collections::BTreeMap<String, String> {
        let mut data = std::collections::BTreeMap::new();
        if !self.api_token.is_empty() {
            data.insert("access_token".to_string(), self.api_token.clone());
        }
        if !self.project_id.is_empty() {
            data.insert("project_id".to_string(), self.project_id.clone());
        }
        data
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
