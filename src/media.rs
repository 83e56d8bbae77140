use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, UploadError};

/// A media entry as the hosting api reports it. `progress` is the
/// processing fraction, 1.0 once the video is playable.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaRecord {
    #[serde(default)]
    pub hashed_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: f64,
}

impl MediaRecord {
    pub fn is_ready(&self) -> bool {
        self.progress >= 1.0
    }

    pub fn percentage(&self) -> f64 {
        self.progress * 100.0
    }
}

pub fn embed_url(hashed_id: &str) -> String {
    format!("https://fast.wistia.net/embed/iframe/{}", hashed_id)
}

/// Client for the video-hosting media lookup.
#[derive(Debug, Clone)]
pub struct MediaClient {
    http: reqwest::Client,
    media_url: String,
    api_token: String,
    poll_interval: Duration,
    max_attempts: Option<u32>,
}

impl MediaClient {
    pub fn new(http: reqwest::Client, media_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http,
            media_url: media_url.into(),
            api_token: api_token.into(),
            poll_interval: Duration::from_secs(5),
            max_attempts: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// `None` polls until the media is ready, however long that takes.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub async fn get_media(&self, hashed_id: &str) -> Result<MediaRecord> {
        tracing::debug!("Looking up media {}", hashed_id);
        let records: Vec<MediaRecord> = self
            .http
            .get(&self.media_url)
            .query(&[("api_password", self.api_token.as_str()), ("hashed_id", hashed_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        records
            .into_iter()
            .next()
            .ok_or_else(|| UploadError::MediaNotFound {
                hashed_id: hashed_id.to_string(),
            })
    }

    /// Polls the media until processing completes and returns its embed url.
    pub async fn wait_until_processed(&self, hashed_id: &str) -> Result<String> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let media = self.get_media(hashed_id).await?;
            if media.is_ready() {
                tracing::info!("🎬 Media {} processed", hashed_id);
                return Ok(embed_url(hashed_id));
            }

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(UploadError::MediaTimeout {
                    hashed_id: hashed_id.to_string(),
                    attempts,
                });
            }

            tracing::info!(
                "Media {} processing at {:.0}%, checking again in {:?}",
                hashed_id,
                media.percentage(),
                self.poll_interval
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
