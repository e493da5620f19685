//! Upstream vigilance feed client.
//!
//! Fetches the current vigilance bulletin for a region and normalizes it
//! into a [`SeveritySnapshot`]. Entries with unrecognized phenomena or
//! level codes are dropped with a warning instead of failing the whole
//! snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use vigie_types::{Phenomenon, Severity};
use vigie_watch::SeveritySnapshot;

/// Errors from a feed fetch.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The request never completed; a later poll may succeed.
    #[error("transient feed error: {0}")]
    Transient(String),
    /// The feed answered with an error or an unusable payload.
    #[error("upstream feed error: {0}")]
    Upstream(String),
}

/// A source of severity snapshots. The scheduler depends on this seam, so
/// tests can script snapshots without HTTP.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<SeveritySnapshot, FeedError>;
}

/// Wire shape of the upstream bulletin.
#[derive(Deserialize)]
struct Bulletin {
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    phenomena: Vec<BulletinEntry>,
}

#[derive(Deserialize)]
struct BulletinEntry {
    phenomenon: String,
    /// Vigilance color code, 1 (green) through 4 (red).
    level: i64,
}

/// HTTP vigilance feed client.
pub struct VigilanceFeed {
    client: reqwest::Client,
    base_url: String,
    region: String,
}

impl VigilanceFeed {
    pub fn new(base_url: &str, region: &str, timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Transient(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            region: region.to_string(),
        })
    }
}

#[async_trait]
impl SnapshotSource for VigilanceFeed {
    async fn fetch(&self) -> Result<SeveritySnapshot, FeedError> {
        let url = format!("{}/vigilance/{}", self.base_url, self.region);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedError::Upstream(format!(
                "feed returned {}",
                response.status()
            )));
        }

        let bulletin: Bulletin = response
            .json()
            .await
            .map_err(|e| FeedError::Upstream(e.to_string()))?;

        let mut snapshot = SeveritySnapshot::new(bulletin.updated_at.unwrap_or_else(Utc::now));
        for entry in bulletin.phenomena {
            let Some(phenomenon) = Phenomenon::parse(&entry.phenomenon) else {
                tracing::warn!(phenomenon = %entry.phenomenon, "unknown phenomenon in feed, skipping");
                continue;
            };
            let Some(level) = Severity::from_code(entry.level) else {
                tracing::warn!(
                    phenomenon = %entry.phenomenon,
                    level = entry.level,
                    "unknown vigilance code in feed, skipping"
                );
                continue;
            };
            snapshot.levels.insert(phenomenon, level);
        }

        Ok(snapshot)
    }
}
