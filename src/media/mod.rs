//! Media Lifecycle Module
//!
//! Posts reference media by public blob link. When the last post referencing a
//! link goes away, the link is written to the `media_releases` outbox in the same
//! transaction, and the blob is deleted after commit.
//!
//! Flow: row delete -> queue link -> commit -> resolve location -> delete blob
//!
//! A blob that could not be deleted stays queued and is retried by
//! `MediaReleaser::release_pending`.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::BlobConfig;
use crate::error::GraphResult;
use crate::store::Store;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Invalid media link: {0}")]
    InvalidLink(String),
    #[error("Media not found: {0}")]
    NotFound(String),
    #[error("Timed out deleting {0}")]
    Timeout(String),
    #[error("Request error: {0}")]
    Request(String),
    #[error("HTTP {status} deleting {location}")]
    Status { location: String, status: u16 },
}

/// External object storage holding post media
pub trait BlobStore: Send + Sync {
    /// Turn a public link into the object location it points at
    fn resolve_location(&self, link: &str) -> MediaResult<String>;

    /// Delete the object at `location`. A missing object is `MediaError::NotFound`.
    fn delete(&self, location: &str) -> MediaResult<()>;
}

/// Blob store reached over HTTP with a bounded request timeout
pub struct HttpBlobStore {
    client: Client,
    api_url: String,
    public_prefix: String,
}

impl HttpBlobStore {
    pub fn new(
        api_url: impl Into<String>,
        public_prefix: impl Into<String>,
        timeout: Duration,
    ) -> MediaResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MediaError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            public_prefix: public_prefix.into(),
        })
    }

    pub fn from_config(config: &BlobConfig) -> MediaResult<Self> {
        Self::new(&config.api_url, &config.public_prefix, config.timeout)
    }

    /// Object names travel with their slash encoded, as in the public links
    fn delete_object(&self, location: &str) -> MediaResult<()> {
        let url = format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            location.replace('/', "%2F")
        );

        let response = self.client.delete(&url).send().map_err(|e| {
            if e.is_timeout() {
                MediaError::Timeout(location.to_string())
            } else {
                MediaError::Request(format!("HTTP error: {}", e))
            }
        })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status if status == StatusCode::NOT_FOUND => Err(MediaError::NotFound(location.to_string())),
            status => Err(MediaError::Status {
                location: location.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

impl BlobStore for HttpBlobStore {
    fn resolve_location(&self, link: &str) -> MediaResult<String> {
        resolve_public_link(&self.public_prefix, link)
    }

    fn delete(&self, location: &str) -> MediaResult<()> {
        if let Some(thumb) = thumbnail_location(location) {
            // A thumbnail that is already gone must not block the object itself
            match self.delete_object(&thumb) {
                Ok(()) | Err(MediaError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.delete_object(location)
    }
}

/// Reduce `<prefix><folder>%2F<name>.<ext>?<query>` to `folder/name.ext`
pub fn resolve_public_link(prefix: &str, link: &str) -> MediaResult<String> {
    let invalid = || MediaError::InvalidLink(link.to_string());

    let rest = link.strip_prefix(prefix).ok_or_else(invalid)?;
    let (stem, query) = rest.split_once('?').ok_or_else(invalid)?;
    if query.is_empty() {
        return Err(invalid());
    }

    let (folder, file) = stem.split_once("%2F").ok_or_else(invalid)?;
    let (name, ext) = file.rsplit_once('.').ok_or_else(invalid)?;
    if ![folder, name, ext].iter().all(|part| is_word(part)) {
        return Err(invalid());
    }

    Ok(format!("{}/{}.{}", folder, name, ext))
}

/// Uploaded media get a PNG thumbnail under `thumb/` with the same name
pub fn thumbnail_location(location: &str) -> Option<String> {
    let file = location.strip_prefix("media/")?;
    let name = file.rsplit_once('.').map_or(file, |(name, _)| name);
    Some(format!("thumb/{}.png", name))
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Outcome of one release pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaRelease {
    /// Links whose blobs are gone (deleted now, or already missing)
    pub released: Vec<String>,
    /// Links still queued because the blob store failed
    pub pending: Vec<String>,
    /// Links dropped from the queue without touching the blob store: they never
    /// pointed into it, or a post references them again
    pub skipped: Vec<String>,
}

impl MediaRelease {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    fn merge(&mut self, other: MediaRelease) {
        self.released.extend(other.released);
        self.pending.extend(other.pending);
        self.skipped.extend(other.skipped);
    }
}

/// Drains the media release outbox through a `BlobStore`
#[derive(Clone)]
pub struct MediaReleaser {
    store: Arc<Store>,
    blobs: Arc<dyn BlobStore>,
}

impl MediaReleaser {
    pub fn new(store: Arc<Store>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    /// Release links that were queued by a committed transaction. Never fails: a link
    /// whose outbox row could not be updated is reported as pending and stays queued.
    pub fn release(&self, links: &[String]) -> MediaRelease {
        let mut result = MediaRelease::default();
        for link in links {
            match self.release_one(link) {
                Ok(outcome) => result.merge(outcome),
                Err(e) => {
                    log::error!("Media outbox update failed for {}: {}", link, e);
                    result.pending.push(link.to_string());
                }
            }
        }
        result
    }

    /// Retry everything still sitting in the outbox
    pub fn release_pending(&self) -> GraphResult<MediaRelease> {
        let pending = self.store.read(|tx| tx.pending_media_releases())?;
        log::info!("Retrying {} queued media releases", pending.len());

        let links: Vec<String> = pending.into_iter().map(|p| p.link).collect();
        Ok(self.release(&links))
    }

    fn release_one(&self, link: &str) -> GraphResult<MediaRelease> {
        let mut result = MediaRelease::default();

        // A post may have picked the link up again since it was queued
        let in_use = self.store.with_transaction(|tx| -> GraphResult<bool> {
            if tx.media_in_use(link)? {
                tx.clear_media_release(link)?;
                return Ok(true);
            }
            Ok(false)
        })?;
        if in_use {
            log::info!("Media {} is referenced again, not releasing", link);
            result.skipped.push(link.to_string());
            return Ok(result);
        }

        let outcome = self
            .blobs
            .resolve_location(link)
            .and_then(|location| self.blobs.delete(&location));

        match outcome {
            Ok(()) => {
                self.store
                    .with_transaction(|tx| tx.clear_media_release(link))?;
                log::debug!("Released media {}", link);
                result.released.push(link.to_string());
            }
            Err(MediaError::NotFound(location)) => {
                self.store
                    .with_transaction(|tx| tx.clear_media_release(link))?;
                log::debug!("Media {} already gone ({})", link, location);
                result.released.push(link.to_string());
            }
            Err(MediaError::InvalidLink(_)) => {
                self.store
                    .with_transaction(|tx| tx.clear_media_release(link))?;
                log::warn!("Dropping unresolvable media link {}", link);
                result.skipped.push(link.to_string());
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .with_transaction(|tx| tx.record_media_failure(link, &message))?;
                log::warn!("Failed to release media {}: {}", link, message);
                result.pending.push(link.to_string());
            }
        }

        Ok(result)
    }
}
