//! Upstream providers of audio.
//!
//! A provider turns a catalog [`Track`] into a URL that serves its audio,
//! along with the format it is in and, for protected streams, the key to
//! decrypt it with. Everything else about an acquisition is shared and lives
//! in the [`DownloadCoordinator`](crate::coordinator::DownloadCoordinator).
//!
//! * [`deezer`] - gateway session plus media API, striped Blowfish streams
//! * [`tidal`] - community mirrors serving pre-decrypted streams

pub mod deezer;
pub mod tidal;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use tokio_util::sync::CancellationToken;
use url::Url;
use veil::Redact;

use crate::{
    decrypt::Key,
    error::Result,
    quality::{AudioQuality, FormatSelection},
    track::Track,
};

/// Client identifier sent on every call to mirror and media backends.
pub const CLIENT_ID: HeaderValue =
    HeaderValue::from_static(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));

/// Everything needed to transfer one track.
#[derive(Clone, Redact)]
pub struct ResolvedDownload {
    /// Signed media URL
    #[redact]
    pub url: Url,

    pub selection: FormatSelection,

    /// Stripe cipher key; `None` for streams served in the clear
    pub key: Option<Key>,
}

/// Provider capabilities used by the coordinator.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in track keys, such as `deezer`.
    fn name(&self) -> &str;

    /// Quality ceiling this provider downloads at.
    fn target_quality(&self) -> AudioQuality;

    /// Album to cascade into after `track` is downloaded.
    fn extract_album_id(&self, track: &Track) -> Option<String> {
        track.album_id.clone().filter(|id| !id.is_empty())
    }

    /// Resolves the media URL and format of `track`, at or below `ceiling`.
    ///
    /// # Errors
    ///
    /// * `NotConfigured` if a required credential is missing
    /// * `Exhausted` if no acceptable format is available
    /// * `Cancelled` when `cancel` fires
    /// * any upstream error that failover and retries could not absorb
    async fn resolve_download(
        &self,
        track: &Track,
        ceiling: AudioQuality,
        cancel: &CancellationToken,
    ) -> Result<ResolvedDownload>;
}
