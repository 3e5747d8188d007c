//! Downloads through community Tidal mirrors.
//!
//! The mirrors wrap Tidal's playback endpoint and hand out a base64 BTS
//! manifest pointing at a stream that is already decrypted. Mirrors come and
//! go and rate limit hard, so every call goes through failover.
//!
//! The same mirrors answer track lookups, so [`TidalProvider`] is its own
//! [`Metadata`] source. They do not list albums.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header::HeaderName;
use tokio_util::sync::CancellationToken;

use crate::{
    config::TidalConfig,
    error::{Error, ErrorKind, Result},
    failover::{FailoverClient, InstanceSet},
    http,
    library::Metadata,
    protocol::{self, tidal},
    quality::{AudioQuality, QualityPolicy},
    track::{Album, Track},
};

use super::{Provider, ResolvedDownload, CLIENT_ID};

/// Provider name.
pub const NAME: &str = "tidal";

/// Instance set of the mirrors.
pub const INSTANCES: &str = "tidal";

pub struct TidalProvider {
    mirrors: FailoverClient,
    policy: QualityPolicy,
    quality: AudioQuality,
}

impl TidalProvider {
    /// Creates a provider from its configuration section.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if an instance URL or the format list is
    /// invalid.
    pub fn new(
        config: &TidalConfig,
        default_quality: AudioQuality,
        user_agent: &str,
    ) -> Result<Self> {
        let instances = InstanceSet::new(&config.instances)?
            .with_header(HeaderName::from_static("x-client"), CLIENT_ID);
        let mirrors = FailoverClient::new(Arc::new(http::Client::new(user_agent)?))
            .with_instances(INSTANCES, instances);

        Ok(Self {
            mirrors,
            policy: config.quality_policy()?,
            quality: config.quality.unwrap_or(default_quality),
        })
    }

    fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_argument(format!("invalid tidal track id \"{id}\"")));
        }
        Ok(())
    }

    /// Tunes the pauses of mirror failover.
    #[must_use]
    pub fn with_failover_delays(mut self, rate_limit: Duration, network: Duration) -> Self {
        self.mirrors = self.mirrors.with_delays(rate_limit, network);
        self
    }
}

#[async_trait]
impl Provider for TidalProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn target_quality(&self) -> AudioQuality {
        self.quality
    }

    async fn resolve_download(
        &self,
        track: &Track,
        ceiling: AudioQuality,
        cancel: &CancellationToken,
    ) -> Result<ResolvedDownload> {
        Self::validate_id(&track.id)?;

        // Ask for the tier of the best acceptable format.
        let best = self
            .policy
            .candidates(ceiling)
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::exhausted(format!("no tidal format at or below {ceiling} quality"))
            })?;
        let tier = tidal::Quality::for_ceiling(best.quality());

        let path = format!("/track/?id={}&quality={tier}", track.id);
        let response = self.mirrors.get(INSTANCES, &path, cancel).await?;
        let body = response.text().await?;
        let info = protocol::json::<tidal::Response>(&body, "tidal track")?.data;

        let manifest = info.manifest()?;
        if !manifest.is_plain() {
            return Err(Error::decryption(format!(
                "tidal stream for {} is encrypted ({})",
                track.id, manifest.encryption_type
            )));
        }

        let format = manifest.format(info.audio_quality).ok_or_else(|| {
            Error::exhausted(format!("unknown tidal codec \"{}\"", manifest.codecs))
        })?;
        let selection = self.policy.accept(format, ceiling)?;

        let url = manifest
            .urls
            .into_iter()
            .next()
            .ok_or_else(|| Error::exhausted(format!("no tidal stream url for {}", track.id)))?;

        debug!("resolved {track} as {selection}");
        Ok(ResolvedDownload {
            url,
            selection,
            key: None,
        })
    }
}

#[async_trait]
impl Metadata for TidalProvider {
    async fn track(&self, provider: &str, id: &str) -> Result<Option<Track>> {
        if provider != NAME {
            return Err(Error::unsupported(format!("no catalog for {provider}")));
        }
        Self::validate_id(id)?;

        // Lookups are not cancellable apart from dropping the future.
        let cancel = CancellationToken::new();
        let response = match self
            .mirrors
            .get(INSTANCES, &format!("/info/?id={id}"), &cancel)
            .await
        {
            Ok(response) => response,
            Err(e) if e.kind == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let body = response.text().await?;
        let info = protocol::json::<tidal::InfoResponse>(&body, "tidal info")?.data;
        Ok(Some(info.into()))
    }

    async fn album(&self, provider: &str, id: &str) -> Result<Option<Album>> {
        Err(Error::unsupported(format!(
            "{provider} mirrors do not list album {id}"
        )))
    }
}
