//! Track and album metadata.
//!
//! [`DeezerCatalog`] reads the Deezer public API. Calls are paced by a
//! [`RequestThrottle`] and retried by a [`RetryPolicy`], because the public
//! API rate limits per IP address and reports exceeded quotas inside
//! `200 OK` bodies.
//!
//! [`Catalogs`] hands each lookup to the source registered for its provider.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    error::{Error, Result},
    http,
    library::Metadata,
    protocol::{self, api},
    retry::RetryPolicy,
    throttle::RequestThrottle,
    track::{Album, Track},
};

/// Provider name this catalog answers for.
pub const PROVIDER: &str = "deezer";

pub struct DeezerCatalog {
    http: Arc<http::Client>,
    base_url: Url,
    throttle: RequestThrottle,
    retry: RetryPolicy,
}

impl DeezerCatalog {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.deezer.com";

    /// Creates a catalog client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `base_url` is not a valid URL.
    pub fn new(
        http: Arc<http::Client>,
        base_url: &str,
        throttle: RequestThrottle,
        retry: RetryPolicy,
    ) -> Result<Self> {
        // Joined paths are relative to the last segment.
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| Error::invalid_argument(format!("catalog url \"{base_url}\": {e}")))?;
        Ok(Self {
            http,
            base_url,
            throttle,
            retry,
        })
    }

    async fn fetch<T>(&self, kind: &str, id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + std::fmt::Debug,
    {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_argument(format!("invalid {kind} id \"{id}\"")));
        }

        let url = self.base_url.join(&format!("{kind}/{id}"))?;
        let origin = format!("{kind} {id}");

        // Cancellation comes from dropping this future.
        let cancel = CancellationToken::new();
        self.retry
            .run(&cancel, || {
                let url = url.clone();
                let origin = origin.as_str();
                async move {
                    let response = self
                        .throttle
                        .run(|| self.http.execute(self.http.get(url)))
                        .await?;

                    let status = response.status();
                    if !status.is_success() {
                        return Err(Error::from_status(status, format!("{origin}: {status}")));
                    }

                    let body = response.text().await?;
                    protocol::json::<api::Response<T>>(&body, origin)?.into_option()
                }
            })
            .await
    }
}

#[async_trait]
impl Metadata for DeezerCatalog {
    async fn track(&self, provider: &str, id: &str) -> Result<Option<Track>> {
        if provider != PROVIDER {
            return Err(Error::unsupported(format!("no catalog for {provider}")));
        }

        let track = self.fetch::<api::Track>("track", id).await?;
        Ok(track.map(Into::into))
    }

    async fn album(&self, provider: &str, id: &str) -> Result<Option<Album>> {
        if provider != PROVIDER {
            return Err(Error::unsupported(format!("no catalog for {provider}")));
        }

        let album = self.fetch::<api::Album>("album", id).await?;
        Ok(album.map(Into::into))
    }
}

/// Metadata sources by provider name.
#[derive(Default)]
pub struct Catalogs {
    sources: HashMap<String, Arc<dyn Metadata>>,
}

impl Catalogs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source` for `provider`, replacing an earlier one.
    #[must_use]
    pub fn with(mut self, provider: impl Into<String>, source: Arc<dyn Metadata>) -> Self {
        self.sources.insert(provider.into(), source);
        self
    }

    fn source(&self, provider: &str) -> Result<&Arc<dyn Metadata>> {
        self.sources
            .get(provider)
            .ok_or_else(|| Error::unsupported(format!("no catalog for {provider}")))
    }
}

#[async_trait]
impl Metadata for Catalogs {
    async fn track(&self, provider: &str, id: &str) -> Result<Option<Track>> {
        self.source(provider)?.track(provider, id).await
    }

    async fn album(&self, provider: &str, id: &str) -> Result<Option<Album>> {
        self.source(provider)?.album(provider, id).await
    }
}
