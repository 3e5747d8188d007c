//! Deezer downloads.
//!
//! Resolving a track takes three calls:
//!
//! 1. `deezer.getUserData` on the gateway, once per session: logs in with the
//!    ARL cookie and yields the `api_token` and the license token
//! 2. `song.getData` on the gateway: yields the track token
//! 3. `POST /v1/get_url` on the media API, through failover: yields the URL
//!    of the best format in the requested list, and its cipher
//!
//! Gateway calls are paced by a [`RequestThrottle`]. A rejected primary ARL
//! is replaced by the fallback ARL once, and a stale `api_token` leads to one
//! fresh login.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{
    cookie::Jar,
    header::{HeaderName, HeaderValue, CONTENT_TYPE},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    arl::Arl,
    config::DeezerConfig,
    decrypt::{self, Key},
    error::{Error, ErrorKind, Result},
    failover::{FailoverClient, InstanceSet},
    http,
    protocol::{
        self,
        gateway::{self, Method, SongData, UserData, VALID_TOKEN_REQUIRED},
        media,
    },
    quality::{self, AudioQuality, QualityPolicy},
    throttle::RequestThrottle,
    track::Track,
};

use super::{Provider, ResolvedDownload, CLIENT_ID};

/// Provider name.
pub const NAME: &str = "deezer";

/// Instance set of the media API.
pub const MEDIA_INSTANCES: &str = "deezer-media";

const GATEWAY_VERSION: &str = "1.0";
const GATEWAY_INPUT: &str = "3";
const PLAIN_TEXT_CONTENT: HeaderValue = HeaderValue::from_static("text/plain;charset=UTF-8");
const EMPTY_JSON_OBJECT: &str = "{}";

/// Logged-in gateway session.
struct Session {
    http: http::Client,
    user_data: UserData,
}

pub struct DeezerProvider {
    gateway_url: Url,
    user_agent: String,

    /// Primary first, then the fallback.
    arls: Vec<Arl>,
    secret: Option<Key>,

    media: FailoverClient,
    policy: QualityPolicy,
    quality: AudioQuality,
    throttle: RequestThrottle,

    session: Mutex<Option<Session>>,
}

impl DeezerProvider {
    /// Creates a provider from its configuration section.
    ///
    /// Missing credentials are not an error here: they fail each download
    /// with `NotConfigured` instead.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a URL or the format list is invalid.
    pub fn new(
        config: &DeezerConfig,
        default_quality: AudioQuality,
        user_agent: &str,
        throttle: RequestThrottle,
    ) -> Result<Self> {
        let gateway_url = Url::parse(&config.gateway_url).map_err(|e| {
            Error::invalid_argument(format!("gateway url \"{}\": {e}", config.gateway_url))
        })?;

        let instances = InstanceSet::new(&config.media_instances)?
            .with_header(HeaderName::from_static("x-client"), CLIENT_ID);
        let media = FailoverClient::new(Arc::new(http::Client::new(user_agent)?))
            .with_instances(MEDIA_INSTANCES, instances);

        let arls = config
            .arl
            .iter()
            .chain(config.fallback_arl.iter())
            .cloned()
            .collect();

        Ok(Self {
            gateway_url,
            user_agent: user_agent.to_owned(),
            arls,
            secret: config.secret,
            media,
            policy: config.quality_policy()?,
            quality: config.quality.unwrap_or(default_quality),
            throttle,
            session: Mutex::new(None),
        })
    }

    /// Tunes the pauses of the media API failover. The instance set and its
    /// headers stay as configured.
    #[must_use]
    pub fn with_failover_delays(mut self, rate_limit: Duration, network: Duration) -> Self {
        self.media = self.media.with_delays(rate_limit, network);
        self
    }

    /// Client whose cookie jar carries `arl` for the gateway origin.
    fn session_client(&self, arl: &Arl) -> Result<http::Client> {
        let secure = if self.gateway_url.scheme() == "https" {
            "; Secure"
        } else {
            ""
        };
        let jar = Jar::default();
        jar.add_cookie_str(
            &format!("arl={arl}; Path=/; HttpOnly{secure}"),
            &self.gateway_url,
        );
        http::Client::with_cookies(&self.user_agent, jar)
    }

    /// Sends one gateway call, paced by the throttle.
    async fn call(
        &self,
        http: &http::Client,
        method: &str,
        api_token: &str,
        body: String,
        cancel: &CancellationToken,
    ) -> Result<gateway::Response> {
        let mut url = self.gateway_url.clone();
        url.query_pairs_mut()
            .append_pair("method", method)
            .append_pair("input", GATEWAY_INPUT)
            .append_pair("api_version", GATEWAY_VERSION)
            .append_pair("api_token", api_token);

        let mut request = http.post(url, body);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, PLAIN_TEXT_CONTENT);

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Error::cancelled(method.to_owned())),
            response = self.throttle.run(|| http.execute(request)) => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status, format!("{method}: {status}")));
        }

        let body = response.text().await?;
        protocol::json(&body, method)
    }

    /// Logs in with the first ARL that the gateway accepts.
    async fn login(&self, cancel: &CancellationToken) -> Result<Session> {
        if self.arls.is_empty() {
            return Err(Error::not_configured("no deezer arl configured"));
        }

        let mut last_error = None;
        for (index, arl) in self.arls.iter().enumerate() {
            let http = self.session_client(arl)?;
            let result = self
                .call(&http, UserData::METHOD, "", EMPTY_JSON_OBJECT.to_owned(), cancel)
                .await
                .and_then(gateway::Response::into_result::<UserData>)
                .and_then(|user_data| {
                    if user_data.is_authenticated() {
                        Ok(user_data)
                    } else {
                        Err(Error::unauthenticated("arl is invalid or expired"))
                    }
                });

            match result {
                Ok(user_data) => {
                    debug!("logged in to deezer as user {}", user_data.user.id);
                    return Ok(Session { http, user_data });
                }
                Err(e) if e.kind == ErrorKind::Unauthenticated => {
                    let which = if index == 0 { "primary" } else { "fallback" };
                    warn!("{which} deezer arl rejected: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::unauthenticated("no arl accepted")))
    }

    /// Calls gateway method `T` within the session, logging in as needed.
    async fn gateway<T>(&self, body: String, cancel: &CancellationToken) -> Result<(T, String)>
    where
        T: Method + for<'de> serde::Deserialize<'de>,
    {
        let mut session = self.session.lock().await;

        for attempt in 0..2 {
            if session.is_none() {
                *session = Some(self.login(cancel).await?);
            }
            let current = session
                .as_ref()
                .ok_or_else(|| Error::internal("no deezer session"))?;

            let response = self
                .call(
                    &current.http,
                    T::METHOD,
                    &current.user_data.api_token,
                    body.clone(),
                    cancel,
                )
                .await?;

            if attempt == 0
                && response
                    .error()
                    .is_some_and(|(code, _)| code == VALID_TOKEN_REQUIRED)
            {
                debug!("deezer api token expired; logging in again");
                *session = None;
                continue;
            }

            let license_token = current.user_data.user.options.license_token.clone();
            return response.into_result().map(|result| (result, license_token));
        }

        Err(Error::unauthenticated(format!(
            "{}: session token rejected after fresh login",
            T::METHOD
        )))
    }

    /// Asks the media API for the first available of `formats`.
    async fn get_url(
        &self,
        license_token: &str,
        song: &SongData,
        formats: &[media::Format],
        cancel: &CancellationToken,
    ) -> Result<media::Medium> {
        let request = media::Request::full_track(license_token, &song.track_token, formats);

        let response = self
            .media
            .post_json(MEDIA_INSTANCES, "/v1/get_url", &request, cancel)
            .await?;
        let body = response.text().await?;
        let response: media::Response = protocol::json(&body, "get_url")?;

        response.into_medium(&song.id)
    }
}

#[async_trait]
impl Provider for DeezerProvider {
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
        let secret = self
            .secret
            .ok_or_else(|| Error::not_configured("no deezer stripe cipher secret configured"))?;
        if self.arls.is_empty() {
            return Err(Error::not_configured("no deezer arl configured"));
        }

        let formats: Vec<media::Format> = self
            .policy
            .candidates(ceiling)
            .into_iter()
            .filter_map(|format| media::Format::try_from(format).ok())
            .collect();
        if formats.is_empty() {
            return Err(Error::exhausted(format!(
                "no deezer format at or below {ceiling} quality"
            )));
        }

        let body = serde_json::to_string(&gateway::song_data::Request { sng_id: &track.id })?;
        let (song, license_token) = self.gateway::<SongData>(body, cancel).await?;

        // The regional fallback release is only tried when the song itself
        // has no media.
        let mut songs = vec![song];
        if let Some(fallback) = songs[0].fallback.clone() {
            songs.push(*fallback);
        }

        let mut last_error = None;
        for song in &songs {
            match self.get_url(&license_token, song, &formats, cancel).await {
                Ok(medium) => {
                    let format = quality::Format::try_from(medium.format).map_err(|format| {
                        Error::exhausted(format!("unsupported deezer format {format}"))
                    })?;
                    let selection = self.policy.accept(format, ceiling)?;

                    let key = match medium.cipher.typ {
                        media::Cipher::BF_CBC_STRIPE => {
                            Some(decrypt::key_for_track_id(&song.id, &secret))
                        }
                        media::Cipher::NONE => None,
                    };

                    let url = medium
                        .url()
                        .cloned()
                        .ok_or_else(|| Error::exhausted("no media sources"))?;

                    debug!("resolved {track} as {selection}");
                    return Ok(ResolvedDownload {
                        url,
                        selection,
                        key,
                    });
                }
                Err(e) if e.kind == ErrorKind::Exhausted => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::exhausted(format!("no media for {track}"))))
    }
}
