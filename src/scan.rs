//! Library rescans on a Subsonic-compatible media server.
//!
//! Navidrome, Gonic and friends only index files they find during a scan.
//! After a download lands, the server is asked to start one through the
//! `startScan` endpoint, at most once per debounce window.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::Deserialize;
use tokio::time::Instant;
use url::Url;

use crate::{
    error::{Error, Result},
    http,
    library::Scanner,
};

/// Subsonic API version that introduced token authentication.
const API_VERSION: &str = "1.16.1";

/// Client name reported to the server.
const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "subsonic-response")]
    response: Status,
}

#[derive(Debug, Deserialize)]
struct Status {
    status: String,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    #[serde(default)]
    message: String,
}

pub struct SubsonicScanner {
    http: Arc<http::Client>,
    base_url: Url,
    username: String,
    password: String,
    debounce: Duration,
    last_scan: Mutex<Option<Instant>>,
}

impl SubsonicScanner {
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(30);

    /// Creates a scanner for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `base_url` is not a valid URL.
    pub fn new(
        http: Arc<http::Client>,
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| Error::invalid_argument(format!("server url \"{base_url}\": {e}")))?;

        Ok(Self {
            http,
            base_url,
            username: username.into(),
            password: password.into(),
            debounce: Self::DEFAULT_DEBOUNCE,
            last_scan: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Claims the debounce window; `false` if a scan started recently.
    fn claim(&self) -> bool {
        let Ok(mut last_scan) = self.last_scan.lock() else {
            return false;
        };

        let now = Instant::now();
        if last_scan.is_some_and(|last| now.duration_since(last) < self.debounce) {
            return false;
        }
        *last_scan = Some(now);
        true
    }

    fn url(&self) -> Result<Url> {
        let salt = format!(
            "{:x}",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        );
        let token = format!("{:x}", Md5::digest(format!("{}{salt}", self.password)));

        let mut url = self.base_url.join("rest/startScan.view")?;
        url.query_pairs_mut()
            .append_pair("u", &self.username)
            .append_pair("t", &token)
            .append_pair("s", &salt)
            .append_pair("v", API_VERSION)
            .append_pair("c", CLIENT_NAME)
            .append_pair("f", "json");
        Ok(url)
    }

    async fn start_scan(&self) -> Result<()> {
        let response = self.http.execute(self.http.get(self.url()?)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status, format!("startScan: {status}")));
        }

        let envelope: Envelope = response.json().await?;
        if envelope.response.status == "ok" {
            return Ok(());
        }

        match envelope.response.error {
            // Codes 40 and 41 are wrong credentials.
            Some(ApiError { code: 40 | 41, message }) => Err(Error::unauthenticated(message)),
            Some(ApiError { code, message }) => {
                Err(Error::unknown(format!("startScan: {message} ({code})")))
            }
            None => Err(Error::unknown("startScan: request failed")),
        }
    }
}

#[async_trait]
impl Scanner for SubsonicScanner {
    async fn trigger_scan(&self) -> bool {
        if !self.claim() {
            debug!("library scan requested recently; skipping");
            return false;
        }

        match self.start_scan().await {
            Ok(()) => {
                info!("library scan started");
                true
            }
            Err(e) => {
                warn!("could not start library scan: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;

    fn scanner(url: &str) -> SubsonicScanner {
        let http = http::Client::new("trackfill-test/0").unwrap();
        SubsonicScanner::new(Arc::new(http), url, "admin", "secret").unwrap()
    }

    #[tokio::test]
    async fn starts_scan_once_per_window() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/startScan.view")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("u".into(), "admin".into()),
                Matcher::UrlEncoded("f".into(), "json".into()),
            ]))
            .with_body(r#"{"subsonic-response": {"status": "ok", "version": "1.16.1"}}"#)
            .expect(1)
            .create_async()
            .await;

        let scanner = scanner(&server.url());
        assert!(scanner.trigger_scan().await);
        assert!(!scanner.trigger_scan().await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_scan_is_reported_not_raised() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/rest/startScan.view")
            .match_query(Matcher::Any)
            .with_body(
                r#"{"subsonic-response": {"status": "failed",
                    "error": {"code": 40, "message": "Wrong username or password"}}}"#,
            )
            .create_async()
            .await;

        let scanner = scanner(&server.url());
        assert!(!scanner.trigger_scan().await);
        assert_eq!(
            scanner.start_scan().await.unwrap_err().kind,
            crate::error::ErrorKind::Unauthenticated
        );
    }
}
