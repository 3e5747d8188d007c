//! Shared HTTP plumbing.
//!
//! API calls (catalog lookups, gateway calls, mirror requests, scan
//! triggers) go through [`Client::execute`], which holds every caller to a
//! coarse budget of 50 calls per 5 seconds. Calls over budget wait rather than
//! fail. The per-upstream [`RequestThrottle`](crate::throttle::RequestThrottle)
//! spaces calls more finely on top of this.
//!
//! Media transfers are long-lived and bounded by the provider's CDN, not by
//! API quotas, so [`Client::open_media`] bypasses the budget.

use std::{future::Future, num::NonZeroU32, sync::Arc, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{cookie::CookieStore, Body, Method, Url};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Calls allowed per [`BUDGET_WINDOW`] across all API requests.
const BUDGET_CALLS: u32 = 50;

/// Window over which [`BUDGET_CALLS`] replenish.
const BUDGET_WINDOW: Duration = Duration::from_secs(5);

/// Idle connections are kept this long.
const KEEPALIVE: Duration = Duration::from_secs(60);

/// Longest stall allowed between two reads. A slow but moving media transfer
/// is never cut off.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// `reqwest` client plus the API call budget.
///
/// Cheap to share behind an `Arc`; all clones of the inner `reqwest::Client`
/// use the same connection pool.
pub struct Client {
    inner: reqwest::Client,
    budget: DefaultDirectRateLimiter,
}

impl Client {
    /// Creates a client without cookies.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the TLS backend cannot be initialized.
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::build::<reqwest::cookie::Jar>(user_agent, None)
    }

    /// Creates a client that sends and stores cookies in `jar`.
    ///
    /// Used for credentialed sessions, where each session gets a client of
    /// its own.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the TLS backend cannot be initialized.
    pub fn with_cookies<C>(user_agent: &str, jar: C) -> Result<Self>
    where
        C: CookieStore + 'static,
    {
        Self::build(user_agent, Some(Arc::new(jar)))
    }

    fn build<C>(user_agent: &str, jar: Option<Arc<C>>) -> Result<Self>
    where
        C: CookieStore + 'static,
    {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .tcp_keepalive(KEEPALIVE)
            .read_timeout(READ_TIMEOUT);
        if let Some(jar) = jar {
            builder = builder.cookie_provider(jar);
        }

        let burst = NonZeroU32::new(BUDGET_CALLS)
            .ok_or_else(|| Error::internal("call budget is zero"))?;
        let quota = Quota::with_period(BUDGET_WINDOW / BUDGET_CALLS)
            .ok_or_else(|| Error::internal("call budget window is zero"))?
            .allow_burst(burst);

        Ok(Self {
            inner: builder.build()?,
            budget: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request. Nothing is sent until it is passed to
    /// [`execute`](Self::execute).
    pub fn request(&self, method: Method, url: Url, body: impl Into<Body>) -> reqwest::Request {
        let mut request = reqwest::Request::new(method, url);
        *request.body_mut() = Some(body.into());
        request
    }

    #[must_use]
    pub fn get(&self, url: Url) -> reqwest::Request {
        reqwest::Request::new(Method::GET, url)
    }

    pub fn post(&self, url: Url, body: impl Into<Body>) -> reqwest::Request {
        self.request(Method::POST, url, body)
    }

    /// Sends an API request once the call budget allows it.
    ///
    /// Any status is returned as a response; callers classify it.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `DeadlineExceeded` when no response arrives.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        self.budget
            .until_ready()
            .then(move |()| self.inner.execute(request).map_err(Into::into))
    }

    /// Opens a media stream at `url`, outside the call budget.
    ///
    /// Returns once the response headers are in; the body is read by the
    /// caller.
    ///
    /// # Errors
    ///
    /// * `Cancelled` if `cancel` fires before the headers arrive
    /// * the kind matching a non-success status, see
    ///   [`Error::from_status`]
    /// * `Unavailable` or `DeadlineExceeded` when the CDN cannot be reached
    pub async fn open_media(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(Error::cancelled(format!("media stream {}", url.path())));
            }
            response = self.inner.get(url.clone()).send() => response?,
        };

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(Error::from_status(
                status,
                format!("media stream {} returned {status}", url.path()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use mockito::Server;

    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn media_status_is_classified() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/gone")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/ok")
            .with_body("audio")
            .create_async()
            .await;

        let client = Client::new("trackfill-test/0").unwrap();
        let cancel = CancellationToken::new();
        let base = server.url();

        let err = client
            .open_media(format!("{base}/gone").parse().unwrap(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let response = client
            .open_media(format!("{base}/ok").parse().unwrap(), &cancel)
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "audio");
    }

    #[tokio::test]
    async fn cookie_client_sends_its_jar() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/session")
            .match_header("cookie", "arl=secret")
            .expect(1)
            .create_async()
            .await;

        let url: Url = format!("{}/session", server.url()).parse().unwrap();
        let jar = reqwest::cookie::Jar::default();
        jar.add_cookie_str("arl=secret; Path=/", &url);
        let client = Client::with_cookies("trackfill-test/0", jar).unwrap();

        let response = client.execute(client.get(url)).await.unwrap();
        assert!(response.status().is_success());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cancelled_media_request_fails_fast() {
        let server = Server::new_async().await;
        let client = Client::new("trackfill-test/0").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .open_media(format!("{}/ok", server.url()).parse().unwrap(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
