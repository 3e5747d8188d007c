//! Rotation across community-run upstream mirrors.
//!
//! A logical upstream ("streaming backends", "media URL resolution") is an
//! [`InstanceSet`]: an ordered, non-empty list of base URLs plus a shared
//! pointer to the instance currently in use. The [`FailoverClient`] sends a
//! request to the current instance and, when that instance is rate limiting,
//! down or unreachable, moves the pointer on and tries the next one.
//!
//! # Outcome Handling
//!
//! | Outcome | Action |
//! |---|---|
//! | 2xx | return the response |
//! | 429 | advance, short pause, continue |
//! | 401, 5xx | advance, continue |
//! | other 4xx | remember as permanent, advance, continue |
//! | network error | advance, short pause, continue |
//! | cancellation | return at once |
//!
//! Attempts are bounded by `min(2 * instances, 10)`. When they run out, the
//! remembered permanent error is returned if there is one: no instance is
//! expected to accept that request. Otherwise the result is `Exhausted`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Method, StatusCode, Url,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    http,
};

/// Upper bound of attempts for any instance set.
pub const MAX_ATTEMPTS: usize = 10;

/// Ordered candidate base URLs of one logical upstream.
#[derive(Debug)]
pub struct InstanceSet {
    bases: Vec<String>,
    headers: HeaderMap,

    /// Always less than `bases.len()`.
    current: AtomicUsize,
}

impl InstanceSet {
    /// Creates an instance set; insertion order is priority order.
    ///
    /// Trailing slashes are stripped so that paths can be appended.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `bases` is empty or holds something that
    /// is not an absolute URL.
    pub fn new<I, S>(bases: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let bases = bases
            .into_iter()
            .map(|base| {
                let base = base.as_ref().trim_end_matches('/');
                Url::parse(base)
                    .map(|_| base.to_owned())
                    .map_err(|e| Error::invalid_argument(format!("instance \"{base}\": {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        if bases.is_empty() {
            return Err(Error::invalid_argument("instance set is empty"));
        }

        Ok(Self {
            bases,
            headers: HeaderMap::new(),
            current: AtomicUsize::new(0),
        })
    }

    /// Adds a header sent on every request to this set.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Always `false`: instance sets cannot be empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Index and base URL of the instance currently in use.
    #[must_use]
    pub fn current(&self) -> (usize, &str) {
        let index = self.current.load(Ordering::Acquire) % self.bases.len();
        (index, &self.bases[index])
    }

    /// Moves on from instance `failed`, wrapping around.
    ///
    /// Does nothing if another caller already moved on, so concurrent
    /// failures of the same instance skip only that instance.
    pub fn advance(&self, failed: usize) {
        let next = (failed + 1) % self.bases.len();
        if self
            .current
            .compare_exchange(failed, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("failing over from {} to {}", self.bases[failed], self.bases[next]);
        }
    }

    /// Total attempts allowed per request.
    #[must_use]
    pub fn attempt_budget(&self) -> usize {
        usize::min(2 * self.bases.len(), MAX_ATTEMPTS)
    }
}

/// Sends requests through named instance sets.
pub struct FailoverClient {
    http: Arc<http::Client>,
    sets: HashMap<String, InstanceSet>,
    timeout: Duration,
    rate_limit_delay: Duration,
    network_delay: Duration,
}

impl FailoverClient {
    /// Per-attempt timeout, from connecting until the body is read.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Pause after a 429.
    pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_millis(500);

    /// Pause after a network error.
    pub const DEFAULT_NETWORK_DELAY: Duration = Duration::from_millis(200);

    #[must_use]
    pub fn new(http: Arc<http::Client>) -> Self {
        Self {
            http,
            sets: HashMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            rate_limit_delay: Self::DEFAULT_RATE_LIMIT_DELAY,
            network_delay: Self::DEFAULT_NETWORK_DELAY,
        }
    }

    #[must_use]
    pub fn with_instances(mut self, id: impl Into<String>, set: InstanceSet) -> Self {
        self.sets.insert(id.into(), set);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_delays(mut self, rate_limit: Duration, network: Duration) -> Self {
        self.rate_limit_delay = rate_limit;
        self.network_delay = network;
        self
    }

    #[must_use]
    pub fn instances(&self, id: &str) -> Option<&InstanceSet> {
        self.sets.get(id)
    }

    /// Sends a `GET` for `path` through instance set `id`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn get(
        &self,
        id: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        self.send(id, Method::GET, path, None, cancel).await
    }

    /// Sends a JSON `POST` for `path` through instance set `id`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn post_json<T>(
        &self,
        id: &str,
        path: &str,
        body: &T,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response>
    where
        T: serde::Serialize + ?Sized,
    {
        let body = serde_json::to_vec(body)?;
        self.send(id, Method::POST, path, Some(body), cancel).await
    }

    /// Sends a request to the current instance of set `id`, failing over to
    /// the next instance on recoverable errors.
    ///
    /// # Errors
    ///
    /// * `NotConfigured` if there is no instance set `id`
    /// * `Cancelled` as soon as `cancel` fires
    /// * a permanent 4xx error (`NotFound`, `InvalidArgument`) seen along the
    ///   way, once attempts run out
    /// * `Exhausted` with the last error otherwise
    pub async fn send(
        &self,
        id: &str,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let set = self
            .sets
            .get(id)
            .ok_or_else(|| Error::not_configured(format!("no instances configured for {id}")))?;

        let budget = set.attempt_budget();
        let mut permanent: Option<Error> = None;
        let mut last: Option<Error> = None;

        for attempt in 1..=budget {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(format!("{id}{path}")));
            }

            let (index, base) = set.current();
            let url = format!("{base}{path}").parse::<Url>()?;

            let mut request = self
                .http
                .request(method.clone(), url, body.clone().unwrap_or_default());
            *request.timeout_mut() = Some(self.timeout);
            let headers = request.headers_mut();
            headers.extend(set.headers.clone());
            if body.is_some() {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }

            trace!("{id} attempt {attempt}/{budget}: {method} {base}{path}");
            let outcome = tokio::select! {
                () = cancel.cancelled() => {
                    return Err(Error::cancelled(format!("{id}{path}")));
                }
                outcome = self.http.execute(request) => outcome,
            };

            let pause = match outcome {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    drop(response);

                    let error = Error::from_status(status, format!("{base}{path}: {status}"));
                    debug!("{id} attempt {attempt}/{budget}: {error}");
                    set.advance(index);

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        last = Some(error);
                        self.rate_limit_delay
                    } else if status.is_client_error() && status != StatusCode::UNAUTHORIZED {
                        permanent = Some(error);
                        Duration::ZERO
                    } else {
                        last = Some(error);
                        Duration::ZERO
                    }
                }
                Err(e) => {
                    debug!("{id} attempt {attempt}/{budget}: {base}{path}: {e}");
                    set.advance(index);
                    last = Some(e);
                    self.network_delay
                }
            };

            if !pause.is_zero() && attempt < budget {
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(Error::cancelled(format!("{id}{path}")));
                    }
                    () = tokio::time::sleep(pause) => {}
                }
            }
        }

        Err(permanent.unwrap_or_else(|| {
            let detail = last.map_or_else(|| "no attempts made".to_owned(), |e| e.to_string());
            Error::exhausted(format!("{id}: {budget} attempts failed; last error: {detail}"))
        }))
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server, ServerGuard};

    use super::*;
    use crate::error::ErrorKind;

    fn client(set: InstanceSet) -> FailoverClient {
        let http = http::Client::new("trackfill-test/0").unwrap();
        FailoverClient::new(Arc::new(http))
            .with_instances("test", set)
            .with_delays(Duration::ZERO, Duration::ZERO)
    }

    async fn servers(n: usize) -> Vec<ServerGuard> {
        let mut servers = Vec::with_capacity(n);
        for _ in 0..n {
            servers.push(Server::new_async().await);
        }
        servers
    }

    #[tokio::test]
    async fn first_success_wins() {
        let mut servers = servers(3).await;
        let limited = servers[0]
            .mock("GET", "/track/")
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let ok = servers[1]
            .mock("GET", "/track/")
            .match_query(Matcher::Any)
            .match_header("x-client", "trackfill")
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let unused = servers[2]
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let set = InstanceSet::new(servers.iter().map(|server| server.url()))
            .unwrap()
            .with_header(
                HeaderName::from_static("x-client"),
                HeaderValue::from_static("trackfill"),
            );
        let client = client(set);
        let response = client
            .get("test", "/track/?id=1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        limited.assert_async().await;
        ok.assert_async().await;
        unused.assert_async().await;

        // Later requests start at the instance that worked.
        assert_eq!(client.instances("test").unwrap().current().0, 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let mut servers = servers(2).await;
        let mut mocks = Vec::new();
        for server in &mut servers {
            mocks.push(
                server
                    .mock("GET", "/")
                    .with_status(503)
                    .expect(2)
                    .create_async()
                    .await,
            );
        }

        let set = InstanceSet::new(servers.iter().map(|server| server.url())).unwrap();
        let err = client(set)
            .get("test", "/", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Exhausted);

        for mock in mocks {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn permanent_error_is_surfaced_after_exhaustion() {
        let mut servers = servers(2).await;
        servers[0]
            .mock("GET", "/")
            .with_status(404)
            .create_async()
            .await;
        servers[1]
            .mock("GET", "/")
            .with_status(502)
            .create_async()
            .await;

        let set = InstanceSet::new(servers.iter().map(|server| server.url())).unwrap();
        let err = client(set)
            .get("test", "/", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn unreachable_instance_is_skipped() {
        // Nothing listens on a port that was just released.
        let closed = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let mut server = Server::new_async().await;
        let ok = server
            .mock("GET", "/")
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let set = InstanceSet::new([format!("http://{closed}"), server.url()]).unwrap();
        let client = client(set);
        let response = client
            .get("test", "/", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(client.instances("test").unwrap().current().0, 1);
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn stalled_instance_times_out() {
        // Accepts connections into its backlog but never answers.
        let stalled = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = stalled.local_addr().unwrap();

        let mut server = Server::new_async().await;
        let ok = server
            .mock("GET", "/")
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let set = InstanceSet::new([format!("http://{addr}"), server.url()]).unwrap();
        let response = client(set)
            .with_timeout(Duration::from_millis(200))
            .get("test", "/", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        ok.assert_async().await;
        drop(stalled);
    }

    #[tokio::test]
    async fn unauthorized_is_not_permanent() {
        let mut servers = servers(2).await;
        servers[0]
            .mock("GET", "/")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;
        servers[1]
            .mock("GET", "/")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let set = InstanceSet::new(servers.iter().map(|server| server.url())).unwrap();
        let err = client(set)
            .get("test", "/", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Exhausted);
    }

    #[tokio::test]
    async fn cancellation_stops_attempts() {
        let mut server = Server::new_async().await;
        let mock = server.mock("GET", "/").expect(0).create_async().await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let set = InstanceSet::new([server.url()]).unwrap();
        let err = client(set).get("test", "/", &cancel).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        mock.assert_async().await;
    }

    #[test]
    fn instance_sets_validate_and_wrap() {
        assert!(InstanceSet::new(Vec::<String>::new()).is_err());
        assert!(InstanceSet::new(["not a url"]).is_err());

        let set = InstanceSet::new(["https://a.example/", "https://b.example"]).unwrap();
        assert_eq!(set.current(), (0, "https://a.example"));
        assert_eq!(set.attempt_budget(), 4);

        set.advance(0);
        // A stale failure report does not skip the healthy instance.
        set.advance(0);
        assert_eq!(set.current().0, 1);
        set.advance(1);
        assert_eq!(set.current().0, 0);

        let many = InstanceSet::new((0..8).map(|i| format!("https://{i}.example"))).unwrap();
        assert_eq!(many.attempt_budget(), MAX_ATTEMPTS);
    }
}
