//! Minimum spacing between outbound calls.
//!
//! Some providers rate limit aggressively per IP address. A
//! [`RequestThrottle`] turns a burst of logical requests into a paced
//! sequence instead of failing any of them: across all callers sharing one
//! throttle, two consecutive dispatches are never closer than the configured
//! interval.

use std::{future::Future, time::Duration};

use tokio::{sync::Mutex, time::Instant};

/// Paces calls to one upstream.
#[derive(Debug)]
pub struct RequestThrottle {
    interval: Duration,

    /// Dispatch time of the most recent call.
    ///
    /// Held across the wait, so that two callers can never both observe a
    /// stale remaining wait of zero.
    last_dispatch: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    /// Spacing used for metadata calls.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_dispatch: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits for this caller's turn, then runs `action`.
    ///
    /// Dropping the returned future while it waits gives up the turn
    /// without dispatching.
    pub async fn run<F, Fut, T>(&self, action: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut last_dispatch = self.last_dispatch.lock().await;
            if let Some(last) = *last_dispatch {
                let next = last + self.interval;
                if next > Instant::now() {
                    trace!(
                        "throttling for {}ms",
                        next.saturating_duration_since(Instant::now()).as_millis()
                    );
                    tokio::time::sleep_until(next).await;
                }
            }
            *last_dispatch = Some(Instant::now());
        }

        action().await
    }
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_concurrent_callers() {
        let throttle = Arc::new(RequestThrottle::new(Duration::from_millis(200)));
        let dispatches = Arc::new(std::sync::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                let dispatches = Arc::clone(&dispatches);
                tokio::spawn(async move {
                    throttle
                        .run(|| async { dispatches.lock().unwrap().push(Instant::now()) })
                        .await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut dispatches = dispatches.lock().unwrap().clone();
        dispatches.sort();
        assert_eq!(dispatches.len(), 8);
        for pair in dispatches.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_is_immediate() {
        let throttle = RequestThrottle::default();
        let start = Instant::now();
        throttle.run(|| async {}).await;
        assert_eq!(Instant::now(), start);

        throttle.run(|| async {}).await;
        assert!(Instant::now() - start >= RequestThrottle::DEFAULT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_counts_towards_interval() {
        let throttle = RequestThrottle::new(Duration::from_millis(200));
        throttle.run(|| async {}).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let before = Instant::now();
        throttle.run(|| async {}).await;
        assert_eq!(Instant::now(), before);
    }
}
