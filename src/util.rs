//! Supervised background tasks.

use std::future::Future;

use tokio_util::task::TaskTracker;

use crate::error::Result;

/// Spawns `future` on `tracker` behind an error boundary.
///
/// The caller gets no handle. Errors and panics are logged under `name` and
/// never propagate, so a failing background task cannot take down the
/// process or reach any caller.
pub fn spawn_supervised<F>(tracker: &TaskTracker, name: String, future: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let task = tracker.spawn(future);
    tracker.spawn(async move {
        match task.await {
            Ok(Ok(())) => trace!("{name} finished"),
            Ok(Err(e)) => error!("{name} failed: {e}"),
            Err(e) if e.is_cancelled() => debug!("{name} was cancelled"),
            Err(e) => error!("{name} panicked: {e}"),
        }
    });
}
