use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::jobs::JobStore;

/// Periodic stale-lease sweep. Runs until `shutdown` fires.
///
/// This is the only timeout mechanism for dead workers: a crashed
/// worker cannot act on its own lease expiry, so the sweep converts
/// its running jobs to the error state out-of-band. The sweep is
/// idempotent and safe to run in every worker process concurrently.
pub async fn run_sweeper(
    store: Arc<dyn JobStore>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        match store.expire_stale_running().await {
            Ok(n) if n > 0 => {
                tracing::warn!(swept = n, "expired stale leases");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "stale-lease sweep failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}
