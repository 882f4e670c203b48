use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Process-local registry of in-flight jobs and their cancellation
/// tokens. Bookkeeping only: it tells this process what to cancel on
/// drain and is never consulted for cross-process correctness. If the
/// process dies the registry dies with it and the stale-lease sweep
/// recovers the jobs.
#[derive(Clone, Default)]
pub struct RunningJobs {
    inner: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl RunningJobs {
    pub async fn insert(&self, job_id: Uuid, cancel: CancellationToken) {
        self.inner.lock().await.insert(job_id, cancel);
    }

    pub async fn remove(&self, job_id: Uuid) {
        self.inner.lock().await.remove(&job_id);
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Cancel every tracked job. Returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        let inner = self.inner.lock().await;
        for token in inner.values() {
            token.cancel();
        }
        inner.len()
    }
}

/// Owns the drain flag, the supervision task tracker, and the running
/// job registry for one worker process.
pub struct ShutdownCoordinator {
    drain: CancellationToken,
    tracker: TaskTracker,
    running: RunningJobs,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            drain: CancellationToken::new(),
            tracker: TaskTracker::new(),
            running: RunningJobs::default(),
        }
    }

    /// Token the worker loops watch to stop claiming new jobs.
    pub fn drain_token(&self) -> CancellationToken {
        self.drain.clone()
    }

    /// Tracker for worker loops and supervision tasks. Spawning the
    /// loops here too means the drain wait cannot complete while a
    /// loop is still mid-claim.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    pub fn running(&self) -> RunningJobs {
        self.running.clone()
    }

    /// Drain the process:
    /// 1. stop worker loops from claiming,
    /// 2. wait up to `grace` for the loops to wind down and in-flight
    ///    executions to finish on their own,
    /// 3. cancel whatever remains through the same path as a
    ///    user-initiated cancel, then wait for the supervisors to
    ///    write their resumable states.
    ///
    /// Queued jobs are left untouched for the next process to claim.
    pub async fn shutdown(&self, grace: Duration) {
        self.drain.cancel();
        self.tracker.close();

        if timeout(grace, self.tracker.wait()).await.is_ok() {
            tracing::info!("all in-flight jobs finished within grace period");
            return;
        }

        let cancelled = self.running.cancel_all().await;
        tracing::warn!(
            jobs = cancelled,
            grace_secs = grace.as_secs(),
            "grace period elapsed, cancelling remaining jobs"
        );
        self.tracker.wait().await;
    }
}

/// Install a handler for SIGTERM and SIGINT.
///
/// Returns a token that is cancelled when either signal is received;
/// the binary reacts by running [`ShutdownCoordinator::shutdown`].
pub fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    use tokio::signal::unix::{signal, SignalKind};

    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token_clone = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, draining");
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, draining");
            }
        }
        token_clone.cancel();
    });

    Ok(token)
}
