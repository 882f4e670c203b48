use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::jobs::JobStore;
use crate::runtime::supervisor::Supervisor;

#[derive(Debug, Clone)]
pub struct WorkerLoopConfig {
    /// Lease duration requested on claim.
    pub lease: Duration,
    /// Sleep between polls when no job is claimable.
    pub poll_interval: Duration,
}

impl Default for WorkerLoopConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Per-tenant polling loop. Claims are handed to the supervisor and
/// the loop continues immediately, so jobs on different targets run
/// concurrently within a tenant.
pub struct WorkerLoop {
    tenant: String,
    worker_id: String,
    store: Arc<dyn JobStore>,
    supervisor: Arc<Supervisor>,
    cfg: WorkerLoopConfig,
    drain: CancellationToken,
}

impl WorkerLoop {
    pub fn new(
        tenant: impl Into<String>,
        worker_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        supervisor: Arc<Supervisor>,
        cfg: WorkerLoopConfig,
        drain: CancellationToken,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            worker_id: worker_id.into(),
            store,
            supervisor,
            cfg,
            drain,
        }
    }

    pub async fn run(self) {
        tracing::info!(tenant = %self.tenant, worker = %self.worker_id, "worker loop started");

        loop {
            // Drain check happens before every claim; jobs claimed
            // earlier keep running to their own completion path.
            if self.drain.is_cancelled() {
                break;
            }

            match self
                .store
                .claim_next(&self.tenant, &self.worker_id, self.cfg.lease)
                .await
            {
                Ok(Some(job)) => {
                    tracing::info!(
                        tenant = %self.tenant,
                        worker = %self.worker_id,
                        job_id = %job.id,
                        api = %job.api_name,
                        "claimed job"
                    );
                    self.supervisor.supervise(job, &self.worker_id).await;
                    // keep claiming; other targets may have work
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    // Contention and transient store errors are
                    // recovered by retrying on the next poll.
                    tracing::warn!(tenant = %self.tenant, worker = %self.worker_id, error = %e, "claim failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(jittered(self.cfg.poll_interval)) => {}
                _ = self.drain.cancelled() => break,
            }
        }

        tracing::info!(tenant = %self.tenant, worker = %self.worker_id, "worker loop drained");
    }
}

/// ±20% so idle workers sharing a tenant do not poll in lockstep.
fn jittered(interval: Duration) -> Duration {
    let millis = interval.as_millis().max(1) as u64;
    let spread = (millis / 5).max(1);
    let jitter = rand::thread_rng().gen_range(0..=2 * spread);
    Duration::from_millis(millis - spread + jitter)
}
