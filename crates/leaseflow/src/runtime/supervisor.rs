use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::jobs::{Job, JobStore};
use crate::runtime::engine::{EngineError, ExecutionEngine, TokenMeter};
use crate::runtime::shutdown::{RunningJobs, ShutdownCoordinator};

/// Message written when a cancelled run is safe to resume later.
pub const INTERRUPTED_MESSAGE: &str = "Job was interrupted by user";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often the heartbeat renews the lease and checks for
    /// cancellation. Cancellation latency is bounded by this.
    pub heartbeat_interval: Duration,
    /// Lease duration granted on claim and on every renewal.
    pub lease: Duration,
    /// Token usage at or below this pauses a cancelled job; above it
    /// the cancellation is recorded as an error.
    pub token_limit: i64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            lease: Duration::from_secs(30),
            token_limit: 200_000,
        }
    }
}

/// Wraps one claimed job in an execution task and a lease heartbeat,
/// and translates the outcome into a terminal or resumable job state.
pub struct Supervisor {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn ExecutionEngine>,
    cfg: SupervisorConfig,
    tracker: TaskTracker,
    running: RunningJobs,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn ExecutionEngine>,
        cfg: SupervisorConfig,
        coordinator: &ShutdownCoordinator,
    ) -> Self {
        Self {
            store,
            engine,
            cfg,
            tracker: coordinator.tracker(),
            running: coordinator.running(),
        }
    }

    /// Start supervising a freshly claimed job. Returns immediately;
    /// the execution task and heartbeat run on their own.
    pub async fn supervise(&self, job: Job, worker_id: &str) {
        let cancel = CancellationToken::new();
        self.running.insert(job.id, cancel.clone()).await;

        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let cfg = self.cfg.clone();
        let running = self.running.clone();
        let worker_id = worker_id.to_string();

        self.tracker.spawn(async move {
            let job_id = job.id;
            supervise_one(store, engine, cfg, job, worker_id, cancel).await;
            running.remove(job_id).await;
        });
    }
}

enum ExecOutcome {
    Completed(Value),
    Failed(String),
    Cancelled,
}

async fn supervise_one(
    store: Arc<dyn JobStore>,
    engine: Arc<dyn ExecutionEngine>,
    cfg: SupervisorConfig,
    job: Job,
    worker_id: String,
    cancel: CancellationToken,
) {
    let job_id = job.id;
    let meter = TokenMeter::new();

    let mut exec = {
        let engine = Arc::clone(&engine);
        let meter = meter.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = engine.run(&job, &meter, cancel.clone()) => match res {
                    Ok(value) => ExecOutcome::Completed(value),
                    Err(EngineError::Cancelled) => ExecOutcome::Cancelled,
                    Err(EngineError::Failed(message)) => ExecOutcome::Failed(message),
                },
                // Engines that never poll the token are still stopped:
                // dropping the run future cancels it at its next await.
                _ = cancel.cancelled() => ExecOutcome::Cancelled,
            }
        })
    };

    let mut lease_lost = false;
    let mut ticker = tokio::time::interval(cfg.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately

    // Heartbeat: renew, observe cancellation, stop when execution ends.
    let joined = loop {
        tokio::select! {
            joined = &mut exec => break joined,
            _ = ticker.tick() => {
                match store.renew_lease(job_id, &worker_id, cfg.lease).await {
                    Ok(true) => {}
                    Ok(false) => {
                        // Another actor owns this job now. Stop the
                        // execution task and write nothing.
                        tracing::warn!(job_id = %job_id, worker = %worker_id, "lease lost, stopping execution");
                        lease_lost = true;
                        cancel.cancel();
                        break (&mut exec).await;
                    }
                    Err(e) => {
                        // Transient store error: the lease is still
                        // valid until it expires, keep ticking.
                        tracing::warn!(job_id = %job_id, error = %e, "lease renewal errored");
                        continue;
                    }
                }

                match store.cancel_requested(job_id).await {
                    Ok(true) => {
                        tracing::info!(job_id = %job_id, "cancel requested, stopping execution");
                        cancel.cancel();
                        break (&mut exec).await;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "cancel check errored");
                    }
                }
            }
        }
    };

    let tokens = meter.total();
    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(join_err) => {
            // Panic in the execution task counts as a failed run.
            ExecOutcome::Failed(format!("execution task failed: {join_err}"))
        }
    };

    if lease_lost {
        // The reclaiming actor owns the job's state from here.
        return;
    }

    let written = match outcome {
        ExecOutcome::Completed(result) => {
            store
                .mark_succeeded(job_id, &worker_id, result, tokens)
                .await
        }
        ExecOutcome::Failed(message) => {
            tracing::warn!(job_id = %job_id, error = %message, "execution failed");
            store.mark_error(job_id, &worker_id, &message, tokens).await
        }
        ExecOutcome::Cancelled => {
            if tokens <= cfg.token_limit {
                store
                    .mark_paused(job_id, &worker_id, INTERRUPTED_MESSAGE, tokens)
                    .await
            } else {
                let message = format!(
                    "cancelled after exceeding token limit ({tokens} > {})",
                    cfg.token_limit
                );
                store.mark_error(job_id, &worker_id, &message, tokens).await
            }
        }
    };

    match written {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(job_id = %job_id, worker = %worker_id, "job was reclaimed before terminal write");
        }
        Err(e) => {
            // Leave it leased; the stale-lease sweep converts it to
            // error once the lease runs out.
            tracing::error!(job_id = %job_id, error = %e, "failed to write terminal state");
        }
    }
}

/// Exposed for tests that drive a single job through supervision
/// without a worker loop.
pub async fn supervise_job(
    store: Arc<dyn JobStore>,
    engine: Arc<dyn ExecutionEngine>,
    cfg: SupervisorConfig,
    job: Job,
    worker_id: &str,
    cancel: CancellationToken,
) {
    supervise_one(store, engine, cfg, job, worker_id.to_string(), cancel).await;
}
