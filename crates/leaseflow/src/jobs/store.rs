use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::error::StoreResult;
use crate::jobs::model::{Job, NewJob};

/// Durable record of jobs and the atomic claim/lease/cancel/resolve
/// operations. All cross-process exclusivity is enforced here; callers
/// hold no locks of their own.
///
/// Two implementations ship: [`crate::jobs::JobsRepo`] (Postgres,
/// `FOR UPDATE SKIP LOCKED` + per-target advisory lock) and
/// [`crate::jobs::MemoryStore`] (in-process compare-and-swap claim,
/// used by tests and local runs).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job directly into the queued state.
    async fn enqueue(&self, new: NewJob) -> StoreResult<Job>;

    async fn get(&self, job_id: Uuid) -> StoreResult<Job>;

    /// Atomically claim the oldest queued job for `tenant` whose target
    /// has no running, paused, or error job. Exactly one concurrent
    /// caller wins per job. On success the job is `running`, leased to
    /// `worker_id` for `lease`, with `cancel_requested` cleared.
    ///
    /// `Ok(None)` means no eligible job exists; that is a normal poll
    /// outcome, not an error.
    async fn claim_next(
        &self,
        tenant: &str,
        worker_id: &str,
        lease: Duration,
    ) -> StoreResult<Option<Job>>;

    /// Extend the lease if and only if `worker_id` still owns it.
    /// `Ok(false)` means ownership was lost; the caller must stop
    /// acting on this job without further mutation.
    async fn renew_lease(&self, job_id: Uuid, worker_id: &str, lease: Duration)
        -> StoreResult<bool>;

    /// Read the durable cancellation flag.
    async fn cancel_requested(&self, job_id: Uuid) -> StoreResult<bool>;

    /// Set the cancellation flag. Callable by any process regardless of
    /// lease ownership; idempotent. Takes effect when the owning
    /// heartbeat next observes it.
    async fn request_cancel(&self, job_id: Uuid) -> StoreResult<()>;

    /// Caller-facing cancel: flags a running job, directly cancels a
    /// pending/queued one, rejects anything else.
    async fn cancel(&self, job_id: Uuid) -> StoreResult<Job>;

    /// Directly cancel a job that has not started running yet.
    async fn cancel_queued(&self, job_id: Uuid) -> StoreResult<Job>;

    /// Sweep running jobs whose lease expired into `error`. Safe to run
    /// concurrently and repeatedly; returns the number of jobs swept.
    async fn expire_stale_running(&self) -> StoreResult<u64>;

    /// Requeue a paused or error job, clearing the outcome of the
    /// aborted run. Rejected from any other state.
    async fn resume(&self, job_id: Uuid) -> StoreResult<Job>;

    /// Close out a paused or error job with a manually supplied result,
    /// bypassing re-execution.
    async fn resolve(&self, job_id: Uuid, result: Value) -> StoreResult<Job>;

    /// Terminal writes from the execution supervisor. Conditional on
    /// `worker_id` still owning the lease; `Ok(false)` means the job
    /// was reclaimed in the meantime and nothing was written.
    async fn mark_succeeded(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: Value,
        tokens_used: i64,
    ) -> StoreResult<bool>;

    async fn mark_error(
        &self,
        job_id: Uuid,
        worker_id: &str,
        message: &str,
        tokens_used: i64,
    ) -> StoreResult<bool>;

    async fn mark_paused(
        &self,
        job_id: Uuid,
        worker_id: &str,
        message: &str,
        tokens_used: i64,
    ) -> StoreResult<bool>;
}

pub(crate) fn lease_millis(lease: Duration) -> i64 {
    i64::try_from(lease.as_millis()).unwrap_or(i64::MAX)
}
