use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::jobs::error::{StoreError, StoreResult};
use crate::jobs::model::{Job, JobStatus, NewJob};
use crate::jobs::store::{lease_millis, JobStore};

/// In-process job store for tests and single-process runs.
///
/// The claim is an optimistic compare-and-swap: every transition
/// happens under one mutex over the job map, so the re-check a
/// relational store does with row locks is implicit here.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job in an arbitrary state, bypassing transition checks.
    /// Test seams only; production paths go through the trait.
    pub async fn insert_raw(&self, job: Job) {
        self.jobs.lock().await.insert(job.id, job);
    }

    fn target_busy(jobs: &HashMap<Uuid, Job>, target_id: Uuid) -> bool {
        jobs.values().any(|j| {
            j.target_id == target_id
                && matches!(
                    j.status(),
                    JobStatus::Running | JobStatus::Paused | JobStatus::Error
                )
        })
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, new: NewJob) -> StoreResult<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            tenant: new.tenant,
            target_id: new.target_id,
            api_name: new.api_name,
            parameters: new.parameters,
            status: JobStatus::Queued.as_str().to_string(),
            lease_owner: None,
            lease_expires_at: None,
            cancel_requested: false,
            result: None,
            error: None,
            tokens_used: 0,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> StoreResult<Job> {
        self.jobs
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::NotFound(job_id))
    }

    async fn claim_next(
        &self,
        tenant: &str,
        worker_id: &str,
        lease: Duration,
    ) -> StoreResult<Option<Job>> {
        let mut jobs = self.jobs.lock().await;

        let candidate = jobs
            .values()
            .filter(|j| j.tenant == tenant && j.status() == JobStatus::Queued)
            .filter(|j| !Self::target_busy(&jobs, j.target_id))
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.status = JobStatus::Running.as_str().to_string();
        job.lease_owner = Some(worker_id.to_string());
        job.lease_expires_at = Some(Utc::now() + TimeDelta::milliseconds(lease_millis(lease)));
        job.cancel_requested = false;
        Ok(Some(job.clone()))
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease: Duration,
    ) -> StoreResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status() != JobStatus::Running || job.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        job.lease_expires_at = Some(Utc::now() + TimeDelta::milliseconds(lease_millis(lease)));
        Ok(true)
    }

    async fn cancel_requested(&self, job_id: Uuid) -> StoreResult<bool> {
        let jobs = self.jobs.lock().await;
        jobs.get(&job_id)
            .map(|j| j.cancel_requested)
            .ok_or(StoreError::NotFound(job_id))
    }

    async fn request_cancel(&self, job_id: Uuid) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        job.cancel_requested = true;
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> StoreResult<Job> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        match job.status() {
            JobStatus::Running => {
                job.cancel_requested = true;
                Ok(job.clone())
            }
            JobStatus::Pending | JobStatus::Queued => {
                job.status = JobStatus::Canceled.as_str().to_string();
                job.cancel_requested = false;
                job.completed_at = Some(Utc::now());
                Ok(job.clone())
            }
            from => Err(StoreError::InvalidTransition {
                job_id,
                from,
                op: "cancel",
            }),
        }
    }

    async fn cancel_queued(&self, job_id: Uuid) -> StoreResult<Job> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        match job.status() {
            JobStatus::Pending | JobStatus::Queued => {
                job.status = JobStatus::Canceled.as_str().to_string();
                job.cancel_requested = false;
                job.completed_at = Some(Utc::now());
                Ok(job.clone())
            }
            from => Err(StoreError::InvalidTransition {
                job_id,
                from,
                op: "cancel_queued",
            }),
        }
    }

    async fn expire_stale_running(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let mut swept = 0;
        for job in jobs.values_mut() {
            if job.status() == JobStatus::Running
                && job.lease_expires_at.map(|t| t < now).unwrap_or(false)
            {
                job.status = JobStatus::Error.as_str().to_string();
                job.error = Some("lease expired: worker presumed dead".to_string());
                job.lease_owner = None;
                job.lease_expires_at = None;
                job.cancel_requested = false;
                job.completed_at = Some(now);
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn resume(&self, job_id: Uuid) -> StoreResult<Job> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        if !job.status().is_recoverable() {
            return Err(StoreError::InvalidTransition {
                job_id,
                from: job.status(),
                op: "resume",
            });
        }
        job.status = JobStatus::Queued.as_str().to_string();
        job.result = None;
        job.error = None;
        job.tokens_used = 0;
        job.completed_at = None;
        job.cancel_requested = false;
        job.lease_owner = None;
        job.lease_expires_at = None;
        Ok(job.clone())
    }

    async fn resolve(&self, job_id: Uuid, result: Value) -> StoreResult<Job> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        if !job.status().is_recoverable() {
            return Err(StoreError::InvalidTransition {
                job_id,
                from: job.status(),
                op: "resolve",
            });
        }
        job.status = JobStatus::Success.as_str().to_string();
        job.result = Some(result);
        job.error = None;
        job.cancel_requested = false;
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn mark_succeeded(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: Value,
        tokens_used: i64,
    ) -> StoreResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status() != JobStatus::Running || job.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        job.status = JobStatus::Success.as_str().to_string();
        job.result = Some(result);
        job.error = None;
        job.tokens_used = tokens_used;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.cancel_requested = false;
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_error(
        &self,
        job_id: Uuid,
        worker_id: &str,
        message: &str,
        tokens_used: i64,
    ) -> StoreResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status() != JobStatus::Running || job.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        job.status = JobStatus::Error.as_str().to_string();
        job.error = Some(message.to_string());
        job.result = None;
        job.tokens_used = tokens_used;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.cancel_requested = false;
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_paused(
        &self,
        job_id: Uuid,
        worker_id: &str,
        message: &str,
        tokens_used: i64,
    ) -> StoreResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status() != JobStatus::Running || job.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        job.status = JobStatus::Paused.as_str().to_string();
        job.error = Some(message.to_string());
        job.tokens_used = tokens_used;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.cancel_requested = false;
        Ok(true)
    }
}
