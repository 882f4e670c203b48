use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::jobs::error::{StoreError, StoreResult};
use crate::jobs::model::{Job, JobStatus, NewJob};
use crate::jobs::store::{lease_millis, JobStore};

/// Postgres-backed job store.
///
/// Claim correctness: `SELECT ... FOR UPDATE SKIP LOCKED` picks a
/// candidate without blocking on rows other workers are claiming, and a
/// per-target `pg_advisory_xact_lock` plus an eligibility re-check
/// closes the window where two transactions claim different queued jobs
/// of the same target before either commits.
#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn status_of(&self, job_id: Uuid) -> StoreResult<JobStatus> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        match status {
            Some(s) => Ok(JobStatus::parse(&s)),
            None => Err(StoreError::NotFound(job_id)),
        }
    }
}

#[async_trait]
impl JobStore for JobsRepo {
    async fn enqueue(&self, new: NewJob) -> StoreResult<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (tenant, target_id, api_name, parameters, status)
            VALUES ($1, $2, $3, $4, 'queued')
            RETURNING *
            "#,
        )
        .bind(&new.tenant)
        .bind(new.target_id)
        .bind(&new.api_name)
        .bind(&new.parameters)
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> StoreResult<Job> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(job_id))
    }

    async fn claim_next(
        &self,
        tenant: &str,
        worker_id: &str,
        lease: Duration,
    ) -> StoreResult<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        // Oldest queued job whose target is idle. SKIP LOCKED keeps
        // concurrent claimers from waiting on each other's candidates.
        let candidate = sqlx::query_as::<_, Job>(
            r#"
            SELECT j.*
            FROM jobs j
            WHERE j.tenant = $1
              AND j.status = 'queued'
              AND NOT EXISTS (
                  SELECT 1 FROM jobs b
                  WHERE b.target_id = j.target_id
                    AND b.status IN ('running', 'paused', 'error')
              )
            ORDER BY j.created_at ASC, j.id ASC
            FOR UPDATE OF j SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(tenant)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        // Serialize claimers on this target, then re-check eligibility:
        // another transaction may have claimed a sibling job and
        // committed while we were selecting.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(job.target_id)
            .execute(&mut *tx)
            .await?;

        let busy: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE target_id = $1
              AND status IN ('running', 'paused', 'error')
            "#,
        )
        .bind(job.target_id)
        .fetch_one(&mut *tx)
        .await?;

        if busy > 0 {
            tx.commit().await?;
            return Ok(None);
        }

        // FIFO within the target: our select may have skipped past an
        // older queued sibling that another claimer holds row-locked.
        // A plain read still sees its committed 'queued' row; back off
        // and let that claim win.
        let superseded: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM jobs
                WHERE target_id = $1
                  AND status = 'queued'
                  AND (created_at, id) < ($2, $3)
            )
            "#,
        )
        .bind(job.target_id)
        .bind(job.created_at)
        .bind(job.id)
        .fetch_one(&mut *tx)
        .await?;

        if superseded {
            tx.commit().await?;
            return Ok(None);
        }

        let claimed = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'running',
                lease_owner = $2,
                lease_expires_at = now() + ($3::bigint * interval '1 millisecond'),
                cancel_requested = FALSE
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(worker_id)
        .bind(lease_millis(lease))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(claimed))
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease: Duration,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = now() + ($3::bigint * interval '1 millisecond')
            WHERE id = $1
              AND lease_owner = $2
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(lease_millis(lease))
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn cancel_requested(&self, job_id: Uuid) -> StoreResult<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        flag.ok_or(StoreError::NotFound(job_id))
    }

    async fn request_cancel(&self, job_id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("UPDATE jobs SET cancel_requested = TRUE WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(job_id));
        }
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> StoreResult<Job> {
        match self.status_of(job_id).await? {
            JobStatus::Running => {
                self.request_cancel(job_id).await?;
                self.get(job_id).await
            }
            JobStatus::Pending | JobStatus::Queued => self.cancel_queued(job_id).await,
            from => Err(StoreError::InvalidTransition {
                job_id,
                from,
                op: "cancel",
            }),
        }
    }

    async fn cancel_queued(&self, job_id: Uuid) -> StoreResult<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'canceled',
                cancel_requested = FALSE,
                completed_at = now()
            WHERE id = $1
              AND status IN ('pending', 'queued')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => Err(StoreError::InvalidTransition {
                job_id,
                from: self.status_of(job_id).await?,
                op: "cancel_queued",
            }),
        }
    }

    async fn expire_stale_running(&self) -> StoreResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'error',
                error = 'lease expired: worker presumed dead',
                lease_owner = NULL,
                lease_expires_at = NULL,
                cancel_requested = FALSE,
                completed_at = now()
            WHERE status = 'running'
              AND lease_expires_at IS NOT NULL
              AND lease_expires_at < now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    async fn resume(&self, job_id: Uuid) -> StoreResult<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'queued',
                result = NULL,
                error = NULL,
                tokens_used = 0,
                completed_at = NULL,
                cancel_requested = FALSE,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = $1
              AND status IN ('paused', 'error')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => Err(StoreError::InvalidTransition {
                job_id,
                from: self.status_of(job_id).await?,
                op: "resume",
            }),
        }
    }

    async fn resolve(&self, job_id: Uuid, result: Value) -> StoreResult<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'success',
                result = $2,
                error = NULL,
                cancel_requested = FALSE,
                completed_at = now()
            WHERE id = $1
              AND status IN ('paused', 'error')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(&result)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => Err(StoreError::InvalidTransition {
                job_id,
                from: self.status_of(job_id).await?,
                op: "resolve",
            }),
        }
    }

    async fn mark_succeeded(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: Value,
        tokens_used: i64,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'success',
                result = $3,
                error = NULL,
                tokens_used = $4,
                lease_owner = NULL,
                lease_expires_at = NULL,
                cancel_requested = FALSE,
                completed_at = now()
            WHERE id = $1
              AND lease_owner = $2
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(&result)
        .bind(tokens_used)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn mark_error(
        &self,
        job_id: Uuid,
        worker_id: &str,
        message: &str,
        tokens_used: i64,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'error',
                error = $3,
                result = NULL,
                tokens_used = $4,
                lease_owner = NULL,
                lease_expires_at = NULL,
                cancel_requested = FALSE,
                completed_at = now()
            WHERE id = $1
              AND lease_owner = $2
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(message)
        .bind(tokens_used)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn mark_paused(
        &self,
        job_id: Uuid,
        worker_id: &str,
        message: &str,
        tokens_used: i64,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'paused',
                error = $3,
                tokens_used = $4,
                lease_owner = NULL,
                lease_expires_at = NULL,
                cancel_requested = FALSE
            WHERE id = $1
              AND lease_owner = $2
              AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(message)
        .bind(tokens_used)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}
