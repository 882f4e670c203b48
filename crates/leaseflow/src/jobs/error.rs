use thiserror::Error;
use uuid::Uuid;

use crate::jobs::model::JobStatus;

/// Errors surfaced by job-store operations.
///
/// Claim returning no job and lease renewal returning `false` are not
/// errors; they are ordinary outcomes of polling a shared queue.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {job_id} is {from}, cannot {op}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        op: &'static str,
    },

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
