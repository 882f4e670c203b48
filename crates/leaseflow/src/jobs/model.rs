use chrono::{DateTime, Utc};

use serde::Serialize;
use serde_json::Value;

use uuid::Uuid;

/// A persisted job row. `status` is stored as text; use [`Job::status`]
/// for the typed view.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub tenant: String,
    pub target_id: Uuid,
    pub api_name: String,
    pub parameters: Value,

    pub status: String,

    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub cancel_requested: bool,

    pub result: Option<Value>,
    pub error: Option<String>,
    pub tokens_used: i64,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        JobStatus::parse(&self.status)
    }

    /// True while the job holds an unexpired lease.
    pub fn lease_is_valid(&self, now: DateTime<Utc>) -> bool {
        self.lease_owner.is_some() && self.lease_expires_at.map(|t| t > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant: String,
    pub target_id: Uuid,
    pub api_name: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Error,
    Success,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Error => "error",
            JobStatus::Success => "success",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Unknown strings map to `Error`: a row we cannot interpret must
    /// never be treated as claimable or running.
    pub fn parse(s: &str) -> JobStatus {
        match s {
            "pending" => JobStatus::Pending,
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "paused" => JobStatus::Paused,
            "error" => JobStatus::Error,
            "success" => JobStatus::Success,
            "canceled" => JobStatus::Canceled,
            _ => JobStatus::Error,
        }
    }

    /// Terminal states keep their outcome forever.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Canceled)
    }

    /// Paused/error jobs can be requeued via resume or closed via resolve.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, JobStatus::Paused | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
