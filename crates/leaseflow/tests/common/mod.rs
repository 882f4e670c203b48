#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use leaseflow::jobs::{Job, JobStatus, JobStore, MemoryStore, NewJob};
use leaseflow::runtime::{EngineError, ExecutionEngine, TokenMeter};

pub fn mem_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn new_job(tenant: &str, target_id: Uuid) -> NewJob {
    NewJob {
        tenant: tenant.to_string(),
        target_id,
        api_name: "echo".to_string(),
        parameters: json!({}),
    }
}

/// Test engine with a fixed duration, token spend, and outcome.
/// Reports tokens up front so a cancellation mid-run sees them.
pub struct ScriptedEngine {
    pub duration: Duration,
    pub tokens: i64,
    pub fail_with: Option<String>,
}

impl ScriptedEngine {
    pub fn completing_in(duration: Duration, tokens: i64) -> Arc<Self> {
        Arc::new(Self {
            duration,
            tokens,
            fail_with: None,
        })
    }

    pub fn failing_with(message: &str) -> Arc<Self> {
        Arc::new(Self {
            duration: Duration::from_millis(10),
            tokens: 0,
            fail_with: Some(message.to_string()),
        })
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn run(
        &self,
        _job: &Job,
        tokens: &TokenMeter,
        cancel: CancellationToken,
    ) -> Result<Value, EngineError> {
        tokens.add(self.tokens);
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => match &self.fail_with {
                Some(message) => Err(EngineError::failed(message.clone())),
                None => Ok(json!({ "ok": true })),
            },
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
        }
    }
}

/// Poll until the job reaches `status` or the deadline passes.
pub async fn wait_for_status(
    store: &dyn JobStore,
    job_id: Uuid,
    status: JobStatus,
    deadline: Duration,
) -> Job {
    let give_up = tokio::time::Instant::now() + deadline;
    loop {
        let job = store.get(job_id).await.expect("job should exist");
        if job.status() == status {
            return job;
        }
        if tokio::time::Instant::now() >= give_up {
            panic!(
                "job {job_id} never reached {status}, still {}",
                job.status()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Connect to `TEST_DATABASE_URL`, run migrations, and truncate the
/// jobs table. Returns `None` (callers skip) when the env is unset.
pub async fn setup_pg() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let url = std::env::var("TEST_DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE jobs")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}
