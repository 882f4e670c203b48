mod common;

use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use common::{mem_store, new_job};
use leaseflow::jobs::{JobStatus, JobStore, StoreError};

const LEASE: Duration = Duration::from_secs(30);

#[tokio::test]
async fn enqueue_starts_queued_and_unleased() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();

    assert_eq!(job.status(), JobStatus::Queued);
    assert!(job.lease_owner.is_none());
    assert!(job.lease_expires_at.is_none());
    assert!(!job.cancel_requested);
    assert!(job.completed_at.is_none());
}

#[tokio::test]
async fn resume_requeues_paused_and_error_jobs() {
    for outcome in ["paused", "error"] {
        let store = mem_store();
        let job = store
            .enqueue(new_job("default", Uuid::new_v4()))
            .await
            .unwrap();
        store.claim_next("default", "worker-a", LEASE).await.unwrap();
        if outcome == "paused" {
            store
                .mark_paused(job.id, "worker-a", "interrupted", 10)
                .await
                .unwrap();
        } else {
            store
                .mark_error(job.id, "worker-a", "boom", 10)
                .await
                .unwrap();
        }

        let resumed = store.resume(job.id).await.unwrap();
        assert_eq!(resumed.status(), JobStatus::Queued);
        assert!(resumed.result.is_none());
        assert!(resumed.error.is_none());
        assert_eq!(resumed.tokens_used, 0);
        assert!(resumed.completed_at.is_none());
    }
}

#[tokio::test]
async fn resume_rejects_other_states_without_mutating() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();
    store.claim_next("default", "worker-a", LEASE).await.unwrap();

    let err = store.resume(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: JobStatus::Running,
            ..
        }
    ));

    let unchanged = store.get(job.id).await.unwrap();
    assert_eq!(unchanged.status(), JobStatus::Running);
    assert_eq!(unchanged.lease_owner.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn resolve_closes_a_stuck_job_with_a_manual_result() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();
    store.claim_next("default", "worker-a", LEASE).await.unwrap();
    store
        .mark_error(job.id, "worker-a", "boom", 10)
        .await
        .unwrap();

    let resolved = store
        .resolve(job.id, json!({ "fixed": "by hand" }))
        .await
        .unwrap();
    assert_eq!(resolved.status(), JobStatus::Success);
    assert_eq!(resolved.result, Some(json!({ "fixed": "by hand" })));
    assert!(resolved.error.is_none());
    assert!(resolved.completed_at.is_some());
}

#[tokio::test]
async fn resolve_rejects_queued_and_running_jobs() {
    let store = mem_store();
    let queued = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();

    let err = store.resolve(queued.id, json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: JobStatus::Queued,
            ..
        }
    ));
}

#[tokio::test]
async fn cancel_queued_is_terminal() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();

    let canceled = store.cancel_queued(job.id).await.unwrap();
    assert_eq!(canceled.status(), JobStatus::Canceled);
    assert!(canceled.completed_at.is_some());

    // Gone from the claimable pool.
    assert!(store
        .claim_next("default", "worker-a", LEASE)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn cancel_dispatches_on_current_state() {
    let store = mem_store();

    // Queued: direct cancel.
    let queued = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();
    let canceled = store.cancel(queued.id).await.unwrap();
    assert_eq!(canceled.status(), JobStatus::Canceled);

    // Running: flag only, observed later by the heartbeat.
    let running = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();
    store.claim_next("default", "worker-a", LEASE).await.unwrap();
    let flagged = store.cancel(running.id).await.unwrap();
    assert_eq!(flagged.status(), JobStatus::Running);
    assert!(flagged.cancel_requested);

    // Terminal: rejected.
    let err = store.cancel(canceled.id).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: JobStatus::Canceled,
            ..
        }
    ));
}

#[tokio::test]
async fn request_cancel_is_idempotent() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();
    store.claim_next("default", "worker-a", LEASE).await.unwrap();

    store.request_cancel(job.id).await.unwrap();
    store.request_cancel(job.id).await.unwrap();
    assert!(store.cancel_requested(job.id).await.unwrap());
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let store = mem_store();
    let missing = Uuid::new_v4();

    assert!(matches!(
        store.get(missing).await.unwrap_err(),
        StoreError::NotFound(id) if id == missing
    ));
    assert!(matches!(
        store.request_cancel(missing).await.unwrap_err(),
        StoreError::NotFound(_)
    ));
}
