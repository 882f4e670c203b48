mod common;

use std::time::Duration;

use uuid::Uuid;

use common::{mem_store, new_job};
use leaseflow::jobs::{JobStatus, JobStore};

#[tokio::test]
async fn renewal_is_conditional_on_ownership() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();

    store
        .claim_next("default", "worker-a", Duration::from_secs(30))
        .await
        .unwrap()
        .expect("claim");

    assert!(store
        .renew_lease(job.id, "worker-a", Duration::from_secs(30))
        .await
        .unwrap());

    // A worker that does not own the lease gets a no-op false, never
    // an extension.
    assert!(!store
        .renew_lease(job.id, "worker-b", Duration::from_secs(30))
        .await
        .unwrap());
}

#[tokio::test]
async fn sweep_converts_expired_lease_to_error_exactly_once() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();

    store
        .claim_next("default", "worker-a", Duration::from_millis(50))
        .await
        .unwrap()
        .expect("claim");

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(store.expire_stale_running().await.unwrap(), 1);

    let swept = store.get(job.id).await.unwrap();
    assert_eq!(swept.status(), JobStatus::Error);
    assert!(swept.error.as_deref().unwrap_or("").contains("lease expired"));
    assert!(swept.lease_owner.is_none());
    assert!(swept.lease_expires_at.is_none());

    // Re-running the sweep is a no-op for the same job.
    assert_eq!(store.expire_stale_running().await.unwrap(), 0);
}

#[tokio::test]
async fn renewal_fails_after_sweep_reclaims_the_job() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();

    store
        .claim_next("default", "worker-a", Duration::from_millis(50))
        .await
        .unwrap()
        .expect("claim");

    tokio::time::sleep(Duration::from_millis(120)).await;
    store.expire_stale_running().await.unwrap();

    // The original worker must treat this as "stop acting on the job".
    assert!(!store
        .renew_lease(job.id, "worker-a", Duration::from_secs(30))
        .await
        .unwrap());
}

#[tokio::test]
async fn sweep_leaves_live_leases_alone() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();

    store
        .claim_next("default", "worker-a", Duration::from_secs(30))
        .await
        .unwrap()
        .expect("claim");

    assert_eq!(store.expire_stale_running().await.unwrap(), 0);

    let job = store.get(job.id).await.unwrap();
    assert_eq!(job.status(), JobStatus::Running);
    assert_eq!(job.lease_owner.as_deref(), Some("worker-a"));
    assert!(job.lease_is_valid(chrono::Utc::now()));
}

#[tokio::test]
async fn expired_job_is_resumable() {
    let store = mem_store();
    let job = store
        .enqueue(new_job("default", Uuid::new_v4()))
        .await
        .unwrap();

    store
        .claim_next("default", "worker-a", Duration::from_millis(50))
        .await
        .unwrap()
        .expect("claim");
    tokio::time::sleep(Duration::from_millis(120)).await;
    store.expire_stale_running().await.unwrap();

    let resumed = store.resume(job.id).await.unwrap();
    assert_eq!(resumed.status(), JobStatus::Queued);
    assert!(resumed.error.is_none());

    // A different worker picks it up with a fresh lease.
    let reclaimed = store
        .claim_next("default", "worker-b", Duration::from_secs(30))
        .await
        .unwrap()
        .expect("resumed job claimable");
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.lease_owner.as_deref(), Some("worker-b"));
}
