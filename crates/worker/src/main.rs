use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use leaseflow::config::Config;
use leaseflow::db;
use leaseflow::jobs::{JobStore, JobsRepo};
use leaseflow::runtime::{
    install_signal_handler, run_sweeper, ShutdownCoordinator, Supervisor, SupervisorConfig,
    WorkerLoop, WorkerLoopConfig,
};

mod engine;
use engine::build_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = Config::from_env()?;

    tracing::info!(
        worker_id = %cfg.worker_id,
        tenants = ?cfg.tenants,
        workers_per_tenant = cfg.workers_per_tenant,
        lease_secs = cfg.lease.as_secs(),
        heartbeat_ms = cfg.heartbeat_interval.as_millis() as u64,
        sweep_secs = cfg.sweep_interval.as_secs(),
        grace_secs = cfg.shutdown_grace.as_secs(),
        token_limit = cfg.token_limit,
        "leaseflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let store: Arc<dyn JobStore> = Arc::new(JobsRepo::new(pool));
    let registry = build_registry();

    let coordinator = ShutdownCoordinator::new();
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&store),
        registry,
        SupervisorConfig {
            heartbeat_interval: cfg.heartbeat_interval,
            lease: cfg.lease,
            token_limit: cfg.token_limit,
        },
        &coordinator,
    ));

    // Dead-worker recovery runs in every process; the sweep is
    // idempotent so overlap is harmless.
    let sweeper = tokio::spawn(run_sweeper(
        Arc::clone(&store),
        cfg.sweep_interval,
        coordinator.drain_token(),
    ));

    let mut loops = Vec::new();
    for tenant in &cfg.tenants {
        for n in 0..cfg.workers_per_tenant {
            let worker_loop = WorkerLoop::new(
                tenant.clone(),
                format!("{}/{}#{}", cfg.worker_id, tenant, n),
                Arc::clone(&store),
                Arc::clone(&supervisor),
                WorkerLoopConfig {
                    lease: cfg.lease,
                    poll_interval: cfg.poll_interval,
                },
                coordinator.drain_token(),
            );
            // Loops share the supervision tracker: the drain wait then
            // covers a claim that was in flight when drain fired, and
            // the supervision task it spawns.
            loops.push(coordinator.tracker().spawn(worker_loop.run()));
        }
    }

    let signal = install_signal_handler()?;
    signal.cancelled().await;

    coordinator.shutdown(cfg.shutdown_grace).await;

    for handle in loops {
        handle.await?;
    }
    sweeper.await?;

    tracing::info!("shutdown complete");
    Ok(())
}
