use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    /// Tenants this process polls; one or more worker loops each.
    pub tenants: Vec<String>,
    pub workers_per_tenant: usize,
    pub lease: Duration,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
    pub shutdown_grace: Duration,
    pub poll_interval: Duration,
    pub token_limit: i64,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("LEASEFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let tenants: Vec<String> = env_or_fallback("LEASEFLOW_TENANTS", "TENANTS")
            .unwrap_or_else(|| "default".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if tenants.is_empty() {
            anyhow::bail!("LEASEFLOW_TENANTS resolved to an empty list");
        }

        let workers_per_tenant = env_parse("LEASEFLOW_WORKERS_PER_TENANT").unwrap_or(2);

        let lease = Duration::from_secs(env_parse("LEASEFLOW_LEASE_SECONDS").unwrap_or(30));

        let heartbeat_interval =
            Duration::from_millis(env_parse("LEASEFLOW_HEARTBEAT_INTERVAL_MS").unwrap_or(2_000));

        let sweep_interval =
            Duration::from_secs(env_parse("LEASEFLOW_SWEEP_INTERVAL_SECS").unwrap_or(30));

        let shutdown_grace =
            Duration::from_secs(env_parse("LEASEFLOW_SHUTDOWN_GRACE_SECS").unwrap_or(30));

        let poll_interval =
            Duration::from_millis(env_parse("LEASEFLOW_POLL_INTERVAL_MS").unwrap_or(250));

        let token_limit = env_parse("LEASEFLOW_TOKEN_LIMIT").unwrap_or(200_000);

        let migrate_on_startup = env_bool("LEASEFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        Ok(Self {
            database_url,
            worker_id,
            tenants,
            workers_per_tenant,
            lease,
            heartbeat_interval,
            sweep_interval,
            shutdown_grace,
            poll_interval,
            token_limit,
            migrate_on_startup,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
