use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::jobs::Job;

/// Running total of tokens consumed by one execution. The engine adds
/// to it as it goes; the supervisor reads it when deciding whether a
/// cancelled job is safe to pause or must fail.
#[derive(Clone, Default)]
pub struct TokenMeter(Arc<AtomicI64>);

impl TokenMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tokens: i64) {
        self.0.fetch_add(tokens, Ordering::Relaxed);
    }

    pub fn total(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine observed the cancellation token and stopped.
    #[error("execution cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        EngineError::Failed(message.into())
    }
}

/// The external execution engine. The supervisor owns lease renewal and
/// state transitions; the engine only does the work.
///
/// Contract: report token usage through `tokens` as it accrues, and
/// stop promptly when `cancel` fires, either by returning
/// [`EngineError::Cancelled`] or by letting the supervisor's race on
/// the token drop the future.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn run(
        &self,
        job: &Job,
        tokens: &TokenMeter,
        cancel: CancellationToken,
    ) -> Result<Value, EngineError>;
}
