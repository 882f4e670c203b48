use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{sync::Semaphore, time::timeout};
use tokio_util::sync::CancellationToken;

use leaseflow::jobs::Job;
use leaseflow::runtime::{EngineError, ExecutionEngine, TokenMeter};

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
type HandlerFn = dyn for<'a> Fn(
        &'a Job,
        &'a TokenMeter,
        CancellationToken,
    ) -> BoxFuture<'a, Result<Value, EngineError>>
    + Send
    + Sync;

#[derive(Clone)]
pub struct HandlerEntry {
    handler: Arc<HandlerFn>,
    semaphore: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
}

/// Dispatches jobs to handlers by `api_name`. This is the demo
/// execution engine for the worker binary; a real deployment supplies
/// its own [`ExecutionEngine`].
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, api_name: &str, handler: F)
    where
        F: for<'a> Fn(
                &'a Job,
                &'a TokenMeter,
                CancellationToken,
            ) -> BoxFuture<'a, Result<Value, EngineError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_with_options(api_name, handler, HandlerOptions::new());
    }

    pub fn register_with_options<F>(&mut self, api_name: &str, handler: F, opts: HandlerOptions)
    where
        F: for<'a> Fn(
                &'a Job,
                &'a TokenMeter,
                CancellationToken,
            ) -> BoxFuture<'a, Result<Value, EngineError>>
            + Send
            + Sync
            + 'static,
    {
        let semaphore = opts
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        self.handlers.insert(
            api_name.to_string(),
            HandlerEntry {
                handler: Arc::new(handler),
                semaphore,
                timeout: opts.timeout,
            },
        );
    }
}

#[async_trait]
impl ExecutionEngine for HandlerRegistry {
    async fn run(
        &self,
        job: &Job,
        tokens: &TokenMeter,
        cancel: CancellationToken,
    ) -> Result<Value, EngineError> {
        let Some(entry) = self.handlers.get(&job.api_name) else {
            return Err(EngineError::failed(format!(
                "no handler for api_name={}",
                job.api_name
            )));
        };

        let _permit = match &entry.semaphore {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| EngineError::failed("handler semaphore closed"))?,
            ),
            None => None,
        };

        let fut = (entry.handler)(job, tokens, cancel);
        match entry.timeout {
            Some(dur) => match timeout(dur, fut).await {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::failed(format!(
                    "handler timeout after {}ms",
                    dur.as_millis()
                ))),
            },
            None => fut.await,
        }
    }
}

#[derive(Deserialize)]
struct EchoParams {
    message: Option<String>,
}

fn parse_params<T: for<'de> Deserialize<'de>>(job: &Job) -> Result<T, EngineError> {
    serde_json::from_value(job.parameters.clone())
        .map_err(|e| EngineError::failed(format!("bad parameters: {e}")))
}

fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

pub fn build_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    // Demo handlers. Replace these with calls into your automation
    // engine.
    registry.register("echo", |job, tokens, _cancel| {
        boxed(async move {
            let params: EchoParams = parse_params(job)?;
            tokens.add(16);
            Ok(json!({ "echo": params.message.unwrap_or_default() }))
        })
    });

    registry.register("slow_work", |_job, tokens, cancel| {
        boxed(async move {
            // Simulates long-running work that checks for cancellation
            // between steps, the way a cooperative engine should.
            for _ in 0..600 {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                tokens.add(50);
            }
            Ok(json!({ "done": true }))
        })
    });

    registry.register_with_options(
        "flaky",
        |_job, _tokens, _cancel| {
            boxed(async move { Err(EngineError::failed("simulated failure")) })
        },
        HandlerOptions::new()
            .max_concurrency(10)
            .timeout(Duration::from_secs(5)),
    );

    Arc::new(registry)
}
