//! Blocking-pool map worker.
//!
//! # Cancellation
//!
//! The unit of cancellation is "do not submit".  Once the token fires,
//! [`MapWorker::run`] refuses new jobs with [`MemError::Shutdown`], including
//! jobs still waiting for a permit.  A job that already holds a permit runs
//! to completion; device calls are never interrupted.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use memlink_core::{AccessMode, ContextRef, FrameRef, MemError, Result, TensorRef};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Maps allowed on the blocking pool at once.
    pub max_in_flight: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_in_flight: 4 }
    }
}

/// Seam for callers that schedule blocking maps on their own executor.
#[async_trait]
pub trait AsyncMapper: Send + Sync {
    async fn map_tensor(
        &self,
        src: TensorRef,
        output: Option<ContextRef>,
        mode: AccessMode,
    ) -> Result<TensorRef>;

    async fn map_frame(
        &self,
        src: FrameRef,
        output: Option<ContextRef>,
        mode: AccessMode,
    ) -> Result<FrameRef>;
}

pub struct MapWorker {
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl MapWorker {
    pub fn new(config: WorkerConfig) -> Self {
        let max_in_flight = config.max_in_flight.max(1);
        info!(max_in_flight, "Map worker ready");
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            cancel: CancellationToken::new(),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Clone of the token; cancelling it shuts the worker down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!(
                submitted = self.submitted(),
                completed = self.completed(),
                "Map worker shutting down"
            );
        }
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Run `job` on the blocking pool once a permit is free.
    ///
    /// A panic inside `job` is reported as [`MemError::PanicRecovered`]
    /// tagged with `stage`.
    pub async fn run<T, F>(&self, stage: &'static str, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(MemError::Shutdown);
        }
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(MemError::Shutdown),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| MemError::Shutdown)?
            }
        };
        self.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(stage, "Map job submitted");

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });
        let outcome = match handle.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                error!(stage, %message, "Map job panicked");
                Err(MemError::PanicRecovered { stage, message })
            }
            Err(join_err) => {
                error!(stage, %join_err, "Map job aborted");
                Err(MemError::Shutdown)
            }
        };
        self.completed.fetch_add(1, Ordering::Relaxed);
        outcome
    }
}

impl Default for MapWorker {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_string(),
            Err(_) => "non-string panic payload".into(),
        },
    }
}

#[async_trait]
impl AsyncMapper for MapWorker {
    async fn map_tensor(
        &self,
        src: TensorRef,
        output: Option<ContextRef>,
        mode: AccessMode,
    ) -> Result<TensorRef> {
        self.run("map_tensor", move || src.map(output.as_ref(), mode))
            .await
    }

    async fn map_frame(
        &self,
        src: FrameRef,
        output: Option<ContextRef>,
        mode: AccessMode,
    ) -> Result<FrameRef> {
        self.run("map_frame", move || src.map(output.as_ref(), mode))
            .await
    }
}
