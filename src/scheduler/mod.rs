//! Retry scheduler: persists failed sends and redelivers them in the background
//!
//! A producer calls [`RetryScheduler::schedule`] after an immediate send has
//! failed. The payload goes into the scheduler's [`FailStore`]. Once started,
//! a single background worker wakes up after `initial_delay`, and then
//! `retry_interval` after the end of each cycle, to drain the store:
//!
//! 1. Skip the cycle if the [`ConnectivityChecker`] reports the peer unreachable
//! 2. Open the store and fetch the oldest `batch_size` entries
//! 3. Hand the values to the [`RetryStrategy`]
//! 4. On success delete the batch and loop; on rejection stop until the next cycle
//!
//! A rejected batch stays at the head of the queue, so later entries are never
//! sent ahead of an earlier one that is still failing.
//!
//! # Example
//!
//! ```no_run
//! use retry_spool::{RetryScheduler, SchedulerConfig};
//!
//! # async fn example() -> retry_spool::Result<()> {
//! let config = SchedulerConfig::new("/var/lib/app/failstore/feedback")
//!     .with_name("job-feedback")
//!     .with_batch_size(10);
//!
//! let scheduler: RetryScheduler<String> = RetryScheduler::new(
//!     config,
//!     || true,
//!     |values: &[String]| {
//!         // resend `values` here
//!         !values.is_empty()
//!     },
//! )?;
//!
//! scheduler.start();
//! scheduler.schedule("feedback-1", &"job 42 finished".to_string()).await;
//! // ...
//! scheduler.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::fail_store::FailStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

mod drain;
mod traits;

pub use traits::{ConnectivityChecker, RetryStrategy};

/// Background redelivery engine for payloads of type `T`
///
/// Owns its fail store exclusively. Lifecycle is `Stopped → Running → Stopped`
/// and can be re-entered; [`start`](Self::start) and [`stop`](Self::stop) are
/// both idempotent.
pub struct RetryScheduler<T> {
    inner: Arc<Inner<T>>,
    /// Mirrors `worker.is_some()` for lock-free reads
    started: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

/// State shared with the background worker
struct Inner<T> {
    name: RwLock<String>,
    batch_size: usize,
    initial_delay: Duration,
    retry_interval: Duration,
    store: FailStore,
    checker: Box<dyn ConnectivityChecker>,
    strategy: Box<dyn RetryStrategy<T>>,
}

/// Handle on the running timer task
struct Worker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<T> RetryScheduler<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a stopped scheduler
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration fails validation
    /// - [`FailStoreError::PathInUse`](crate::FailStoreError::PathInUse) if
    ///   another store in this process owns `store_path`
    pub fn new(
        config: SchedulerConfig,
        checker: impl ConnectivityChecker + 'static,
        strategy: impl RetryStrategy<T> + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let store = FailStore::new(&config.store_path, config.fail_store.clone())?;

        Ok(Self {
            inner: Arc::new(Inner {
                name: RwLock::new(config.name),
                batch_size: config.batch_size,
                initial_delay: config.initial_delay,
                retry_interval: config.retry_interval,
                store,
                checker: Box::new(checker),
                strategy: Box::new(strategy),
            }),
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    /// Diagnostic name
    pub fn name(&self) -> String {
        self.inner.name()
    }

    /// Change the diagnostic name; the running worker picks it up on its next log line
    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.write().unwrap_or_else(PoisonError::into_inner) = name.into();
    }

    /// Entries drained per batch
    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    /// Whether the background worker is armed
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The store backing this scheduler
    pub fn store(&self) -> &FailStore {
        &self.inner.store
    }

    /// Arm the background worker on the current tokio runtime
    ///
    /// Calling this while running does nothing. Without a runtime the failure
    /// is logged and the scheduler stays stopped.
    pub fn start(&self) {
        let mut worker = self.worker_slot();
        if worker.is_some() {
            debug!(scheduler = %self.name(), "Retry scheduler already started");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = Error::Runtime(e.to_string());
                error!(scheduler = %self.name(), error = %error, "Start retry scheduler failed");
                return;
            }
        };

        let cancel = CancellationToken::new();
        let task = runtime.spawn(run_worker(self.inner.clone(), cancel.clone()));
        *worker = Some(Worker { cancel, task });

        // Flipped only once the worker exists
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(
                scheduler = %self.name(),
                initial_delay_ms = self.inner.initial_delay.as_millis() as u64,
                retry_interval_ms = self.inner.retry_interval.as_millis() as u64,
                "Start retry scheduler success"
            );
        }
    }

    /// Cancel the background worker and wait for it to exit
    ///
    /// An in-flight cycle is abandoned at its next await point; its store
    /// session is released on drop, and a batch that was sent but not yet
    /// deleted is offered again after the next start. Calling this while
    /// stopped does nothing.
    pub async fn stop(&self) {
        let worker = {
            let mut slot = self.worker_slot();
            if self
                .started
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!(scheduler = %self.name(), "Retry scheduler not running");
                return;
            }
            slot.take()
        };

        let Some(Worker { cancel, task }) = worker else {
            return;
        };
        cancel.cancel();

        match task.await {
            Ok(()) => info!(scheduler = %self.name(), "Stop retry scheduler success"),
            Err(e) => error!(scheduler = %self.name(), error = %e, "Stop retry scheduler failed"),
        }
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Inner<T> {
    fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T> Drop for RetryScheduler<T> {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
        }
    }
}

/// Timer loop: initial delay, then a fixed delay between the end of one cycle
/// and the start of the next
async fn run_worker<T>(inner: Arc<Inner<T>>, cancel: CancellationToken)
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut delay = inner.initial_delay;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        // Each cycle runs as its own task so a panicking strategy only costs that cycle
        let mut cycle = {
            let inner = inner.clone();
            tokio::spawn(async move { inner.run_cycle().await })
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                cycle.abort();
                let _ = cycle.await;
                debug!(scheduler = %inner.name(), "Drain cycle cancelled");
                break;
            }
            joined = &mut cycle => match joined {
                Ok(report) => debug!(
                    scheduler = %inner.name(),
                    batches = report.batches,
                    delivered = report.delivered,
                    stop = ?report.stop,
                    "Drain cycle finished"
                ),
                Err(e) => error!(scheduler = %inner.name(), error = %e, "Run retry scheduler error"),
            },
        }

        delay = inner.retry_interval;
    }

    debug!(scheduler = %inner.name(), "Retry worker exited");
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
