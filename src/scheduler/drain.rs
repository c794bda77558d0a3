//! Drain cycle and schedule entry point.

use super::{Inner, RetryScheduler};
use crate::error::Result;
use crate::fail_store::StoreSession;
use crate::types::{DrainReport, DrainStop, Entry, split_entries};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

/// Result of one open/fetch/retry/close round
enum BatchOutcome {
    /// Nothing pending
    Empty,
    /// Batch sent and deleted; `exhausted` when it was shorter than `batch_size`
    Delivered { count: usize, exhausted: bool },
    /// Strategy refused the batch; nothing was deleted
    Rejected { count: usize },
}

impl<T> RetryScheduler<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Queue `value` for redelivery under `key`
    ///
    /// Best effort: a store failure is logged and the payload is dropped. Use
    /// [`try_schedule`](Self::try_schedule) to observe the failure instead.
    pub async fn schedule(&self, key: impl Into<String>, value: &T) {
        let key = key.into();
        if let Err(e) = self.try_schedule(&key, value).await {
            error!(
                scheduler = %self.name(),
                key = %key,
                error = %e,
                "Schedule retry entry failed, payload dropped"
            );
        }
    }

    /// Queue `value` for redelivery under `key`, reporting store failures
    pub async fn try_schedule(&self, key: &str, value: &T) -> Result<()> {
        let session = self.inner.store.open().await?;
        let result = session.put(key, value).await;
        let closed = session.close().await;
        result?;
        closed?;

        info!(
            scheduler = %self.name(),
            key = %key,
            payload = %to_json(value),
            "Local fail store entry saved"
        );
        Ok(())
    }

    /// Run one drain cycle now, independent of the timer
    ///
    /// The background worker calls the same routine on every tick. Running
    /// this while the worker is mid-cycle is safe; the store lock serialises
    /// the two.
    pub async fn run_cycle(&self) -> DrainReport {
        self.inner.run_cycle().await
    }

    /// Number of entries waiting for redelivery
    pub async fn pending(&self) -> Result<u64> {
        let session = self.inner.store.open().await?;
        let count = session.count().await;
        let closed = session.close().await;
        let count = count?;
        closed?;
        Ok(count)
    }
}

impl<T> Inner<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Drain batches until the store is empty, a batch is rejected, or an error occurs
    pub(super) async fn run_cycle(&self) -> DrainReport {
        if !self.checker.is_remoting_enabled().await {
            debug!(scheduler = %self.name(), "Remote unreachable, skipping drain cycle");
            return DrainReport::skipped();
        }

        let mut report = DrainReport {
            batches: 0,
            delivered: 0,
            stop: DrainStop::Empty,
        };

        loop {
            match self.drain_batch().await {
                Ok(BatchOutcome::Delivered { count, exhausted }) => {
                    report.batches += 1;
                    report.delivered += count;
                    if exhausted {
                        break;
                    }
                }
                Ok(BatchOutcome::Empty) => break,
                Ok(BatchOutcome::Rejected { count }) => {
                    debug!(
                        scheduler = %self.name(),
                        size = count,
                        "Retry rejected, batch kept for next cycle"
                    );
                    report.stop = DrainStop::Rejected;
                    break;
                }
                Err(e) => {
                    error!(scheduler = %self.name(), error = %e, "Run retry scheduler error");
                    report.stop = DrainStop::Failed(e.to_string());
                    break;
                }
            }
        }

        report
    }

    /// One scoped store session around fetch, retry and delete
    async fn drain_batch(&self) -> Result<BatchOutcome> {
        let session = self.store.open().await?;
        let result = self.retry_top(&session).await;
        let closed = session.close().await;
        let outcome = result?;
        closed?;
        Ok(outcome)
    }

    async fn retry_top(&self, session: &StoreSession<'_>) -> Result<BatchOutcome> {
        let entries: Vec<Entry<T>> = session.fetch_top(self.batch_size).await?;
        if entries.is_empty() {
            return Ok(BatchOutcome::Empty);
        }

        let exhausted = entries.len() < self.batch_size;
        let (keys, values) = split_entries(entries);

        if !self.strategy.retry(&values).await {
            return Ok(BatchOutcome::Rejected {
                count: values.len(),
            });
        }

        info!(
            scheduler = %self.name(),
            size = values.len(),
            payload = %to_json(&values),
            "Local fail store entries sent successfully"
        );
        session.delete(&keys).await?;

        Ok(BatchOutcome::Delivered {
            count: values.len(),
            exhausted,
        })
    }
}

/// JSON rendering for log output
fn to_json<V: Serialize + ?Sized>(value: &V) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}
