//! # retry-spool
//!
//! Eventual delivery for outbound messages (task feedback, heartbeats,
//! results) to a peer that is sometimes unreachable.
//!
//! When an immediate send fails, the payload is handed to a
//! [`RetryScheduler`], which writes it to a local crash-safe [`FailStore`]. A
//! background worker periodically drains the store in batches, oldest first,
//! and deletes only the batches the caller's [`RetryStrategy`] confirms as
//! delivered.
//!
//! ## Design
//!
//! - **Best effort** - scheduling and draining never surface errors to the
//!   producer; failures are logged through `tracing`
//! - **Ordered** - a rejected batch blocks everything behind it until it succeeds
//! - **Process-exclusive** - each store directory is guarded by an OS file lock
//!
//! ## Quick Start
//!
//! ```no_run
//! use retry_spool::{Config, RetryScheduler, SchedulerConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct JobFeedback {
//!     job_id: String,
//!     success: bool,
//! }
//!
//! #[tokio::main]
//! async fn main() -> retry_spool::Result<()> {
//!     let app = Config::default();
//!     let scheduler: RetryScheduler<JobFeedback> = RetryScheduler::new(
//!         SchedulerConfig::from_app(&app, "job_feedback"),
//!         || true,
//!         |batch: &[JobFeedback]| batch.iter().all(|f| f.success),
//!     )?;
//!
//!     scheduler.start();
//!     scheduler
//!         .schedule(
//!             "job-42",
//!             &JobFeedback {
//!                 job_id: "42".into(),
//!                 success: true,
//!             },
//!         )
//!         .await;
//!
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Durable fail store
pub mod fail_store;
/// Cross-process file lock
pub mod file_lock;
/// Retry scheduler engine
pub mod scheduler;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{Config, FailStoreConfig, SchedulerConfig};
pub use error::{Error, FailStoreError, Result};
pub use fail_store::{FailStore, StoreSession};
pub use file_lock::FileLock;
pub use scheduler::{ConnectivityChecker, RetryScheduler, RetryStrategy};
pub use types::{DrainReport, DrainStop, Entry};
