use super::*;
use crate::config::FailStoreConfig;
use crate::error::FailStoreError;
use crate::file_lock::FileLock;
use crate::types::{DrainStop, Entry};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JobFeedback {
    job_id: String,
    success: bool,
}

fn job(key: &str) -> JobFeedback {
    JobFeedback {
        job_id: key.to_string(),
        success: true,
    }
}

/// Fake peer: reachability and acceptance are switchable, every batch offered
/// to it is recorded.
#[derive(Clone)]
struct Remote(Arc<RemoteState>);

struct RemoteState {
    reachable: AtomicBool,
    accept: AtomicBool,
    /// Accept only this many more batches before rejecting (usize::MAX = unlimited)
    accept_budget: AtomicUsize,
    checks: AtomicUsize,
    offered: Mutex<Vec<Vec<String>>>,
}

impl Remote {
    fn new(reachable: bool, accept: bool) -> Self {
        Self(Arc::new(RemoteState {
            reachable: AtomicBool::new(reachable),
            accept: AtomicBool::new(accept),
            accept_budget: AtomicUsize::new(usize::MAX),
            checks: AtomicUsize::new(0),
            offered: Mutex::new(Vec::new()),
        }))
    }

    fn set_reachable(&self, reachable: bool) {
        self.0.reachable.store(reachable, Ordering::SeqCst);
    }

    fn set_accept(&self, accept: bool) {
        self.0.accept.store(accept, Ordering::SeqCst);
    }

    fn offered(&self) -> Vec<Vec<String>> {
        self.0.offered.lock().unwrap().clone()
    }

    fn checks(&self) -> usize {
        self.0.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityChecker for Remote {
    async fn is_remoting_enabled(&self) -> bool {
        self.0.checks.fetch_add(1, Ordering::SeqCst);
        self.0.reachable.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetryStrategy<JobFeedback> for Remote {
    async fn retry(&self, values: &[JobFeedback]) -> bool {
        self.0
            .offered
            .lock()
            .unwrap()
            .push(values.iter().map(|v| v.job_id.clone()).collect());

        if !self.0.accept.load(Ordering::SeqCst) {
            return false;
        }
        self.0
            .accept_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |budget| match budget {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

fn config(dir: &TempDir, batch_size: usize) -> SchedulerConfig {
    SchedulerConfig::new(dir.path().join("feedback"))
        .with_name("job-feedback")
        .with_batch_size(batch_size)
        .with_fail_store(FailStoreConfig {
            lock_timeout: Duration::from_millis(200),
            lock_poll_interval: Duration::from_millis(5),
        })
}

fn scheduler(dir: &TempDir, batch_size: usize, remote: &Remote) -> RetryScheduler<JobFeedback> {
    RetryScheduler::new(config(dir, batch_size), remote.clone(), remote.clone()).unwrap()
}

async fn schedule_keys(scheduler: &RetryScheduler<JobFeedback>, keys: &[&str]) {
    for key in keys {
        scheduler.try_schedule(key, &job(key)).await.unwrap();
    }
}

async fn stored_entries(scheduler: &RetryScheduler<JobFeedback>) -> Vec<Entry<JobFeedback>> {
    let session = scheduler.store().open().await.unwrap();
    let entries = session.fetch_top(1000).await.unwrap();
    session.close().await.unwrap();
    entries
}

fn keys(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("k{i}")).collect()
}

const K1_TO_K7: [&str; 7] = ["k1", "k2", "k3", "k4", "k5", "k6", "k7"];

#[tokio::test]
async fn test_new_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let result = RetryScheduler::<JobFeedback>::new(config(&dir, 0), remote.clone(), remote);
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn test_two_schedulers_cannot_share_a_store_path() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let _first = scheduler(&dir, 5, &remote);

    let second = RetryScheduler::<JobFeedback>::new(config(&dir, 5), remote.clone(), remote);
    assert!(
        matches!(
            second,
            Err(Error::FailStore(FailStoreError::PathInUse(_)))
        ),
        "second scheduler on the same path must be rejected"
    );
}

#[tokio::test]
async fn test_schedule_persists_entries_in_order() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(false, true);
    let scheduler = scheduler(&dir, 5, &remote);

    schedule_keys(&scheduler, &["k1", "k2", "k3"]).await;

    assert_eq!(scheduler.pending().await.unwrap(), 3);
    let entries = stored_entries(&scheduler).await;
    assert_eq!(
        entries,
        vec![
            Entry::new("k1", job("k1")),
            Entry::new("k2", job("k2")),
            Entry::new("k3", job("k3")),
        ]
    );
}

#[tokio::test]
async fn test_cycle_is_skipped_while_remote_unreachable() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(false, true);
    let scheduler = scheduler(&dir, 5, &remote);
    schedule_keys(&scheduler, &K1_TO_K7).await;

    let report = scheduler.run_cycle().await;

    assert_eq!(report.stop, DrainStop::RemotingDisabled);
    assert_eq!(report.delivered, 0);
    assert_eq!(remote.checks(), 1);
    assert!(remote.offered().is_empty(), "strategy must not be called");
    assert_eq!(scheduler.pending().await.unwrap(), 7);
}

/// k1..k7 with batch size 5: one cycle sends [k1..k5] then [k6, k7] and stops
/// once the short batch shows the store is exhausted.
#[tokio::test]
async fn test_single_cycle_drains_k1_to_k7_in_two_batches() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(false, true);
    let scheduler = scheduler(&dir, 5, &remote);
    schedule_keys(&scheduler, &K1_TO_K7).await;

    let skipped = scheduler.run_cycle().await;
    assert_eq!(skipped.stop, DrainStop::RemotingDisabled);
    assert_eq!(scheduler.pending().await.unwrap(), 7, "no deletions while down");

    remote.set_reachable(true);
    let report = scheduler.run_cycle().await;

    assert_eq!(report.batches, 2);
    assert_eq!(report.delivered, 7);
    assert_eq!(report.stop, DrainStop::Empty);
    assert_eq!(remote.offered(), vec![keys(1..=5), keys(6..=7)]);
    assert_eq!(scheduler.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_rejected_batch_is_kept_intact_and_retried_first() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, false);
    let scheduler = scheduler(&dir, 5, &remote);
    schedule_keys(&scheduler, &K1_TO_K7).await;
    let before = stored_entries(&scheduler).await;

    let report = scheduler.run_cycle().await;
    assert_eq!(report.stop, DrainStop::Rejected);
    assert_eq!(report.delivered, 0);
    assert_eq!(remote.offered(), vec![keys(1..=5)], "cycle stops after the first failure");
    assert_eq!(stored_entries(&scheduler).await, before, "nothing deleted or reordered");

    remote.set_accept(true);
    let report = scheduler.run_cycle().await;
    assert_eq!(report.delivered, 7);
    assert_eq!(
        remote.offered(),
        vec![keys(1..=5), keys(1..=5), keys(6..=7)],
        "the failed batch is offered again before anything later"
    );
}

#[tokio::test]
async fn test_failure_mid_cycle_keeps_only_undelivered_entries() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    remote.0.accept_budget.store(1, Ordering::SeqCst);
    let scheduler = scheduler(&dir, 3, &remote);
    schedule_keys(&scheduler, &K1_TO_K7).await;

    let report = scheduler.run_cycle().await;

    assert_eq!(report.batches, 1);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.stop, DrainStop::Rejected);
    let remaining: Vec<String> = stored_entries(&scheduler)
        .await
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(remaining, keys(4..=7));
}

#[tokio::test]
async fn test_cycle_drains_more_than_one_batch_to_empty() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let scheduler = scheduler(&dir, 5, &remote);
    let all = keys(1..=12);
    for key in &all {
        scheduler.schedule(key.clone(), &job(key)).await;
    }

    let report = scheduler.run_cycle().await;

    assert_eq!(report.batches, 3);
    assert_eq!(report.delivered, 12);
    assert_eq!(report.stop, DrainStop::Empty);
    let flattened: Vec<String> = remote.offered().into_iter().flatten().collect();
    assert_eq!(flattened, all, "delivery order must match schedule order");
    assert!(remote.offered().iter().all(|batch| batch.len() <= 5));
    assert_eq!(scheduler.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_full_last_batch_ends_on_empty_fetch() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let scheduler = scheduler(&dir, 5, &remote);
    let all = keys(1..=10);
    for key in &all {
        scheduler.schedule(key.clone(), &job(key)).await;
    }

    let report = scheduler.run_cycle().await;
    assert_eq!(report.batches, 2);
    assert_eq!(report.delivered, 10);
    assert_eq!(report.stop, DrainStop::Empty);
}

#[tokio::test]
async fn test_empty_store_cycle_calls_no_strategy() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let scheduler = scheduler(&dir, 5, &remote);

    let report = scheduler.run_cycle().await;
    assert_eq!(report.stop, DrainStop::Empty);
    assert_eq!(report.batches, 0);
    assert!(remote.offered().is_empty());
}

#[tokio::test]
async fn test_store_lock_failure_aborts_cycle_without_loss() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let scheduler = scheduler(&dir, 5, &remote);
    schedule_keys(&scheduler, &["k1", "k2"]).await;

    let foreign = FileLock::new(
        scheduler
            .store()
            .path()
            .join(crate::fail_store::LOCK_FILE_NAME),
    );
    assert!(foreign.try_lock().unwrap());

    let report = scheduler.run_cycle().await;
    assert!(
        matches!(report.stop, DrainStop::Failed(_)),
        "expected failed cycle, got {:?}",
        report.stop
    );
    assert!(remote.offered().is_empty());

    foreign.release().unwrap();
    let report = scheduler.run_cycle().await;
    assert_eq!(report.delivered, 2, "next cycle proceeds normally");
}

#[tokio::test]
async fn test_undecodable_entry_fails_cycle_and_is_not_deleted() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let scheduler = scheduler(&dir, 5, &remote);

    let session = scheduler.store().open().await.unwrap();
    session.put("bad", &42_u32).await.unwrap();
    session.close().await.unwrap();

    let report = scheduler.run_cycle().await;
    assert!(matches!(report.stop, DrainStop::Failed(_)));
    assert!(remote.offered().is_empty());
    assert_eq!(scheduler.pending().await.unwrap(), 1);
}

#[tokio::test]
async fn test_schedule_failure_is_swallowed_and_payload_dropped() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(false, true);
    let scheduler = scheduler(&dir, 5, &remote);
    std::fs::create_dir_all(scheduler.store().path()).unwrap();

    let foreign = FileLock::new(
        scheduler
            .store()
            .path()
            .join(crate::fail_store::LOCK_FILE_NAME),
    );
    assert!(foreign.try_lock().unwrap());

    let err = scheduler.try_schedule("k1", &job("k1")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::FailStore(FailStoreError::LockTimeout { .. })
    ));
    // Best-effort variant returns normally
    scheduler.schedule("k2", &job("k2")).await;

    foreign.release().unwrap();
    assert_eq!(scheduler.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_rescheduling_a_key_replaces_its_payload() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let scheduler = scheduler(&dir, 5, &remote);

    schedule_keys(&scheduler, &["k1", "k2"]).await;
    let updated = JobFeedback {
        job_id: "k1-final".into(),
        success: false,
    };
    scheduler.try_schedule("k1", &updated).await.unwrap();

    let entries = stored_entries(&scheduler).await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], Entry::new("k1", updated));
}

#[tokio::test]
async fn test_set_name_and_accessors() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let scheduler = scheduler(&dir, 7, &remote);

    assert_eq!(scheduler.name(), "job-feedback");
    scheduler.set_name("task-results");
    assert_eq!(scheduler.name(), "task-results");
    assert_eq!(scheduler.batch_size(), 7);
    assert!(!scheduler.is_started());
}

#[test]
fn test_start_without_runtime_stays_stopped() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(true, true);
    let scheduler = scheduler(&dir, 5, &remote);

    scheduler.start();

    assert!(!scheduler.is_started());
    assert!(scheduler.worker_slot().is_none());
}

#[tokio::test]
async fn test_start_twice_arms_a_single_worker() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(false, true);
    let scheduler = RetryScheduler::new(
        config(&dir, 5).with_timing(Duration::from_millis(30), Duration::from_secs(3600)),
        remote.clone(),
        remote.clone(),
    )
    .unwrap();

    scheduler.start();
    scheduler.start();
    assert!(scheduler.is_started());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(remote.checks(), 1, "exactly one worker should have fired");

    scheduler.stop().await;
    assert!(!scheduler.is_started());
}

#[tokio::test]
async fn test_stop_is_idempotent_and_scheduler_restarts() {
    let dir = TempDir::new().unwrap();
    let remote = Remote::new(false, true);
    let scheduler = RetryScheduler::new(
        config(&dir, 5).with_timing(Duration::from_millis(10), Duration::from_secs(3600)),
        remote.clone(),
        remote.clone(),
    )
    .unwrap();

    // Stop before any start is a no-op
    scheduler.stop().await;
    assert!(!scheduler.is_started());

    scheduler.start();
    scheduler.stop().await;
    scheduler.stop().await;
    assert!(!scheduler.is_started());
    assert!(scheduler.worker_slot().is_none());

    scheduler.start();
    assert!(scheduler.is_started());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(remote.checks() >= 1, "restarted worker should run a cycle");
    scheduler.stop().await;
}
