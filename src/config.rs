//! Configuration types for retry-spool

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application-level configuration shared by every scheduler in a node
///
/// Schedulers created with [`SchedulerConfig::from_app`] derive their store
/// directory from these settings, so that each node type and cluster gets its
/// own tree under `data_path`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root data directory (default: "./data")
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Kind of node this process runs as, e.g. "task_tracker" (default: "node")
    #[serde(default = "default_node_type")]
    pub node_type: String,

    /// Cluster the node belongs to (default: "default")
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Fail store tuning applied to derived schedulers
    #[serde(default)]
    pub fail_store: FailStoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            node_type: default_node_type(),
            cluster_name: default_cluster_name(),
            fail_store: FailStoreConfig::default(),
        }
    }
}

impl Config {
    /// Root directory for all fail stores of this node
    ///
    /// Layout: `<data_path>/.lts/<node_type>/<cluster_name>/failstore`
    pub fn fail_store_path(&self) -> PathBuf {
        self.data_path
            .join(".lts")
            .join(&self.node_type)
            .join(&self.cluster_name)
            .join("failstore")
    }
}

/// Fail store locking behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailStoreConfig {
    /// How long `open` waits for the store lock before giving up (default: 5 seconds)
    #[serde(default = "default_lock_timeout", with = "duration_millis_serde")]
    pub lock_timeout: Duration,

    /// Delay between lock attempts while waiting (default: 10 milliseconds)
    #[serde(default = "default_lock_poll_interval", with = "duration_millis_serde")]
    pub lock_poll_interval: Duration,
}

impl Default for FailStoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: default_lock_timeout(),
            lock_poll_interval: default_lock_poll_interval(),
        }
    }
}

/// Per-instance retry scheduler configuration
///
/// `batch_size` is fixed once the scheduler is built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Label used in log output (default: empty)
    #[serde(default)]
    pub name: String,

    /// Directory of the fail store owned by this scheduler
    pub store_path: PathBuf,

    /// Entries drained per batch (default: 5)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay before the first drain cycle after start (default: 10 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Delay between the end of one drain cycle and the start of the next (default: 30 seconds)
    #[serde(default = "default_retry_interval", with = "duration_serde")]
    pub retry_interval: Duration,

    /// Locking behavior of the owned fail store
    #[serde(default)]
    pub fail_store: FailStoreConfig,
}

impl SchedulerConfig {
    /// Configuration with defaults for a store at `store_path`
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            name: String::new(),
            store_path: store_path.into(),
            batch_size: default_batch_size(),
            initial_delay: default_initial_delay(),
            retry_interval: default_retry_interval(),
            fail_store: FailStoreConfig::default(),
        }
    }

    /// Configuration whose store lives under the application's fail store root
    ///
    /// `purpose` names the subdirectory, e.g. "job_feedback". Distinct purposes
    /// keep schedulers from sharing a store.
    pub fn from_app(config: &Config, purpose: &str) -> Self {
        let mut scheduler = Self::new(config.fail_store_path().join(purpose));
        scheduler.name = purpose.to_string();
        scheduler.fail_store = config.fail_store.clone();
        scheduler
    }

    /// Set the diagnostic name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the initial delay and the delay between cycles
    pub fn with_timing(mut self, initial_delay: Duration, retry_interval: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.retry_interval = retry_interval;
        self
    }

    /// Set the fail store locking behavior
    pub fn with_fail_store(mut self, fail_store: FailStoreConfig) -> Self {
        self.fail_store = fail_store;
        self
    }

    /// Check the configuration for values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.store_path.as_os_str().is_empty() {
            return Err(Error::config("store_path", "store path must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(Error::config(
                "batch_size",
                "batch size must be a positive integer",
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(Error::config(
                "retry_interval",
                "retry interval must be greater than zero",
            ));
        }
        if self.fail_store.lock_poll_interval.is_zero() {
            return Err(Error::config(
                "fail_store.lock_poll_interval",
                "lock poll interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_node_type() -> String {
    "node".to_string()
}

fn default_cluster_name() -> String {
    "default".to_string()
}

fn default_batch_size() -> usize {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_lock_poll_interval() -> Duration {
    Duration::from_millis(10)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
