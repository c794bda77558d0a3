//! Core types shared by the fail store and the retry scheduler

use serde::{Deserialize, Serialize};

/// A pending retry item: caller-assigned key plus its payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry<T> {
    /// Unique key assigned by the producer (UUID, sequence number, ...)
    pub key: String,
    /// Payload to redeliver
    pub value: T,
}

impl<T> Entry<T> {
    /// Create an entry
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Split a batch into parallel key and value lists, preserving order
pub(crate) fn split_entries<T>(entries: Vec<Entry<T>>) -> (Vec<String>, Vec<T>) {
    entries
        .into_iter()
        .map(|entry| (entry.key, entry.value))
        .unzip()
}

/// Why a drain cycle ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrainStop {
    /// The connectivity check failed; the store was not touched
    RemotingDisabled,
    /// The store was drained to empty
    Empty,
    /// The retry strategy rejected a batch; it stays queued for the next cycle
    Rejected,
    /// A store or codec error aborted the cycle
    Failed(String),
}

/// Outcome of one drain cycle
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainReport {
    /// Batches delivered and deleted during the cycle
    pub batches: usize,
    /// Entries delivered and deleted during the cycle
    pub delivered: usize,
    /// Reason the cycle stopped
    pub stop: DrainStop,
}

impl DrainReport {
    pub(crate) fn skipped() -> Self {
        Self {
            batches: 0,
            delivered: 0,
            stop: DrainStop::RemotingDisabled,
        }
    }
}
