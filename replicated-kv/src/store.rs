//! In-memory key-value storage fed by the log applier.
//!
//! The store is the state machine the replicated log describes. Only the
//! [`crate::applier::LogApplier`] writes to it; request handlers only read.

use std::collections::BTreeMap;
use std::sync::RwLock;

/// Thread-safe last-write-wins map.
///
/// Reads take the shared side of an `RwLock`, so any number of concurrent
/// `get` calls proceed together while `set` holds the exclusive side. A
/// reader therefore never observes a partially written value.
#[derive(Default)]
pub struct KvStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl KvStore {
    /// Creates an empty key-value store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a key-value pair, overwriting any existing value.
    pub fn set(&self, key: String, value: String) {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, value);
    }

    /// Returns the latest value for `key`, or `None` if it was never set.
    ///
    /// An empty string is a legitimate value and is returned as
    /// `Some(String::new())`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an ordered copy of all pairs.
    ///
    /// The map is cloned so the lock is not held while the caller iterates.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
