//! In-memory hierarchical resource store
//!
//! Entries are keyed by [`NormalizedPath`] and hold arbitrary JSON values.
//! The whole map sits behind one mutex: every operation is atomic with
//! respect to every other, and the lock is never held across I/O.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::path::NormalizedPath;

/// Result of a [`ResourceStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// An entry exists at exactly this path.
    Found(Value),
    /// No exact entry; the values of all direct children, ordered by path.
    /// May be empty.
    Collection(Vec<Value>),
}

/// Outcome of a write, used to choose between "created" and "replaced".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The path had no entry before this write.
    Created,
    /// An existing entry was overwritten.
    Replaced,
}

/// Concurrent path-addressed key/value store.
#[derive(Debug, Default)]
pub struct ResourceStore {
    entries: Mutex<BTreeMap<NormalizedPath, Value>>,
}

impl ResourceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact match wins; otherwise list the direct children of `path`.
    #[must_use]
    pub fn get(&self, path: &NormalizedPath) -> Lookup {
        let entries = self.entries.lock();
        if let Some(value) = entries.get(path) {
            return Lookup::Found(value.clone());
        }

        // BTreeMap iteration is already ascending by path.
        let children = entries
            .iter()
            .filter(|(key, _)| !key.is_root() && key.parent() == *path)
            .map(|(_, value)| value.clone())
            .collect();
        Lookup::Collection(children)
    }

    /// Store `value` at `path`, overwriting any previous value.
    pub fn put(&self, path: &NormalizedPath, value: Value) -> WriteOutcome {
        let previous = self.entries.lock().insert(path.clone(), value);
        let outcome = if previous.is_some() {
            WriteOutcome::Replaced
        } else {
            WriteOutcome::Created
        };
        debug!(path = %path, outcome = ?outcome, "Stored resource");
        outcome
    }

    /// Remove the entry at `path`. Returns whether it existed.
    pub fn delete(&self, path: &NormalizedPath) -> bool {
        let existed = self.entries.lock().remove(path).is_some();
        if existed {
            debug!(path = %path, "Deleted resource");
        }
        existed
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
