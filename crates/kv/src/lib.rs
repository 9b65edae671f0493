//! Replicated key-value state machine.
//!
//! [`KvStore`] applies committed commands in the order the protocol hands
//! them over. Application is deterministic and never touches I/O, so
//! replaying the same command sequence on any node yields an identical
//! snapshot.

use consort_types::Command;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

/// Result of applying a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// False only for `Delete`/`Get` on a missing key.
    pub success: bool,
    /// `Get` returns the stored value; `Set` echoes the written value.
    pub value: Option<String>,
}

impl ApplyOutcome {
    fn ok(value: Option<String>) -> Self {
        Self {
            success: true,
            value,
        }
    }

    fn missing() -> Self {
        Self {
            success: false,
            value: None,
        }
    }
}

/// Thread-safe key-value map.
///
/// `apply` is the only mutator; concurrent `get` observes the most
/// recently applied value. A `BTreeMap` keeps snapshots deterministically
/// ordered for comparison in tests.
#[derive(Debug, Default)]
pub struct KvStore {
    data: RwLock<BTreeMap<String, String>>,
    applied: RwLock<u64>,
}

impl KvStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one committed command.
    pub fn apply(&self, command: &Command) -> ApplyOutcome {
        let mut data = self.data.write();
        *self.applied.write() += 1;
        match command {
            Command::Set { key, value } => {
                data.insert(key.clone(), value.clone());
                debug!(%key, %value, "applied SET");
                ApplyOutcome::ok(Some(value.clone()))
            }
            Command::Delete { key } => {
                if data.remove(key).is_some() {
                    debug!(%key, "applied DELETE");
                    ApplyOutcome::ok(None)
                } else {
                    ApplyOutcome::missing()
                }
            }
            Command::Get { key } => match data.get(key) {
                Some(value) => ApplyOutcome::ok(Some(value.clone())),
                None => ApplyOutcome::missing(),
            },
            Command::Noop => ApplyOutcome::ok(None),
        }
    }

    /// Read a value without going through the log.
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.read().get(key).cloned()
    }

    /// Full copy of the current state.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data.read().clone()
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// How many commands have been applied.
    pub fn applied_count(&self) -> u64 {
        *self.applied.read()
    }
}
