use super::{Entry, Index};

use std::collections::HashMap;

/// The replicated state machine: a string→string map fed by applying
/// committed log entries in order. Reads of missing keys return the empty
/// string rather than an error.
pub struct KvState {
    /// The highest log index whose write is visible in the map.
    applied_index: Index,
    /// The key/value data.
    data: HashMap<String, String>,
}

impl KvState {
    /// Creates a new, empty state machine.
    pub fn new() -> Self {
        Self { applied_index: 0, data: HashMap::new() }
    }

    /// Returns the highest applied log index.
    pub fn get_applied_index(&self) -> Index {
        self.applied_index
    }

    /// Reads a key, or the empty string if it is absent.
    pub fn get(&self, key: &str) -> &str {
        self.data.get(key).map(String::as_str).unwrap_or("")
    }

    /// Applies the entry at the given log index. Entries must be applied
    /// in log order, one at a time.
    pub fn apply(&mut self, index: Index, entry: &Entry) {
        assert_eq!(index, self.applied_index + 1, "entry applied out of order");
        self.data.insert(entry.key.clone(), entry.value.clone());
        self.applied_index = index;
    }
}

impl Default for KvState {
    fn default() -> Self {
        Self::new()
    }
}
