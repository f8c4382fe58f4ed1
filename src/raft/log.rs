use super::Term;

use serde::{Deserialize, Serialize};

/// A log index. Starts at 1, indicates no entry if 0.
pub type Index = u64;

/// A log entry: a single client write plus the term in which the leader
/// proposed it. On the wire an entry is the array
/// `[key, value, term, MID, client]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "EntryTuple", into = "EntryTuple")]
pub struct Entry {
    /// The key to write.
    pub key: String,
    /// The value to write.
    pub value: String,
    /// The term in which the entry was proposed.
    pub term: Term,
    /// The client-supplied message ID of the originating put.
    pub mid: String,
    /// The client to acknowledge once the entry is applied.
    pub client: String,
}

type EntryTuple = (String, String, Term, String, String);

impl From<EntryTuple> for Entry {
    fn from((key, value, term, mid, client): EntryTuple) -> Self {
        Self { key, value, term, mid, client }
    }
}

impl From<Entry> for EntryTuple {
    fn from(entry: Entry) -> Self {
        (entry.key, entry.value, entry.term, entry.mid, entry.client)
    }
}

/// The replicated command log. Entries are appended by the local leader or
/// spliced in from a remote one, become committed once replicated to a
/// quorum, and are applied to the state machine in order.
///
/// The log is 1-indexed, matching the protocol; the backing vector is
/// 0-indexed and `get()` is the single conversion point. Invariants:
///
/// * Entry indexes are contiguous starting at 1 (no gaps).
/// * Entry terms never decrease from the previous entry.
/// * Committed entries are never truncated or replaced.
/// * Entries with the same index and term contain the same command, and
///   imply that all previous entries are identical too.
pub struct Log {
    entries: Vec<Entry>,
    commit_index: Index,
}

impl Log {
    /// Creates a new, empty log.
    pub fn new() -> Self {
        Self { entries: Vec::new(), commit_index: 0 }
    }

    /// Returns the last log index and its term, or (0, 0) if empty.
    pub fn get_last_index(&self) -> (Index, Term) {
        match self.entries.last() {
            Some(entry) => (self.entries.len() as Index, entry.term),
            None => (0, 0),
        }
    }

    /// Returns the highest committed index.
    pub fn get_commit_index(&self) -> Index {
        self.commit_index
    }

    /// Fetches the entry at a 1-based index, or None if it does not exist.
    pub fn get(&self, index: Index) -> Option<&Entry> {
        index.checked_sub(1).and_then(|i| self.entries.get(i as usize))
    }

    /// Checks if the log has an entry at the given index with the given term.
    pub fn has(&self, index: Index, term: Term) -> bool {
        self.get(index).map(|entry| entry.term == term).unwrap_or(false)
    }

    /// Appends an entry to the log, returning its index.
    pub fn append(&mut self, entry: Entry) -> Index {
        if let Some(last) = self.entries.last() {
            assert!(entry.term >= last.term, "term regression {} → {}", last.term, entry.term);
        }
        self.entries.push(entry);
        self.entries.len() as Index
    }

    /// Splices entries into the log following base_index. Existing entries
    /// whose term matches the incoming one are kept as is; the log is
    /// truncated from the first conflict and the remainder appended. This
    /// makes redelivered AppendEntries idempotent. Returns the last index.
    pub fn splice(&mut self, base_index: Index, entries: Vec<Entry>) -> Index {
        assert!(base_index <= self.entries.len() as Index, "splice base {base_index} beyond log");
        for (i, entry) in entries.into_iter().enumerate() {
            let index = base_index + i as Index + 1;
            match self.get(index) {
                Some(existing) if existing.term == entry.term => continue,
                Some(_) => {
                    assert!(index > self.commit_index, "splice conflicts with committed entry");
                    self.entries.truncate(index as usize - 1);
                    self.entries.push(entry);
                }
                None => {
                    self.entries.push(entry);
                }
            }
        }
        self.get_last_index().0
    }

    /// Marks entries up to and including the given index as committed. The
    /// index must exist and be at or past the current commit index.
    pub fn commit(&mut self, index: Index) -> Index {
        assert!(index <= self.entries.len() as Index, "commit index {index} beyond log");
        assert!(
            index >= self.commit_index,
            "commit index regression {} → {}",
            self.commit_index,
            index
        );
        self.commit_index = index;
        index
    }

    /// Returns a copy of all entries at and after the given index.
    pub fn entries_from(&self, index: Index) -> Vec<Entry> {
        self.entries.iter().skip(index.saturating_sub(1) as usize).cloned().collect()
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}
