//! In-memory representation of one node's segment log.
//!
//! These types are kept plain because they are shared between the codec,
//! the merge engine, and the RPC layer. Construction always runs through
//! the codec or the merge engine; mutation produces a new value.

/// Payload classification carried by every log entry.
///
/// Configuration records must exist on every node, so `ConfigChange` entries
/// are always critical and never filtered by the Metronome schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Normal,
    ConfigChange,
}

impl EntryKind {
    /// Wire discriminant used by the entry payload encoding.
    pub fn as_u64(self) -> u64 {
        match self {
            EntryKind::Normal => 0,
            EntryKind::ConfigChange => 1,
        }
    }

    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(EntryKind::Normal),
            1 => Some(EntryKind::ConfigChange),
            _ => None,
        }
    }
}

/// One committed log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryKind,
    pub data: Vec<u8>,
}

/// Consensus-persisted vote and commit point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HardState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

/// The coalesced view of one node's WAL.
///
/// Invariants: entries are sorted by strictly increasing index, and
/// `state.commit <= last_entry.index` once a log has been merged. A damaged
/// log read from disk may violate the commit bound; recovery uses exactly
/// that signal to detect a lost tail.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeLog {
    pub node_name: String,
    /// Opaque blob, round-trips unchanged through read and write.
    pub metadata: Vec<u8>,
    pub state: HardState,
    pub entries: Vec<Entry>,
}

impl NodeLog {
    /// Index of the last entry, if any.
    pub fn last_index(&self) -> Option<u64> {
        self.entries.last().map(|e| e.index)
    }

    /// Reset `state.commit` and `state.term` from the last entry.
    ///
    /// No-op on an empty log; the vote is always preserved.
    pub fn update_hard_state(&mut self) {
        if let Some(last) = self.entries.last() {
            self.state.commit = last.index;
            self.state.term = last.term;
        }
    }
}

/// One recovered entry together with the peer that supplied it.
///
/// Only used to track provenance while aggregating fan-out responses; never
/// persisted.
#[derive(Clone, Debug)]
pub struct EntrySource {
    pub entry: Entry,
    pub node: String,
}

/// Thin a log to every n-th entry by position.
///
/// This is the tool operation used to manufacture partial logs; the
/// metadata and hard-state are carried over unchanged.
pub fn filter_every_nth(log: &NodeLog, n: usize) -> NodeLog {
    let entries = log
        .entries
        .iter()
        .enumerate()
        .filter(|(i, _)| i % n == 0)
        .map(|(_, e)| e.clone())
        .collect();
    NodeLog {
        node_name: log.node_name.clone(),
        metadata: log.metadata.clone(),
        state: log.state,
        entries,
    }
}
