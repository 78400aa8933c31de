//! Merge engine: classification, gap filling, and log repair.
//!
//! All three operations are pure over `NodeLog` values; the codec and the
//! RPC layer feed them and persist their results.

use std::collections::HashMap;

use super::error::{Result, WalError};
use super::log::{Entry, EntryKind, NodeLog};
use super::metronome::Metronome;

/// Result of partitioning a log against the flush schedule.
#[derive(Clone, Debug, Default)]
pub struct Classified {
    /// Entries this node is responsible for flushing.
    pub critical: Vec<Entry>,
    /// Indices of present entries the schedule assigns to other nodes.
    pub missing: Vec<u64>,
}

/// Partition `log` into critical entries and missing indices.
///
/// Configuration changes are always critical; every other entry is critical
/// exactly when the schedule owns its cycle position. A node that persists
/// only critical entries uses the missing side to discover what it must
/// fetch from peers.
pub fn classify(log: &NodeLog, metronome: &Metronome) -> Classified {
    let mut out = Classified::default();
    for entry in &log.entries {
        if entry.kind == EntryKind::ConfigChange || metronome.is_critical(entry.index) {
            out.critical.push(entry.clone());
        } else {
            out.missing.push(entry.index);
        }
    }
    out
}

/// Entries present in `provider` that `recovering` lacks.
///
/// Covers the gaps between consecutive recovering entries and everything the
/// provider holds beyond the recovering log's last index. The result is
/// ordered by index and deduplicated. Indices absent from both logs are
/// reported and skipped.
pub fn find_gaps(recovering: &NodeLog, provider: &NodeLog) -> Vec<Entry> {
    let by_index: HashMap<u64, &Entry> =
        provider.entries.iter().map(|e| (e.index, e)).collect();

    let mut found = Vec::new();
    for pair in recovering.entries.windows(2) {
        for missing in pair[0].index + 1..pair[1].index {
            match by_index.get(&missing) {
                Some(entry) => found.push((*entry).clone()),
                None => {
                    tracing::warn!(index = missing, "index missing from both logs");
                }
            }
        }
    }

    let last = recovering.last_index().unwrap_or(0);
    for entry in &provider.entries {
        if entry.index > last {
            found.push(entry.clone());
        }
    }

    found.sort_by_key(|e| e.index);
    found.dedup_by_key(|e| e.index);
    found
}

/// Merge `incoming` entries into `base`, producing a repaired log.
///
/// The combined entries are sorted by index with base entries ordered before
/// incoming ones at equal indices, then deduplicated keeping the first
/// occurrence. Duplicates that disagree on term, kind, or payload fail with
/// `InconsistentLog` rather than masking divergence. The hard-state commit
/// and term are rebuilt from the merged last entry; metadata, node name, and
/// vote carry over from the base.
pub fn merge(base: &NodeLog, incoming: Vec<Entry>) -> Result<NodeLog> {
    let mut all = Vec::with_capacity(base.entries.len() + incoming.len());
    all.extend(base.entries.iter().cloned());
    all.extend(incoming);
    // Stable sort keeps base entries ahead of incoming ones per index.
    all.sort_by_key(|e| e.index);

    let mut entries: Vec<Entry> = Vec::with_capacity(all.len());
    for entry in all {
        match entries.last() {
            Some(prev) if prev.index == entry.index => {
                if prev.term != entry.term || prev.kind != entry.kind || prev.data != entry.data {
                    return Err(WalError::InconsistentLog { index: entry.index });
                }
            }
            _ => entries.push(entry),
        }
    }

    let mut merged = NodeLog {
        node_name: base.node_name.clone(),
        metadata: base.metadata.clone(),
        state: base.state,
        entries,
    };
    merged.update_hard_state();
    Ok(merged)
}
