//! Deterministic quorum flush schedule.
//!
//! For a cluster of N nodes with quorum size Q, every node derives a cyclic
//! bitmap of length C(N,Q) in which each position is owned by exactly Q
//! nodes. A node only flushes the entries the schedule assigns to it, which
//! spreads disk pressure across the cluster while keeping every index
//! durable on a full quorum. The schedule is a pure function of (N, Q), so
//! all nodes agree on it without coordination.

use std::collections::HashMap;

/// Logical node identifier, 1-based within the cluster.
pub type NodeId = u64;

/// An ordered set of Q distinct node ids drawn from `{1..N}`.
pub type QuorumTuple = Vec<NodeId>;

/// Per-node view of the flush schedule.
///
/// `critical[i]` is true when this node must flush entries whose index maps
/// to position `i` of the cycle. Computed once at startup; never per entry.
#[derive(Clone, Debug)]
pub struct Metronome {
    pub pid: NodeId,
    /// One flag per ordered quorum, `total_len` in all.
    pub critical: Vec<bool>,
    pub critical_len: usize,
    pub total_len: usize,
    pub ratio: f64,
}

impl Metronome {
    /// Build the schedule for node `pid` in a cluster of `num_nodes` with
    /// quorum size `quorum_size`.
    ///
    /// A zero node count, zero quorum, or quorum larger than the cluster
    /// yields the empty schedule (nothing is filtered).
    pub fn new(pid: NodeId, num_nodes: u64, quorum_size: usize) -> Self {
        if num_nodes == 0 || quorum_size == 0 || quorum_size as u64 > num_nodes {
            return Metronome {
                pid,
                critical: Vec::new(),
                critical_len: 0,
                total_len: 0,
                ratio: 0.0,
            };
        }

        let ordered = maximize_distance_ordering(quorum_combinations(num_nodes, quorum_size));
        let critical: Vec<bool> = ordered.iter().map(|q| q.contains(&pid)).collect();
        let critical_len = critical.iter().filter(|c| **c).count();
        let total_len = critical.len();
        Metronome {
            pid,
            critical,
            critical_len,
            total_len,
            ratio: critical_len as f64 / total_len as f64,
        }
    }

    /// Whether this node is scheduled to flush the entry at `index`.
    ///
    /// An empty schedule owns every index: with no assignment there is no
    /// basis for skipping a flush.
    pub fn is_critical(&self, index: u64) -> bool {
        if self.total_len == 0 {
            return true;
        }
        self.critical[(index % self.total_len as u64) as usize]
    }
}

/// Number of elements of `a` not present in `b`.
///
/// Both tuples must have the same quorum size; the result ranges over 0..=Q.
pub fn distance(a: &QuorumTuple, b: &QuorumTuple) -> usize {
    assert_eq!(a.len(), b.len(), "quorum tuples must have the same size");
    a.iter().filter(|node| !b.contains(node)).count()
}

/// Enumerate all sorted Q-subsets of `{1..=n}` in lexicographic order.
pub fn quorum_combinations(n: u64, q: usize) -> Vec<QuorumTuple> {
    let mut result = Vec::new();
    let mut current = Vec::with_capacity(q);
    combine(1, n, q, &mut current, &mut result);
    result
}

fn combine(start: u64, end: u64, q: usize, current: &mut QuorumTuple, out: &mut Vec<QuorumTuple>) {
    if current.len() == q {
        out.push(current.clone());
        return;
    }
    for node in start..=end {
        current.push(node);
        combine(node + 1, end, q, current, out);
        current.pop();
    }
}

/// Reorder quorums greedily so consecutive quorums are as disjoint as
/// possible.
///
/// At each step the quorum farthest from the last chosen one wins; among
/// equally distant candidates the one whose members were chosen least often
/// so far wins, and a remaining tie keeps enumeration order. The result is
/// deterministic, which every node relies on to derive the same schedule.
pub fn maximize_distance_ordering(mut tuples: Vec<QuorumTuple>) -> Vec<QuorumTuple> {
    if tuples.is_empty() {
        return Vec::new();
    }

    let mut ordered = Vec::with_capacity(tuples.len());
    let mut occurrences: HashMap<NodeId, usize> = HashMap::new();

    let first = tuples.remove(0);
    for node in &first {
        *occurrences.entry(*node).or_default() += 1;
    }
    ordered.push(first);

    while !tuples.is_empty() {
        let last = ordered.last().expect("ordered is non-empty");

        // (position, distance, summed occurrences) of the best candidate.
        let mut best: Option<(usize, usize, usize)> = None;
        for (pos, candidate) in tuples.iter().enumerate() {
            let dist = distance(last, candidate);
            let occ: usize = candidate
                .iter()
                .map(|node| occurrences.get(node).copied().unwrap_or(0))
                .sum();
            let better = match best {
                None => true,
                Some((_, best_dist, best_occ)) => {
                    dist > best_dist || (dist == best_dist && occ < best_occ)
                }
            };
            if better {
                best = Some((pos, dist, occ));
            }
        }

        let (pos, _, _) = best.expect("candidates remain");
        let chosen = tuples.remove(pos);
        for node in &chosen {
            *occurrences.entry(*node).or_default() += 1;
        }
        ordered.push(chosen);
    }

    ordered
}
