//! WAL module wiring.
//!
//! `codec` reads and writes segment directories, `log` holds the in-memory
//! log value, `metronome` computes the per-node flush schedule, and `merge`
//! repairs a partial log from recovered entries.

pub mod codec;
pub mod log;
pub mod merge;
pub mod metronome;

mod error;

pub use error::{Result, WalError};
pub use log::{filter_every_nth, Entry, EntryKind, EntrySource, HardState, NodeLog};
pub use metronome::{
    distance, maximize_distance_ordering, quorum_combinations, Metronome, NodeId, QuorumTuple,
};
