//! Metronome WAL crate.
//!
//! This crate provides the segment-log model, codec, quorum flush schedule,
//! and merge engine used by metro_recover. The API surface is intentionally
//! small: higher layers read a `NodeLog` through the codec, classify it with
//! a `Metronome`, and repair it through the merge engine.

pub mod wal;
