//! One-shot recovery coordinator.
//!
//! Drives a full cycle: load the local log, classify it against the
//! Metronome schedule, shard the missing indices across peers, fetch in
//! parallel, merge, and atomically rewrite the segment directory. Fatal
//! failures bubble out as errors so the process exits nonzero; per-peer
//! failures never do.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use metro_wal::wal::{codec, merge, Entry, Metronome};

use crate::transport;

/// Immutable configuration for one recovery cycle.
pub struct RecoveryConfig {
    pub data_dir: PathBuf,
    pub stats_file: Option<PathBuf>,
    pub quorum_size: usize,
    pub pid: u64,
}

/// Run one recovery cycle against the given peers.
pub async fn run(cfg: RecoveryConfig, peers: Vec<String>) -> anyhow::Result<()> {
    // LOADING: a corrupt or absent local log is fatal.
    let (log, gap_indexes) =
        codec::read_node_log_with_missing(&cfg.data_dir, codec::Snapshot::default())
            .context("read local segment log")?;
    tracing::info!(
        node = %log.node_name,
        entries = log.entries.len(),
        commit = log.state.commit,
        "loaded local segment log"
    );

    // CLASSIFYING: indices absent from the raw stream plus present entries
    // the schedule assigns to other nodes.
    let metronome = Metronome::new(cfg.pid, peers.len() as u64 + 1, cfg.quorum_size);
    tracing::info!(
        nodes = peers.len() + 1,
        quorum = cfg.quorum_size,
        schedule_len = metronome.total_len,
        critical_len = metronome.critical_len,
        "computed metronome schedule"
    );
    let classified = merge::classify(&log, &metronome);
    let mut missing = gap_indexes;
    missing.extend(classified.missing);
    missing.sort_unstable();
    missing.dedup();

    if missing.is_empty() {
        tracing::info!("no missing indices, nothing to recover");
        return Ok(());
    }
    tracing::info!(
        critical = classified.critical.len(),
        missing = missing.len(),
        "classified local log"
    );

    anyhow::ensure!(
        !peers.is_empty(),
        "no peers available to request missing entries"
    );

    // SHARDING and FETCHING happen inside the transport; the cycle clock
    // starts with the first request.
    let cycle_start = Instant::now();
    let collected = transport::fetch_missing_entries(&peers, &missing).await;
    anyhow::ensure!(
        !collected.is_empty(),
        "no missing entries could be retrieved from any peer"
    );

    // MERGING: first-writer-wins over identical duplicates, divergence is
    // fatal.
    for source in &collected {
        tracing::debug!(index = source.entry.index, from = %source.node, "collected entry");
    }
    let incoming: Vec<Entry> = collected.into_iter().map(|s| s.entry).collect();
    let merged = merge::merge(&log, incoming).context("merge collected entries")?;
    let merge_duration = cycle_start.elapsed();

    // WRITING: staged rewrite, swap by rename.
    codec::rewrite(&cfg.data_dir, &merged).context("rewrite segment directory")?;
    let total_duration = cycle_start.elapsed();

    tracing::info!(
        entries = merged.entries.len(),
        commit = merged.state.commit,
        total_ms = total_duration.as_millis() as u64,
        merge_ms = merge_duration.as_millis() as u64,
        "recovery complete"
    );

    if let Some(path) = &cfg.stats_file {
        if let Err(err) = write_stats(path, total_duration, merge_duration, missing.len()) {
            // Stats are best-effort; the recovered log is already on disk.
            tracing::warn!(error = %err, "failed to write recovery stats");
        }
    }
    Ok(())
}

/// Append one CSV row of cycle timings to the stats file.
fn write_stats(
    path: &Path,
    total: Duration,
    merge: Duration,
    missing_count: usize,
) -> anyhow::Result<()> {
    let fresh = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open stats file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    if fresh {
        writeln!(writer, "totalDurationMs,mergeDurationMs,missingCount")?;
    }
    writeln!(
        writer,
        "{},{},{}",
        total.as_millis(),
        merge.as_millis(),
        missing_count
    )?;
    writer.flush()?;
    Ok(())
}
