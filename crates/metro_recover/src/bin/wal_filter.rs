//! Thin a WAL to every n-th entry.
//!
//! Reads a segment directory, keeps every n-th entry by position, and
//! writes the result to a fresh directory. Used to manufacture partial logs
//! when exercising recovery.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use metro_wal::wal::{codec, filter_every_nth};

#[derive(Parser)]
#[command(name = "wal-filter")]
#[command(about = "Copy a WAL keeping only every n-th entry")]
struct Args {
    /// Input segment directory.
    #[arg(long)]
    input: PathBuf,
    /// Output segment directory; replaced if it exists.
    #[arg(long)]
    output: PathBuf,
    /// Keep every n-th entry, by position.
    #[arg(long, default_value_t = 1)]
    interval: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    anyhow::ensure!(args.interval > 0, "--interval must be positive");

    let log = codec::read_node_log(&args.input, codec::Snapshot::default())
        .context("read input log")?;
    let filtered = filter_every_nth(&log, args.interval);
    println!(
        "filtering {}: keeping {} of {} entries",
        args.input.display(),
        filtered.entries.len(),
        log.entries.len()
    );

    codec::rewrite(&args.output, &filtered).context("write filtered log")?;
    println!("filtered log written to {}", args.output.display());
    Ok(())
}
