//! Offline merge of one provider WAL into an incomplete WAL.
//!
//! Reads both segment directories, fills the gaps in the incomplete log
//! from the provider, and rewrites the incomplete directory in place. No
//! RPC involved; both directories must be local.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use metro_wal::wal::{codec, merge};

#[derive(Parser)]
#[command(name = "wal-merge")]
#[command(about = "Merge missing WAL entries from a provider log into an incomplete log")]
struct Args {
    /// Segment directory of the complete (provider) log.
    provider_dir: PathBuf,
    /// Segment directory of the incomplete log, repaired in place.
    recovering_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let provider = codec::read_node_log(&args.provider_dir, codec::Snapshot::default())
        .context("read provider log")?;
    let recovering = codec::read_node_log(&args.recovering_dir, codec::Snapshot::default())
        .context("read recovering log")?;
    println!(
        "merging {} ({} entries) into {} ({} entries)",
        args.provider_dir.display(),
        provider.entries.len(),
        args.recovering_dir.display(),
        recovering.entries.len()
    );

    let missing = merge::find_gaps(&recovering, &provider);
    println!("found {} missing entries", missing.len());

    let merged = merge::merge(&recovering, missing).context("merge logs")?;
    codec::rewrite(&args.recovering_dir, &merged).context("rewrite recovering log")?;
    println!(
        "merged log written to {} ({} entries, commit {})",
        args.recovering_dir.display(),
        merged.entries.len(),
        merged.state.commit
    );
    Ok(())
}
