//! Peer-facing client side of the recovery protocol.
//!
//! Shards the missing-index list into contiguous chunks, issues one RPC per
//! assigned peer in parallel, and aggregates whatever comes back. Per-peer
//! failures are logged and skipped; the barrier waits for every fan-out
//! task regardless.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use metro_wal::wal::{Entry, EntryKind, EntrySource};

use crate::rpc_service::{ENTRY_OVERHEAD_BYTES, MAX_MESSAGE_BYTES};
use crate::volo_gen::metro_recover::rpc;

/// Deadline applied to each peer RPC, dial included.
pub const RPC_DEADLINE: Duration = Duration::from_secs(5);

/// Split the ascending missing-index list into one contiguous chunk per
/// peer.
///
/// Chunks are `ceil(|missing| / peers)` long; when there are fewer indices
/// than peers, the first `|missing|` peers get one index each and the rest
/// are skipped.
pub fn shard_indexes(missing: &[u64], peers: usize) -> Vec<Vec<u64>> {
    if missing.is_empty() || peers == 0 {
        return Vec::new();
    }
    let chunk = missing.len().div_ceil(peers).max(1);
    missing.chunks(chunk).map(|c| c.to_vec()).collect()
}

/// Fan out missing-index requests across the peers and collect every entry
/// returned.
///
/// Each peer gets its own task with a fixed deadline; the call returns only
/// after every task has finished. A peer that fails or returns nothing
/// contributes nothing.
pub async fn fetch_missing_entries(peers: &[String], missing: &[u64]) -> Vec<EntrySource> {
    let chunks = shard_indexes(missing, peers.len());

    let mut tasks = FuturesUnordered::new();
    for (peer, chunk) in peers.iter().zip(chunks) {
        let peer = peer.clone();
        tasks.push(tokio::spawn(async move {
            let result = fetch_from_peer(&peer, chunk).await;
            (peer, result)
        }));
    }

    let mut collected = Vec::new();
    while let Some(joined) = tasks.next().await {
        match joined {
            Ok((peer, Ok(entries))) if !entries.is_empty() => {
                tracing::info!(peer = %peer, count = entries.len(), "collected entries from peer");
                collected.extend(entries.into_iter().map(|entry| EntrySource {
                    entry,
                    node: peer.clone(),
                }));
            }
            Ok((peer, Ok(_))) => {
                tracing::warn!(peer = %peer, "peer returned no entries, skipping");
            }
            Ok((peer, Err(err))) => {
                tracing::warn!(peer = %peer, error = %err, "peer unavailable, skipping");
            }
            Err(err) => {
                tracing::warn!(error = %err, "fan-out task failed");
            }
        }
    }
    collected
}

/// Request one chunk of indices from a single peer.
async fn fetch_from_peer(peer: &str, indexes: Vec<u64>) -> anyhow::Result<Vec<Entry>> {
    let addr = resolve_peer(peer)?;
    let client = rpc::WalServiceClientBuilder::new("metro_recover.rpc.WalService")
        .address(volo::net::Address::from(addr))
        .build();

    let request = rpc::MissingEntriesRequest { indexes };
    let response = tokio::time::timeout(RPC_DEADLINE, client.get_missing_entries(request))
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {RPC_DEADLINE:?}"))?
        .map_err(|status| anyhow::anyhow!("rpc failed: {status}"))?
        .into_inner();

    let decoded: usize = response
        .entries
        .iter()
        .map(|e| e.data.len() + ENTRY_OVERHEAD_BYTES)
        .sum();
    anyhow::ensure!(
        decoded <= MAX_MESSAGE_BYTES,
        "response of {decoded} bytes exceeds the {MAX_MESSAGE_BYTES}-byte budget"
    );

    Ok(response
        .entries
        .into_iter()
        .map(|e| Entry {
            index: e.index,
            term: e.term,
            // Configuration records are always critical and never travel
            // over this RPC.
            kind: EntryKind::Normal,
            data: e.data.to_vec(),
        })
        .collect())
}

fn resolve_peer(peer: &str) -> anyhow::Result<SocketAddr> {
    peer.to_socket_addrs()
        .with_context(|| format!("resolve peer address {peer}"))?
        .next()
        .with_context(|| format!("peer address {peer} resolved to nothing"))
}
