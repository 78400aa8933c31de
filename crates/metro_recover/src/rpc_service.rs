//! gRPC service handler answering missing-entry lookups from the local log.
//!
//! The server holds the log read at startup behind a mutex and exposes no
//! write path; each request is a single lockstep walk over the ascending
//! request indices and the ascending local entries.

use std::sync::Arc;

use bytes::Bytes;

use crate::volo_gen::metro_recover::rpc;
use crate::NodeState;

/// Budget for one `GetMissingEntries` reply.
///
/// Sized to carry large log slices in one response. The responder stops
/// appending entries at the budget and the requester rejects anything
/// larger, bounding message size on both directions.
pub const MAX_MESSAGE_BYTES: usize = 50 * 1024 * 1024;

/// Fixed per-entry framing overhead assumed when sizing a response.
pub const ENTRY_OVERHEAD_BYTES: usize = 24;

/// gRPC service implementation backed by a shared `NodeState`.
#[derive(Clone)]
pub struct RpcService {
    pub state: Arc<NodeState>,
}

impl rpc::WalService for RpcService {
    /// Return the requested indices this node possesses, in request order.
    ///
    /// Unknown indices are silently omitted; the requester treats whatever
    /// comes back as partial coverage.
    async fn get_missing_entries(
        &self,
        req: volo_grpc::Request<rpc::MissingEntriesRequest>,
    ) -> Result<volo_grpc::Response<rpc::MissingEntriesResponse>, volo_grpc::Status> {
        let req = req.into_inner();
        let log = self.state.log.lock().await;

        let mut entries = Vec::new();
        let mut budget = MAX_MESSAGE_BYTES;
        let mut cursor = 0usize;
        for entry in &log.entries {
            // Skip requested indices this log has already walked past.
            while cursor < req.indexes.len() && req.indexes[cursor] < entry.index {
                cursor += 1;
            }
            if cursor == req.indexes.len() {
                break;
            }
            if entry.index != req.indexes[cursor] {
                continue;
            }
            cursor += 1;

            let cost = entry.data.len() + ENTRY_OVERHEAD_BYTES;
            if cost > budget {
                tracing::warn!(
                    index = entry.index,
                    returned = entries.len(),
                    "response budget exhausted, truncating reply"
                );
                break;
            }
            budget -= cost;
            entries.push(rpc::WalEntry {
                index: entry.index,
                term: entry.term,
                data: Bytes::from(entry.data.clone()),
            });
        }

        tracing::debug!(
            requested = req.indexes.len(),
            returned = entries.len(),
            "answered missing-entries lookup"
        );
        Ok(volo_grpc::Response::new(rpc::MissingEntriesResponse {
            entries,
        }))
    }
}
