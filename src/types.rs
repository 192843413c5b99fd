//! Common type definitions for the header-sync session.

use std::time::SystemTime;

use bitcoin::block::Header as BlockHeader;
use bitcoin::{BlockHash, CompactTarget};
use serde::{Deserialize, Serialize};

/// The slice of a block header the queue retains: enough for proof-of-work
/// verification and chain linkage, nothing more. Bodies and merkle roots are
/// the block-body session's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSummary {
    /// Double-SHA-256 id of the 80-byte serialized header.
    pub hash: BlockHash,
    /// Id of the predecessor header.
    pub prev: BlockHash,
    /// Compact difficulty target as it appeared on the wire.
    pub bits: CompactTarget,
    /// Header timestamp.
    pub time: u32,
    /// Header version as consensus-encoded.
    pub version: i32,
    /// Height assigned by the queue on acceptance.
    pub height: u32,
}

impl HeaderSummary {
    /// Summarize a wire header at the given height. The hash is computed
    /// here, once, so downstream checks never re-hash.
    pub fn from_wire(header: &BlockHeader, height: u32) -> Self {
        Self {
            hash: header.block_hash(),
            prev: header.prev_blockhash,
            bits: header.bits,
            time: header.time,
            version: header.version.to_consensus(),
            height,
        }
    }
}

/// Point-in-time view of session progress, for callers that poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Height of the last header accepted into the queue.
    pub tail_height: u32,

    /// Stop height the queue is filling toward.
    pub target_height: u32,

    /// Minimum per-peer rate currently enforced, headers per second.
    pub minimum_rate: u32,

    /// Whether the queue has reached the stop height.
    pub complete: bool,

    /// When this snapshot was taken.
    pub taken_at: SystemTime,
}
