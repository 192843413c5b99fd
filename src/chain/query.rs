//! Interface to the local persisted blockchain.
//!
//! The session only reads from the chain: its last height, the first gap in
//! the stored sequence if any, and individual headers bracketing the sync
//! range. Writing completed headers back is the block-body session's job.

use async_trait::async_trait;
use bitcoin::block::Header as BlockHeader;

use crate::error::ChainResult;

/// Read-only queries the session issues against the local chain.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Height of the highest stored block.
    async fn last_height(&self) -> ChainResult<u32>;

    /// First missing contiguous range `[first, last]` of heights, if the
    /// stored chain has a hole.
    async fn gap_range(&self) -> ChainResult<Option<(u32, u32)>>;

    /// The stored header at `height`.
    async fn header_at(&self, height: u32) -> ChainResult<BlockHeader>;
}
