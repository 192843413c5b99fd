//! Multi-peer Bitcoin block-header synchronization.
//!
//! This library implements the header-sync session of a full node: starting
//! from whatever the local chain already holds, it downloads the chain of
//! block headers from untrusted peers concurrently, enforcing a minimum
//! per-peer throughput and falling back across peers when one is slow or
//! dishonest. The completed queue of validated header summaries is the
//! skeleton a block-body download session fills in afterwards.
//!
//! # Quick Start
//!
//! ```no_run
//! use bitcoin_header_sync::chain::CheckpointSet;
//! use bitcoin_header_sync::{HeaderSyncSession, SessionConfig};
//!
//! # async fn run(
//! #     connector: impl bitcoin_header_sync::network::Connector + 'static,
//! #     chain: impl bitcoin_header_sync::chain::ChainQuery,
//! # ) -> bitcoin_header_sync::SyncResult<()> {
//! let config = SessionConfig::mainnet();
//! let session = HeaderSyncSession::new(config, connector, chain, CheckpointSet::empty());
//!
//! session
//!     .start(|outcome| match outcome {
//!         Ok(()) => tracing::info!("headers synchronized"),
//!         Err(err) => tracing::warn!(%err, "header sync ended"),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Design
//!
//! - One shared [`HeaderQueue`](sync::HeaderQueue) guards all chain-linkage,
//!   checkpoint, and proof-of-work invariants behind a single mutex.
//! - Each peer runs a [`HeaderSyncProtocol`](sync::HeaderSyncProtocol) that
//!   appends wire batches and samples throughput.
//! - The [`HeaderSyncSession`](sync::HeaderSyncSession) lowers its rate
//!   floor by 0.75 on each peer failure, so a streak of bad peers degrades
//!   the admission bar instead of stalling the sync forever.

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod chain;
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use chain::{ChainQuery, Checkpoint, CheckpointSet};
pub use config::SessionConfig;
pub use error::{
    ChainError, ConfigError, NetworkError, PeerError, QueueError, SyncError, SyncResult,
};
pub use logging::{init_console_logging, init_logging, LoggingConfig, LoggingGuard};
pub use sync::{HeaderQueue, HeaderSyncSession};
pub use tracing::level_filters::LevelFilter;
pub use types::{HeaderSummary, SyncProgress};

// Re-export commonly used bitcoin types
pub use bitcoin::{BlockHash, Network};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
