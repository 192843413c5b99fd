//! Error types for the header-sync session.

use std::io;

use thiserror::Error;

/// Terminal session errors. These are the only errors that ever reach the
/// completion handler; peer-local failures are absorbed by the retry loop.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("session already started")]
    AlreadyStarted,

    #[error("local chain query failed: {0}")]
    OperationFailed(String),

    #[error("required header not found at height {0}")]
    NotFound(u32),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("session cancelled")]
    Cancelled,
}

/// Errors raised by the shared header queue. A failed `enqueue` leaves the
/// queue unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue already initialized")]
    AlreadyInitialized,

    #[error("queue not initialized")]
    NotInitialized,

    #[error("header at height {0} does not extend the previous header")]
    DiscontinuousHeight(u32),

    #[error("malformed header at height {0}: {1}")]
    InvalidHeader(u32, String),

    #[error("header at height {0} disagrees with configured checkpoint")]
    CheckpointMismatch(u32),

    #[error("insufficient proof of work at height {0}")]
    BadProofOfWork(u32),

    #[error("batch would extend past the stop height {0}")]
    StopExceeded(u32),

    #[error("cannot roll back to height {0}: not in buffer")]
    RollbackBeyondBuffer(u32),
}

/// Per-peer protocol failures. These feed the session back-off loop and are
/// logged; they never surface through the completion handler.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("channel below minimum rate floor")]
    ChannelSlow,

    #[error("peer returned an empty headers reply before the queue was full")]
    Stalled,

    #[error("peer disconnected")]
    ChannelGone,

    #[error("peer rejected: {0}")]
    Queue(#[from] QueueError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("protocol cancelled")]
    Cancelled,
}

/// Errors surfaced by the networking layer the session consumes.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("protocol violation: {0}")]
    ProtocolError(String),

    #[error("timeout occurred")]
    Timeout,

    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("message serialization error: {0}")]
    Serialization(#[from] bitcoin::consensus::encode::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the local blockchain the session queries for its sync range.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain query failed: {0}")]
    OperationFailed(String),

    #[error("no header stored at height {0}")]
    NotFound(u32),
}

impl From<ChainError> for SyncError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::OperationFailed(msg) => SyncError::OperationFailed(msg),
            ChainError::NotFound(height) => SyncError::NotFound(height),
        }
    }
}

/// Checkpoint-list construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate checkpoint at height {0}")]
    DuplicateCheckpoint(u32),

    #[error("contradictory checkpoints at height {0}")]
    ContradictoryCheckpoint(u32),
}

/// Logging initialization errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Type alias for session-level results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Type alias for queue operation results.
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Type alias for peer protocol results.
pub type PeerResult<T> = std::result::Result<T, PeerError>;

/// Type alias for network operation results.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Type alias for local chain query results.
pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Type alias for logging initialization results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;

impl PeerError {
    /// Whether the session should lower the minimum-rate floor after this
    /// failure. A plain disconnect says nothing about peer throughput.
    pub fn lowers_floor(&self) -> bool {
        !matches!(self, PeerError::ChannelGone | PeerError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_error_floor_policy() {
        assert!(PeerError::ChannelSlow.lowers_floor());
        assert!(PeerError::Stalled.lowers_floor());
        assert!(PeerError::Queue(QueueError::BadProofOfWork(7)).lowers_floor());
        assert!(!PeerError::ChannelGone.lowers_floor());
        assert!(!PeerError::Cancelled.lowers_floor());
    }

    #[test]
    fn test_chain_error_maps_to_sync_error() {
        let err: SyncError = ChainError::NotFound(42).into();
        assert!(matches!(err, SyncError::NotFound(42)));

        let err: SyncError = ChainError::OperationFailed("db".into()).into();
        assert!(matches!(err, SyncError::OperationFailed(_)));
    }
}
