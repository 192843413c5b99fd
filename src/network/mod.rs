//! Interfaces consumed from the peer-to-peer networking layer.
//!
//! The connector, channel framing, and version handshake live outside this
//! crate; the session only needs to open outbound channels, exchange
//! `NetworkMessage`s on them, and dictate the handshake parameters header
//! sync requires.

pub mod constants;

use std::net::SocketAddr;

use async_trait::async_trait;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::ServiceFlags;

use crate::error::NetworkResult;
use constants::HEADERS_MIN_VERSION;

/// Handshake parameters a session hands to the connector.
///
/// Header sync advertises no services, requires header-serving peers, and
/// refuses transaction relay while the skeleton downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePolicy {
    /// Protocol version we advertise.
    pub own_version: u32,
    /// Services we claim to provide.
    pub own_services: ServiceFlags,
    /// Lowest peer version we accept.
    pub minimum_version: u32,
    /// Services the peer must provide.
    pub minimum_services: ServiceFlags,
    /// Whether the peer may relay transactions to us.
    pub relay: bool,
}

impl HandshakePolicy {
    /// The policy for header synchronization at the given advertised version.
    pub fn header_sync(own_version: u32) -> Self {
        Self {
            own_version,
            own_services: ServiceFlags::NONE,
            minimum_version: HEADERS_MIN_VERSION,
            minimum_services: ServiceFlags::NETWORK,
            relay: false,
        }
    }
}

/// An established, handshake-complete connection to one peer.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Remote endpoint, for logging and reputation.
    fn authority(&self) -> SocketAddr;

    /// Protocol version agreed during the handshake.
    fn negotiated_version(&self) -> u32;

    /// Send a message to the peer.
    async fn send(&self, message: NetworkMessage) -> NetworkResult<()>;

    /// Receive the next message. `Ok(None)` means the channel closed cleanly.
    async fn recv(&mut self) -> NetworkResult<Option<NetworkMessage>>;

    /// Tear the connection down. Idempotent.
    fn stop(&self);
}

/// Opens outbound channels on demand.
#[async_trait]
pub trait Connector: Send + Sync {
    type Channel: Channel + Send + 'static;

    /// Open a connection and drive the version handshake under `policy`.
    async fn connect(&self, policy: &HandshakePolicy) -> NetworkResult<Self::Channel>;
}
