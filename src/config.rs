//! Configuration for the header-sync session.

use std::time::Duration;

use bitcoin::Network;

use crate::network::constants::{
    BACK_OFF_FACTOR, MAX_HEADERS_PER_MESSAGE, MINIMUM_HEADER_RATE, PROTOCOL_MAXIMUM,
    RATE_GRACE_WINDOW, RESPONSE_TIMEOUT,
};

/// Configuration for a [`HeaderSyncSession`](crate::sync::HeaderSyncSession).
///
/// The defaults are suitable for mainnet; tests and constrained environments
/// tune them through the `with_*` builders.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Network whose consensus rules bound the compact target.
    pub network: Network,

    /// Initial minimum per-peer download rate, headers per second.
    pub minimum_rate: u32,

    /// Multiplicative back-off applied to the rate floor on peer failure.
    pub back_off_factor: f64,

    /// Channels younger than this are not judged against the floor.
    pub rate_grace: Duration,

    /// How long to wait for a `headers` reply before dropping the peer.
    pub response_timeout: Duration,

    /// Upper bound on headers accepted per wire message.
    pub max_headers_per_message: usize,

    /// Number of concurrent outbound sync attempts. The first peer to fill
    /// the queue wins; the others exit cleanly.
    pub outbound_connections: usize,

    /// Protocol version advertised in our `version` message.
    pub protocol_maximum: u32,
}

impl SessionConfig {
    /// Create a configuration with defaults for the given network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            minimum_rate: MINIMUM_HEADER_RATE,
            back_off_factor: BACK_OFF_FACTOR,
            rate_grace: RATE_GRACE_WINDOW,
            response_timeout: RESPONSE_TIMEOUT,
            max_headers_per_message: MAX_HEADERS_PER_MESSAGE,
            outbound_connections: 1,
            protocol_maximum: PROTOCOL_MAXIMUM,
        }
    }

    /// Mainnet defaults.
    pub fn mainnet() -> Self {
        Self::new(Network::Bitcoin)
    }

    /// Set the initial minimum rate floor. Clamped to at least 1.
    pub fn with_minimum_rate(mut self, headers_per_second: u32) -> Self {
        self.minimum_rate = headers_per_second.max(1);
        self
    }

    /// Set the back-off factor. Must lie strictly in (0, 1).
    pub fn with_back_off_factor(mut self, factor: f64) -> Self {
        debug_assert!(factor > 0.0 && factor < 1.0, "invalid back-off factor");
        self.back_off_factor = factor;
        self
    }

    /// Set the grace window before rate enforcement begins.
    pub fn with_rate_grace(mut self, grace: Duration) -> Self {
        self.rate_grace = grace;
        self
    }

    /// Set the headers-reply timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the number of concurrent outbound sync attempts.
    pub fn with_outbound_connections(mut self, connections: usize) -> Self {
        self.outbound_connections = connections.max(1);
        self
    }
}
