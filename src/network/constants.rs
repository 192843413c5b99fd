//! Protocol constants for header synchronization.

use std::time::Duration;

/// Highest protocol version we advertise during the handshake.
pub const PROTOCOL_MAXIMUM: u32 = 70016;

/// Version at which the `headers` message became available. Peers that
/// negotiated below this level cannot serve header sync.
pub const HEADERS_MIN_VERSION: u32 = 31800;

/// Version at which `ping` carries a nonce and expects a `pong` (BIP 31).
pub const BIP31_VERSION: u32 = 60001;

/// Hard cap on headers per `headers` message, per the P2P protocol.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2_000;

/// Starting minimum header download rate, headers per second. A floor, not a
/// cap; honest peers exceed it by orders of magnitude on early history.
pub const MINIMUM_HEADER_RATE: u32 = 10_000;

/// Multiplier applied to the rate floor after each peer failure. Must be
/// strictly between 0 and 1.
pub const BACK_OFF_FACTOR: f64 = 0.75;

/// A channel younger than this is never judged against the rate floor.
pub const RATE_GRACE_WINDOW: Duration = Duration::from_secs(5);

/// How long to wait for a `headers` reply before treating the peer as slow.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
