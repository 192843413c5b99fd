//! Per-channel header-sync protocol.
//!
//! One protocol instance drives one peer: issue `getheaders`, validate the
//! reply into the shared queue, sample throughput, rearm. The instance ends
//! when the queue fills, the peer misbehaves or stalls, the channel drops,
//! or the session is cancelled. Queue writes happen in exactly one `enqueue`
//! call per reply.

use std::sync::Arc;
use std::time::Instant;

use bitcoin::block::Header as BlockHeader;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::message_blockdata::GetHeadersMessage;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chain::sync_locator;
use crate::config::SessionConfig;
use crate::error::{NetworkError, PeerError, PeerResult, QueueError};
use crate::network::constants::BIP31_VERSION;
use crate::network::Channel;
use crate::sync::{HeaderQueue, RateTracker};

/// Drives `getheaders`/`headers` exchanges on one channel against the shared
/// queue.
pub struct HeaderSyncProtocol<C: Channel> {
    channel: C,
    queue: Arc<Mutex<HeaderQueue>>,
    rate: RateTracker,
    /// Session rate floor, snapshotted at attach.
    floor: u32,
    config: Arc<SessionConfig>,
    cancel: CancellationToken,
    /// Queue tail at attach; misbehavior rolls back to here.
    attach_tail: u32,
}

impl<C: Channel> HeaderSyncProtocol<C> {
    /// Attach to a channel. `floor` is the session's minimum rate at this
    /// moment; a stale snapshot only delays back-off by one cycle.
    pub async fn attach(
        channel: C,
        queue: Arc<Mutex<HeaderQueue>>,
        floor: u32,
        config: Arc<SessionConfig>,
        cancel: CancellationToken,
    ) -> HeaderSyncProtocol<C> {
        let attach_tail = queue.lock().await.tail_height();
        HeaderSyncProtocol {
            channel,
            rate: RateTracker::new(config.rate_grace),
            queue,
            floor,
            config,
            cancel,
            attach_tail,
        }
    }

    /// Run to a terminal state. The channel is stopped on the way out
    /// whatever the outcome; the session is done with it either way.
    pub async fn run(mut self) -> PeerResult<()> {
        let authority = self.channel.authority();
        let result = self.drive().await;

        match &result {
            Ok(()) => {
                tracing::debug!(peer = %authority, delivered = self.rate.delivered(),
                    "header sync protocol complete");
            }
            Err(err) => {
                tracing::debug!(peer = %authority, %err, "header sync protocol failed");
            }
        }

        if let Err(PeerError::Queue(QueueError::CheckpointMismatch(height))) = &result {
            self.discard_tentative_tail(*height).await;
        }

        self.channel.stop();
        result
    }

    async fn drive(&mut self) -> PeerResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(PeerError::Cancelled);
            }

            let request = {
                let queue = self.queue.lock().await;
                if queue.is_full() {
                    return Ok(());
                }
                let stop = queue.stop().ok_or(QueueError::NotInitialized)?;
                GetHeadersMessage {
                    version: self.config.protocol_maximum,
                    locator_hashes: sync_locator(&queue),
                    stop_hash: stop.hash(),
                }
            };

            self.channel.send(NetworkMessage::GetHeaders(request)).await?;
            let headers = self.next_headers().await?;

            if headers.is_empty() {
                if self.queue.lock().await.is_full() {
                    return Ok(());
                }
                return Err(PeerError::Stalled);
            }

            if headers.len() > self.config.max_headers_per_message {
                return Err(NetworkError::ProtocolError(format!(
                    "{} headers in one message",
                    headers.len()
                ))
                .into());
            }

            let full = {
                let mut queue = self.queue.lock().await;
                let accepted = queue.enqueue(&headers)?;
                tracing::trace!(peer = %self.channel.authority(), accepted,
                    tail = queue.tail_height(), "accepted headers batch");
                queue.is_full()
            };

            self.rate.record(headers.len() as u64);
            if full {
                return Ok(());
            }
            if self.rate.below_floor(self.floor) {
                return Err(PeerError::ChannelSlow);
            }
        }
    }

    /// Wait for the next `headers` reply, answering keep-alive pings and
    /// skipping unrelated traffic. A reply slower than the response timeout
    /// counts as a slow channel.
    async fn next_headers(&mut self) -> PeerResult<Vec<BlockHeader>> {
        let deadline = Instant::now() + self.config.response_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PeerError::ChannelSlow);
            }

            let message = tokio::select! {
                _ = self.cancel.cancelled() => return Err(PeerError::Cancelled),
                received = tokio::time::timeout(remaining, self.channel.recv()) => {
                    match received {
                        Err(_elapsed) => return Err(PeerError::ChannelSlow),
                        Ok(Ok(Some(message))) => message,
                        Ok(Ok(None)) => return Err(PeerError::ChannelGone),
                        Ok(Err(NetworkError::PeerDisconnected)) => {
                            return Err(PeerError::ChannelGone)
                        }
                        Ok(Err(err)) => return Err(err.into()),
                    }
                }
            };

            match message {
                NetworkMessage::Headers(headers) => return Ok(headers),
                NetworkMessage::Ping(nonce) => {
                    if self.channel.negotiated_version() >= BIP31_VERSION {
                        self.channel.send(NetworkMessage::Pong(nonce)).await?;
                    }
                }
                other => {
                    tracing::trace!(peer = %self.channel.authority(),
                        command = %other.command(), "ignoring unrelated message");
                }
            }
        }
    }

    /// A checkpoint disproved this peer's contribution; discard everything
    /// it appended since attach. Heights already handed downstream cannot be
    /// recalled, which is fine: they were accepted before this peer's tail.
    async fn discard_tentative_tail(&self, failed_height: u32) {
        let mut queue = self.queue.lock().await;
        match queue.rollback_to(self.attach_tail) {
            Ok(()) => {
                tracing::warn!(peer = %self.channel.authority(), failed_height,
                    rolled_back_to = self.attach_tail,
                    "checkpoint mismatch, discarded tentative tail");
            }
            Err(err) => {
                tracing::warn!(peer = %self.channel.authority(), failed_height, %err,
                    "checkpoint mismatch, tentative tail not recallable");
            }
        }
    }
}
