//! Header-sync session: peer acquisition, adaptive rate floor, completion.
//!
//! The session owns the shared queue and the minimum-rate floor. It derives
//! the sync range from the local chain, then runs outbound attempts until
//! one peer fills the queue. Every peer failure lowers the floor
//! multiplicatively, so a streak of slow or dishonest peers degrades the
//! admission bar instead of hanging the sync. The completion handler fires
//! exactly once.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::SystemTime;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainQuery, Checkpoint, CheckpointSet};
use crate::config::SessionConfig;
use crate::error::{PeerError, SyncError, SyncResult};
use crate::network::constants::HEADERS_MIN_VERSION;
use crate::network::{Channel, Connector, HandshakePolicy};
use crate::sync::{HeaderQueue, HeaderSyncProtocol};
use crate::types::SyncProgress;

type CompletionHandler = Box<dyn FnOnce(SyncResult<()>) + Send + 'static>;
type CompletionSlot = Arc<StdMutex<Option<CompletionHandler>>>;

/// Controller for one header synchronization run.
pub struct HeaderSyncSession<X, Q> {
    config: Arc<SessionConfig>,
    connector: Arc<X>,
    chain: Q,
    checkpoints: CheckpointSet,
    queue: Arc<Mutex<HeaderQueue>>,
    /// Current floor, headers per second. Peers snapshot it at attach.
    minimum_rate: Arc<AtomicU32>,
    started: AtomicBool,
    cancel: CancellationToken,
    handler: CompletionSlot,
}

impl<X, Q> HeaderSyncSession<X, Q>
where
    X: Connector + 'static,
    Q: ChainQuery,
{
    /// Create a session over the given networking and chain collaborators.
    pub fn new(config: SessionConfig, connector: X, chain: Q, checkpoints: CheckpointSet) -> Self {
        let queue = HeaderQueue::new(checkpoints.clone(), config.network);
        let minimum_rate = config.minimum_rate;
        Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            chain,
            checkpoints,
            queue: Arc::new(Mutex::new(queue)),
            minimum_rate: Arc::new(AtomicU32::new(minimum_rate)),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            handler: Arc::new(StdMutex::new(None)),
        }
    }

    /// Start the session. The handler observes the terminal outcome exactly
    /// once: `Ok(())` when the queue fills, `Err(Cancelled)` when [`stop`]
    /// wins the race.
    ///
    /// Setup failures (range derivation, a non-empty queue) are returned
    /// directly and the handler is never invoked. Calling `start` twice
    /// fails with [`SyncError::AlreadyStarted`].
    ///
    /// [`stop`]: HeaderSyncSession::stop
    pub async fn start<F>(&self, handler: F) -> SyncResult<()>
    where
        F: FnOnce(SyncResult<()>) + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyStarted);
        }

        let (seed, stop) = self.sync_range().await?;

        if seed == stop {
            tracing::info!(height = seed.height(), "headers already current");
            Self::set_handler(&self.handler, handler);
            finish(&self.handler, Ok(()));
            return Ok(());
        }

        self.queue.lock().await.initialize(seed, stop)?;
        tracing::info!(first = seed.height() + 1, last = stop.height(), "getting headers");

        Self::set_handler(&self.handler, handler);
        for index in 0..self.config.outbound_connections {
            tokio::spawn(attempt_loop(
                index,
                self.config.clone(),
                self.connector.clone(),
                self.queue.clone(),
                self.minimum_rate.clone(),
                self.cancel.clone(),
                self.handler.clone(),
            ));
        }
        Ok(())
    }

    /// Stop the session. Idempotent and non-blocking; in-flight peer
    /// protocols exit at their next suspension point, and a pending handler
    /// fires once with `Err(Cancelled)`.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The shared queue, for the block-body session once sync completes.
    pub fn queue(&self) -> Arc<Mutex<HeaderQueue>> {
        self.queue.clone()
    }

    /// A point-in-time progress snapshot.
    pub async fn progress(&self) -> SyncProgress {
        let queue = self.queue.lock().await;
        SyncProgress {
            tail_height: queue.tail_height(),
            target_height: queue.stop().map(|stop| stop.height()).unwrap_or(0),
            minimum_rate: self.minimum_rate.load(Ordering::Relaxed),
            complete: queue.is_full(),
            taken_at: SystemTime::now(),
        }
    }

    /// Derive the seed and stop bracketing the range to download.
    ///
    /// The seed is the newest block already persisted below any gap; the
    /// stop is the highest configured checkpoint when it lies beyond the
    /// chain, otherwise the block closing the gap (or the tip itself, which
    /// makes the range empty).
    async fn sync_range(&self) -> SyncResult<(Checkpoint, Checkpoint)> {
        let tip_height = self.chain.last_height().await?;

        let (first_height, last_height) = match self.chain.gap_range().await? {
            Some((first_gap, last_gap)) => (first_gap.saturating_sub(1), last_gap + 1),
            None => (tip_height, tip_height),
        };

        let seed_header = self.chain.header_at(first_height).await?;
        let seed = Checkpoint::new(first_height, seed_header.block_hash());

        let stop = match self.checkpoints.highest() {
            Some(checkpoint) if checkpoint.height() > last_height => *checkpoint,
            _ if first_height == last_height => seed,
            _ => {
                let stop_header = self.chain.header_at(last_height).await?;
                Checkpoint::new(last_height, stop_header.block_hash())
            }
        };

        Ok((seed, stop))
    }

    fn set_handler<F>(slot: &CompletionSlot, handler: F)
    where
        F: FnOnce(SyncResult<()>) + Send + 'static,
    {
        let mut guard = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Box::new(handler));
    }
}

/// One outbound slot: connect, gate on negotiated version, run the protocol,
/// back off and retry on failure. Exits when the queue is filled (by this
/// attempt or a sibling) or the session is cancelled.
async fn attempt_loop<X: Connector + 'static>(
    index: usize,
    config: Arc<SessionConfig>,
    connector: Arc<X>,
    queue: Arc<Mutex<HeaderQueue>>,
    minimum_rate: Arc<AtomicU32>,
    cancel: CancellationToken,
    handler: CompletionSlot,
) {
    let policy = HandshakePolicy::header_sync(config.protocol_maximum);

    loop {
        if cancel.is_cancelled() {
            finish(&handler, Err(SyncError::Cancelled));
            return;
        }
        if queue.lock().await.is_full() {
            // A sibling attempt won; nothing left to report.
            return;
        }

        let channel = match connector.connect(&policy).await {
            Ok(channel) => channel,
            Err(err) => {
                tracing::debug!(slot = index, %err, "header sync connect failed");
                // Connect failures alone do not back off.
                tokio::task::yield_now().await;
                continue;
            }
        };

        if channel.negotiated_version() < HEADERS_MIN_VERSION {
            tracing::debug!(peer = %channel.authority(),
                version = channel.negotiated_version(),
                "peer below headers protocol level");
            channel.stop();
            continue;
        }

        tracing::debug!(slot = index, peer = %channel.authority(),
            "attached header sync channel");
        let floor = minimum_rate.load(Ordering::Relaxed);
        let protocol =
            HeaderSyncProtocol::attach(channel, queue.clone(), floor, config.clone(), cancel.clone())
                .await;

        match protocol.run().await {
            Ok(()) => {
                cancel.cancel();
                finish(&handler, Ok(()));
                return;
            }
            Err(PeerError::Cancelled) => {
                finish(&handler, Err(SyncError::Cancelled));
                return;
            }
            Err(err) => {
                if queue.lock().await.is_full() {
                    // The failure raced a winning sibling; keep the floor.
                    continue;
                }
                if err.lowers_floor() {
                    back_off(&minimum_rate, config.back_off_factor, &err);
                } else {
                    tracing::debug!(%err, "peer dropped without penalty, retrying");
                }
            }
        }
    }
}

/// Reduce the rate minimum so a streak of bad peers cannot hang us.
fn back_off(minimum_rate: &AtomicU32, factor: f64, err: &PeerError) {
    let previous = minimum_rate
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |rate| {
            Some(((f64::from(rate) * factor) as u32).max(1))
        })
        .unwrap_or_default();
    let floor = ((f64::from(previous) * factor) as u32).max(1);
    tracing::info!(%err, floor, "header sync peer failed, lowering rate floor");
}

fn finish(slot: &CompletionSlot, outcome: SyncResult<()>) {
    let handler = {
        let mut guard = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take()
    };
    if let Some(handler) = handler {
        handler(outcome);
    }
}
