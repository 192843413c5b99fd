//! Shared test fixtures: mined regtest header chains, a scripted in-memory
//! networking layer, and a mock local chain.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bitcoin::block::{Header as BlockHeader, Version};
use bitcoin::hashes::Hash;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::params::Params;
use bitcoin::{BlockHash, Network, TxMerkleNode};

use crate::chain::{ChainQuery, Checkpoint};
use crate::error::{ChainError, ChainResult, NetworkError, NetworkResult};
use crate::network::constants::PROTOCOL_MAXIMUM;
use crate::network::{Channel, Connector, HandshakePolicy};

/// The fixed block every test range builds on.
pub fn seed_checkpoint() -> Checkpoint {
    Checkpoint::new(0, BlockHash::from_byte_array([0x11; 32]))
}

/// Mine `count` linked regtest headers on top of `prev`. Regtest difficulty
/// keeps this to a couple of hash evaluations per header.
pub fn mine_chain(prev: BlockHash, count: usize) -> Vec<BlockHeader> {
    mine_chain_tagged(prev, count, 0)
}

/// Like [`mine_chain`], but salted with `tag` so two chains mined from the
/// same parent diverge. Used to script dishonest forks.
pub fn mine_chain_tagged(prev: BlockHash, count: usize, tag: u8) -> Vec<BlockHeader> {
    let bits = Params::new(Network::Regtest).max_attainable_target.to_compact_lossy();
    let mut headers = Vec::with_capacity(count);
    let mut prev_blockhash = prev;

    for index in 0..count {
        let mut merkle = [0u8; 32];
        merkle[..4].copy_from_slice(&(index as u32).to_le_bytes());
        merkle[4] = tag;

        let mut header = BlockHeader {
            version: Version::from_consensus(4),
            prev_blockhash,
            merkle_root: TxMerkleNode::from_byte_array(merkle),
            time: 1_296_688_602 + index as u32,
            bits,
            nonce: 0,
        };
        while !header.target().is_met_by(header.block_hash()) {
            header.nonce += 1;
        }

        prev_blockhash = header.block_hash();
        headers.push(header);
    }

    headers
}

/// In-memory stand-in for the persisted local chain.
#[derive(Debug, Default)]
pub struct MockChain {
    headers: BTreeMap<u32, BlockHeader>,
    forced_last_height: Option<u32>,
}

impl MockChain {
    /// Previous-hash used for the first stored header.
    pub fn genesis_prev() -> BlockHash {
        BlockHash::all_zeros()
    }

    /// Store `headers` at heights `0..len`.
    pub fn with_heights(headers: Vec<BlockHeader>) -> Self {
        Self {
            headers: headers.into_iter().enumerate().map(|(i, h)| (i as u32, h)).collect(),
            forced_last_height: None,
        }
    }

    /// Punch a hole into the stored chain.
    pub fn remove_heights(&mut self, range: RangeInclusive<u32>) {
        for height in range {
            self.headers.remove(&height);
        }
    }

    /// Report this last height regardless of what is stored.
    pub fn force_last_height(&mut self, height: u32) {
        self.forced_last_height = Some(height);
    }

    /// Hash of the stored header at `height`, for building sync fixtures.
    pub fn hash_at(&self, height: u32) -> BlockHash {
        self.headers[&height].block_hash()
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn last_height(&self) -> ChainResult<u32> {
        if let Some(height) = self.forced_last_height {
            return Ok(height);
        }
        self.headers
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| ChainError::OperationFailed("chain is empty".into()))
    }

    async fn gap_range(&self) -> ChainResult<Option<(u32, u32)>> {
        let mut previous: Option<u32> = None;
        for height in self.headers.keys().copied() {
            if let Some(previous) = previous {
                if height > previous + 1 {
                    return Ok(Some((previous + 1, height - 1)));
                }
            }
            previous = Some(height);
        }
        Ok(None)
    }

    async fn header_at(&self, height: u32) -> ChainResult<BlockHeader> {
        self.headers.get(&height).copied().ok_or(ChainError::NotFound(height))
    }
}

/// A channel that replays a scripted sequence of inbound messages and logs
/// everything sent to it.
#[derive(Debug)]
pub struct ScriptedChannel {
    script: VecDeque<NetworkMessage>,
    sent: Arc<StdMutex<Vec<NetworkMessage>>>,
    stopped: Arc<AtomicBool>,
    /// Block forever once the script runs dry instead of hanging up.
    hang_when_empty: bool,
    version: u32,
}

impl ScriptedChannel {
    /// A channel that hangs up as soon as the script is exhausted.
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            sent: Arc::new(StdMutex::new(Vec::new())),
            stopped: Arc::new(AtomicBool::new(false)),
            hang_when_empty: false,
            version: PROTOCOL_MAXIMUM,
        }
    }

    /// Script a single `headers` reply.
    pub fn replying(mut self, headers: Vec<BlockHeader>) -> Self {
        self.script.push_back(NetworkMessage::Headers(headers));
        self
    }

    /// Script the whole chain as consecutive `headers` replies of at most
    /// `batch` each.
    pub fn replying_in_batches(mut self, chain: &[BlockHeader], batch: usize) -> Self {
        for chunk in chain.chunks(batch.max(1)) {
            self.script.push_back(NetworkMessage::Headers(chunk.to_vec()));
        }
        self
    }

    /// Script an arbitrary message.
    pub fn then_message(mut self, message: NetworkMessage) -> Self {
        self.script.push_back(message);
        self
    }

    /// Keep the connection open but silent after the script ends.
    pub fn hanging(mut self) -> Self {
        self.hang_when_empty = true;
        self
    }

    /// Pretend the handshake negotiated this version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Handle on the log of messages the protocol sent us.
    pub fn sent_log(&self) -> Arc<StdMutex<Vec<NetworkMessage>>> {
        self.sent.clone()
    }

    /// Whether `stop` was called.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }
}

impl Default for ScriptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn authority(&self) -> SocketAddr {
        "127.0.0.1:18444".parse().expect("static test address")
    }

    fn negotiated_version(&self) -> u32 {
        self.version
    }

    async fn send(&self, message: NetworkMessage) -> NetworkResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(NetworkError::PeerDisconnected);
        }
        self.sent.lock().expect("sent log lock").push(message);
        Ok(())
    }

    async fn recv(&mut self) -> NetworkResult<Option<NetworkMessage>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.script.pop_front() {
            Some(message) => Ok(Some(message)),
            None if self.hang_when_empty => std::future::pending().await,
            None => Ok(None),
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// A connector handing out pre-built channels in order, then refusing.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    channels: StdMutex<VecDeque<ScriptedChannel>>,
    attempts: Arc<StdMutex<Vec<HandshakePolicy>>>,
}

impl ScriptedConnector {
    /// A connector whose every connect attempt fails.
    pub fn refusing() -> Self {
        Self::default()
    }

    /// Serve these channels in order.
    pub fn serving(channels: Vec<ScriptedChannel>) -> Self {
        Self {
            channels: StdMutex::new(channels.into()),
            attempts: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Handshake policies seen by connect attempts.
    pub fn attempt_log(&self) -> Arc<StdMutex<Vec<HandshakePolicy>>> {
        self.attempts.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Channel = ScriptedChannel;

    async fn connect(&self, policy: &HandshakePolicy) -> NetworkResult<Self::Channel> {
        self.attempts.lock().expect("attempt log lock").push(*policy);
        self.channels
            .lock()
            .expect("channel list lock")
            .pop_front()
            .ok_or_else(|| NetworkError::ConnectionFailed("no scripted peer available".into()))
    }
}
