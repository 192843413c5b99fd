//! Ordered, contiguous buffer of header summaries shared by the session and
//! its peer protocols.
//!
//! The queue covers the height range `(seed, stop]`. Every append re-checks
//! chain linkage, proof of work, checkpoint agreement, and the terminal
//! bound, at batch granularity: a batch is accepted whole or the queue is
//! left untouched. All access is serialized by the owning mutex; hold times
//! stay small because peers append in wire-sized batches.

use std::collections::VecDeque;

use bitcoin::block::Header as BlockHeader;
use bitcoin::params::Params;
use bitcoin::{BlockHash, Network, Target};
use rayon::prelude::*;

use crate::chain::{Checkpoint, CheckpointSet};
use crate::error::{QueueError, QueueResult};
use crate::types::HeaderSummary;

/// Append-only header buffer with rollback, bracketed by a seed the local
/// chain already holds and a stop checkpoint.
#[derive(Debug)]
pub struct HeaderQueue {
    headers: VecDeque<HeaderSummary>,
    checkpoints: CheckpointSet,
    max_target: Target,
    range: Option<SyncRange>,
    /// Height and hash of the last accepted header. Survives `dequeue`, so
    /// appends stay anchored after downstream drains.
    tail: Option<(u32, BlockHash)>,
}

#[derive(Debug, Clone, Copy)]
struct SyncRange {
    seed: Checkpoint,
    stop: Checkpoint,
}

impl HeaderQueue {
    /// Create an uninitialized queue validating against the given checkpoint
    /// set and the network's maximum attainable target.
    pub fn new(checkpoints: CheckpointSet, network: Network) -> Self {
        Self {
            headers: VecDeque::new(),
            checkpoints,
            max_target: Params::new(network).max_attainable_target,
            range: None,
            tail: None,
        }
    }

    /// Record the sync range. The seed is the block the first appended header
    /// must link to; the stop bounds the final height.
    ///
    /// Fails with [`QueueError::AlreadyInitialized`] unless the queue is
    /// untouched.
    pub fn initialize(&mut self, seed: Checkpoint, stop: Checkpoint) -> QueueResult<()> {
        if self.range.is_some() || !self.headers.is_empty() {
            return Err(QueueError::AlreadyInitialized);
        }

        self.range = Some(SyncRange {
            seed,
            stop,
        });
        self.tail = Some((seed.height(), seed.hash()));
        Ok(())
    }

    /// Append a contiguous run of wire headers starting at `tail_height + 1`.
    ///
    /// The batch must fit under the stop height; each header is then checked
    /// for linkage, target sanity, proof of work, and checkpoint agreement.
    /// On any failure the queue is unchanged and an offending header's error
    /// is returned.
    pub fn enqueue(&mut self, batch: &[BlockHeader]) -> QueueResult<usize> {
        let range = self.range.ok_or(QueueError::NotInitialized)?;
        let (tail_height, tail_hash) = self.tail.ok_or(QueueError::NotInitialized)?;

        if batch.is_empty() {
            return Ok(0);
        }

        let first_height = tail_height + 1;
        let last_height = tail_height + batch.len() as u32;
        if last_height > range.stop.height() {
            return Err(QueueError::StopExceeded(range.stop.height()));
        }

        // Hash once up front; linkage and PoW both consume the ids.
        let summaries: Vec<HeaderSummary> = batch
            .par_iter()
            .enumerate()
            .map(|(i, header)| HeaderSummary::from_wire(header, first_height + i as u32))
            .collect();

        // Linkage of element i to i-1 and PoW of i, checked in parallel.
        // The first element anchors to the current tail instead.
        summaries.par_iter().enumerate().try_for_each(|(i, summary)| {
            let expected_prev = if i == 0 {
                tail_hash
            } else {
                summaries[i - 1].hash
            };
            if summary.prev != expected_prev {
                return Err(QueueError::DiscontinuousHeight(summary.height));
            }
            self.check_proof_of_work(summary)?;
            if let Some(required) = self.checkpoints.hash_at(summary.height) {
                if summary.hash != *required {
                    return Err(QueueError::CheckpointMismatch(summary.height));
                }
            }
            Ok(())
        })?;

        // The stop itself may be a downloaded block; when it is, the batch
        // must land exactly on the configured hash.
        if last_height == range.stop.height()
            && summaries.last().map(|summary| summary.hash) != Some(range.stop.hash())
        {
            return Err(QueueError::CheckpointMismatch(range.stop.height()));
        }

        let accepted = summaries.len();
        let new_tail = summaries.last().map(|summary| (summary.height, summary.hash));
        self.headers.extend(summaries);
        self.tail = new_tail;
        Ok(accepted)
    }

    fn check_proof_of_work(&self, summary: &HeaderSummary) -> QueueResult<()> {
        let target = Target::from_compact(summary.bits);
        if target == Target::ZERO || target > self.max_target {
            return Err(QueueError::InvalidHeader(
                summary.height,
                format!("compact target {:x} out of range", summary.bits.to_consensus()),
            ));
        }
        if !target.is_met_by(summary.hash) {
            return Err(QueueError::BadProofOfWork(summary.height));
        }
        Ok(())
    }

    /// Remove and return up to `n` summaries from the front, for downstream
    /// block-body fetch. The append anchor is unaffected.
    pub fn dequeue(&mut self, n: usize) -> Vec<HeaderSummary> {
        let n = n.min(self.headers.len());
        self.headers.drain(..n).collect()
    }

    /// Truncate so that `tail_height == height`, discarding headers a
    /// disproven peer contributed. The target height must still be in the
    /// buffer (or be the seed itself).
    pub fn rollback_to(&mut self, height: u32) -> QueueResult<()> {
        let range = self.range.ok_or(QueueError::NotInitialized)?;

        if height == self.tail_height() {
            return Ok(());
        }

        if height == range.seed.height() {
            // Heights already dequeued cannot be rolled back over.
            let dequeued_below = match self.headers.front() {
                Some(front) => front.height > range.seed.height() + 1,
                None => self.tail_height() > range.seed.height(),
            };
            if dequeued_below {
                return Err(QueueError::RollbackBeyondBuffer(height));
            }
            self.headers.clear();
            self.tail = Some((range.seed.height(), range.seed.hash()));
            return Ok(());
        }

        let front_height = match self.headers.front() {
            Some(front) => front.height,
            None => return Err(QueueError::RollbackBeyondBuffer(height)),
        };
        if height < front_height || height > self.tail_height() {
            return Err(QueueError::RollbackBeyondBuffer(height));
        }

        let keep = (height - front_height + 1) as usize;
        self.headers.truncate(keep);
        let new_tail = self.headers.back().map(|summary| (summary.height, summary.hash));
        self.tail = new_tail;
        Ok(())
    }

    /// True once the tail has reached the stop height.
    pub fn is_full(&self) -> bool {
        match self.range {
            Some(range) => self.tail_height() == range.stop.height(),
            None => false,
        }
    }

    /// True while no header has been accepted (dequeuing does not make an
    /// advanced queue empty again for linkage purposes).
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Number of summaries currently buffered.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Height of the last accepted header, or the seed height before any
    /// append. Zero on an uninitialized queue.
    pub fn tail_height(&self) -> u32 {
        self.tail.map(|(height, _)| height).unwrap_or(0)
    }

    /// Hash of the last accepted header (the seed hash before any append).
    pub fn tail_hash(&self) -> Option<BlockHash> {
        self.tail.map(|(_, hash)| hash)
    }

    /// The buffered hash at `height`, if that height is currently in the
    /// buffer.
    pub fn hash_at(&self, height: u32) -> Option<BlockHash> {
        let front = self.headers.front()?.height;
        if height < front {
            return None;
        }
        self.headers.get((height - front) as usize).map(|summary| summary.hash)
    }

    /// The seed this queue builds on, once initialized.
    pub fn seed(&self) -> Option<Checkpoint> {
        self.range.map(|range| range.seed)
    }

    /// The stop checkpoint bounding the range, once initialized.
    pub fn stop(&self) -> Option<Checkpoint> {
        self.range.map(|range| range.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mine_chain, seed_checkpoint};
    use bitcoin::hashes::Hash;
    use bitcoin::CompactTarget;

    const NET: Network = Network::Regtest;

    fn queue_for(stop: Checkpoint) -> HeaderQueue {
        let mut queue = HeaderQueue::new(CheckpointSet::empty(), NET);
        queue.initialize(seed_checkpoint(), stop).unwrap();
        queue
    }

    fn snapshot(queue: &HeaderQueue) -> (u32, Option<BlockHash>, Vec<HeaderSummary>) {
        (queue.tail_height(), queue.tail_hash(), queue.headers.iter().copied().collect())
    }

    #[test]
    fn test_initialize_once() {
        let seed = seed_checkpoint();
        let stop = Checkpoint::new(10, BlockHash::from_byte_array([2u8; 32]));
        let mut queue = HeaderQueue::new(CheckpointSet::empty(), NET);

        queue.initialize(seed, stop).unwrap();
        assert_eq!(queue.tail_height(), seed.height());
        assert_eq!(queue.tail_hash(), Some(seed.hash()));
        assert_eq!(queue.initialize(seed, stop), Err(QueueError::AlreadyInitialized));
    }

    #[test]
    fn test_enqueue_before_initialize_fails() {
        let mut queue = HeaderQueue::new(CheckpointSet::empty(), NET);
        let batch = mine_chain(BlockHash::all_zeros(), 1);
        assert_eq!(queue.enqueue(&batch), Err(QueueError::NotInitialized));
    }

    #[test]
    fn test_contiguous_append() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 5);
        let stop = Checkpoint::new(5, batch[4].block_hash());
        let mut queue = queue_for(stop);

        assert_eq!(queue.enqueue(&batch), Ok(5));
        assert_eq!(queue.tail_height(), 5);
        assert!(queue.is_full());
        for (i, expected) in batch.iter().enumerate() {
            assert_eq!(queue.hash_at(i as u32 + 1), Some(expected.block_hash()));
        }
    }

    #[test]
    fn test_batch_is_atomic_on_broken_linkage() {
        let seed = seed_checkpoint();
        let good = mine_chain(seed.hash(), 4);
        let stop = Checkpoint::new(100, BlockHash::from_byte_array([3u8; 32]));
        let mut queue = queue_for(stop);
        queue.enqueue(&good[..2]).unwrap();
        let before = snapshot(&queue);

        // Batch continues from the tail but breaks internally.
        let mut bad = good[2..].to_vec();
        bad[1].prev_blockhash = BlockHash::from_byte_array([0xAA; 32]);
        assert_eq!(queue.enqueue(&bad), Err(QueueError::DiscontinuousHeight(4)));
        assert_eq!(snapshot(&queue), before);
    }

    #[test]
    fn test_unanchored_batch_rejected() {
        let seed = seed_checkpoint();
        let stop = Checkpoint::new(100, BlockHash::from_byte_array([3u8; 32]));
        let mut queue = queue_for(stop);

        let stray = mine_chain(BlockHash::from_byte_array([0x55; 32]), 2);
        assert_eq!(queue.enqueue(&stray), Err(QueueError::DiscontinuousHeight(1)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_bad_proof_of_work_rejected() {
        let seed = seed_checkpoint();
        let mut batch = mine_chain(seed.hash(), 2);
        // An impossibly hard target the mined hash cannot meet.
        batch[1].bits = CompactTarget::from_consensus(0x1d00ffff);
        let stop = Checkpoint::new(100, BlockHash::from_byte_array([3u8; 32]));
        let mut queue = queue_for(stop);

        assert_eq!(queue.enqueue(&batch), Err(QueueError::BadProofOfWork(2)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_malformed_target_rejected() {
        let seed = seed_checkpoint();
        let mut batch = mine_chain(seed.hash(), 1);
        batch[0].bits = CompactTarget::from_consensus(0);
        let stop = Checkpoint::new(100, BlockHash::from_byte_array([3u8; 32]));
        let mut queue = queue_for(stop);

        assert!(matches!(queue.enqueue(&batch), Err(QueueError::InvalidHeader(1, _))));
    }

    #[test]
    fn test_checkpoint_agreement() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 6);
        let checkpoints =
            CheckpointSet::new(vec![Checkpoint::new(4, batch[3].block_hash())]).unwrap();
        let stop = Checkpoint::new(6, batch[5].block_hash());

        let mut queue = HeaderQueue::new(checkpoints, NET);
        queue.initialize(seed, stop).unwrap();
        assert_eq!(queue.enqueue(&batch), Ok(6));
        assert!(queue.is_full());
    }

    #[test]
    fn test_checkpoint_mismatch_rejected() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 6);
        let checkpoints = CheckpointSet::new(vec![Checkpoint::new(
            4,
            BlockHash::from_byte_array([0x77; 32]),
        )])
        .unwrap();
        let stop = Checkpoint::new(6, batch[5].block_hash());

        let mut queue = HeaderQueue::new(checkpoints, NET);
        queue.initialize(seed, stop).unwrap();
        assert_eq!(queue.enqueue(&batch), Err(QueueError::CheckpointMismatch(4)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stop_hash_must_match() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 3);
        let stop = Checkpoint::new(3, BlockHash::from_byte_array([0x66; 32]));
        let mut queue = queue_for(stop);

        assert_eq!(queue.enqueue(&batch), Err(QueueError::CheckpointMismatch(3)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_terminal_bound() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 4);
        let stop = Checkpoint::new(3, batch[2].block_hash());
        let mut queue = queue_for(stop);

        assert_eq!(queue.enqueue(&batch), Err(QueueError::StopExceeded(3)));
        assert_eq!(queue.enqueue(&batch[..3]), Ok(3));
        assert!(queue.is_full());
    }

    #[test]
    fn test_dequeue_preserves_append_anchor() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 6);
        let stop = Checkpoint::new(6, batch[5].block_hash());
        let mut queue = queue_for(stop);
        queue.enqueue(&batch[..4]).unwrap();

        let drained = queue.dequeue(3);
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].height, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.tail_height(), 4);

        // Remainder is untouched and appends still anchor at the tail.
        assert_eq!(queue.hash_at(4), Some(batch[3].block_hash()));
        assert_eq!(queue.enqueue(&batch[4..]), Ok(2));
        assert!(queue.is_full());
    }

    #[test]
    fn test_dequeue_all_keeps_anchor() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 4);
        let stop = Checkpoint::new(4, batch[3].block_hash());
        let mut queue = queue_for(stop);
        queue.enqueue(&batch[..2]).unwrap();

        assert_eq!(queue.dequeue(10).len(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.tail_height(), 2);
        assert_eq!(queue.enqueue(&batch[2..]), Ok(2));
        assert!(queue.is_full());
    }

    #[test]
    fn test_rollback_truncates_tail() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 5);
        let stop = Checkpoint::new(100, BlockHash::from_byte_array([3u8; 32]));
        let mut queue = queue_for(stop);
        queue.enqueue(&batch).unwrap();

        queue.rollback_to(3).unwrap();
        assert_eq!(queue.tail_height(), 3);
        assert_eq!(queue.tail_hash(), Some(batch[2].block_hash()));
        assert_eq!(queue.len(), 3);

        // The discarded suffix can be re-appended.
        assert_eq!(queue.enqueue(&batch[3..]), Ok(2));
        assert_eq!(queue.tail_height(), 5);
    }

    #[test]
    fn test_rollback_to_seed() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 3);
        let stop = Checkpoint::new(100, BlockHash::from_byte_array([3u8; 32]));
        let mut queue = queue_for(stop);
        queue.enqueue(&batch).unwrap();

        queue.rollback_to(seed.height()).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.tail_hash(), Some(seed.hash()));
        assert_eq!(queue.enqueue(&batch), Ok(3));
    }

    #[test]
    fn test_rollback_below_dequeued_region_fails() {
        let seed = seed_checkpoint();
        let batch = mine_chain(seed.hash(), 5);
        let stop = Checkpoint::new(100, BlockHash::from_byte_array([3u8; 32]));
        let mut queue = queue_for(stop);
        queue.enqueue(&batch).unwrap();
        queue.dequeue(2);

        assert_eq!(queue.rollback_to(1), Err(QueueError::RollbackBeyondBuffer(1)));
        assert_eq!(queue.rollback_to(seed.height()), Err(QueueError::RollbackBeyondBuffer(0)));
        assert_eq!(queue.rollback_to(4), Ok(()));
        assert_eq!(queue.tail_height(), 4);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let seed = seed_checkpoint();
        let stop = Checkpoint::new(100, BlockHash::from_byte_array([3u8; 32]));
        let mut queue = queue_for(stop);
        let before = snapshot(&queue);
        assert_eq!(queue.enqueue(&[]), Ok(0));
        assert_eq!(snapshot(&queue), before);
    }
}
