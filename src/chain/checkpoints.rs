//! Configured checkpoints: (height, hash) pairs treated as axiomatic during
//! header sync.

use std::ops::RangeInclusive;

use bitcoin::BlockHash;

use crate::error::ConfigError;

/// A block the configuration asserts exists at a given height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    height: u32,
    hash: BlockHash,
}

impl Checkpoint {
    pub fn new(height: u32, hash: BlockHash) -> Self {
        Self {
            height,
            hash,
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }
}

/// Immutable, height-sorted checkpoint list.
///
/// The constructor accepts input in any order and sorts it; duplicate heights
/// are a configuration error, whether or not the hashes agree.
#[derive(Debug, Clone, Default)]
pub struct CheckpointSet {
    // sorted by height, lowest first
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointSet {
    /// Build a checkpoint set, sorting the input ascending by height.
    ///
    /// Sorting an already-sorted valid list is the identity. Two entries at
    /// the same height are rejected: as [`ConfigError::DuplicateCheckpoint`]
    /// when the hashes agree, [`ConfigError::ContradictoryCheckpoint`] when
    /// they do not.
    pub fn new(mut checkpoints: Vec<Checkpoint>) -> Result<Self, ConfigError> {
        checkpoints.sort_by_key(|checkpoint| checkpoint.height);

        for pair in checkpoints.windows(2) {
            if pair[0].height == pair[1].height {
                return Err(if pair[0].hash == pair[1].hash {
                    ConfigError::DuplicateCheckpoint(pair[0].height)
                } else {
                    ConfigError::ContradictoryCheckpoint(pair[0].height)
                });
            }
        }

        Ok(Self {
            checkpoints,
        })
    }

    /// An empty set; every height is unconstrained.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The highest configured checkpoint, if any.
    pub fn highest(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// The asserted hash at `height`, if one is configured.
    pub fn hash_at(&self, height: u32) -> Option<&BlockHash> {
        self.checkpoints
            .binary_search_by_key(&height, |checkpoint| checkpoint.height)
            .ok()
            .map(|index| &self.checkpoints[index].hash)
    }

    /// Checkpoints whose heights fall within the given range.
    pub fn in_range(&self, range: RangeInclusive<u32>) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.iter().filter(move |checkpoint| range.contains(&checkpoint.height))
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn hash(byte: u8) -> BlockHash {
        BlockHash::from_byte_array([byte; 32])
    }

    #[test]
    fn test_sorts_unordered_input() {
        let set = CheckpointSet::new(vec![
            Checkpoint::new(2000, hash(2)),
            Checkpoint::new(500, hash(1)),
            Checkpoint::new(9000, hash(3)),
        ])
        .unwrap();

        assert_eq!(set.highest().unwrap().height(), 9000);
        assert_eq!(set.hash_at(500), Some(&hash(1)));
        assert_eq!(set.hash_at(501), None);
    }

    #[test]
    fn test_sorted_input_is_identity() {
        let input = vec![
            Checkpoint::new(100, hash(1)),
            Checkpoint::new(200, hash(2)),
            Checkpoint::new(300, hash(3)),
        ];
        let set = CheckpointSet::new(input.clone()).unwrap();
        let heights: Vec<u32> = set.in_range(0..=u32::MAX).map(|c| c.height()).collect();
        assert_eq!(heights, vec![100, 200, 300]);
        assert_eq!(set.len(), input.len());
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = CheckpointSet::new(vec![
            Checkpoint::new(100, hash(1)),
            Checkpoint::new(100, hash(1)),
        ])
        .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateCheckpoint(100));
    }

    #[test]
    fn test_contradiction_rejected() {
        let err = CheckpointSet::new(vec![
            Checkpoint::new(100, hash(1)),
            Checkpoint::new(100, hash(2)),
        ])
        .unwrap_err();
        assert_eq!(err, ConfigError::ContradictoryCheckpoint(100));
    }

    #[test]
    fn test_range_iteration() {
        let set = CheckpointSet::new(vec![
            Checkpoint::new(10, hash(1)),
            Checkpoint::new(20, hash(2)),
            Checkpoint::new(30, hash(3)),
            Checkpoint::new(40, hash(4)),
        ])
        .unwrap();

        let heights: Vec<u32> = set.in_range(15..=35).map(|c| c.height()).collect();
        assert_eq!(heights, vec![20, 30]);
    }

    #[test]
    fn test_empty_set() {
        let set = CheckpointSet::empty();
        assert!(set.is_empty());
        assert!(set.highest().is_none());
        assert_eq!(set.hash_at(0), None);
    }
}
