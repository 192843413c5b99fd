//! Block locator construction for `getheaders`.
//!
//! A locator is a sparse list of block ids, densest at our tip, that lets a
//! peer find the latest point of agreement with its own chain. During header
//! sync the tip is the shared queue's tail and the list bottoms out at the
//! seed, the newest block the local chain already holds.

use bitcoin::BlockHash;

use crate::sync::HeaderQueue;

/// Entries included back-to-back before the step starts doubling.
const DENSE_ENTRIES: usize = 10;

/// Upper bound on locator length.
const MAX_ENTRIES: usize = 64;

/// Build a locator for the queue's current state: the tail first, dense for
/// the most recent headers, then exponentially sparser, ending at the seed.
///
/// Returns an empty locator if the queue was never initialized.
pub fn sync_locator(queue: &HeaderQueue) -> Vec<BlockHash> {
    let Some(seed) = queue.seed() else {
        return Vec::new();
    };

    let mut locator = Vec::new();
    let mut height = queue.tail_height();
    let mut step = 1u32;

    while height > seed.height() && locator.len() < MAX_ENTRIES - 1 {
        match queue.hash_at(height) {
            Some(hash) => locator.push(hash),
            // Below the buffered window (drained by dequeue); the seed entry
            // below still anchors the locator.
            None => break,
        }

        if locator.len() >= DENSE_ENTRIES {
            step = step.saturating_mul(2);
        }
        height = height.saturating_sub(step).max(seed.height());
    }

    locator.push(seed.hash());
    locator
}
