//! Local-chain collaborators: checkpoints, block locators, and the query
//! interface to the persisted blockchain.

pub mod checkpoints;
pub mod locator;
pub mod query;

pub use checkpoints::{Checkpoint, CheckpointSet};
pub use locator::sync_locator;
pub use query::ChainQuery;
