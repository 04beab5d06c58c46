use std::sync::Arc;

use bridge_common::types::Address;
use bridge_common::validator::ValidatorSet;

use crate::error::BridgeError;

/// Read access to the local chain's bridge system state.
///
/// `next_committed_index` is the first event id not yet accepted on-chain;
/// every commitment window starts there.
pub trait SystemStateProvider: Send + Sync {
    fn next_committed_index(&self) -> Result<u64, BridgeError>;
}

/// Epoch-change notification from consensus.
#[derive(Clone)]
pub struct PostEpochRequest {
    pub new_epoch_id: u64,
    /// The new epoch's frozen validator set.
    pub validator_set: Arc<ValidatorSet>,
    /// Handle for reading the next committed index at the epoch boundary.
    pub system_state: Arc<dyn SystemStateProvider>,
}

/// Finalized-block notification from consensus.
#[derive(Debug, Clone)]
pub struct PostBlockRequest {
    pub block: FinalizedBlock,
}

/// The slice of a finalized block the engine inspects.
#[derive(Debug, Clone, Default)]
pub struct FinalizedBlock {
    pub number: u64,
    pub transactions: Vec<BlockTx>,
}

/// Transaction view: target and raw calldata are all the engine needs to
/// spot a commitment submission.
#[derive(Debug, Clone)]
pub struct BlockTx {
    pub to: Option<Address>,
    pub input: Vec<u8>,
}
