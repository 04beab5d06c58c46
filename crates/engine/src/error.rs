use bridge_common::abi::AbiError;
use bridge_common::crypto::CryptoError;
use bridge_common::merkle::MerkleError;
use bridge_common::types::Address;
use bridge_store::StoreError;

use crate::transport::TransportError;

/// Classified errors surfaced to the embedding consensus layer.
///
/// Ingress paths (gossip votes, anchored logs) never propagate these upward;
/// they log and drop. Consensus-invoked hooks return them and let the caller
/// decide whether to retry on the next block or epoch.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Store or RPC persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Signature decode or aggregation failure; indicates corrupted vote data.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("merkle error: {0}")]
    Merkle(#[from] MerkleError),

    /// A candidate lacks quorum. Handled inside `commitment()`, never
    /// surfaced as a failure.
    #[error("quorum not reached for commitment message")]
    QuorumNotReached,

    /// Vote from an address outside the current validator set.
    #[error("validator {0} is not among the active validator set")]
    NotAValidator(Address),

    /// No proof and no covering accepted commitment for the event.
    #[error("no proof or covering commitment for state sync {0}")]
    NotFound(u64),

    /// Malformed log, gossip message, or transaction input.
    #[error("decode error: {0}")]
    Decode(String),

    /// An accepted range cannot be re-materialized from stored events.
    #[error("missing state sync events for accepted range [{from}, {to}]: found {found}")]
    MissingStateSyncEvents { from: u64, to: u64, found: usize },

    /// The system-state read during an epoch change failed.
    #[error("system state read failed: {0}")]
    SystemState(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Event tracker startup failure.
    #[error("event tracker error: {0}")]
    Tracker(String),
}

impl From<AbiError> for BridgeError {
    fn from(e: AbiError) -> Self {
        BridgeError::Decode(e.to_string())
    }
}
