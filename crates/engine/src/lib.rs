//! # Bridge Engine Crate
//!
//! The state-sync commitment engine: ingests numbered events from an
//! anchoring chain, aggregates contiguous ranges into BLS quorum-signed
//! Merkle commitments, and serves per-event inclusion proofs once a
//! commitment is accepted on the local chain.
//!
//! ```text
//!  anchoring chain ──eth_getLogs──▶ EventTracker ──add_log──▶ ┌──────────────────┐
//!                                                             │ CommitmentManager │
//!  gossip bus ◀──votes──▶ BridgeTransport ◀──────────────────▶│  (epoch state)    │
//!                                                             └────────┬─────────┘
//!  consensus ──post_epoch / post_block / commitment / proof────────────┘
//!                                   │
//!                                   ▼
//!                              BridgeStore (LMDB)
//! ```
//!
//! ## Modules
//! - `manager`: the commitment manager (the orchestrator)
//! - `tracker`: anchoring-chain JSON-RPC log poller
//! - `transport`: gossip bus abstraction, in-process hub, no-op variant
//! - `config`: engine configuration
//! - `types`: consensus-facing request types and collaborator traits
//! - `error`: classified errors

pub mod config;
pub mod error;
pub mod manager;
pub mod tracker;
pub mod transport;
pub mod types;

use std::sync::Arc;

use bridge_common::types::{CommitmentMessageSigned, StateSyncProof};

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use manager::CommitmentManager;
pub use tracker::{EthLog, EventTracker, LogSubscriber, TrackerConfig};
pub use transport::{BridgeTransport, GossipHub, MessageHandler, NoopTransport, TransportError};
pub use types::{BlockTx, FinalizedBlock, PostBlockRequest, PostEpochRequest, SystemStateProvider};

/// The capability set consensus holds on the state-sync workflow.
///
/// [`CommitmentManager`] is the real implementation; [`NoopBridge`] stands in
/// when the bridge is disabled.
pub trait StateSyncBridge: Send + Sync {
    /// Starts background activities (event tracker, gossip subscription).
    /// Partial startup is unwound on failure.
    fn init(self: Arc<Self>) -> Result<(), BridgeError>;

    /// Signals shutdown; spawned activities stop.
    fn close(&self);

    /// The largest pending commitment with a quorum aggregate signature, if
    /// any. Lack of quorum is not an error.
    fn commitment(&self) -> Result<Option<CommitmentMessageSigned>, BridgeError>;

    /// The inclusion proof for event `id`, rebuilding it from the covering
    /// accepted commitment when necessary.
    fn state_sync_proof(&self, id: u64) -> Result<StateSyncProof, BridgeError>;

    /// Finalized-block hook: detects commitment submissions and materializes
    /// proofs.
    fn post_block(&self, req: &PostBlockRequest) -> Result<(), BridgeError>;

    /// Epoch-change hook: installs the new validator set and window start.
    fn post_epoch(&self, req: &PostEpochRequest) -> Result<(), BridgeError>;
}

/// Bridge-disabled manager: every operation succeeds with an empty result
/// and nothing runs in the background.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBridge;

impl StateSyncBridge for NoopBridge {
    fn init(self: Arc<Self>) -> Result<(), BridgeError> {
        Ok(())
    }

    fn close(&self) {}

    fn commitment(&self) -> Result<Option<CommitmentMessageSigned>, BridgeError> {
        Ok(None)
    }

    fn state_sync_proof(&self, id: u64) -> Result<StateSyncProof, BridgeError> {
        Err(BridgeError::NotFound(id))
    }

    fn post_block(&self, _req: &PostBlockRequest) -> Result<(), BridgeError> {
        Ok(())
    }

    fn post_epoch(&self, _req: &PostEpochRequest) -> Result<(), BridgeError> {
        Ok(())
    }
}
