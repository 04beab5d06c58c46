use std::time::Duration;

use bridge_common::types::Address;

/// Static configuration of the commitment engine.
///
/// Owned by the embedding consensus binary; the engine itself has no CLI or
/// environment surface.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Anchoring-chain contract that emits `StateSynced` logs.
    pub state_sender: Address,
    /// Local-chain contract that receives `commit(...)` transactions.
    pub state_receiver: Address,
    /// Anchoring-chain JSON-RPC endpoint polled by the event tracker.
    pub rpc_url: String,
    /// Upper bound on events per commitment; larger windows truncate.
    pub max_commitment_size: u64,
    /// Anchoring-chain block the tracker starts from on a fresh data dir.
    pub start_block: u64,
    /// Tracker poll cadence.
    pub poll_interval: Duration,
    /// Maximum anchoring blocks fetched per `eth_getLogs` call.
    pub block_batch_size: u64,
    /// Per-request RPC timeout.
    pub request_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(state_sender: Address, state_receiver: Address, rpc_url: impl Into<String>) -> Self {
        Self {
            state_sender,
            state_receiver,
            rpc_url: rpc_url.into(),
            max_commitment_size: 10,
            start_block: 0,
            poll_interval: Duration::from_secs(2),
            block_batch_size: 1000,
            request_timeout: Duration::from_secs(10),
        }
    }
}
