//! # Commitment Manager
//!
//! The orchestrator of the state-sync workflow: saving and querying events,
//! building and signing commitments, collecting votes into a quorum
//! aggregate, and materializing inclusion proofs once a commitment lands in
//! a finalized block.
//!
//! ## Epoch state
//!
//! One `parking_lot::RwLock` guards the per-epoch fields: epoch id,
//! validator set, next committed index, and the pending-commitment list.
//! The lock is never held across an `.await`; the async edges of the engine
//! (event tracker, gossip delivery) call back into synchronous entry points.
//!
//! ## Entry points and threads
//!
//! | Caller | Entry points |
//! |---|---|
//! | consensus thread | `post_epoch`, `post_block`, `commitment`, `state_sync_proof` |
//! | event tracker task | `add_log` |
//! | gossip dispatch | vote handler registered in `init` |
//!
//! Ingress paths (logs, votes) log and drop their failures; consensus hooks
//! return classified [`BridgeError`]s.
//!
//! ## Pending-commitment window
//!
//! Every window starts at `next_committed_index`, so pending commitments
//! within an epoch are nested: a later build only extends `to_id`. The
//! largest pending commitment with a quorum wins at submission time.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use bridge_common::abi;
use bridge_common::crypto::{self, BlsKey};
use bridge_common::merkle::MerkleTree;
use bridge_common::types::{
    Address, Bitmap, CommitmentMessage, CommitmentMessageSigned, Hash32, MessageSignature,
    StateSyncProof, TransportMessage,
};
use bridge_common::validator::ValidatorSet;
use bridge_store::{BridgeStore, StoreError};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::tracker::{EthLog, EventTracker, LogSubscriber, TrackerConfig};
use crate::transport::BridgeTransport;
use crate::types::{FinalizedBlock, PostBlockRequest, PostEpochRequest};
use crate::StateSyncBridge;

// ════════════════════════════════════════════════════════════════════════════
// PENDING COMMITMENT
// ════════════════════════════════════════════════════════════════════════════

/// A commitment built this epoch, awaiting quorum and submission.
#[derive(Debug, Clone)]
struct PendingCommitment {
    epoch: u64,
    from_id: u64,
    to_id: u64,
    merkle_root: Hash32,
}

impl PendingCommitment {
    fn message(&self) -> CommitmentMessage {
        CommitmentMessage::new(self.merkle_root, self.from_id, self.to_id)
    }

    fn digest(&self) -> Hash32 {
        self.message().digest()
    }
}

/// Per-epoch mutable fields, all guarded by one rw-lock.
struct EpochState {
    epoch: u64,
    /// `None` until the first `post_epoch`; votes arriving earlier are
    /// dropped because there is no set to validate them against.
    validator_set: Option<Arc<ValidatorSet>>,
    next_committed_index: u64,
    pending: Vec<PendingCommitment>,
}

// ════════════════════════════════════════════════════════════════════════════
// COMMITMENT MANAGER
// ════════════════════════════════════════════════════════════════════════════

/// Orchestrates event ingestion, vote collection, commitment construction
/// and proof materialization. See the module docs for the thread model.
pub struct CommitmentManager {
    config: BridgeConfig,
    store: BridgeStore,
    key: Arc<BlsKey>,
    transport: Arc<dyn BridgeTransport>,
    state: RwLock<EpochState>,
    shutdown: Arc<Notify>,
    tracker: Mutex<Option<EventTracker>>,
}

impl CommitmentManager {
    pub fn new(
        config: BridgeConfig,
        store: BridgeStore,
        key: Arc<BlsKey>,
        transport: Arc<dyn BridgeTransport>,
    ) -> Self {
        Self {
            config,
            store,
            key,
            transport,
            state: RwLock::new(EpochState {
                epoch: 0,
                validator_set: None,
                next_committed_index: 0,
                pending: Vec::new(),
            }),
            shutdown: Arc::new(Notify::new()),
            tracker: Mutex::new(None),
        }
    }

    /// The validator address this engine signs with.
    pub fn address(&self) -> Address {
        self.key.address()
    }

    // ------------------------
    // vote ingress
    // ------------------------

    /// Raw gossip delivery: decode, then record. Failures are logged and
    /// dropped; gossip is untrusted input.
    fn on_transport_payload(&self, payload: &[u8]) {
        let msg: TransportMessage = match bincode::deserialize(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "failed to deliver vote, invalid message");
                return;
            }
        };
        if let Err(e) = self.save_vote(&msg) {
            warn!(error = %e, "failed to deliver vote");
        }
    }

    /// Records a peer vote for later quorum checks and aggregation.
    ///
    /// Stale epochs are dropped silently; unknown senders are rejected. The
    /// BLS signature is *not* verified here. A forged one cannot survive
    /// aggregate verification on the anchoring side, and screening happens
    /// again at aggregation time.
    fn save_vote(&self, msg: &TransportMessage) -> Result<(), BridgeError> {
        let (epoch, validator_set) = {
            let st = self.state.read();
            (st.epoch, st.validator_set.clone())
        };

        let Some(validator_set) = validator_set else {
            // epoch metadata not installed yet
            return Ok(());
        };
        if msg.epoch < epoch {
            return Ok(());
        }
        if !validator_set.includes(&msg.node_id) {
            return Err(BridgeError::NotAValidator(msg.node_id));
        }

        let vote = MessageSignature {
            from: msg.node_id,
            signature: msg.signature.clone(),
        };
        let signatures = self.store.insert_message_vote(msg.epoch, &msg.hash, &vote)?;

        info!(
            hash = %msg.hash,
            sender = %msg.node_id,
            signatures,
            "vote delivered"
        );
        Ok(())
    }

    // ------------------------
    // commitment build
    // ------------------------

    /// Builds a new commitment over `[next_committed_index, …]` if enough
    /// events are available, signs it, records the self-vote and gossips it.
    ///
    /// Holds the epoch write lock for the whole body so concurrent builds
    /// cannot race into duplicate self-votes for the same window.
    fn build_commitment(&self) -> Result<(), BridgeError> {
        let mut st = self.state.write();
        if st.validator_set.is_none() {
            return Ok(());
        }
        let epoch = st.epoch;
        let from_id = st.next_committed_index;

        let events = match self.store.get_state_sync_events_for_commitment(
            from_id,
            from_id + self.config.max_commitment_size - 1,
        ) {
            Ok(events) => events,
            // not enough events for even the minimum commitment
            Err(StoreError::NotEnoughStateSyncs { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let to_id = match events.last() {
            Some(last) => last.id,
            None => return Ok(()),
        };
        if st.pending.last().is_some_and(|p| p.to_id >= to_id) {
            // already built a commitment of this size, pending submission
            return Ok(());
        }

        let leaves: Vec<Hash32> = events.iter().map(|ev| ev.leaf_hash()).collect();
        let tree = MerkleTree::new(leaves)?;
        let message = CommitmentMessage::new(tree.root(), from_id, to_id);
        let digest = message.digest();

        let signature = self.key.sign(&digest);
        let self_vote = MessageSignature {
            from: self.key.address(),
            signature: signature.clone(),
        };
        self.store.insert_message_vote(epoch, &digest, &self_vote)?;

        self.multicast(TransportMessage {
            hash: digest,
            signature,
            node_id: self.key.address(),
            epoch,
        });

        debug!(from = from_id, to = to_id, epoch, "built commitment");
        st.pending.push(PendingCommitment {
            epoch,
            from_id,
            to_id,
            merkle_root: tree.root(),
        });
        Ok(())
    }

    /// Publishes a vote to the rest of the network. Best effort: encode or
    /// publish failures are logged and dropped.
    fn multicast(&self, msg: TransportMessage) {
        let payload = match bincode::serialize(&msg) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode bridge message");
                return;
            }
        };
        if let Err(e) = self.transport.publish(payload) {
            warn!(error = %e, "failed to gossip bridge message");
        }
    }

    // ------------------------
    // aggregation
    // ------------------------

    /// Aggregates the stored votes for one pending commitment, if they meet
    /// the epoch quorum.
    fn aggregate(
        &self,
        validator_set: &ValidatorSet,
        pending: &PendingCommitment,
    ) -> Result<CommitmentMessageSigned, BridgeError> {
        let digest = pending.digest();
        let votes = self.store.get_message_votes(pending.epoch, &digest)?;

        let mut contributions: Vec<(usize, Vec<u8>)> = Vec::new();
        let mut signers: HashSet<Address> = HashSet::new();

        for vote in votes {
            let Some(index) = validator_set.index_of(&vote.from) else {
                // vote does not belong to a validator of this epoch
                continue;
            };
            crypto::validate_signature_bytes(&vote.signature)?;
            contributions.push((index, vote.signature));
            signers.insert(vote.from);
        }

        if !validator_set.has_quorum(&signers) {
            return Err(BridgeError::QuorumNotReached);
        }

        // canonical bitmap order: sort contributions by validator index
        contributions.sort_by_key(|(index, _)| *index);

        let mut bitmap = Bitmap::new();
        let mut signatures: Vec<Vec<u8>> = Vec::new();
        let mut public_keys: Vec<Vec<u8>> = Vec::new();
        for (index, signature) in contributions {
            let Some(account) = validator_set.account_at(index) else {
                continue;
            };
            bitmap.set(index as u64);
            public_keys.push(account.bls_key.clone());
            signatures.push(signature);
        }

        let agg_signature = crypto::aggregate_signatures(&signatures)?;
        Ok(CommitmentMessageSigned {
            message: pending.message(),
            agg_signature,
            bitmap,
            public_keys,
        })
    }

    // ------------------------
    // proofs
    // ------------------------

    /// Builds and persists inclusion proofs for every event of an accepted
    /// commitment. Rebuilding over the same range is byte-identical.
    fn build_proofs(&self, message: &CommitmentMessage) -> Result<(), BridgeError> {
        debug!(
            from = message.from_id,
            to = message.to_id,
            "building proofs for commitment"
        );

        let events = self
            .store
            .get_state_sync_events_for_commitment(message.from_id, message.to_id)?;
        if events.len() as u64 != message.event_count() {
            return Err(BridgeError::MissingStateSyncEvents {
                from: message.from_id,
                to: message.to_id,
                found: events.len(),
            });
        }

        let leaves: Vec<Hash32> = events.iter().map(|ev| ev.leaf_hash()).collect();
        let tree = MerkleTree::new(leaves)?;

        let mut proofs = Vec::with_capacity(events.len());
        for (i, event) in events.into_iter().enumerate() {
            let proof = tree.generate_proof(i as u64)?;
            proofs.push(StateSyncProof { event, proof });
        }
        self.store.insert_state_sync_proofs(&proofs)?;
        Ok(())
    }

    fn find_commitment_tx(
        &self,
        block: &FinalizedBlock,
    ) -> Result<Option<CommitmentMessageSigned>, BridgeError> {
        let selector = abi::commit_selector();
        for tx in &block.transactions {
            if tx.to != Some(self.config.state_receiver) {
                continue;
            }
            if tx.input.len() < 4 || tx.input[..4] != selector {
                continue;
            }
            return Ok(Some(abi::decode_commit_input(&tx.input)?));
        }
        Ok(None)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LOG INGRESS
// ════════════════════════════════════════════════════════════════════════════

impl LogSubscriber for CommitmentManager {
    /// Saves a log delivered by the event tracker if it matches the state
    /// sync event ABI, then tries to extend the pending window.
    fn add_log(&self, log: &EthLog) {
        if log.address != self.config.state_sender {
            return;
        }
        if log.topics.first() != Some(&abi::state_sync_event_topic()) {
            return;
        }

        let data = match log.data_bytes() {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "could not decode state sync event payload");
                return;
            }
        };
        let event = match abi::decode_event_log(&log.topics, &data) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "could not decode state sync event");
                return;
            }
        };

        info!(
            id = event.id,
            block = log.block_number_u64(),
            "add state sync event"
        );

        if let Err(e) = self.store.insert_state_sync_event(&event) {
            error!(error = %e, "could not save state sync event");
            return;
        }
        if let Err(e) = self.build_commitment() {
            error!(
                error = %e,
                state_sync_id = event.id,
                "could not build a commitment on arrival of new state sync"
            );
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CONSENSUS-FACING CONTRACT
// ════════════════════════════════════════════════════════════════════════════

impl StateSyncBridge for CommitmentManager {
    /// Starts the event tracker and subscribes the vote handler. A failed
    /// subscribe unwinds the already-started tracker before returning.
    ///
    /// Both back-references handed out here are weak: the tracker and the
    /// transport hold capabilities on the manager, never ownership, so the
    /// manager (and its store) can still be dropped after `close()`.
    fn init(self: Arc<Self>) -> Result<(), BridgeError> {
        let subscriber: Arc<dyn LogSubscriber> = self.clone();
        let tracker = EventTracker::new(
            TrackerConfig {
                rpc_url: self.config.rpc_url.clone(),
                contract: self.config.state_sender,
                poll_interval: self.config.poll_interval,
                block_batch_size: self.config.block_batch_size,
                start_block: self.config.start_block,
                request_timeout: self.config.request_timeout,
            },
            self.store.clone(),
            Arc::downgrade(&subscriber),
            Arc::clone(&self.shutdown),
        );
        tracker
            .start()
            .map_err(|e| BridgeError::Tracker(format!("failed to init event tracker: {e}")))?;

        let weak = Arc::downgrade(&self);
        let subscribed = self.transport.subscribe(Box::new(move |payload| {
            if let Some(manager) = weak.upgrade() {
                manager.on_transport_payload(payload);
            }
        }));
        if let Err(e) = subscribed {
            tracker.stop();
            return Err(BridgeError::Tracker(format!(
                "failed to initialize state sync transport layer: {e}"
            )));
        }

        *self.tracker.lock() = Some(tracker);
        Ok(())
    }

    /// Signals shutdown; the tracker loop observes it and stops.
    fn close(&self) {
        if let Some(tracker) = self.tracker.lock().as_ref() {
            tracker.stop();
        }
        self.shutdown.notify_waiters();
    }

    /// The largest pending commitment that currently has a quorum aggregate,
    /// or `None`. A candidate without quorum is skipped, never an error.
    fn commitment(&self) -> Result<Option<CommitmentMessageSigned>, BridgeError> {
        let st = self.state.read();
        let Some(validator_set) = st.validator_set.as_ref() else {
            return Ok(None);
        };

        // last pending commitment is the largest one, scan from the end
        for pending in st.pending.iter().rev() {
            match self.aggregate(validator_set, pending) {
                Ok(signed) => return Ok(Some(signed)),
                Err(BridgeError::QuorumNotReached) => {
                    debug!(
                        from = pending.from_id,
                        to = pending.to_id,
                        "cannot submit commitment, quorum not reached"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// The stored proof for event `id`, rebuilding the covering accepted
    /// commitment's proofs first if they were never materialized (missed
    /// while syncing, or lost to a crash between acceptance and proof
    /// persistence).
    fn state_sync_proof(&self, id: u64) -> Result<StateSyncProof, BridgeError> {
        if let Some(proof) = self.store.get_state_sync_proof(id)? {
            return Ok(proof);
        }

        let signed = match self.store.get_commitment_for_state_sync(id) {
            Ok(signed) => signed,
            Err(StoreError::NoCommitmentForStateSync(_)) => {
                return Err(BridgeError::NotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        self.build_proofs(&signed.message)?;

        match self.store.get_state_sync_proof(id)? {
            Some(proof) => Ok(proof),
            None => Err(BridgeError::NotFound(id)),
        }
    }

    /// Scans the finalized block for a commitment submission. On a match:
    /// persist the signed commitment, materialize proofs for its exact
    /// range, then advance the window and drop pending commitments.
    fn post_block(&self, req: &PostBlockRequest) -> Result<(), BridgeError> {
        let Some(signed) = self.find_commitment_tx(&req.block)? else {
            // not an end-of-epoch block
            return Ok(());
        };

        self.store.insert_commitment_message(&signed)?;
        self.build_proofs(&signed.message)?;

        let mut st = self.state.write();
        st.next_committed_index = signed.message.to_id + 1;
        st.pending.clear();

        info!(
            from = signed.message.from_id,
            to = signed.message.to_id,
            block = req.block.number,
            "commitment accepted on chain"
        );
        Ok(())
    }

    /// Installs the new epoch: previous pending commitments and their votes
    /// are invalid under the changed validator set, so pending is discarded
    /// and a fresh build is attempted from the chain's next committed index.
    fn post_epoch(&self, req: &PostEpochRequest) -> Result<(), BridgeError> {
        {
            let mut st = self.state.write();
            st.pending.clear();
            st.validator_set = Some(Arc::clone(&req.validator_set));
            st.epoch = req.new_epoch_id;

            let next = req.system_state.next_committed_index()?;
            st.next_committed_index = next;
        }

        // keep the immediately-previous epoch's votes around for late
        // aggregation; anything older is unreachable
        if req.new_epoch_id >= 1 {
            if let Err(e) = self
                .store
                .cleanup_message_votes_before(req.new_epoch_id - 1)
            {
                warn!(error = %e, "failed to prune stale votes");
            }
        }

        info!(
            epoch = req.new_epoch_id,
            validators = req.validator_set.len(),
            "epoch installed"
        );

        // build a new commitment at the start of the epoch
        self.build_commitment()
    }
}

#[cfg(test)]
impl CommitmentManager {
    fn pending_len(&self) -> usize {
        self.state.read().pending.len()
    }

    fn next_committed_index(&self) -> u64 {
        self.state.read().next_committed_index
    }

    fn last_pending(&self) -> Option<(u64, u64, Hash32)> {
        self.state
            .read()
            .pending
            .last()
            .map(|p| (p.from_id, p.to_id, p.merkle_root))
    }
}
