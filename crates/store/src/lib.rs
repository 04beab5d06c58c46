//! # Bridge Store Crate
//!
//! Durable collections behind the commitment engine, backed by a single
//! LMDB environment with one named database per collection. Every mutating
//! call commits its write transaction before returning.
//!
//! ## Databases
//!
//! Key formats are consensus-adjacent recovery state. Do not modify without
//! a data-directory migration.
//!
//! | Database | Key | Value |
//! |---|---|---|
//! | `events` | event id (u64 big-endian, 8 bytes) | bincode [`StateSyncEvent`] |
//! | `votes` | epoch (8 BE) ‖ digest (32) ‖ voter address (20) | raw signature bytes |
//! | `commitments` | range end `to_id` (8 BE) | bincode [`CommitmentMessageSigned`] |
//! | `proofs` | event id (8 BE) | bincode [`StateSyncProof`] |
//! | `meta` | fixed byte strings | accessor-specific |
//!
//! Big-endian keys make LMDB's lexicographic ordering numeric, so range
//! scans are a cursor walk from the start key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use tracing::debug;

use bridge_common::types::{
    Address, CommitmentMessageSigned, Hash32, MessageSignature, StateSyncEvent, StateSyncProof,
    MIN_COMMITMENT_SIZE,
};

/// LMDB map size. Events and proofs are small records; this leaves generous
/// headroom for long retention windows.
const MAP_SIZE: usize = 256 * 1024 * 1024;

const META_LAST_PROCESSED_BLOCK: &[u8] = b"last_processed_block";

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying LMDB failure.
    #[error("database error: {0}")]
    Db(#[from] lmdb::Error),

    /// A stored record failed to decode; indicates data corruption.
    #[error("stored record decode error: {0}")]
    Codec(#[from] bincode::Error),

    /// Filesystem failure while opening the environment.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The scanned window holds fewer events than a commitment needs.
    #[error("not enough state sync events in [{from}, {to}]: found {found}")]
    NotEnoughStateSyncs { from: u64, to: u64, found: usize },

    /// No accepted commitment covers the queried event id.
    #[error("no accepted commitment covers state sync {0}")]
    NoCommitmentForStateSync(u64),
}

// ════════════════════════════════════════════════════════════════════════════
// KEY HELPERS
// ════════════════════════════════════════════════════════════════════════════

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// `epoch ‖ digest ‖ from`: the full vote row key.
fn vote_key(epoch: u64, digest: &Hash32, from: &Address) -> [u8; 60] {
    let mut key = [0u8; 60];
    key[..8].copy_from_slice(&epoch.to_be_bytes());
    key[8..40].copy_from_slice(&digest.0);
    key[40..].copy_from_slice(from.as_bytes());
    key
}

/// `epoch ‖ digest`: prefix shared by all votes for one candidate.
fn vote_prefix(epoch: u64, digest: &Hash32) -> [u8; 40] {
    let mut prefix = [0u8; 40];
    prefix[..8].copy_from_slice(&epoch.to_be_bytes());
    prefix[8..].copy_from_slice(&digest.0);
    prefix
}

fn key_to_id(key: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

/// Collects the rows from `cursor.iter_from(key)` onward.
///
/// The `lmdb` crate's `iter_from` panics (via an internal `unwrap()`) when
/// there is no entry at or after `key` — e.g. an empty database, or a key
/// past the last entry. Both are ordinary, expected states here (a fresh
/// store, or a scan past the end of a range), so this runs the scan behind
/// `catch_unwind` and treats that panic as "no rows found".
fn collect_from<'txn, C: Cursor<'txn>>(cursor: &mut C, key: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        cursor
            .iter_from(key)
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect()
    }))
    .unwrap_or_default()
}

// ════════════════════════════════════════════════════════════════════════════
// BRIDGE STORE
// ════════════════════════════════════════════════════════════════════════════

/// Durable store shared by the commitment manager and the event tracker.
///
/// Cloneable handle; the environment is reference-counted and writers are
/// serialized by LMDB's single write transaction.
#[derive(Clone)]
pub struct BridgeStore {
    env: Arc<Environment>,
    env_path: PathBuf,
    db_events: Database,
    db_votes: Database,
    db_commitments: Database,
    db_proofs: Database,
    db_meta: Database,
}

impl BridgeStore {
    /// Opens (or creates) the environment at `path` with the named databases.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let p = path.as_ref();
        std::fs::create_dir_all(p)?;

        let env = Environment::new()
            .set_max_dbs(5)
            .set_map_size(MAP_SIZE)
            .open(p)?;

        let db_events = env.create_db(Some("events"), DatabaseFlags::empty())?;
        let db_votes = env.create_db(Some("votes"), DatabaseFlags::empty())?;
        let db_commitments = env.create_db(Some("commitments"), DatabaseFlags::empty())?;
        let db_proofs = env.create_db(Some("proofs"), DatabaseFlags::empty())?;
        let db_meta = env.create_db(Some("meta"), DatabaseFlags::empty())?;

        Ok(Self {
            env: Arc::new(env),
            env_path: p.to_path_buf(),
            db_events,
            db_votes,
            db_commitments,
            db_proofs,
            db_meta,
        })
    }

    pub fn path(&self) -> &Path {
        &self.env_path
    }

    // ------------------------
    // events
    // ------------------------

    /// Inserts a decoded event. Idempotent on `id`: re-inserting overwrites
    /// with the identical record.
    pub fn insert_state_sync_event(&self, event: &StateSyncEvent) -> Result<(), StoreError> {
        let blob = bincode::serialize(event)?;
        let mut wtxn = self.env.begin_rw_txn()?;
        wtxn.put(self.db_events, &id_key(event.id), &blob, WriteFlags::empty())?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_state_sync_event(&self, id: u64) -> Result<Option<StateSyncEvent>, StoreError> {
        let rtxn = self.env.begin_ro_txn()?;
        match rtxn.get(self.db_events, &id_key(id)) {
            Ok(v) => Ok(Some(bincode::deserialize(v)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Events with ids in `[from, to]`, ascending, truncated at the first
    /// gap. Fails with [`StoreError::NotEnoughStateSyncs`] when fewer than
    /// the minimum commitment size are available; the manager treats that
    /// as "decline to build", not as a fault.
    pub fn get_state_sync_events_for_commitment(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<StateSyncEvent>, StoreError> {
        let rtxn = self.env.begin_ro_txn()?;
        let mut cursor = rtxn.open_ro_cursor(self.db_events)?;

        let mut events: Vec<StateSyncEvent> = Vec::new();
        let mut expected = from;
        for (key, val) in collect_from(&mut cursor, &id_key(from)) {
            let id = match key_to_id(&key) {
                Some(id) => id,
                None => continue,
            };
            if id > to || id != expected {
                break;
            }
            events.push(bincode::deserialize(&val)?);
            expected = id + 1;
        }

        if (events.len() as u64) < MIN_COMMITMENT_SIZE {
            return Err(StoreError::NotEnoughStateSyncs {
                from,
                to,
                found: events.len(),
            });
        }
        Ok(events)
    }

    // ------------------------
    // votes
    // ------------------------

    /// Upserts a vote keyed by `(epoch, digest, from)` and returns the number
    /// of distinct votes now recorded for `(epoch, digest)`.
    pub fn insert_message_vote(
        &self,
        epoch: u64,
        digest: &Hash32,
        vote: &MessageSignature,
    ) -> Result<usize, StoreError> {
        let key = vote_key(epoch, digest, &vote.from);
        let prefix = vote_prefix(epoch, digest);

        let mut wtxn = self.env.begin_rw_txn()?;
        wtxn.put(self.db_votes, &key, &vote.signature, WriteFlags::empty())?;

        let count = {
            let mut cursor = wtxn.open_ro_cursor(self.db_votes)?;
            collect_from(&mut cursor, &prefix)
                .into_iter()
                .take_while(|(k, _)| k.starts_with(&prefix))
                .count()
        };
        wtxn.commit()?;
        Ok(count)
    }

    /// All votes recorded for `(epoch, digest)`, in voter-address order.
    pub fn get_message_votes(
        &self,
        epoch: u64,
        digest: &Hash32,
    ) -> Result<Vec<MessageSignature>, StoreError> {
        let prefix = vote_prefix(epoch, digest);
        let rtxn = self.env.begin_ro_txn()?;
        let mut cursor = rtxn.open_ro_cursor(self.db_votes)?;

        let mut votes = Vec::new();
        for (key, val) in collect_from(&mut cursor, &prefix) {
            if !key.starts_with(&prefix) {
                break;
            }
            let mut from = [0u8; 20];
            from.copy_from_slice(&key[40..]);
            votes.push(MessageSignature {
                from: Address::from_bytes(from),
                signature: val,
            });
        }
        Ok(votes)
    }

    /// Deletes every vote row whose epoch is strictly below `epoch`.
    /// Returns the number of rows removed.
    pub fn cleanup_message_votes_before(&self, epoch: u64) -> Result<usize, StoreError> {
        let threshold = epoch.to_be_bytes();
        let mut wtxn = self.env.begin_rw_txn()?;

        let stale: Vec<Vec<u8>> = {
            let mut cursor = wtxn.open_ro_cursor(self.db_votes)?;
            cursor
                .iter()
                .map(|(k, _)| k)
                .take_while(|k| k.len() >= 8 && k[..8] < threshold[..])
                .map(|k| k.to_vec())
                .collect()
        };
        for key in &stale {
            wtxn.del(self.db_votes, key, None)?;
        }
        wtxn.commit()?;

        if !stale.is_empty() {
            debug!(removed = stale.len(), before_epoch = epoch, "pruned stale votes");
        }
        Ok(stale.len())
    }

    // ------------------------
    // commitments
    // ------------------------

    /// Persists an accepted commitment, keyed by its range end.
    pub fn insert_commitment_message(
        &self,
        signed: &CommitmentMessageSigned,
    ) -> Result<(), StoreError> {
        let blob = bincode::serialize(signed)?;
        let mut wtxn = self.env.begin_rw_txn()?;
        wtxn.put(
            self.db_commitments,
            &id_key(signed.message.to_id),
            &blob,
            WriteFlags::empty(),
        )?;
        wtxn.commit()?;
        Ok(())
    }

    /// The accepted commitment whose range covers `id`: the first entry with
    /// `to_id ≥ id`, accepted iff its `from_id ≤ id`.
    pub fn get_commitment_for_state_sync(
        &self,
        id: u64,
    ) -> Result<CommitmentMessageSigned, StoreError> {
        let rtxn = self.env.begin_ro_txn()?;
        let mut cursor = rtxn.open_ro_cursor(self.db_commitments)?;

        if let Some((_, val)) = collect_from(&mut cursor, &id_key(id)).into_iter().next() {
            let signed: CommitmentMessageSigned = bincode::deserialize(&val)?;
            if signed.message.from_id <= id {
                return Ok(signed);
            }
        }
        Err(StoreError::NoCommitmentForStateSync(id))
    }

    // ------------------------
    // proofs
    // ------------------------

    /// Writes a batch of proofs in one transaction; all rows land or none.
    pub fn insert_state_sync_proofs(&self, proofs: &[StateSyncProof]) -> Result<(), StoreError> {
        let mut wtxn = self.env.begin_rw_txn()?;
        for proof in proofs {
            let blob = bincode::serialize(proof)?;
            wtxn.put(
                self.db_proofs,
                &id_key(proof.event.id),
                &blob,
                WriteFlags::empty(),
            )?;
        }
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_state_sync_proof(&self, id: u64) -> Result<Option<StateSyncProof>, StoreError> {
        let rtxn = self.env.begin_ro_txn()?;
        match rtxn.get(self.db_proofs, &id_key(id)) {
            Ok(v) => Ok(Some(bincode::deserialize(v)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------
    // tracker cursor (meta)
    // ------------------------

    /// Last anchoring-chain block the event tracker has processed.
    /// The tracker is the only writer of this row.
    pub fn get_last_processed_block(&self) -> Result<Option<u64>, StoreError> {
        let rtxn = self.env.begin_ro_txn()?;
        match rtxn.get(self.db_meta, &META_LAST_PROCESSED_BLOCK) {
            Ok(v) => Ok(key_to_id(v)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_last_processed_block(&self, block: u64) -> Result<(), StoreError> {
        let mut wtxn = self.env.begin_rw_txn()?;
        wtxn.put(
            self.db_meta,
            &META_LAST_PROCESSED_BLOCK,
            &block.to_be_bytes(),
            WriteFlags::empty(),
        )?;
        wtxn.commit()?;
        Ok(())
    }
}
