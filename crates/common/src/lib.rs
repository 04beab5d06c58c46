//! # Bridge Common Crate
//!
//! Shared primitives of the state-sync bridge.
//!
//! ## Modules
//! - `types`: addresses, hashes, events, commitment messages, bitmap
//! - `abi`: canonical ABI codec for the anchoring contract surfaces
//! - `crypto`: BLS12-381 signing/aggregation and keccak digests
//! - `merkle`: deterministic Merkle commitment construction
//! - `validator`: the epoch's frozen, ordered validator set

pub mod abi;
pub mod crypto;
pub mod merkle;
pub mod types;
pub mod validator;

pub use abi::AbiError;
pub use crypto::{BlsKey, CryptoError};
pub use merkle::{verify_proof, MerkleError, MerkleTree};
pub use types::{
    Address, Bitmap, CommitmentMessage, CommitmentMessageSigned, Hash32, MessageSignature,
    StateSyncEvent, StateSyncProof, TransportMessage, MIN_COMMITMENT_SIZE, ZERO_HASH,
};
pub use validator::{ValidatorAccount, ValidatorSet};
