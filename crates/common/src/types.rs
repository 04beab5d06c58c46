use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use hex::{decode as hex_decode, encode as hex_encode};

use crate::abi;

/// Address is 20 bytes (Ethereum-style, keccak256(pubkey)[12..32])
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_bytes(b: [u8; 20]) -> Self {
        Address(b)
    }
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
    pub fn to_hex(&self) -> String {
        hex_encode(self.0)
    }
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex_decode(s).map_err(|e| TypeError::Hex(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(TypeError::Length {
                what: "address",
                expected: 20,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}
impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_hex()).finish()
    }
}
impl FromStr for Address {
    type Err = TypeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s)
    }
}

/* --- serde serialize/deserialize for Address as hex string --- */
impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}
impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 32-byte keccak digest wrapper
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

/// All-zero digest, used as the Merkle padding leaf.
pub const ZERO_HASH: Hash32 = Hash32([0u8; 32]);

impl Hash32 {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Hash32(b)
    }
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
    pub fn to_hex(&self) -> String {
        hex_encode(self.0)
    }
    pub fn from_slice(s: &[u8]) -> Result<Self, TypeError> {
        if s.len() != 32 {
            return Err(TypeError::Length {
                what: "hash",
                expected: 32,
                got: s.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(s);
        Ok(Hash32(arr))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}
impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash32").field(&self.to_hex()).finish()
    }
}
impl FromStr for Hash32 {
    type Err = TypeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let v = hex_decode(s).map_err(|e| TypeError::Hex(e.to_string()))?;
        Hash32::from_slice(&v)
    }
}

impl Serialize for Hash32 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}
impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Hash32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash32::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Malformed address/hash input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("invalid {what} length: expected {expected}, got {got}")]
    Length {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

// ════════════════════════════════════════════════════════════════════════════
// STATE SYNC EVENT
// ════════════════════════════════════════════════════════════════════════════

/// A numbered message emitted by the anchoring contract.
///
/// `id` is assigned densely starting at 0 by the contract; events are never
/// mutated after decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSyncEvent {
    /// Globally unique, dense event number.
    pub id: u64,
    /// Emitter on the anchoring chain.
    pub sender: Address,
    /// Target on the local chain.
    pub receiver: Address,
    /// Opaque call payload.
    pub data: Vec<u8>,
}

impl StateSyncEvent {
    /// Keccak hash of the canonical ABI encoding, used as the Merkle leaf.
    pub fn leaf_hash(&self) -> Hash32 {
        abi::event_leaf(self)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// COMMITMENT MESSAGES
// ════════════════════════════════════════════════════════════════════════════

/// Minimum number of events in a commitment. The anchoring verifier requires
/// a Merkle tree with at least two leaves.
pub const MIN_COMMITMENT_SIZE: u64 = 2;

/// The commitment payload submitted to the local chain: a Merkle root over
/// the event range `[from_id, to_id]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentMessage {
    pub merkle_root: Hash32,
    pub from_id: u64,
    pub to_id: u64,
}

impl CommitmentMessage {
    pub fn new(merkle_root: Hash32, from_id: u64, to_id: u64) -> Self {
        Self {
            merkle_root,
            from_id,
            to_id,
        }
    }

    /// The digest validators sign: keccak over the canonical encoding of
    /// `(merkle_root, from_id, to_id)`.
    pub fn digest(&self) -> Hash32 {
        abi::commitment_digest(&self.merkle_root, self.from_id, self.to_id)
    }

    pub fn event_count(&self) -> u64 {
        self.to_id - self.from_id + 1
    }

    /// True if `id` falls inside this commitment's range.
    pub fn contains(&self, id: u64) -> bool {
        self.from_id <= id && id <= self.to_id
    }
}

/// A single validator's vote for a commitment digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSignature {
    pub from: Address,
    pub signature: Vec<u8>,
}

/// Quorum-signed commitment, ready for submission to the local chain.
///
/// `bitmap` bit `i` is set iff the i-th validator of the epoch contributed;
/// `public_keys` holds the contributing validators' compressed BLS keys in
/// bitmap order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentMessageSigned {
    pub message: CommitmentMessage,
    pub agg_signature: Vec<u8>,
    pub bitmap: Bitmap,
    pub public_keys: Vec<Vec<u8>>,
}

/// Merkle inclusion proof for one event of an accepted commitment.
///
/// `proof` holds the sibling hashes ordered root→leaf; its length equals the
/// tree depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSyncProof {
    pub event: StateSyncEvent,
    pub proof: Vec<Hash32>,
}

// ════════════════════════════════════════════════════════════════════════════
// TRANSPORT MESSAGE
// ════════════════════════════════════════════════════════════════════════════

/// Gossip wire payload carrying one vote. Field order is fixed; the wire
/// codec (bincode) is deterministic over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Commitment digest being voted on.
    pub hash: Hash32,
    /// BLS signature over `hash`.
    pub signature: Vec<u8>,
    /// Address of the voting validator.
    pub node_id: Address,
    /// Epoch the vote belongs to.
    pub epoch: u64,
}

// ════════════════════════════════════════════════════════════════════════════
// BITMAP
// ════════════════════════════════════════════════════════════════════════════

/// Validator-index bitfield. Bit `i` refers to the i-th validator of the
/// epoch's frozen ordering. Grows on demand; trailing zero bytes are
/// significant only up to the validator count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitmap(pub Vec<u8>);

impl Bitmap {
    pub fn new() -> Self {
        Bitmap(Vec::new())
    }

    pub fn set(&mut self, index: u64) {
        let byte = (index / 8) as usize;
        if byte >= self.0.len() {
            self.0.resize(byte + 1, 0);
        }
        self.0[byte] |= 1 << (index % 8);
    }

    pub fn is_set(&self, index: u64) -> bool {
        let byte = (index / 8) as usize;
        if byte >= self.0.len() {
            return false;
        }
        self.0[byte] & (1 << (index % 8)) != 0
    }

    /// Number of set bits.
    pub fn popcount(&self) -> u32 {
        self.0.iter().map(|b| b.count_ones()).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
