//! BLS12-381 signing and aggregation, plus the keccak digest helper.
//!
//! Uses the `min_sig` orientation: signatures live in G1 (48 bytes
//! compressed), public keys in G2 (96 bytes compressed). A quorum's
//! signatures over a common commitment digest aggregate into a single G1
//! point that the anchoring verifier checks against the signers' public
//! keys.
//!
//! Peer signatures are treated as opaque bytes until aggregation time;
//! decoding failures surface as [`CryptoError::InvalidSignature`].

use blst::min_sig::{AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Keccak256};

use crate::types::{Address, Hash32};

/// Domain separation tag for hashing messages to G1.
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_";

/// Compressed G1 signature size.
pub const SIGNATURE_SIZE: usize = 48;
/// Compressed G2 public key size.
pub const PUBLIC_KEY_SIZE: usize = 96;

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Hash32(arr)
}

/// Signature material errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid BLS signature bytes")]
    InvalidSignature,
    #[error("invalid BLS public key bytes")]
    InvalidPublicKey,
    #[error("cannot aggregate an empty signature set")]
    EmptyAggregation,
    #[error("key generation failed")]
    KeyGeneration,
}

// ════════════════════════════════════════════════════════════════════════════
// VALIDATOR KEY
// ════════════════════════════════════════════════════════════════════════════

/// A validator's BLS key pair with its derived address.
///
/// The address is `keccak256(compressed public key)[12..32]`, so validator
/// identity is bound to the key that signs commitment digests.
#[derive(Clone)]
pub struct BlsKey {
    secret: SecretKey,
    public: PublicKey,
    address: Address,
}

impl BlsKey {
    /// Generates a key pair from OS randomness.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut ikm = [0u8; 32];
        OsRng.fill_bytes(&mut ikm);
        Self::from_seed(&ikm)
    }

    /// Deterministic key pair from 32 bytes of input key material.
    pub fn from_seed(ikm: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret = SecretKey::key_gen(ikm, &[]).map_err(|_| CryptoError::KeyGeneration)?;
        let public = secret.sk_to_pk();
        let address = address_of_public_key(&public.to_bytes());
        Ok(Self {
            secret,
            public,
            address,
        })
    }

    /// Signs a commitment digest. Returns the compressed G1 signature.
    pub fn sign(&self, digest: &Hash32) -> Vec<u8> {
        self.secret.sign(&digest.0, BLS_DST, &[]).to_bytes().to_vec()
    }

    /// Compressed G2 public key.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_bytes().to_vec()
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

impl std::fmt::Debug for BlsKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // secret scalar intentionally not printed
        f.debug_struct("BlsKey")
            .field("address", &self.address)
            .finish()
    }
}

/// Derives the validator address from a compressed public key.
pub fn address_of_public_key(public_key: &[u8]) -> Address {
    let digest = keccak256(public_key);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest.0[12..]);
    Address(addr)
}

// ════════════════════════════════════════════════════════════════════════════
// AGGREGATION
// ════════════════════════════════════════════════════════════════════════════

/// Aggregates individual vote signatures into one compressed G1 point.
///
/// Every input must decode to a valid group element; a forged or corrupted
/// vote fails here rather than producing an unverifiable aggregate.
pub fn aggregate_signatures(signatures: &[Vec<u8>]) -> Result<Vec<u8>, CryptoError> {
    if signatures.is_empty() {
        return Err(CryptoError::EmptyAggregation);
    }

    let mut decoded = Vec::with_capacity(signatures.len());
    for raw in signatures {
        decoded.push(Signature::from_bytes(raw).map_err(|_| CryptoError::InvalidSignature)?);
    }
    let refs: Vec<&Signature> = decoded.iter().collect();

    let agg = AggregateSignature::aggregate(&refs, true)
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(agg.to_signature().to_bytes().to_vec())
}

/// Checks that `bytes` decode to a valid G1 signature, without verifying it
/// against any key. Aggregation-time screening for corrupted vote rows.
pub fn validate_signature_bytes(bytes: &[u8]) -> Result<(), CryptoError> {
    Signature::from_bytes(bytes)
        .map(|_| ())
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Verifies a single vote signature against one public key.
pub fn verify_signature(public_key: &[u8], digest: &Hash32, signature: &[u8]) -> bool {
    let pk = match PublicKey::from_bytes(public_key) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let sig = match Signature::from_bytes(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    sig.verify(true, &digest.0, BLS_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
}

/// Verifies an aggregate signature over a common digest against the
/// contributing public keys. Mirrors the anchoring verifier's check.
pub fn verify_aggregate(public_keys: &[Vec<u8>], digest: &Hash32, aggregate: &[u8]) -> bool {
    if public_keys.is_empty() {
        return false;
    }
    let mut decoded = Vec::with_capacity(public_keys.len());
    for raw in public_keys {
        match PublicKey::from_bytes(raw) {
            Ok(pk) => decoded.push(pk),
            Err(_) => return false,
        }
    }
    let refs: Vec<&PublicKey> = decoded.iter().collect();
    let sig = match Signature::from_bytes(aggregate) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    sig.fast_aggregate_verify(true, &digest.0, BLS_DST, &refs) == BLST_ERROR::BLST_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(tag: u8) -> BlsKey {
        BlsKey::from_seed(&[tag; 32]).unwrap()
    }

    #[test]
    fn keccak_known_vector() {
        // keccak256("") is the well-known empty digest
        assert_eq!(
            keccak256(b"").to_hex(),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn sign_and_verify() {
        let key = test_key(1);
        let digest = keccak256(b"commitment");
        let sig = key.sign(&digest);
        assert_eq!(sig.len(), SIGNATURE_SIZE);
        assert!(verify_signature(&key.public_key_bytes(), &digest, &sig));

        let other = keccak256(b"other");
        assert!(!verify_signature(&key.public_key_bytes(), &other, &sig));
    }

    #[test]
    fn address_is_stable_and_key_bound() {
        let key = test_key(2);
        assert_eq!(key.address(), address_of_public_key(&key.public_key_bytes()));
        assert_ne!(key.address(), test_key(3).address());
    }

    #[test]
    fn aggregate_verifies_under_all_signers() {
        let keys: Vec<BlsKey> = (0..4).map(test_key).collect();
        let digest = keccak256(b"range 10..13");

        let sigs: Vec<Vec<u8>> = keys.iter().map(|k| k.sign(&digest)).collect();
        let agg = aggregate_signatures(&sigs).unwrap();
        assert_eq!(agg.len(), SIGNATURE_SIZE);

        let pubkeys: Vec<Vec<u8>> = keys.iter().map(|k| k.public_key_bytes()).collect();
        assert!(verify_aggregate(&pubkeys, &digest, &agg));

        // dropping a contributor breaks verification
        assert!(!verify_aggregate(&pubkeys[..3], &digest, &agg));
    }

    #[test]
    fn aggregation_rejects_garbage_votes() {
        let key = test_key(7);
        let digest = keccak256(b"x");
        let sigs = vec![key.sign(&digest), vec![0u8; SIGNATURE_SIZE]];
        assert_eq!(
            aggregate_signatures(&sigs),
            Err(CryptoError::InvalidSignature)
        );
        assert_eq!(
            aggregate_signatures(&[]),
            Err(CryptoError::EmptyAggregation)
        );
    }
}
