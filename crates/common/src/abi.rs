//! Canonical ABI codec for the anchoring contract surfaces.
//!
//! Three byte layouts live here and nowhere else:
//!
//! 1. The event tuple `(uint256 id, address sender, address receiver, bytes data)`
//!    whose keccak hash is the Merkle leaf.
//! 2. The commitment digest `keccak(bytes32 merkleRoot ‖ uint256 fromId ‖ uint256 toId)`
//!    that validators sign.
//! 3. The submission calldata
//!    `commit(bytes32,uint256,uint256,bytes,bytes,bytes[])` produced for the
//!    local chain and decoded back out of finalized blocks.
//!
//! Encoding follows the standard 32-byte-word head/tail ABI layout. Decoding
//! is bounds-checked on every read; malformed input yields [`AbiError`], it
//! never panics.
//!
//! Key formats are consensus-critical. Do not modify without coordinating a
//! contract upgrade on both chains.

use crate::crypto::keccak256;
use crate::types::{Address, Bitmap, CommitmentMessageSigned, Hash32, StateSyncEvent};

/// Size of one ABI word.
const WORD: usize = 32;

/// `keccak("StateSynced(uint256,address,address,bytes)")`, topic 0 of the
/// anchored event log.
pub fn state_sync_event_topic() -> Hash32 {
    keccak256(b"StateSynced(uint256,address,address,bytes)")
}

/// First 4 bytes of `keccak("commit(bytes32,uint256,uint256,bytes,bytes,bytes[])")`.
pub fn commit_selector() -> [u8; 4] {
    let digest = keccak256(b"commit(bytes32,uint256,uint256,bytes,bytes,bytes[])");
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&digest.0[..4]);
    sel
}

/// Malformed ABI input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("abi input truncated at offset {0}")]
    Truncated(usize),
    #[error("unexpected method selector")]
    Selector,
    #[error("log does not match the state sync event signature")]
    TopicMismatch,
    #[error("expected {expected} log topics, got {got}")]
    TopicCount { expected: usize, got: usize },
    #[error("{0} does not fit in 64 bits")]
    Overflow(&'static str),
    #[error("non-zero padding in {0} word")]
    Padding(&'static str),
}

// ════════════════════════════════════════════════════════════════════════════
// WORD HELPERS
// ════════════════════════════════════════════════════════════════════════════

fn u64_word(v: u64) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[24..].copy_from_slice(&v.to_be_bytes());
    w
}

fn address_word(a: &Address) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_bytes());
    w
}

fn read_word(buf: &[u8], offset: usize) -> Result<[u8; 32], AbiError> {
    let end = offset.checked_add(WORD).ok_or(AbiError::Overflow("offset"))?;
    if end > buf.len() {
        return Err(AbiError::Truncated(offset));
    }
    let mut w = [0u8; 32];
    w.copy_from_slice(&buf[offset..end]);
    Ok(w)
}

fn word_to_u64(w: &[u8; 32], what: &'static str) -> Result<u64, AbiError> {
    if w[..24].iter().any(|&b| b != 0) {
        return Err(AbiError::Overflow(what));
    }
    let mut be = [0u8; 8];
    be.copy_from_slice(&w[24..]);
    Ok(u64::from_be_bytes(be))
}

fn word_to_address(w: &[u8; 32], what: &'static str) -> Result<Address, AbiError> {
    if w[..12].iter().any(|&b| b != 0) {
        return Err(AbiError::Padding(what));
    }
    let mut a = [0u8; 20];
    a.copy_from_slice(&w[12..]);
    Ok(Address(a))
}

fn padded_len(n: usize) -> usize {
    (n + WORD - 1) / WORD * WORD
}

/// Appends a `bytes` tail: length word + right-padded payload.
fn push_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&u64_word(data.len() as u64));
    out.extend_from_slice(data);
    out.resize(out.len() + padded_len(data.len()) - data.len(), 0);
}

/// Reads a `bytes` tail at absolute `offset` inside `buf`.
fn read_bytes(buf: &[u8], offset: usize, what: &'static str) -> Result<Vec<u8>, AbiError> {
    let len_word = read_word(buf, offset)?;
    let len = word_to_u64(&len_word, what)? as usize;
    let start = offset + WORD;
    let end = start.checked_add(len).ok_or(AbiError::Overflow(what))?;
    if end > buf.len() {
        return Err(AbiError::Truncated(start));
    }
    Ok(buf[start..end].to_vec())
}

// ════════════════════════════════════════════════════════════════════════════
// EVENT ENCODING
// ════════════════════════════════════════════════════════════════════════════

/// Canonical encoding of the event tuple
/// `(uint256 id, address sender, address receiver, bytes data)`.
pub fn encode_event(ev: &StateSyncEvent) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 * WORD + WORD + padded_len(ev.data.len()));
    out.extend_from_slice(&u64_word(ev.id));
    out.extend_from_slice(&address_word(&ev.sender));
    out.extend_from_slice(&address_word(&ev.receiver));
    // one dynamic field, so its tail starts right after the four head words
    out.extend_from_slice(&u64_word((4 * WORD) as u64));
    push_bytes(&mut out, &ev.data);
    out
}

/// Merkle leaf: keccak of the canonical event encoding.
pub fn event_leaf(ev: &StateSyncEvent) -> Hash32 {
    keccak256(&encode_event(ev))
}

/// Digest validators sign: keccak over `(merkleRoot, fromId, toId)`.
pub fn commitment_digest(root: &Hash32, from_id: u64, to_id: u64) -> Hash32 {
    let mut buf = [0u8; 3 * WORD];
    buf[..WORD].copy_from_slice(&root.0);
    buf[WORD..2 * WORD].copy_from_slice(&u64_word(from_id));
    buf[2 * WORD..].copy_from_slice(&u64_word(to_id));
    keccak256(&buf)
}

/// Recovers a [`StateSyncEvent`] from an anchored log.
///
/// Expects the indexed layout of the `StateSynced` event: topic 1 carries the
/// id, topics 2 and 3 the sender and receiver, and the log data carries the
/// ABI-encoded `bytes` payload.
pub fn decode_event_log(topics: &[Hash32], data: &[u8]) -> Result<StateSyncEvent, AbiError> {
    if topics.len() != 4 {
        return Err(AbiError::TopicCount {
            expected: 4,
            got: topics.len(),
        });
    }
    if topics[0] != state_sync_event_topic() {
        return Err(AbiError::TopicMismatch);
    }

    let id = word_to_u64(&topics[1].0, "event id")?;
    let sender = word_to_address(&topics[2].0, "sender")?;
    let receiver = word_to_address(&topics[3].0, "receiver")?;

    // data region: a single dynamic param, head word is its offset
    let head = read_word(data, 0)?;
    let offset = word_to_u64(&head, "data offset")? as usize;
    let payload = read_bytes(data, offset, "event data")?;

    Ok(StateSyncEvent {
        id,
        sender,
        receiver,
        data: payload,
    })
}

// ════════════════════════════════════════════════════════════════════════════
// COMMIT CALLDATA
// ════════════════════════════════════════════════════════════════════════════

/// Builds the full `commit(...)` calldata for a quorum-signed commitment.
pub fn encode_commit_input(signed: &CommitmentMessageSigned) -> Vec<u8> {
    let msg = &signed.message;

    // dynamic tails, laid out in declaration order after six head words
    let head_len = 6 * WORD;
    let sig_tail = WORD + padded_len(signed.agg_signature.len());
    let bitmap_tail = WORD + padded_len(signed.bitmap.as_bytes().len());

    let mut out = Vec::new();
    out.extend_from_slice(&commit_selector());
    out.extend_from_slice(&msg.merkle_root.0);
    out.extend_from_slice(&u64_word(msg.from_id));
    out.extend_from_slice(&u64_word(msg.to_id));
    out.extend_from_slice(&u64_word(head_len as u64));
    out.extend_from_slice(&u64_word((head_len + sig_tail) as u64));
    out.extend_from_slice(&u64_word((head_len + sig_tail + bitmap_tail) as u64));

    push_bytes(&mut out, &signed.agg_signature);
    push_bytes(&mut out, signed.bitmap.as_bytes());

    // bytes[]: count word, element offsets relative to the slot after the
    // count word, then the elements themselves
    let count = signed.public_keys.len();
    out.extend_from_slice(&u64_word(count as u64));
    let mut elem_offset = count * WORD;
    for key in &signed.public_keys {
        out.extend_from_slice(&u64_word(elem_offset as u64));
        elem_offset += WORD + padded_len(key.len());
    }
    for key in &signed.public_keys {
        push_bytes(&mut out, key);
    }

    out
}

/// Decodes `commit(...)` calldata back into a [`CommitmentMessageSigned`].
pub fn decode_commit_input(input: &[u8]) -> Result<CommitmentMessageSigned, AbiError> {
    if input.len() < 4 || input[..4] != commit_selector() {
        return Err(AbiError::Selector);
    }
    let params = &input[4..];

    let merkle_root = Hash32(read_word(params, 0)?);
    let from_id = word_to_u64(&read_word(params, WORD)?, "fromId")?;
    let to_id = word_to_u64(&read_word(params, 2 * WORD)?, "toId")?;
    let sig_offset = word_to_u64(&read_word(params, 3 * WORD)?, "signature offset")? as usize;
    let bitmap_offset = word_to_u64(&read_word(params, 4 * WORD)?, "bitmap offset")? as usize;
    let keys_offset = word_to_u64(&read_word(params, 5 * WORD)?, "keys offset")? as usize;

    let agg_signature = read_bytes(params, sig_offset, "signature")?;
    let bitmap = Bitmap(read_bytes(params, bitmap_offset, "bitmap")?);

    let count_word = read_word(params, keys_offset)?;
    let count = word_to_u64(&count_word, "key count")? as usize;
    let base = keys_offset + WORD;

    // the count word is untrusted calldata: every claimed element needs at
    // least its offset word in the buffer, so bound it before allocating
    let offsets_len = count
        .checked_mul(WORD)
        .ok_or(AbiError::Overflow("key count"))?;
    let offsets_end = base
        .checked_add(offsets_len)
        .ok_or(AbiError::Overflow("key count"))?;
    if offsets_end > params.len() {
        return Err(AbiError::Truncated(base));
    }

    let mut public_keys = Vec::with_capacity(count);
    for i in 0..count {
        let off_word = read_word(params, base + i * WORD)?;
        let rel = word_to_u64(&off_word, "key offset")? as usize;
        let abs = base.checked_add(rel).ok_or(AbiError::Overflow("key offset"))?;
        public_keys.push(read_bytes(params, abs, "public key")?);
    }

    Ok(CommitmentMessageSigned {
        message: crate::types::CommitmentMessage::new(merkle_root, from_id, to_id),
        agg_signature,
        bitmap,
        public_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommitmentMessage;

    fn sample_event() -> StateSyncEvent {
        StateSyncEvent {
            id: 42,
            sender: Address::from_bytes([0x11; 20]),
            receiver: Address::from_bytes([0x22; 20]),
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    #[test]
    fn event_encoding_layout() {
        let enc = encode_event(&sample_event());
        // four head words + length word + one padded data word
        assert_eq!(enc.len(), 6 * 32);
        assert_eq!(enc[31], 42); // id in the low byte of word 0
        assert_eq!(&enc[44..64], &[0x11; 20]); // sender, left-padded
        assert_eq!(enc[127], 128); // tail offset: right after the head words
        assert_eq!(enc[159], 4); // data length
        assert_eq!(&enc[160..164], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&enc[164..192], &[0u8; 28]); // zero padding
    }

    #[test]
    fn event_leaf_changes_with_any_field() {
        let ev = sample_event();
        let base = event_leaf(&ev);
        let mut other = ev.clone();
        other.id += 1;
        assert_ne!(base, event_leaf(&other));
        let mut other = ev.clone();
        other.data.push(0);
        assert_ne!(base, event_leaf(&other));
        assert_eq!(base, event_leaf(&ev));
    }

    #[test]
    fn event_log_round_trip() {
        let ev = sample_event();
        let topics = vec![
            state_sync_event_topic(),
            Hash32(super::u64_word(ev.id)),
            Hash32(super::address_word(&ev.sender)),
            Hash32(super::address_word(&ev.receiver)),
        ];
        let mut data = Vec::new();
        data.extend_from_slice(&super::u64_word(32));
        super::push_bytes(&mut data, &ev.data);

        let decoded = decode_event_log(&topics, &data).unwrap();
        assert_eq!(decoded, ev);
    }

    #[test]
    fn event_log_rejects_wrong_topic() {
        let topics = vec![Hash32([9u8; 32]); 4];
        assert_eq!(
            decode_event_log(&topics, &[]),
            Err(AbiError::TopicMismatch)
        );
        assert!(matches!(
            decode_event_log(&topics[..2], &[]),
            Err(AbiError::TopicCount { got: 2, .. })
        ));
    }

    #[test]
    fn commit_input_round_trip() {
        let signed = CommitmentMessageSigned {
            message: CommitmentMessage::new(Hash32([3u8; 32]), 10, 13),
            agg_signature: vec![7u8; 48],
            bitmap: Bitmap(vec![0b0000_0111]),
            public_keys: vec![vec![1u8; 96], vec![2u8; 96], vec![3u8; 96]],
        };
        let input = encode_commit_input(&signed);
        assert_eq!(&input[..4], &commit_selector());
        let decoded = decode_commit_input(&input).unwrap();
        assert_eq!(decoded, signed);
    }

    #[test]
    fn commit_input_rejects_garbage() {
        assert_eq!(decode_commit_input(&[1, 2, 3]), Err(AbiError::Selector));

        let signed = CommitmentMessageSigned {
            message: CommitmentMessage::new(Hash32([3u8; 32]), 0, 1),
            agg_signature: vec![7u8; 48],
            bitmap: Bitmap(vec![0b11]),
            public_keys: vec![vec![1u8; 96]],
        };
        let mut input = encode_commit_input(&signed);
        input.truncate(input.len() - 10);
        assert!(matches!(
            decode_commit_input(&input),
            Err(AbiError::Truncated(_))
        ));
    }

    #[test]
    fn commit_input_rejects_absurd_key_count() {
        // hand-built calldata claiming 2^40 public keys with none present;
        // decode must fail cleanly instead of trying to allocate for them
        let mut input = Vec::new();
        input.extend_from_slice(&commit_selector());
        input.extend_from_slice(&[3u8; 32]); // merkle root
        input.extend_from_slice(&super::u64_word(0)); // fromId
        input.extend_from_slice(&super::u64_word(1)); // toId
        input.extend_from_slice(&super::u64_word(192)); // signature offset
        input.extend_from_slice(&super::u64_word(224)); // bitmap offset
        input.extend_from_slice(&super::u64_word(256)); // keys offset
        input.extend_from_slice(&super::u64_word(0)); // empty signature
        input.extend_from_slice(&super::u64_word(0)); // empty bitmap
        input.extend_from_slice(&super::u64_word(1 << 40)); // claimed count

        assert!(matches!(
            decode_commit_input(&input),
            Err(AbiError::Truncated(_))
        ));
    }

    #[test]
    fn selector_is_four_bytes_of_signature_hash() {
        let digest = keccak256(b"commit(bytes32,uint256,uint256,bytes,bytes,bytes[])");
        assert_eq!(&commit_selector(), &digest.0[..4]);
    }
}
