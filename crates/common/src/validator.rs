//! Epoch validator set.
//!
//! The set is frozen for the duration of an epoch and exposed as an ordered
//! sequence; the position of a validator is its bit in commitment bitmaps,
//! so the ordering is part of the epoch's identity.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// One validator of the epoch: its address and compressed BLS public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorAccount {
    pub address: Address,
    pub bls_key: Vec<u8>,
}

/// Ordered validator set with stable indices `0..N-1`.
///
/// Addresses must be unique; lookups are O(1) via an internal index.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    accounts: Vec<ValidatorAccount>,
    by_address: HashMap<Address, usize>,
}

impl ValidatorSet {
    pub fn new(accounts: Vec<ValidatorAccount>) -> Self {
        let by_address = accounts
            .iter()
            .enumerate()
            .map(|(i, acc)| (acc.address, i))
            .collect();
        Self {
            accounts,
            by_address,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn accounts(&self) -> &[ValidatorAccount] {
        &self.accounts
    }

    pub fn account_at(&self, index: usize) -> Option<&ValidatorAccount> {
        self.accounts.get(index)
    }

    /// Stable index of `addr` in this epoch's ordering.
    pub fn index_of(&self, addr: &Address) -> Option<usize> {
        self.by_address.get(addr).copied()
    }

    pub fn includes(&self, addr: &Address) -> bool {
        self.by_address.contains_key(addr)
    }

    /// Minimum number of distinct signers for a commitment: ⌈2N/3⌉.
    pub fn quorum_size(&self) -> usize {
        (2 * self.accounts.len() + 2) / 3
    }

    /// True if the member addresses in `signers` meet the quorum.
    /// Non-member addresses never count.
    pub fn has_quorum(&self, signers: &HashSet<Address>) -> bool {
        let members = signers.iter().filter(|a| self.includes(a)).count();
        members >= self.quorum_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(n: u8) -> ValidatorSet {
        ValidatorSet::new(
            (0..n)
                .map(|i| ValidatorAccount {
                    address: Address::from_bytes([i; 20]),
                    bls_key: vec![i; 96],
                })
                .collect(),
        )
    }

    #[test]
    fn quorum_is_two_thirds_rounded_up() {
        assert_eq!(set_of(1).quorum_size(), 1);
        assert_eq!(set_of(3).quorum_size(), 2);
        assert_eq!(set_of(4).quorum_size(), 3);
        assert_eq!(set_of(6).quorum_size(), 4);
        assert_eq!(set_of(7).quorum_size(), 5);
    }

    #[test]
    fn indices_are_stable_and_membership_works() {
        let set = set_of(4);
        for i in 0..4usize {
            let addr = Address::from_bytes([i as u8; 20]);
            assert_eq!(set.index_of(&addr), Some(i));
            assert!(set.includes(&addr));
            assert_eq!(set.account_at(i).unwrap().address, addr);
        }
        assert!(!set.includes(&Address::from_bytes([9; 20])));
        assert!(set.account_at(4).is_none());
    }

    #[test]
    fn outsiders_do_not_count_toward_quorum() {
        let set = set_of(4);
        let mut signers = HashSet::new();
        signers.insert(Address::from_bytes([0; 20]));
        signers.insert(Address::from_bytes([1; 20]));
        // intruder
        signers.insert(Address::from_bytes([200; 20]));
        assert!(!set.has_quorum(&signers));

        signers.insert(Address::from_bytes([2; 20]));
        assert!(set.has_quorum(&signers));
    }
}
