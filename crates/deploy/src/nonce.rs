//! Local nonce bookkeeping for the deployer account.

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

/// A per-account transaction sequence number.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct Nonce(pub u64);

impl Nonce {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Hands out nonces for one account during one run.
///
/// Seeded once from the chain, then incremented locally. This is only correct while
/// nothing else submits transactions from the same account.
#[derive(Debug, Clone)]
pub struct NonceManager {
    address: Address,
    next: u64,
    last_issued: Option<u64>,
}

impl NonceManager {
    /// Start from the on-chain transaction count.
    pub fn new(address: Address, on_chain: u64) -> Self {
        Self {
            address,
            next: on_chain,
            last_issued: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// The nonce the next [`reserve`](Self::reserve) will return.
    pub fn peek(&self) -> Nonce {
        Nonce(self.next)
    }

    /// Take the next nonce. Every call returns a strictly greater value.
    pub fn reserve(&mut self) -> Nonce {
        let nonce = self.next;
        self.next += 1;
        self.last_issued = Some(nonce);
        tracing::debug!(address = %self.address, nonce, "Reserved nonce");
        Nonce(nonce)
    }

    pub fn last_issued(&self) -> Option<Nonce> {
        self.last_issued.map(Nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_strictly_increasing() {
        let mut nonces = NonceManager::new(Address::ZERO, 3);
        assert_eq!(nonces.peek(), Nonce(3));
        assert_eq!(nonces.last_issued(), None);

        let first = nonces.reserve();
        let second = nonces.reserve();

        assert_eq!(first, Nonce(3));
        assert_eq!(second, Nonce(4));
        assert!(second > first);
        assert_eq!(nonces.last_issued(), Some(Nonce(4)));
        assert_eq!(nonces.peek(), Nonce(5));
    }

    #[test]
    fn test_nonce_display() {
        assert_eq!(Nonce(42).to_string(), "42");
    }
}
