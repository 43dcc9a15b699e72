//! Transaction signing for the deployer account.

use std::fmt;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{Address, B256, Bytes};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSigner;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::{DeployError, TransactionError};

/// Name of the environment variable holding the deployer's private key.
pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";

/// A hex-encoded secp256k1 private key.
///
/// Never serialized and redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().trim().to_string())
    }

    /// Read the key from [`PRIVATE_KEY_ENV`].
    pub fn from_env() -> Result<Self, DeployError> {
        match std::env::var(PRIVATE_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key)),
            _ => Err(DeployError::Configuration(format!(
                "{PRIVATE_KEY_ENV} is not set"
            ))),
        }
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: B256,
    /// EIP-2718 encoding of the signed transaction.
    pub raw: Bytes,
}

/// Signs transactions on behalf of a single account.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign(&self, tx: TxLegacy) -> Result<SignedTransaction, TransactionError>;
}

/// An account whose key is held in memory.
#[derive(Clone)]
pub struct LocalAccount {
    signer: PrivateKeySigner,
}

impl LocalAccount {
    pub fn new(key: &PrivateKey) -> Result<Self, DeployError> {
        let signer = key
            .expose()
            .parse::<PrivateKeySigner>()
            .map_err(|e| DeployError::Configuration(format!("invalid private key: {e}")))?;
        Ok(Self { signer })
    }
}

impl fmt::Debug for LocalAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAccount")
            .field("address", &self.signer.address())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionSigner for LocalAccount {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign(&self, mut tx: TxLegacy) -> Result<SignedTransaction, TransactionError> {
        let signature = self
            .signer
            .sign_transaction(&mut tx)
            .await
            .map_err(|e| TransactionError::Signing(e.to_string()))?;

        let envelope = TxEnvelope::from(tx.into_signed(signature));

        Ok(SignedTransaction {
            hash: *envelope.tx_hash(),
            raw: envelope.encoded_2718().into(),
        })
    }
}
