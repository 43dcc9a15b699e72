//! Chain client abstraction consumed by the sequencer.
//!
//! The sequencer only ever talks to the network through [`ChainClient`], so the HTTP
//! implementation can be swapped for an in-memory one in tests.

mod adapter;
mod http;

use std::time::{Duration, Instant};

use alloy_core::primitives::{Address, B256, Bytes};
use alloy_network::ReceiptResponse;
use alloy_rpc_types_eth::TransactionRequest;
use async_trait::async_trait;

pub use adapter::{BlockHeader, BlockHeaderAdapter, MAX_EXTRA_DATA_LEN, PROOF_OF_AUTHORITY_CHAIN_IDS};
pub use http::HttpChainClient;

use crate::ChainError;

/// The parts of a mined receipt the deployment run acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub contract_address: Option<Address>,
    /// `false` when the transaction reverted.
    pub status: bool,
    pub gas_used: u64,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status
    }
}

impl From<alloy_rpc_types_eth::TransactionReceipt> for TransactionReceipt {
    fn from(receipt: alloy_rpc_types_eth::TransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
            contract_address: receipt.contract_address,
            status: receipt.status(),
            gas_used: receipt.gas_used,
        }
    }
}

/// JSON-RPC surface the deployment run depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Install the block header adapter. Installing the same adapter twice is a no-op.
    fn install_adapter(&mut self, adapter: BlockHeaderAdapter);

    /// The currently installed block header adapter.
    fn adapter(&self) -> BlockHeaderAdapter;

    async fn client_version(&self) -> Result<String, ChainError>;

    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Latest block header, decoded through the installed adapter.
    async fn latest_block(&self) -> Result<BlockHeader, ChainError>;

    /// Transaction count of `address`, including pending transactions.
    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    async fn gas_price(&self) -> Result<u128, ChainError>;

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, ChainError>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError>;

    /// Receipt for `hash`, or `None` while the transaction is not mined yet.
    async fn transaction_receipt(&self, hash: B256)
    -> Result<Option<TransactionReceipt>, ChainError>;

    /// Read-only call against the latest block.
    async fn call(&self, request: &TransactionRequest) -> Result<Bytes, ChainError>;
}

/// How long and how often to poll for a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Abort on Ctrl+C between two polls.
    pub interruptible: bool,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            interruptible: true,
        }
    }
}

/// Block until `hash` is mined.
///
/// Fails with [`ChainError::ReceiptTimeout`] once `policy.timeout` has elapsed. RPC errors
/// while polling are returned as-is; the transaction is never resubmitted.
pub async fn wait_for_receipt<C>(
    client: &C,
    hash: B256,
    policy: &ReceiptPolicy,
) -> Result<TransactionReceipt, ChainError>
where
    C: ChainClient + ?Sized,
{
    let start = Instant::now();

    loop {
        if let Some(receipt) = client.transaction_receipt(hash).await? {
            tracing::debug!(
                tx_hash = %hash,
                block_number = receipt.block_number,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Receipt received"
            );
            return Ok(receipt);
        }

        if start.elapsed() >= policy.timeout {
            return Err(ChainError::ReceiptTimeout {
                hash,
                waited_secs: policy.timeout.as_secs(),
            });
        }

        tracing::trace!(tx_hash = %hash, "Transaction not mined yet, polling again...");

        if policy.interruptible {
            tokio::select! {
                _ = tokio::time::sleep(policy.poll_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    return Err(ChainError::Interrupted { hash });
                }
            }
        } else {
            tokio::time::sleep(policy.poll_interval).await;
        }
    }
}
