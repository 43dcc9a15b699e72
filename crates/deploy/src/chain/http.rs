//! [`ChainClient`] backed by an alloy HTTP provider.

use alloy_core::primitives::{Address, B256, Bytes};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{BlockNumberOrTag, TransactionRequest};
use alloy_transport::TransportError;
use async_trait::async_trait;
use url::Url;

use super::{BlockHeader, BlockHeaderAdapter, ChainClient, TransactionReceipt};
use crate::ChainError;

/// Chain client talking to a node (Ganache, Anvil, geth...) over HTTP.
#[derive(Clone)]
pub struct HttpChainClient {
    provider: DynProvider,
    url: Url,
    adapter: BlockHeaderAdapter,
}

impl HttpChainClient {
    /// Build a client for `url`. No request is sent until the first call.
    pub fn new(url: Url) -> Self {
        let provider = ProviderBuilder::new().connect_http(url.clone()).erased();
        Self {
            provider,
            url,
            adapter: BlockHeaderAdapter::default(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl std::fmt::Debug for HttpChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChainClient")
            .field("url", &self.url.as_str())
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}

/// Split node-side error responses from transport failures.
fn chain_error(method: &'static str) -> impl FnOnce(TransportError) -> ChainError {
    move |error| match error {
        TransportError::ErrorResp(payload) => ChainError::Rpc {
            code: payload.code,
            message: payload.message.to_string(),
        },
        source => ChainError::Transport {
            method: method.to_string(),
            source,
        },
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    fn install_adapter(&mut self, adapter: BlockHeaderAdapter) {
        if self.adapter != adapter {
            tracing::debug!(%adapter, url = %self.url, "Installing block header adapter");
            self.adapter = adapter;
        }
    }

    fn adapter(&self) -> BlockHeaderAdapter {
        self.adapter
    }

    async fn client_version(&self) -> Result<String, ChainError> {
        self.provider
            .get_client_version()
            .await
            .map_err(chain_error("web3_clientVersion"))
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(chain_error("eth_chainId"))
    }

    async fn latest_block(&self) -> Result<BlockHeader, ChainError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(chain_error("eth_getBlockByNumber"))?
            .ok_or_else(|| ChainError::Decode {
                method: "eth_getBlockByNumber".to_string(),
                reason: "node returned no latest block".to_string(),
            })?;
        self.adapter.decode_header(&block.header)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(chain_error("eth_getTransactionCount"))
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(chain_error("eth_gasPrice"))
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, ChainError> {
        self.provider
            .estimate_gas(request.clone())
            .await
            .map_err(chain_error("eth_estimateGas"))
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(chain_error("eth_sendRawTransaction"))?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(chain_error("eth_getTransactionReceipt"))?;
        Ok(receipt.map(TransactionReceipt::from))
    }

    async fn call(&self, request: &TransactionRequest) -> Result<Bytes, ChainError> {
        self.provider
            .call(request.clone())
            .await
            .map_err(chain_error("eth_call"))
    }
}
