//! The deployment sequencer.
//!
//! A run walks a fixed, one-way sequence of stages:
//!
//! ```text
//! Uninitialized -> Compiled -> Connected -> NonceResolved -> Deployed
//!     -> InitialRead -> Mutated -> FinalRead -> Done
//! ```
//!
//! Any failure aborts the run where it stands. Nothing is retried: a transaction that was
//! submitted but not confirmed cannot be safely resent without fee and nonce bookkeeping.

use std::path::Path;

use alloy_consensus::TxLegacy;
use alloy_rpc_types_eth::{TransactionInput, TransactionRequest};
use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, TxKind, U256},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    ChainError, CompiledArtifact, Compiler, DeployConfig, DeployError, DeployedContractHandle,
    Nonce, NonceManager, SourceFile, TransactionError, TransactionReceipt, TransactionSigner,
    chain::{self, BlockHeaderAdapter, ChainClient, ReceiptPolicy},
    compiler::write_json,
    contract,
};

/// File name of the run summary written after a successful run.
pub const RUN_REPORT_FILENAME: &str = "run.json";

/// Stages of a deployment run, in order.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    #[default]
    Uninitialized,
    Compiled,
    Connected,
    NonceResolved,
    Deployed,
    InitialRead,
    Mutated,
    FinalRead,
    Done,
}

impl Stage {
    /// The only stage reachable from `self`. `None` once the run is done.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Uninitialized => Some(Self::Compiled),
            Self::Compiled => Some(Self::Connected),
            Self::Connected => Some(Self::NonceResolved),
            Self::NonceResolved => Some(Self::Deployed),
            Self::Deployed => Some(Self::InitialRead),
            Self::InitialRead => Some(Self::Mutated),
            Self::Mutated => Some(Self::FinalRead),
            Self::FinalRead => Some(Self::Done),
            Self::Done => None,
        }
    }
}

/// Network facts gathered while connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainContext {
    pub endpoint: Url,
    pub chain_id: u64,
    /// Gas price observed at connect time, in wei.
    pub gas_price: u128,
    pub adapter: BlockHeaderAdapter,
    pub client_version: String,
    /// `None` when the latest header could not be decoded with the installed adapter.
    pub latest_block: Option<u64>,
}

/// Per-transaction knobs shared by deployment and mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    /// Skip `eth_estimateGas` and use this limit.
    pub gas_limit: Option<u64>,
    pub receipt: ReceiptPolicy,
}

/// Summary of a successful run, written to `run.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub contract_name: String,
    pub contract_address: Address,
    pub chain_id: u64,
    pub deployer: Address,
    pub deploy_tx: B256,
    pub deploy_nonce: Nonce,
    pub initial_value: String,
    pub mutate_tx: B256,
    pub mutate_nonce: Nonce,
    pub final_value: String,
    pub stage: Stage,
    pub completed_at: String,
}

/// Compile `source` and persist the compiler artifacts into `artifacts_dir`.
pub async fn compile<P>(
    compiler: &P,
    source: &SourceFile,
    contract_name: &str,
    artifacts_dir: &Path,
) -> Result<CompiledArtifact, DeployError>
where
    P: Compiler + ?Sized,
{
    let artifact = compiler.compile(source, contract_name).await?;
    artifact.persist(artifacts_dir).await?;

    tracing::info!(
        contract = %artifact.contract_name,
        bytecode_len = artifact.bytecode.len() / 2,
        artifacts_dir = %artifacts_dir.display(),
        "Contract compiled"
    );
    Ok(artifact)
}

/// Prepare `client` for `chain_id` and check the endpoint.
///
/// The block header adapter is chosen from `chain_id` and installed before the first
/// request goes out.
pub async fn connect<C>(client: &mut C, endpoint: &Url, chain_id: u64) -> Result<ChainContext, DeployError>
where
    C: ChainClient + ?Sized,
{
    let adapter = BlockHeaderAdapter::for_chain(chain_id);
    if adapter != BlockHeaderAdapter::Standard {
        client.install_adapter(adapter);
    }

    let connection_error = |source: ChainError| DeployError::Connection {
        endpoint: endpoint.clone(),
        source,
    };

    let client_version = client.client_version().await.map_err(connection_error)?;
    let remote_chain_id = client.chain_id().await.map_err(connection_error)?;
    if remote_chain_id != chain_id {
        return Err(DeployError::Configuration(format!(
            "endpoint {endpoint} reports chain id {remote_chain_id}, configured {chain_id}"
        )));
    }

    let latest_block = match client.latest_block().await {
        Ok(header) => Some(header.number),
        Err(ChainError::ExtraDataLength { len }) => {
            tracing::warn!(
                chain_id,
                %adapter,
                extra_data_len = len,
                "Latest block header does not decode with the installed adapter; \
                 the chain may need the proof-of-authority adapter"
            );
            None
        }
        Err(err) => return Err(connection_error(err)),
    };
    let gas_price = client.gas_price().await.map_err(connection_error)?;

    tracing::info!(
        %endpoint,
        chain_id,
        %adapter,
        client_version = %client_version,
        latest_block = ?latest_block,
        gas_price,
        "Connected"
    );

    Ok(ChainContext {
        endpoint: endpoint.clone(),
        chain_id,
        gas_price,
        adapter,
        client_version,
        latest_block,
    })
}

/// Query the account's transaction count once and hand nonce tracking to a local counter.
pub async fn next_nonce<C>(
    client: &C,
    ctx: &ChainContext,
    account: Address,
) -> Result<NonceManager, DeployError>
where
    C: ChainClient + ?Sized,
{
    let count = client
        .transaction_count(account)
        .await
        .map_err(|source| DeployError::Connection {
            endpoint: ctx.endpoint.clone(),
            source,
        })?;

    tracing::warn!(
        address = %account,
        nonce = count,
        "Nonces are tracked locally for this run; no other process may send from this account"
    );
    Ok(NonceManager::new(account, count))
}

/// Deploy `artifact` with `nonce` and wait for the contract address.
pub async fn deploy<C, S>(
    client: &C,
    signer: &S,
    artifact: &CompiledArtifact,
    constructor_args: &[String],
    nonce: Nonce,
    ctx: &ChainContext,
    options: &TxOptions,
) -> Result<(DeployedContractHandle, TransactionReceipt), DeployError>
where
    C: ChainClient + ?Sized,
    S: TransactionSigner + ?Sized,
{
    tracing::info!(contract = %artifact.contract_name, %nonce, "Deploying contract...");

    let mut input = artifact
        .bytecode_bytes()
        .map_err(|e| DeployError::Deployment(TransactionError::Encoding(e.to_string())))?
        .to_vec();
    let args = contract::encode_constructor_args(&artifact.abi, constructor_args)
        .map_err(|e| DeployError::Deployment(TransactionError::Encoding(e)))?;
    input.extend_from_slice(&args);

    let receipt = submit(client, signer, ctx, nonce, TxKind::Create, input.into(), options)
        .await
        .map_err(DeployError::Deployment)?;

    let address = receipt.contract_address.ok_or(DeployError::Deployment(
        TransactionError::MissingContractAddress {
            hash: receipt.transaction_hash,
        },
    ))?;

    tracing::info!(
        contract_address = %address,
        tx_hash = %receipt.transaction_hash,
        block_number = receipt.block_number,
        "Contract deployed"
    );

    Ok((
        DeployedContractHandle::new(address, artifact.abi.clone()),
        receipt,
    ))
}

/// Call the view function `function` on the deployed contract.
pub async fn read_state<C>(
    client: &C,
    handle: &DeployedContractHandle,
    function: &str,
    args: &[String],
) -> Result<Vec<DynSolValue>, DeployError>
where
    C: ChainClient + ?Sized,
{
    let call_error = |reason: String| DeployError::Call {
        function: function.to_string(),
        source: ChainError::Decode {
            method: "eth_call".to_string(),
            reason,
        },
    };

    let (abi_function, data) = handle.encode_call(function, args).map_err(call_error)?;

    let output = client
        .call(&TransactionRequest {
            to: Some(TxKind::Call(handle.address)),
            input: TransactionInput::new(data),
            ..Default::default()
        })
        .await
        .map_err(|source| DeployError::Call {
            function: function.to_string(),
            source,
        })?;

    contract::decode_output(&abi_function, &output).map_err(call_error)
}

/// Send a transaction calling `function(args)` with `nonce` and wait for it to be mined.
#[allow(clippy::too_many_arguments)]
pub async fn mutate_state<C, S>(
    client: &C,
    signer: &S,
    handle: &DeployedContractHandle,
    nonce: Nonce,
    function: &str,
    args: &[String],
    ctx: &ChainContext,
    options: &TxOptions,
) -> Result<TransactionReceipt, DeployError>
where
    C: ChainClient + ?Sized,
    S: TransactionSigner + ?Sized,
{
    tracing::info!(function, ?args, %nonce, "Updating contract state...");

    let (_, data) = handle
        .encode_call(function, args)
        .map_err(|e| DeployError::Mutation(TransactionError::Encoding(e)))?;

    let receipt = submit(
        client,
        signer,
        ctx,
        nonce,
        TxKind::Call(handle.address),
        data,
        options,
    )
    .await
    .map_err(DeployError::Mutation)?;

    tracing::info!(
        tx_hash = %receipt.transaction_hash,
        block_number = receipt.block_number,
        gas_used = receipt.gas_used,
        "State updated"
    );
    Ok(receipt)
}

/// Build, sign, submit and confirm one legacy transaction.
async fn submit<C, S>(
    client: &C,
    signer: &S,
    ctx: &ChainContext,
    nonce: Nonce,
    to: TxKind,
    input: Bytes,
    options: &TxOptions,
) -> Result<TransactionReceipt, TransactionError>
where
    C: ChainClient + ?Sized,
    S: TransactionSigner + ?Sized,
{
    let gas_price = client.gas_price().await?;

    let gas_limit = match options.gas_limit {
        Some(limit) => limit,
        None => {
            client
                .estimate_gas(&TransactionRequest {
                    from: Some(signer.address()),
                    to: to.is_call().then_some(to),
                    input: TransactionInput::new(input.clone()),
                    ..Default::default()
                })
                .await?
        }
    };

    let tx = TxLegacy {
        chain_id: Some(ctx.chain_id),
        nonce: nonce.get(),
        gas_price,
        gas_limit,
        to,
        value: U256::ZERO,
        input,
    };

    let signed = signer.sign(tx).await?;
    let hash = client.send_raw_transaction(&signed.raw).await?;
    if hash != signed.hash {
        tracing::warn!(local = %signed.hash, remote = %hash, "Node returned an unexpected transaction hash");
    }

    tracing::info!(tx_hash = %hash, %nonce, gas_limit, gas_price, "Transaction sent, waiting for receipt...");

    let receipt = chain::wait_for_receipt(client, hash, &options.receipt).await?;
    if !receipt.succeeded() {
        return Err(TransactionError::Reverted { hash });
    }
    Ok(receipt)
}

/// Drives one full deployment run.
pub struct Sequencer<P, S> {
    config: DeployConfig,
    compiler: P,
    signer: S,
    stage: Stage,
}

impl<P, S> Sequencer<P, S>
where
    P: Compiler,
    S: TransactionSigner,
{
    /// Validate `config` against `signer` and build a sequencer.
    pub fn new(config: DeployConfig, compiler: P, signer: S) -> Result<Self, DeployError> {
        config.validate()?;

        if let Some(expected) = config.address {
            if expected != signer.address() {
                return Err(DeployError::Configuration(format!(
                    "private key belongs to {}, but the configured address is {expected}",
                    signer.address()
                )));
            }
        }

        Ok(Self {
            config,
            compiler,
            signer,
            stage: Stage::Uninitialized,
        })
    }

    /// The last stage reached.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Run every stage against `client`. On failure the sequencer stays at the last stage
    /// it completed.
    ///
    /// A sequencer runs once. Calling `run` again fails without touching the chain.
    pub async fn run<C>(&mut self, mut client: C) -> Result<RunReport, DeployError>
    where
        C: ChainClient,
    {
        if self.stage != Stage::Uninitialized {
            return Err(DeployError::Configuration(format!(
                "sequencer already ran (stopped at stage {})",
                self.stage
            )));
        }

        match self.drive(&mut client).await {
            Ok(report) => Ok(report),
            Err(err) => {
                tracing::error!(stage = %self.stage, error = %err, "Run aborted");
                Err(err)
            }
        }
    }

    async fn drive<C>(&mut self, client: &mut C) -> Result<RunReport, DeployError>
    where
        C: ChainClient,
    {
        let config = self.config.clone();
        let contract_name = config.contract_name()?;
        let options = TxOptions {
            gas_limit: config.gas_limit,
            receipt: config.receipt_policy(),
        };

        let source = SourceFile::read(&config.source).await?;
        let artifact = compile(&self.compiler, &source, &contract_name, &config.artifacts_dir).await?;
        self.advance(Stage::Compiled);

        let ctx = connect(client, &config.rpc_url, config.chain_id).await?;
        self.advance(Stage::Connected);

        let mut nonces = next_nonce(&*client, &ctx, self.signer.address()).await?;
        self.advance(Stage::NonceResolved);

        let deploy_nonce = nonces.reserve();
        let (handle, deploy_receipt) = deploy(
            &*client,
            &self.signer,
            &artifact,
            &[],
            deploy_nonce,
            &ctx,
            &options,
        )
        .await?;
        self.advance(Stage::Deployed);

        let initial = read_state(&*client, &handle, &config.getter, &[]).await?;
        let initial_value = contract::format_values(&initial);
        tracing::info!(value = %initial_value, "Initial stored value");
        self.advance(Stage::InitialRead);

        let mutate_nonce = nonces.reserve();
        let mutate_receipt = mutate_state(
            &*client,
            &self.signer,
            &handle,
            mutate_nonce,
            &config.setter,
            &config.new_value,
            &ctx,
            &options,
        )
        .await?;
        self.advance(Stage::Mutated);

        let updated = read_state(&*client, &handle, &config.getter, &[]).await?;
        let final_value = contract::format_values(&updated);
        tracing::info!(value = %final_value, "Updated stored value");
        self.advance(Stage::FinalRead);

        let mut report = RunReport {
            contract_name,
            contract_address: handle.address,
            chain_id: ctx.chain_id,
            deployer: self.signer.address(),
            deploy_tx: deploy_receipt.transaction_hash,
            deploy_nonce,
            initial_value,
            mutate_tx: mutate_receipt.transaction_hash,
            mutate_nonce,
            final_value,
            stage: Stage::Done,
            completed_at: chrono::Utc::now().to_rfc3339(),
        };

        let report_path = config.artifacts_dir.join(RUN_REPORT_FILENAME);
        write_json(&report_path, &report).await?;
        self.advance(Stage::Done);
        report.stage = self.stage;

        Ok(report)
    }

    fn advance(&mut self, next: Stage) {
        debug_assert_eq!(self.stage.next(), Some(next), "stages must advance in order");
        tracing::debug!(from = %self.stage, to = %next, "Stage complete");
        self.stage = next;
    }
}
