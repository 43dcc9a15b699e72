//! Sequencer tests against an in-memory chain.
//!
//! The mock chain decodes every raw transaction it receives and simulates the
//! `SimpleStorage` contract, so these tests exercise real signing and ABI encoding.
//! Run with: cargo test --test sequencer_test

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256, keccak256};
use alloy_eips::eip2718::Decodable2718;
use alloy_rpc_types_eth::{Header, TransactionRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use solflow_deploy::{
    ABI_FILENAME, BYTECODE_FILENAME, BlockHeader, BlockHeaderAdapter, COMPILED_CODE_FILENAME,
    ChainClient, ChainError, CompilationError, CompiledArtifact, Compiler,
    DeployConfig, DeployError, LocalAccount, Nonce, PrivateKey, RUN_REPORT_FILENAME,
    ReceiptPolicy, RunReport, Sequencer, SourceFile, Stage, TransactionError, TransactionReceipt,
    TransactionSigner, TxOptions, connect, deploy, mutate_state, next_nonce, read_state,
};
use tempdir::TempDir;
use url::Url;

/// Anvil / Hardhat account #0.
const DEPLOYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Nonce the mock chain reports for the deployer at the start of a run.
const STARTING_NONCE: u64 = 5;

const SIMPLE_STORAGE_SOURCE: &str = r#"pragma solidity ^0.6.0;
contract SimpleStorage {
    uint256 favoriteNumber;
    function store(uint256 _favoriteNumber) public { favoriteNumber = _favoriteNumber; }
    function retrieve() public view returns (uint256) { return favoriteNumber; }
}
"#;

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn simple_storage_abi() -> Value {
    serde_json::json!([
        {
            "inputs": [],
            "name": "retrieve",
            "outputs": [{ "internalType": "uint256", "name": "", "type": "uint256" }],
            "stateMutability": "view",
            "type": "function"
        },
        {
            "inputs": [{ "internalType": "uint256", "name": "_favoriteNumber", "type": "uint256" }],
            "name": "store",
            "outputs": [],
            "stateMutability": "nonpayable",
            "type": "function"
        }
    ])
}

/// Compiler that returns a canned standard-json output.
struct StubCompiler;

#[async_trait]
impl Compiler for StubCompiler {
    async fn compile(
        &self,
        source: &SourceFile,
        contract: &str,
    ) -> Result<CompiledArtifact, CompilationError> {
        let metadata = serde_json::json!({ "output": { "abi": simple_storage_abi() } });
        let output = serde_json::json!({
            "contracts": {
                source.file_name.as_str(): {
                    "SimpleStorage": {
                        "metadata": metadata.to_string(),
                        "evm": {
                            "bytecode": {
                                "object": "608060405234801561001057600080fd5b5060c78061001f6000396000f3fe",
                                "sourceMap": "25:212:0:-:0;;;;;;;;;;;;;;;;;;;"
                            }
                        }
                    }
                }
            }
        });
        CompiledArtifact::from_standard_json(output, &source.file_name, contract)
    }
}

/// Mutable state of the mock chain, shared between the test and the client.
#[derive(Default)]
struct ChainState {
    /// Every RPC method and adapter installation, in call order.
    events: Vec<String>,
    account_nonce: u64,
    /// Nonces of accepted transactions, in submission order.
    submitted_nonces: Vec<u64>,
    receipts: HashMap<B256, TransactionReceipt>,
    storage: HashMap<Address, U256>,
    block_number: u64,
}

#[derive(Clone)]
struct MockChain {
    chain_id: u64,
    deployer: Address,
    /// Length of the `extraData` field in returned headers; 97 mimics clique.
    extra_data_len: usize,
    /// Only this many transactions get a receipt; later ones are never mined.
    mined_limit: Option<usize>,
    /// Mark every receipt as reverted.
    revert: bool,
    adapter: BlockHeaderAdapter,
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    fn new(chain_id: u64, deployer: Address) -> Self {
        Self {
            chain_id,
            deployer,
            extra_data_len: 32,
            mined_limit: None,
            revert: false,
            adapter: BlockHeaderAdapter::default(),
            state: Arc::new(Mutex::new(ChainState {
                account_nonce: STARTING_NONCE,
                block_number: 1,
                ..ChainState::default()
            })),
        }
    }

    fn record(&self, event: &str) {
        self.state.lock().unwrap().events.push(event.to_string());
    }

    fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn submitted_nonces(&self) -> Vec<u64> {
        self.state.lock().unwrap().submitted_nonces.clone()
    }

    fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

fn rpc_error(message: &str) -> ChainError {
    ChainError::Rpc {
        code: -32000,
        message: message.to_string(),
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn install_adapter(&mut self, adapter: BlockHeaderAdapter) {
        self.record(&format!("install:{adapter}"));
        self.adapter = adapter;
    }

    fn adapter(&self) -> BlockHeaderAdapter {
        self.adapter
    }

    async fn client_version(&self) -> Result<String, ChainError> {
        self.record("web3_clientVersion");
        Ok("EthereumJS TestRPC/v2.13.2/ethereum-js".to_string())
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.record("eth_chainId");
        Ok(self.chain_id)
    }

    async fn latest_block(&self) -> Result<BlockHeader, ChainError> {
        self.record("eth_getBlockByNumber");
        let number = self.state.lock().unwrap().block_number;
        self.adapter.decode_header(&Header {
            hash: B256::repeat_byte(0xbb),
            inner: alloy_consensus::Header {
                number,
                timestamp: 0x6500_0000,
                extra_data: Bytes::from(vec![0; self.extra_data_len]),
                ..Default::default()
            },
            total_difficulty: None,
            size: None,
        })
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64, ChainError> {
        self.record("eth_getTransactionCount");
        Ok(self.state.lock().unwrap().account_nonce)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.record("eth_gasPrice");
        Ok(20_000_000_000)
    }

    async fn estimate_gas(&self, _request: &TransactionRequest) -> Result<u64, ChainError> {
        self.record("eth_estimateGas");
        Ok(150_000)
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
        self.record("eth_sendRawTransaction");

        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
            .map_err(|e| rpc_error(&format!("invalid raw transaction: {e}")))?;
        if envelope.chain_id() != Some(self.chain_id) {
            return Err(rpc_error("invalid chain id"));
        }

        let mut state = self.state.lock().unwrap();
        if envelope.nonce() != state.account_nonce {
            return Err(rpc_error("nonce too low"));
        }
        state.account_nonce += 1;
        state.submitted_nonces.push(envelope.nonce());

        let contract_address = match envelope.kind() {
            TxKind::Create => {
                let address = self.deployer.create(envelope.nonce());
                state.storage.insert(address, U256::ZERO);
                Some(address)
            }
            TxKind::Call(to) => {
                let input = envelope.input();
                if input.len() == 36 && input[..4] == selector("store(uint256)") {
                    state.storage.insert(to, U256::from_be_slice(&input[4..]));
                }
                None
            }
        };

        let hash = *envelope.tx_hash();
        let mined = self
            .mined_limit
            .is_none_or(|limit| state.submitted_nonces.len() <= limit);
        if mined {
            state.block_number += 1;
            let receipt = TransactionReceipt {
                transaction_hash: hash,
                block_number: state.block_number,
                contract_address,
                status: !self.revert,
                gas_used: 21_000,
            };
            state.receipts.insert(hash, receipt);
        }

        Ok(hash)
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.record("eth_getTransactionReceipt");
        Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
    }

    async fn call(&self, request: &TransactionRequest) -> Result<Bytes, ChainError> {
        self.record("eth_call");
        let to = request
            .to
            .and_then(|kind| kind.to().copied())
            .ok_or_else(|| rpc_error("missing call target"))?;
        let data = request.input.input().cloned().unwrap_or_default();
        let state = self.state.lock().unwrap();
        let value = state
            .storage
            .get(&to)
            .ok_or_else(|| rpc_error("no contract at address"))?;

        if data.as_ref() == selector("retrieve()") {
            Ok(Bytes::from(value.to_be_bytes::<32>().to_vec()))
        } else {
            Err(rpc_error("execution reverted"))
        }
    }
}

/// Per-test scratch space holding the contract source and the artifacts directory.
struct TestContext {
    _dir: TempDir,
    source: PathBuf,
    artifacts_dir: PathBuf,
    account: LocalAccount,
}

impl TestContext {
    fn new(prefix: &str) -> Result<Self> {
        init_test_tracing();

        let dir = TempDir::new(prefix).context("Failed to create temp dir")?;
        let source = dir.path().join("SimpleStorage.sol");
        std::fs::write(&source, SIMPLE_STORAGE_SOURCE)?;
        let artifacts_dir = dir.path().join("artifacts");
        let account = LocalAccount::new(&PrivateKey::new(DEPLOYER_KEY))?;

        Ok(Self {
            _dir: dir,
            source,
            artifacts_dir,
            account,
        })
    }

    fn config(&self, chain_id: u64) -> DeployConfig {
        DeployConfig {
            chain_id,
            source: self.source.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
            receipt_timeout_secs: 0,
            poll_interval_ms: 10,
            ..DeployConfig::default()
        }
    }

    fn chain(&self, chain_id: u64) -> MockChain {
        MockChain::new(chain_id, self.account.address())
    }

    fn sequencer(&self, config: DeployConfig) -> Result<Sequencer<StubCompiler, LocalAccount>> {
        Ok(Sequencer::new(config, StubCompiler, self.account.clone())?)
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse JSON")
}

#[tokio::test]
async fn test_full_run_stores_and_reads_back() -> Result<()> {
    let ctx = TestContext::new("solflow-full-run")?;
    let chain = ctx.chain(1337);
    let mut sequencer = ctx.sequencer(ctx.config(1337))?;

    let report = sequencer.run(chain.clone()).await?;

    assert_eq!(sequencer.stage(), Stage::Done);
    assert_eq!(report.stage, Stage::Done);
    assert_eq!(report.contract_name, "SimpleStorage");
    assert_eq!(report.initial_value, "0");
    assert_eq!(report.final_value, "15");
    assert_eq!(report.deployer, ctx.account.address());
    assert_eq!(
        report.contract_address,
        ctx.account.address().create(STARTING_NONCE)
    );

    // The nonce is fetched once and incremented locally.
    assert_eq!(report.deploy_nonce, Nonce(STARTING_NONCE));
    assert_eq!(report.mutate_nonce, Nonce(STARTING_NONCE + 1));
    assert_eq!(chain.submitted_nonces(), vec![STARTING_NONCE, STARTING_NONCE + 1]);
    assert_eq!(chain.count("eth_getTransactionCount"), 1);
    assert_eq!(chain.count("eth_sendRawTransaction"), 2);

    // Ganache needs no header adapter.
    assert!(!chain.events().iter().any(|e| e.starts_with("install:")));

    Ok(())
}

#[tokio::test]
async fn test_full_run_persists_operator_files() -> Result<()> {
    let ctx = TestContext::new("solflow-files")?;
    let mut sequencer = ctx.sequencer(ctx.config(1337))?;

    let report = sequencer.run(ctx.chain(1337)).await?;

    let bytecode = std::fs::read_to_string(ctx.artifacts_dir.join(BYTECODE_FILENAME))?;
    assert!(!bytecode.is_empty());
    assert_eq!(bytecode.len() % 2, 0);
    assert!(bytecode.chars().all(|c| c.is_ascii_hexdigit()));

    let abi = read_json(&ctx.artifacts_dir.join(ABI_FILENAME))?;
    let names: Vec<&str> = abi
        .as_array()
        .context("abi.json is not an array")?
        .iter()
        .filter_map(|item| item["name"].as_str())
        .collect();
    assert!(names.contains(&"retrieve"));
    assert!(names.contains(&"store"));

    let compiled = read_json(&ctx.artifacts_dir.join(COMPILED_CODE_FILENAME))?;
    assert!(compiled["contracts"]["SimpleStorage.sol"]["SimpleStorage"].is_object());

    let saved: RunReport = serde_json::from_value(read_json(
        &ctx.artifacts_dir.join(RUN_REPORT_FILENAME),
    )?)?;
    assert_eq!(saved.contract_address, report.contract_address);
    assert_eq!(saved.final_value, "15");

    Ok(())
}

#[tokio::test]
async fn test_proof_of_authority_adapter_installed_first() -> Result<()> {
    let ctx = TestContext::new("solflow-poa")?;
    let mut chain = ctx.chain(4);
    chain.extra_data_len = 97;
    let mut sequencer = ctx.sequencer(ctx.config(4))?;

    let report = sequencer.run(chain.clone()).await?;
    assert_eq!(report.final_value, "15");

    let events = chain.events();
    assert_eq!(events.first().map(String::as_str), Some("install:proof-of-authority"));
    assert_eq!(chain.count("install:proof-of-authority"), 1);

    Ok(())
}

#[tokio::test]
async fn test_connect_selects_adapter_from_chain_id() -> Result<()> {
    let endpoint = Url::parse("http://127.0.0.1:7545")?;

    let mut rinkeby = MockChain::new(4, Address::ZERO);
    rinkeby.extra_data_len = 97;
    let chain_ctx = connect(&mut rinkeby, &endpoint, 4).await?;
    assert_eq!(chain_ctx.adapter, BlockHeaderAdapter::ProofOfAuthority);
    assert_eq!(rinkeby.events()[0], "install:proof-of-authority");

    let mut ganache = MockChain::new(1337, Address::ZERO);
    let chain_ctx = connect(&mut ganache, &endpoint, 1337).await?;
    assert_eq!(chain_ctx.adapter, BlockHeaderAdapter::Standard);
    assert_eq!(chain_ctx.client_version, "EthereumJS TestRPC/v2.13.2/ethereum-js");
    assert_eq!(chain_ctx.gas_price, 20_000_000_000);
    assert_eq!(chain_ctx.latest_block, Some(1));
    assert!(!ganache.events().iter().any(|e| e.starts_with("install:")));

    Ok(())
}

#[tokio::test]
async fn test_clique_headers_without_adapter_still_deploy() -> Result<()> {
    // geth --dev and similar chains carry clique extraData outside chain ids 4 and 5.
    let ctx = TestContext::new("solflow-clique")?;
    let mut chain = ctx.chain(1337);
    chain.extra_data_len = 97;
    let endpoint = Url::parse("http://127.0.0.1:7545")?;

    let chain_ctx = connect(&mut chain.clone(), &endpoint, 1337).await?;
    assert_eq!(chain_ctx.adapter, BlockHeaderAdapter::Standard);
    assert_eq!(chain_ctx.latest_block, None);

    let mut sequencer = ctx.sequencer(ctx.config(1337))?;
    let report = sequencer.run(chain.clone()).await?;

    assert_eq!(sequencer.stage(), Stage::Done);
    assert_eq!(report.final_value, "15");
    assert_eq!(chain.count("eth_sendRawTransaction"), 2);

    Ok(())
}

#[tokio::test]
async fn test_sequencer_runs_once() -> Result<()> {
    let ctx = TestContext::new("solflow-run-once")?;
    let mut sequencer = ctx.sequencer(ctx.config(1337))?;

    let err = sequencer.run(ctx.chain(31337)).await.unwrap_err();
    assert!(matches!(err, DeployError::Configuration(_)));
    assert_eq!(sequencer.stage(), Stage::Compiled);

    // A second run is refused before any request reaches the chain.
    let chain = ctx.chain(1337);
    let err = sequencer.run(chain.clone()).await.unwrap_err();
    assert!(matches!(err, DeployError::Configuration(_)));
    assert_eq!(sequencer.stage(), Stage::Compiled);
    assert!(chain.events().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_completed_sequencer_refuses_second_run() -> Result<()> {
    let ctx = TestContext::new("solflow-run-twice")?;
    let chain = ctx.chain(1337);
    let mut sequencer = ctx.sequencer(ctx.config(1337))?;

    sequencer.run(chain.clone()).await?;
    let err = sequencer.run(chain.clone()).await.unwrap_err();

    assert!(matches!(err, DeployError::Configuration(_)));
    assert_eq!(sequencer.stage(), Stage::Done);
    assert_eq!(chain.count("eth_sendRawTransaction"), 2);

    Ok(())
}

#[tokio::test]
async fn test_deploy_times_out_without_retry() -> Result<()> {
    let ctx = TestContext::new("solflow-deploy-timeout")?;
    let mut chain = ctx.chain(1337);
    chain.mined_limit = Some(0);
    let mut sequencer = ctx.sequencer(ctx.config(1337))?;

    let err = sequencer.run(chain.clone()).await.unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(err, DeployError::Deployment(_)));
    assert_eq!(sequencer.stage(), Stage::NonceResolved);
    // The transaction is submitted exactly once.
    assert_eq!(chain.count("eth_sendRawTransaction"), 1);

    Ok(())
}

#[tokio::test]
async fn test_mutation_times_out_without_retry() -> Result<()> {
    let ctx = TestContext::new("solflow-mutate-timeout")?;
    let mut chain = ctx.chain(1337);
    chain.mined_limit = Some(1);
    let mut sequencer = ctx.sequencer(ctx.config(1337))?;

    let err = sequencer.run(chain.clone()).await.unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(err, DeployError::Mutation(_)));
    assert_eq!(sequencer.stage(), Stage::InitialRead);
    assert_eq!(chain.submitted_nonces(), vec![STARTING_NONCE, STARTING_NONCE + 1]);

    Ok(())
}

#[tokio::test]
async fn test_reverted_deployment_aborts() -> Result<()> {
    let ctx = TestContext::new("solflow-revert")?;
    let mut chain = ctx.chain(1337);
    chain.revert = true;
    let mut sequencer = ctx.sequencer(ctx.config(1337))?;

    let err = sequencer.run(chain).await.unwrap_err();

    assert!(matches!(
        err,
        DeployError::Deployment(TransactionError::Reverted { .. })
    ));
    assert_eq!(sequencer.stage(), Stage::NonceResolved);

    Ok(())
}

#[tokio::test]
async fn test_chain_id_mismatch_is_configuration_error() -> Result<()> {
    let ctx = TestContext::new("solflow-chain-mismatch")?;
    let mut sequencer = ctx.sequencer(ctx.config(1337))?;

    let err = sequencer.run(ctx.chain(31337)).await.unwrap_err();

    assert!(matches!(err, DeployError::Configuration(_)));
    assert_eq!(sequencer.stage(), Stage::Compiled);

    Ok(())
}

#[tokio::test]
async fn test_missing_source_is_compilation_error() -> Result<()> {
    let ctx = TestContext::new("solflow-missing-source")?;
    let config = DeployConfig {
        source: ctx.source.with_file_name("Missing.sol"),
        ..ctx.config(1337)
    };
    let chain = ctx.chain(1337);
    let mut sequencer = ctx.sequencer(config)?;

    let err = sequencer.run(chain.clone()).await.unwrap_err();

    assert!(matches!(
        err,
        DeployError::Compilation(CompilationError::ReadSource { .. })
    ));
    assert_eq!(sequencer.stage(), Stage::Uninitialized);
    assert!(chain.events().is_empty());

    Ok(())
}

#[test]
fn test_address_must_match_private_key() -> Result<()> {
    let ctx = TestContext::new("solflow-address")?;
    let config = DeployConfig {
        address: Some(Address::repeat_byte(0x11)),
        ..ctx.config(1337)
    };

    let result = Sequencer::new(config, StubCompiler, ctx.account.clone());
    assert!(matches!(result, Err(DeployError::Configuration(_))));

    let config = DeployConfig {
        address: Some(ctx.account.address()),
        ..ctx.config(1337)
    };
    assert!(Sequencer::new(config, StubCompiler, ctx.account.clone()).is_ok());

    Ok(())
}

#[tokio::test]
async fn test_operations_step_by_step() -> Result<()> {
    let ctx = TestContext::new("solflow-steps")?;
    let mut chain = ctx.chain(1337);
    let endpoint = Url::parse("http://127.0.0.1:7545")?;
    let options = TxOptions {
        gas_limit: Some(500_000),
        receipt: ReceiptPolicy {
            interruptible: false,
            ..ReceiptPolicy::default()
        },
    };

    let source = SourceFile::read(&ctx.source).await?;
    let artifact = StubCompiler.compile(&source, "SimpleStorage").await?;

    let chain_ctx = connect(&mut chain, &endpoint, 1337).await?;
    let mut nonces = next_nonce(&chain, &chain_ctx, ctx.account.address()).await?;

    let (handle, receipt) = deploy(
        &chain,
        &ctx.account,
        &artifact,
        &[],
        nonces.reserve(),
        &chain_ctx,
        &options,
    )
    .await?;
    assert_eq!(receipt.contract_address, Some(handle.address));

    let before = read_state(&chain, &handle, "retrieve", &[]).await?;
    assert_eq!(solflow_deploy::contract::format_values(&before), "0");

    mutate_state(
        &chain,
        &ctx.account,
        &handle,
        nonces.reserve(),
        "store",
        &["42".to_string()],
        &chain_ctx,
        &options,
    )
    .await?;

    let after = read_state(&chain, &handle, "retrieve", &[]).await?;
    assert_eq!(solflow_deploy::contract::format_values(&after), "42");

    // Gas limit override skips estimation.
    assert_eq!(chain.count("eth_estimateGas"), 0);

    Ok(())
}

#[tokio::test]
async fn test_read_state_unknown_function() -> Result<()> {
    let ctx = TestContext::new("solflow-unknown-fn")?;
    let chain = ctx.chain(1337);
    let source = SourceFile::read(&ctx.source).await?;
    let artifact = StubCompiler.compile(&source, "SimpleStorage").await?;
    let handle = solflow_deploy::DeployedContractHandle::new(Address::repeat_byte(0x22), artifact.abi);

    let err = read_state(&chain, &handle, "favoriteNumber", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Call { .. }));
    // Nothing reaches the node when the function is not in the ABI.
    assert_eq!(chain.count("eth_call"), 0);

    Ok(())
}
