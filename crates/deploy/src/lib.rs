//! solflow-deploy - Compile, deploy and exercise a Solidity contract on a local chain.
//!
//! The crate drives a single linear run: compile the source with `solc`, deploy the
//! bytecode, read the contract state, send one state-changing transaction and read the
//! state again. See [`Sequencer`] for the entry point.

pub mod chain;
mod compiler;
mod config;
pub mod contract;
mod error;
mod nonce;
mod sequencer;
mod signer;

pub use chain::{
    BlockHeader, BlockHeaderAdapter, ChainClient, HttpChainClient, ReceiptPolicy,
    TransactionReceipt, wait_for_receipt,
};
pub use compiler::{
    ABI_FILENAME, BYTECODE_FILENAME, COMPILED_CODE_FILENAME, CompiledArtifact, Compiler,
    DEFAULT_SOLC_VERSION, Solc, SourceFile,
};
pub use config::{CONFIG_FILENAME, DEFAULT_CHAIN_ID, DEFAULT_RPC_URL, DeployConfig, ENV_PREFIX};
pub use contract::DeployedContractHandle;
pub use error::{ChainError, CompilationError, DeployError, TransactionError};
pub use nonce::{Nonce, NonceManager};
pub use sequencer::{
    ChainContext, RUN_REPORT_FILENAME, RunReport, Sequencer, Stage, TxOptions, compile, connect,
    deploy, mutate_state, next_nonce, read_state,
};
pub use signer::{LocalAccount, PRIVATE_KEY_ENV, PrivateKey, SignedTransaction, TransactionSigner};
