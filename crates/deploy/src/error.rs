//! Error types for the deployment run.
//!
//! Every variant of [`DeployError`] aborts the run. Nothing in this crate retries.

use std::path::PathBuf;

use alloy_core::primitives::B256;
use url::Url;

/// Top-level error returned by the sequencer.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("compilation failed")]
    Compilation(#[from] CompilationError),

    #[error("failed to connect to {endpoint}")]
    Connection {
        endpoint: Url,
        #[source]
        source: ChainError,
    },

    #[error("contract deployment failed")]
    Deployment(#[source] TransactionError),

    #[error("state mutation failed")]
    Mutation(#[source] TransactionError),

    #[error("read-only call to `{function}` failed")]
    Call {
        function: String,
        #[source]
        source: ChainError,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the external compiler collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CompilationError {
    #[error("failed to read contract source {}", path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("solc {version} is not available: {detail}")]
    VersionUnavailable { version: String, detail: String },

    #[error("failed to install solc {version}: {reason}")]
    Install { version: String, reason: String },

    #[error("failed to run {}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("solc exited with {status}: {stderr}")]
    CompilerExited { status: String, stderr: String },

    #[error("solc reported {} error(s):\n{}", messages.len(), messages.join("\n"))]
    Diagnostics { messages: Vec<String> },

    #[error("contract `{contract}` not found in compiler output for {file}")]
    ContractNotFound { file: String, contract: String },

    #[error("malformed compiler output: {0}")]
    MalformedOutput(String),
}

/// Failures of the chain client collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("failed to send {method} request")]
    Transport {
        method: String,
        #[source]
        source: alloy_transport::TransportError,
    },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("failed to decode {method} response: {reason}")]
    Decode { method: String, reason: String },

    #[error(
        "block extraData is {len} bytes, but should be 32; \
         the endpoint is likely a proof-of-authority chain"
    )]
    ExtraDataLength { len: usize },

    #[error("transaction {hash} was not mined within {waited_secs} seconds")]
    ReceiptTimeout { hash: B256, waited_secs: u64 },

    #[error("interrupted while waiting for transaction {hash}")]
    Interrupted { hash: B256 },
}

/// Failures of a single signed transaction.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("failed to sign transaction: {0}")]
    Signing(String),

    #[error("failed to encode call data: {0}")]
    Encoding(String),

    #[error("transaction {hash} was reverted")]
    Reverted { hash: B256 },

    #[error("receipt for {hash} carries no contract address")]
    MissingContractAddress { hash: B256 },
}

impl DeployError {
    /// Wrap an I/O failure on an artifact path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the failure was a receipt that never arrived.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Deployment(TransactionError::Chain(ChainError::ReceiptTimeout { .. }))
                | Self::Mutation(TransactionError::Chain(ChainError::ReceiptTimeout { .. }))
        )
    }
}
