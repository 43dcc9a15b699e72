//! Run configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then `SOLFLOW_*`
//! environment variables. The binary applies its command line flags on top. The private
//! key is not part of this struct; see [`crate::PrivateKey`].

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{DEFAULT_SOLC_VERSION, DeployError, chain::ReceiptPolicy};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "solflow.toml";

/// Prefix of the environment variables read by [`DeployConfig::load`].
pub const ENV_PREFIX: &str = "SOLFLOW_";

/// Ganache's default HTTP endpoint.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:7545";

/// Ganache's default chain id.
pub const DEFAULT_CHAIN_ID: u64 = 1337;

/// Everything a deployment run needs besides the private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// JSON-RPC endpoint of the target network.
    pub rpc_url: Url,
    /// Chain id used for EIP-155 signing. Must match the endpoint's `eth_chainId`.
    pub chain_id: u64,
    /// Deployer address. When set, it must match the address derived from the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,

    /// Path to the Solidity source.
    pub source: PathBuf,
    /// Contract to deploy. Defaults to the source file stem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// solc release to compile with.
    pub solc_version: String,
    /// Explicit solc binary, skipping the lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solc_path: Option<PathBuf>,
    /// Download `solc_version` when no local binary matches.
    pub solc_install: bool,
    /// Directory receiving `compiled_code.json`, `bytecode.txt`, `abi.json` and `run.json`.
    pub artifacts_dir: PathBuf,

    /// View function read before and after the mutation.
    pub getter: String,
    /// Function called by the mutating transaction.
    pub setter: String,
    /// Arguments passed to `setter`, parsed against its ABI.
    ///
    /// A single scalar is accepted too, so `SOLFLOW_NEW_VALUE=15` works.
    #[serde(deserialize_with = "setter_args")]
    pub new_value: Vec<String>,

    /// Gas limit override. Estimated through the node when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    /// How long to wait for each receipt.
    pub receipt_timeout_secs: u64,
    /// Delay between two receipt polls.
    pub poll_interval_ms: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            rpc_url: Url::parse(DEFAULT_RPC_URL).expect("default RPC URL is valid"),
            chain_id: DEFAULT_CHAIN_ID,
            address: None,
            source: PathBuf::from("contracts/SimpleStorage.sol"),
            contract: None,
            solc_version: DEFAULT_SOLC_VERSION.to_string(),
            solc_path: None,
            solc_install: true,
            artifacts_dir: PathBuf::from("."),
            getter: "retrieve".to_string(),
            setter: "store".to_string(),
            new_value: vec!["15".to_string()],
            gas_limit: None,
            receipt_timeout_secs: 120,
            poll_interval_ms: 1000,
        }
    }
}

impl DeployConfig {
    /// Merge defaults, the TOML file at `path` (if given) and `SOLFLOW_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, DeployError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            let path = if path.is_dir() {
                path.join(CONFIG_FILENAME)
            } else {
                path.to_path_buf()
            };
            if !path.exists() {
                return Err(DeployError::Configuration(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(&path));
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| DeployError::Configuration(e.to_string()))?;

        tracing::debug!(config = ?config, "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration as TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<(), DeployError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DeployError::Configuration(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content).map_err(|e| DeployError::io(path, e))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Name of the contract to pick from the compiler output.
    pub fn contract_name(&self) -> Result<String, DeployError> {
        if let Some(contract) = &self.contract {
            return Ok(contract.clone());
        }
        self.source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DeployError::Configuration(format!(
                    "cannot derive a contract name from {}",
                    self.source.display()
                ))
            })
    }

    pub fn receipt_policy(&self) -> ReceiptPolicy {
        ReceiptPolicy {
            timeout: Duration::from_secs(self.receipt_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..ReceiptPolicy::default()
        }
    }

    /// Check values that cannot be caught by deserialization.
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.getter.is_empty() || self.setter.is_empty() {
            return Err(DeployError::Configuration(
                "getter and setter function names must not be empty".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(DeployError::Configuration(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if !matches!(self.rpc_url.scheme(), "http" | "https") {
            return Err(DeployError::Configuration(format!(
                "unsupported RPC URL scheme `{}`",
                self.rpc_url.scheme()
            )));
        }
        self.contract_name()?;
        Ok(())
    }
}

/// A setter argument as it may appear in TOML or in the environment.
#[derive(Deserialize)]
#[serde(untagged)]
enum SetterArg {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
}

impl From<SetterArg> for String {
    fn from(arg: SetterArg) -> Self {
        match arg {
            SetterArg::Text(text) => text,
            SetterArg::Unsigned(value) => value.to_string(),
            SetterArg::Signed(value) => value.to_string(),
            SetterArg::Float(value) => value.to_string(),
            SetterArg::Bool(value) => value.to_string(),
        }
    }
}

fn setter_args<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<SetterArg>),
        One(SetterArg),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(args) => args.into_iter().map(String::from).collect(),
        OneOrMany::One(arg) => vec![arg.into()],
    })
}
