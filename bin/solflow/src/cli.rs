use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::Parser;
use solflow_deploy::DeployConfig;
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "solflow")]
#[command(
    author,
    version,
    about = "Compile, deploy and exercise a Solidity contract on a local chain"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "SOLFLOW_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a configuration file, or a directory containing `solflow.toml`.
    #[arg(short, long, env = "SOLFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the effective configuration to this path before running.
    #[arg(long)]
    pub save_config: Option<PathBuf>,

    /// JSON-RPC endpoint of the target network.
    #[arg(long, alias = "rpc")]
    pub rpc_url: Option<Url>,

    /// Chain id used for signing. Chain ids 4 and 5 enable the proof-of-authority header adapter.
    #[arg(long)]
    pub chain_id: Option<u64>,

    /// Expected deployer address. The run refuses to start if the key derives another one.
    #[arg(long)]
    pub address: Option<Address>,

    /// Path to the Solidity source file.
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Contract to deploy. Defaults to the source file name.
    #[arg(long)]
    pub contract: Option<String>,

    /// solc release to compile with.
    #[arg(long)]
    pub solc_version: Option<String>,

    /// Explicit solc binary.
    #[arg(long)]
    pub solc_path: Option<PathBuf>,

    /// Fail instead of downloading solc when no local binary matches.
    #[arg(long)]
    pub no_solc_install: bool,

    /// Directory receiving the compiler artifacts and the run report.
    #[arg(short, long, alias = "out")]
    pub artifacts_dir: Option<PathBuf>,

    /// View function read before and after the update.
    #[arg(long)]
    pub getter: Option<String>,

    /// Function called by the state-changing transaction.
    #[arg(long)]
    pub setter: Option<String>,

    /// Arguments passed to the setter. Repeat for several arguments.
    #[arg(long = "value", value_name = "VALUE")]
    pub values: Vec<String>,

    /// Gas limit for both transactions. Estimated by the node when unset.
    #[arg(long)]
    pub gas_limit: Option<u64>,

    /// Seconds to wait for each transaction receipt.
    #[arg(long)]
    pub receipt_timeout: Option<u64>,

    /// Milliseconds between two receipt polls.
    #[arg(long)]
    pub poll_interval: Option<u64>,
}

impl Cli {
    /// Override `config` with every flag given on the command line.
    pub fn apply(&self, config: &mut DeployConfig) {
        if let Some(rpc_url) = &self.rpc_url {
            config.rpc_url = rpc_url.clone();
        }
        if let Some(chain_id) = self.chain_id {
            config.chain_id = chain_id;
        }
        if let Some(address) = self.address {
            config.address = Some(address);
        }
        if let Some(source) = &self.source {
            config.source = source.clone();
        }
        if let Some(contract) = &self.contract {
            config.contract = Some(contract.clone());
        }
        if let Some(solc_version) = &self.solc_version {
            config.solc_version = solc_version.clone();
        }
        if let Some(solc_path) = &self.solc_path {
            config.solc_path = Some(solc_path.clone());
        }
        if self.no_solc_install {
            config.solc_install = false;
        }
        if let Some(artifacts_dir) = &self.artifacts_dir {
            config.artifacts_dir = artifacts_dir.clone();
        }
        if let Some(getter) = &self.getter {
            config.getter = getter.clone();
        }
        if let Some(setter) = &self.setter {
            config.setter = setter.clone();
        }
        if !self.values.is_empty() {
            config.new_value = self.values.clone();
        }
        if let Some(gas_limit) = self.gas_limit {
            config.gas_limit = Some(gas_limit);
        }
        if let Some(timeout) = self.receipt_timeout {
            config.receipt_timeout_secs = timeout;
        }
        if let Some(interval) = self.poll_interval {
            config.poll_interval_ms = interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "solflow",
            "--chain-id",
            "4",
            "--value",
            "42",
            "--artifacts-dir",
            "out",
            "--address",
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
        ]);
        let mut config = DeployConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.chain_id, 4);
        assert_eq!(config.new_value, vec!["42"]);
        assert_eq!(config.artifacts_dir, PathBuf::from("out"));
        assert!(config.address.is_some());
        // Untouched values keep their defaults.
        assert_eq!(config.setter, "store");
        assert!(config.solc_install);

        let cli = Cli::parse_from(["solflow", "--no-solc-install"]);
        cli.apply(&mut config);
        assert!(!config.solc_install);
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        assert!(Cli::try_parse_from(["solflow", "--address", "not-an-address"]).is_err());
    }
}
