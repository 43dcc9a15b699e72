//! solflow compiles a Solidity contract, deploys it to a local chain and exercises it once.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;

use cli::Cli;
use solflow_deploy::{
    DeployConfig, HttpChainClient, LocalAccount, PrivateKey, RunReport, Sequencer, Solc,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load `.env` before anything reads the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = DeployConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    if let Some(path) = &cli.save_config {
        config.save_to_file(path)?;
    }

    let key = PrivateKey::from_env()?;
    let account = LocalAccount::new(&key).context("Failed to load the deployer account")?;

    let solc = Solc::resolve(
        &config.solc_version,
        config.solc_path.as_deref(),
        config.solc_install,
    )
    .await?;
    let client = HttpChainClient::new(config.rpc_url.clone());

    tracing::info!(
        rpc_url = %config.rpc_url,
        chain_id = config.chain_id,
        source = %config.source.display(),
        solc = %solc.binary().display(),
        "Starting deployment run..."
    );

    let mut sequencer = Sequencer::new(config, solc, account)?;
    let report = sequencer.run(client).await?;

    println!("{}", summary(&report));
    Ok(())
}

fn summary(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Step", "Value"]);
    table.add_row(vec!["Contract".to_string(), report.contract_name.clone()]);
    table.add_row(vec!["Address".to_string(), report.contract_address.to_string()]);
    table.add_row(vec!["Chain id".to_string(), report.chain_id.to_string()]);
    table.add_row(vec!["Deployer".to_string(), report.deployer.to_string()]);
    table.add_row(vec![
        format!("Deploy tx (nonce {})", report.deploy_nonce),
        report.deploy_tx.to_string(),
    ]);
    table.add_row(vec!["Initial value".to_string(), report.initial_value.clone()]);
    table.add_row(vec![
        format!("Update tx (nonce {})", report.mutate_nonce),
        report.mutate_tx.to_string(),
    ]);
    table.add_row(vec!["Final value".to_string(), report.final_value.clone()]);
    table
}
