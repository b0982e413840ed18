//! migrant deploys versioned contracts to EVM networks, in dependency order, exactly once.

mod cli;
mod config;
mod output;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio::sync::watch;

use cli::{Cli, Command, DeployArgs, OutputFormat, StatusArgs};
use migrant_deploy::{
    DeclarationSet, Deployer, DeploymentLedger, JsonRpcNetwork, JsonRpcNetworkConfig,
    MigrantConfig, TransactionSigner,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Init { dir } => {
            let path = MigrantConfig::scaffold()?.write_new(&dir)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Command::Deploy(args) => deploy(cli.config.as_deref(), args).await,
        Command::Status(args) => status(cli.config.as_deref(), args),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "migrant", &mut std::io::stdout());
            Ok(())
        }
    }
}

async fn deploy(config_path: Option<&Path>, args: DeployArgs) -> Result<()> {
    let config = config::load_config(config_path)?;
    let network_config = config.network(&args.network)?;
    let declarations = DeclarationSet::load_from_file(&args.declarations)?;
    let deployer = Deployer::from_config(&config, &args.network)?;

    if args.dry_run {
        let plan = deployer.plan(&declarations)?;

        if !plan.satisfied.is_empty() {
            println!("Already deployed on {}:", args.network);
            println!("{}", output::satisfied_table(&plan.satisfied));
        }
        if plan.is_complete() {
            println!("Nothing to deploy on {}.", args.network);
        } else {
            println!("Execution plan for {}:", args.network);
            println!("{}", output::plan_table(&plan));
        }
        return Ok(());
    }

    let network = JsonRpcNetwork::new(JsonRpcNetworkConfig::new(network_config.rpc_url.clone()))?;
    let signer = network_config
        .signer
        .load()
        .with_context(|| format!("Failed to load the signer for `{}`", args.network))?;

    tracing::info!(
        network = %args.network,
        rpc_url = %network.url(),
        deployer = %signer.address(),
        "Connecting..."
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl+C received, stopping once the current step is recorded...");
            let _ = cancel_tx.send(true);
        }
    });

    let outcome = deployer
        .deploy(&declarations, &network, &signer, Some(cancel_rx))
        .await
        .with_context(|| format!("Deployment to `{}` failed", args.network))?;

    if outcome.reconciled.is_empty() && outcome.deployed.is_empty() {
        println!("Nothing to deploy on {}.", args.network);
    } else {
        println!(
            "{}",
            output::records_table(outcome.reconciled.iter().chain(&outcome.deployed))
        );
    }

    Ok(())
}

fn status(config_path: Option<&Path>, args: StatusArgs) -> Result<()> {
    let config = config::load_config(config_path)?;
    config.network(&args.network)?;
    let ledger = DeploymentLedger::snapshot(config.ledger_path(&args.network), &args.network)?;
    let pending = ledger.unresolved_pending();

    let Some(declarations_path) = &args.declarations else {
        let records: Vec<_> = ledger.records().collect();
        match args.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
            OutputFormat::Table => {
                println!("{}", output::records_table(records));
                if !pending.is_empty() {
                    println!("Unresolved submissions (settled by the next deploy):");
                    println!("{}", output::pending_table(&pending));
                }
            }
        }
        return Ok(());
    };

    let declarations = DeclarationSet::load_from_file(declarations_path)?;
    let plan = Deployer::from_config(&config, &args.network)?.plan(&declarations)?;

    match args.format {
        OutputFormat::Json => {
            let deployed: Vec<_> = plan
                .satisfied
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.name,
                        "address": s.address,
                        "tx_hash": s.tx_hash,
                        "drift": s.drift.to_string(),
                    })
                })
                .collect();
            let missing: Vec<_> = plan.iter().map(|step| step.name.as_str()).collect();
            let report = serde_json::json!({
                "network": args.network,
                "deployed": deployed,
                "missing": missing,
                "pending": pending,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            println!("{}", output::satisfied_table(&plan.satisfied));
            if !plan.is_complete() {
                println!("Not yet deployed:");
                println!("{}", output::plan_table(&plan));
            }
            if !pending.is_empty() {
                println!("Unresolved submissions (settled by the next deploy):");
                println!("{}", output::pending_table(&pending));
            }
        }
    }

    Ok(())
}
