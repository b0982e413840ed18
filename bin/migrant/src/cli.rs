use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "migrant")]
#[command(
    author,
    version,
    about = "Deploy versioned contracts to EVM networks, in dependency order, exactly once"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "MIGRANT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file, or to a directory containing `Migrant.toml`.
    ///
    /// If not provided, `./Migrant.toml` is used when present, then the user
    /// configuration directory. Every setting can be overridden with `MIGRANT_`
    /// environment variables, using `__` between nested keys
    /// (e.g. `MIGRANT_NETWORKS__SEPOLIA__RPC_URL`).
    #[arg(long, alias = "conf", global = true, env = "MIGRANT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a starting `Migrant.toml` with a local development network.
    Init {
        /// Directory to write `Migrant.toml` into.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Deploy every declaration that is not yet recorded for a network.
    Deploy(DeployArgs),

    /// Show what the ledger records for a network.
    Status(StatusArgs),

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// The target network, as named in the configuration.
    #[arg(short, long, env = "MIGRANT_NETWORK")]
    pub network: String,

    /// The TOML file listing the deployments.
    #[arg(short, long, alias = "decl")]
    pub declarations: PathBuf,

    /// Print the execution plan without submitting anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// The network to inspect.
    #[arg(short, long, env = "MIGRANT_NETWORK")]
    pub network: String,

    /// Compare the ledger against these declarations and report drift.
    #[arg(short, long, alias = "decl")]
    pub declarations: Option<PathBuf>,

    /// Output format.
    #[arg(long, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}
