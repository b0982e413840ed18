//! Workspace configuration (`Migrant.toml`).

use std::{
    collections::BTreeMap,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::LocalKeySigner;

/// The default name for the migrant configuration file.
pub const MIGRANT_CONFIG_FILENAME: &str = "Migrant.toml";

/// Environment variable read for the signing key when a network names none.
pub const DEFAULT_PRIVATE_KEY_ENV: &str = "MIGRANT_PRIVATE_KEY";

/// Development node written by [`MigrantConfig::scaffold`].
const LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";
const LOCAL_CHAIN_ID: u64 = 31337;

/// Top-level configuration shared by every network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrantConfig {
    /// Root of the compiler output, laid out as `<artifacts_dir>/<version>/<Name>.json`.
    pub artifacts_dir: PathBuf,
    /// Directory holding one `<network>.jsonl` ledger per network.
    pub ledger_dir: PathBuf,
    /// Retry policy for transient network failures.
    pub retry: RetryConfig,
    /// How long and how deep to wait for confirmations.
    pub confirmation: ConfirmationConfig,
    /// Target networks by name.
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Default for MigrantConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            ledger_dir: PathBuf::from("deployments"),
            retry: RetryConfig::default(),
            confirmation: ConfirmationConfig::default(),
            networks: BTreeMap::new(),
        }
    }
}

impl MigrantConfig {
    /// A starting configuration with a single `local` development network.
    pub fn scaffold() -> Result<Self> {
        let mut local = NetworkConfig::new(Url::parse(LOCAL_RPC_URL)?);
        local.chain_id = Some(LOCAL_CHAIN_ID);

        Ok(Self {
            networks: BTreeMap::from([("local".to_string(), local)]),
            ..Self::default()
        })
    }

    /// Write the configuration to `Migrant.toml` in `dir`, refusing to replace an
    /// existing file. Returns the path written.
    pub fn write_new(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MIGRANT_CONFIG_FILENAME);
        let content =
            toml::to_string_pretty(self).context("Failed to serialize migrant config to TOML")?;

        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        tracing::info!(path = %path.display(), "Configuration written");
        Ok(path)
    }

    /// Configuration of the network called `name`.
    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        self.networks.get(name).with_context(|| {
            let known: Vec<_> = self.networks.keys().map(String::as_str).collect();
            format!(
                "Network `{name}` is not configured (known networks: {})",
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            )
        })
    }

    /// Ledger file for a network: its explicit `ledger` path or `<ledger_dir>/<name>.jsonl`.
    pub fn ledger_path(&self, name: &str) -> PathBuf {
        self.networks
            .get(name)
            .and_then(|network| network.ledger.clone())
            .unwrap_or_else(|| self.ledger_dir.join(format!("{name}.jsonl")))
    }

    /// Confirmation settings for a network, with its `confirmations` override applied.
    pub fn confirmation_for(&self, name: &str) -> ConfirmationConfig {
        let mut confirmation = self.confirmation.clone();
        if let Some(confirmations) = self.networks.get(name).and_then(|n| n.confirmations) {
            confirmation.confirmations = confirmations;
        }
        confirmation
    }
}

/// One deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint of a node on this network.
    pub rpc_url: Url,

    /// Expected chain id. When set, a deploy refuses to run against a node reporting
    /// another chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,

    /// Overrides the global confirmation depth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,

    /// Overrides the default ledger location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<PathBuf>,

    /// Constants for this network; they take precedence over the declaration file's.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, String>,

    #[serde(default)]
    pub signer: SignerConfig,
}

impl NetworkConfig {
    pub fn new(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            chain_id: None,
            confirmations: None,
            ledger: None,
            constants: BTreeMap::new(),
            signer: SignerConfig::default(),
        }
    }
}

/// Where the signing key comes from. Keys are always read from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignerConfig {
    /// A hex encoded private key.
    PrivateKey { env: String },
    /// A BIP-39 phrase, derived at `m/44'/60'/0'/0/{index}`.
    Mnemonic {
        env: String,
        #[serde(default)]
        index: u32,
    },
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self::PrivateKey {
            env: DEFAULT_PRIVATE_KEY_ENV.to_string(),
        }
    }
}

impl SignerConfig {
    /// Build the signer from the configured environment variable.
    pub fn load(&self) -> Result<LocalKeySigner> {
        match self {
            Self::PrivateKey { env } => {
                let key = read_secret(env)?;
                LocalKeySigner::from_private_key(&key)
                    .with_context(|| format!("Invalid private key in ${env}"))
            }
            Self::Mnemonic { env, index } => {
                let phrase = read_secret(env)?;
                LocalKeySigner::from_mnemonic(&phrase, *index)
                    .with_context(|| format!("Invalid mnemonic in ${env}"))
            }
        }
    }
}

fn read_secret(env: &str) -> Result<String> {
    std::env::var(env).with_context(|| format!("Environment variable ${env} is not set"))
}

/// Retry policy for transient network failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Delay before the first retry, in milliseconds. Doubles on each retry.
    pub min_delay_ms: u64,
    /// Upper bound on the delay between retries, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Confirmation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Number of blocks, including the inclusion block, before a deployment is final.
    pub confirmations: u64,
    /// Delay between receipt polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Give up waiting for a transaction after this many seconds.
    pub timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            confirmations: 1,
            poll_interval_ms: 1_000,
            timeout_secs: 300,
        }
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
