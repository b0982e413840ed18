//! Layered configuration: defaults, then `Migrant.toml`, then `MIGRANT_` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use migrant_deploy::{MIGRANT_CONFIG_FILENAME, MigrantConfig};

/// Environment variables read by the CLI itself, not part of the configuration.
const CLI_ONLY_KEYS: &[&str] = &["config", "verbosity", "network", "private_key"];

/// Locate the configuration file.
///
/// An explicit path must exist; a directory means `Migrant.toml` inside it. Without
/// one, `./Migrant.toml` and then `<user config dir>/migrant/Migrant.toml` are tried.
pub fn config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }
        let path = if path.is_dir() {
            path.join(MIGRANT_CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };
        if !path.is_file() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }
        return Ok(Some(path));
    }

    let local = PathBuf::from(MIGRANT_CONFIG_FILENAME);
    if local.exists() {
        return Ok(Some(local));
    }

    Ok(dirs::config_dir()
        .map(|dir| dir.join("migrant").join(MIGRANT_CONFIG_FILENAME))
        .filter(|path| path.exists()))
}

pub fn load_config(explicit: Option<&Path>) -> Result<MigrantConfig> {
    let path = config_path(explicit)?;
    let config = figment(path.as_deref())
        .merge(Env::prefixed("MIGRANT_").split("__").ignore(CLI_ONLY_KEYS))
        .extract()
        .context("Invalid configuration")?;

    match &path {
        Some(path) => tracing::debug!(path = %path.display(), "Configuration loaded"),
        None => tracing::debug!("No configuration file found, using defaults"),
    }

    Ok(config)
}

fn figment(path: Option<&Path>) -> Figment {
    let figment = Figment::from(Serialized::defaults(MigrantConfig::default()));
    match path {
        Some(path) => figment.merge(Toml::file(path)),
        None => figment,
    }
}
