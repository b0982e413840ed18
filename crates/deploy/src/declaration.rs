//! Deployment declarations and the TOML file they are authored in.
//!
//! ```toml
//! [constants]
//! burn = "0x000000000000000000000000000000000000dEaD"
//!
//! [[deployment]]
//! name = "LoyaltyToken"
//! artifact = "LoyaltyToken"
//! version = "1.0.0"
//! args = ["Loyalty", "LOY", 1000000]
//!
//! [[deployment]]
//! name = "WildCardsQV"
//! version = "1.0.0"
//! args = [{ ref = "LoyaltyToken" }, { constant = "burn" }]
//! ```

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ArtifactRef;

/// One constructor argument of a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstructorArg {
    /// A value in Solidity literal syntax, coerced against the parameter type at encode time.
    Literal(String),
    /// The address produced by another deployment.
    Reference(String),
    /// A named configuration constant, resolved at plan time.
    Constant(String),
}

impl ConstructorArg {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    pub fn constant(name: impl Into<String>) -> Self {
        Self::Constant(name.into())
    }
}

/// A requested deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentDeclaration {
    pub name: String,
    pub artifact: ArtifactRef,
    pub args: Vec<ConstructorArg>,
}

impl DeploymentDeclaration {
    pub fn new(name: impl Into<String>, artifact: ArtifactRef) -> Self {
        Self {
            name: name.into(),
            artifact,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: ConstructorArg) -> Self {
        self.args.push(arg);
        self
    }

    /// Names of the deployments this declaration references, in argument order.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|arg| match arg {
            ConstructorArg::Reference(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Parsed declarations file: declaration-level constants and deployments in authored order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclarationSet {
    pub constants: BTreeMap<String, String>,
    pub deployments: Vec<DeploymentDeclaration>,
}

impl DeclarationSet {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read declarations from {}", path.display()))?;
        let set = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse declarations in {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            deployments = set.deployments.len(),
            "Declarations loaded"
        );
        Ok(set)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: DeclarationsFile = toml::from_str(content)?;

        let constants = file
            .constants
            .into_iter()
            .map(|(name, value)| literal_from_toml(&value).map(|text| (name, text)))
            .collect::<Result<_>>()?;

        let deployments = file
            .deployment
            .into_iter()
            .map(|entry| {
                let args = entry
                    .args
                    .into_iter()
                    .map(|arg| arg.into_constructor_arg())
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("Invalid arguments for `{}`", entry.name))?;
                Ok(DeploymentDeclaration {
                    artifact: ArtifactRef::new(
                        entry.artifact.unwrap_or_else(|| entry.name.clone()),
                        entry.version,
                    ),
                    name: entry.name,
                    args,
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            constants,
            deployments,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeclarationsFile {
    #[serde(default)]
    constants: BTreeMap<String, toml::Value>,
    #[serde(default)]
    deployment: Vec<DeploymentEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeploymentEntry {
    name: String,
    /// Defaults to `name`.
    artifact: Option<String>,
    version: String,
    #[serde(default)]
    args: Vec<ArgEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArgEntry {
    Reference {
        #[serde(rename = "ref")]
        target: String,
    },
    Constant {
        constant: String,
    },
    Literal(toml::Value),
}

impl ArgEntry {
    fn into_constructor_arg(self) -> Result<ConstructorArg> {
        Ok(match self {
            ArgEntry::Reference { target } => ConstructorArg::Reference(target),
            ArgEntry::Constant { constant } => ConstructorArg::Constant(constant),
            ArgEntry::Literal(value) => ConstructorArg::Literal(literal_from_toml(&value)?),
        })
    }
}

/// Render a TOML value in the literal syntax understood by the ABI coercer.
fn literal_from_toml(value: &toml::Value) -> Result<String> {
    render_literal(value, false)
}

/// Characters that split or close an element of an array or tuple literal.
const ELEMENT_DELIMITERS: &[char] = &[',', '[', ']', '(', ')', '"'];

fn render_literal(value: &toml::Value, nested: bool) -> Result<String> {
    Ok(match value {
        toml::Value::String(s) if nested && s.contains(ELEMENT_DELIMITERS) => {
            // Quoted elements end at the next double quote, there is no escape.
            if s.contains('"') {
                anyhow::bail!("array element `{s}` cannot contain a double quote");
            }
            format!("\"{s}\"")
        }
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Array(items) => {
            let items = items
                .iter()
                .map(|item| render_literal(item, true))
                .collect::<Result<Vec<_>>>()?;
            format!("[{}]", items.join(", "))
        }
        other => anyhow::bail!("unsupported argument value `{other}`"),
    })
}
