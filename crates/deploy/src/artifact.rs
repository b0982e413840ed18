//! Compiled contract artifacts and the registry that serves them.
//!
//! The build toolchain is an external collaborator: it is reached through the
//! [`ArtifactSource`] trait. [`DirectoryArtifactSource`] reads the JSON output of a
//! compiler laid out as `<artifacts_dir>/<version>/<ContractName>.json`.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    json_abi::JsonAbi,
    primitives::{Bytes, keccak256},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DeployError;

/// Identifies a compiled contract: its name and the version it was built for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub version: String,
}

impl ArtifactRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Raw output of the build toolchain for one contract.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    pub bytecode: Bytes,
    pub abi: JsonAbi,
}

/// The build/compiler collaborator.
pub trait ArtifactSource {
    /// Every artifact this source can produce.
    fn available(&self) -> Result<Vec<ArtifactRef>>;

    /// Fetch a compiled artifact, `None` when the source has no such contract.
    fn compiled_artifact(&self, name: &str, version: &str) -> Result<Option<CompiledArtifact>>;
}

/// A contract ready to be deployed: creation bytecode plus its constructor signature.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractArtifact {
    pub name: String,
    pub version: String,
    pub bytecode: Bytes,
    pub constructor_signature: Vec<DynSolType>,
}

impl ContractArtifact {
    /// Build an artifact from compiler output, extracting the constructor parameter types.
    pub fn from_compiled(
        name: impl Into<String>,
        version: impl Into<String>,
        compiled: CompiledArtifact,
    ) -> Result<Self> {
        let name = name.into();
        let constructor_signature = match &compiled.abi.constructor {
            Some(constructor) => constructor
                .inputs
                .iter()
                .map(|param| {
                    let ty = param.selector_type();
                    DynSolType::parse(&ty).with_context(|| {
                        format!("Unsupported constructor parameter type `{ty}` in {name}")
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            name,
            version: version.into(),
            bytecode: compiled.bytecode,
            constructor_signature,
        })
    }

    pub fn artifact_ref(&self) -> ArtifactRef {
        ArtifactRef::new(&self.name, &self.version)
    }

    /// Keccak hash of the creation bytecode, hex encoded.
    pub fn bytecode_hash(&self) -> String {
        hex::encode(keccak256(&self.bytecode))
    }

    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    ///
    /// Each argument is a literal coerced against the matching constructor parameter
    /// type, e.g. `0x5FbD..`, `1000`, `true`, `[1, 2]` or `(1, "name")`.
    pub fn deployment_data<S: AsRef<str>>(&self, args: &[S]) -> Result<Bytes> {
        if args.len() != self.constructor_signature.len() {
            anyhow::bail!(
                "{} expects {} arguments, got {}",
                self.constructor_display(),
                self.constructor_signature.len(),
                args.len()
            );
        }

        let values = self
            .constructor_signature
            .iter()
            .zip(args)
            .enumerate()
            .map(|(position, (ty, arg))| {
                ty.coerce_str(arg.as_ref()).with_context(|| {
                    format!(
                        "argument {position} `{}` is not a valid {}",
                        arg.as_ref(),
                        ty.sol_type_name()
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut data = self.bytecode.to_vec();
        data.extend_from_slice(&DynSolValue::Tuple(values).abi_encode_params());
        Ok(Bytes::from(data))
    }

    /// Human readable constructor signature, e.g. `constructor(address,uint256)`.
    pub fn constructor_display(&self) -> String {
        let params: Vec<_> = self
            .constructor_signature
            .iter()
            .map(|ty| ty.sol_type_name().into_owned())
            .collect();
        format!("constructor({})", params.join(","))
    }
}

/// Resolves `(name, version)` pairs to loaded artifacts.
///
/// Every artifact offered by the source is loaded once when the registry is built
/// and kept for the lifetime of the process.
#[derive(Debug, Default, Clone)]
pub struct ArtifactRegistry {
    artifacts: BTreeMap<ArtifactRef, Arc<ContractArtifact>>,
}

impl ArtifactRegistry {
    /// Load every artifact the source reports as available.
    pub fn load(source: &impl ArtifactSource) -> Result<Self> {
        let mut registry = Self::default();

        for artifact_ref in source.available()? {
            let compiled = source
                .compiled_artifact(&artifact_ref.name, &artifact_ref.version)?
                .with_context(|| format!("Artifact {artifact_ref} disappeared while loading"))?;
            let artifact =
                ContractArtifact::from_compiled(&artifact_ref.name, &artifact_ref.version, compiled)?;
            registry.insert(artifact);
        }

        tracing::debug!(count = registry.len(), "Artifacts loaded");

        Ok(registry)
    }

    /// Register an artifact, replacing any previous one with the same reference.
    pub fn insert(&mut self, artifact: ContractArtifact) {
        self.artifacts
            .insert(artifact.artifact_ref(), Arc::new(artifact));
    }

    pub fn resolve(&self, name: &str, version: &str) -> Result<Arc<ContractArtifact>, DeployError> {
        self.artifacts
            .get(&ArtifactRef::new(name, version))
            .cloned()
            .ok_or_else(|| DeployError::ArtifactNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Reads compiler output from `<root>/<version>/<ContractName>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactSource {
    root: PathBuf,
}

impl DirectoryArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn artifact_path(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(version).join(format!("{name}.json"))
    }
}

impl ArtifactSource for DirectoryArtifactSource {
    fn available(&self) -> Result<Vec<ArtifactRef>> {
        let mut refs = Vec::new();

        if !self.root.exists() {
            tracing::warn!(path = %self.root.display(), "Artifacts directory does not exist");
            return Ok(refs);
        }

        let versions = std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read artifacts directory {}", self.root.display()))?;

        for version_dir in versions {
            let version_dir = version_dir.context("Failed to read artifacts directory entry")?;
            if !version_dir.file_type()?.is_dir() {
                continue;
            }
            let version = version_dir.file_name().to_string_lossy().into_owned();

            for entry in std::fs::read_dir(version_dir.path())? {
                let path = entry?.path();
                if !path.extension().is_some_and(|ext| ext == "json") {
                    continue;
                }
                if let Some(stem) = path.file_stem() {
                    refs.push(ArtifactRef::new(stem.to_string_lossy(), &version));
                }
            }
        }

        refs.sort();
        Ok(refs)
    }

    fn compiled_artifact(&self, name: &str, version: &str) -> Result<Option<CompiledArtifact>> {
        let path = self.artifact_path(name, version);
        if !path.exists() {
            return Ok(None);
        }
        parse_artifact_file(&path).map(Some)
    }
}

/// Parse a compiler JSON artifact.
///
/// Accepts both the flat `"bytecode": "0x.."` layout and the nested
/// `"bytecode": { "object": "0x.." }` layout.
fn parse_artifact_file(path: &Path) -> Result<CompiledArtifact> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    let json: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

    let abi: JsonAbi = serde_json::from_value(json.get("abi").cloned().unwrap_or(Value::Array(vec![])))
        .with_context(|| format!("Invalid ABI in {}", path.display()))?;

    let bytecode_hex = match json.get("bytecode") {
        Some(Value::String(hex)) => hex.as_str(),
        Some(Value::Object(obj)) => obj
            .get("object")
            .and_then(Value::as_str)
            .with_context(|| format!("Missing bytecode.object in {}", path.display()))?,
        _ => anyhow::bail!("Missing bytecode in {}", path.display()),
    };

    Ok(CompiledArtifact {
        bytecode: decode_bytecode(bytecode_hex)
            .with_context(|| format!("Invalid bytecode in {}", path.display()))?,
        abi,
    })
}

fn decode_bytecode(hex_str: &str) -> Result<Bytes> {
    let stripped = hex_str.trim().trim_start_matches("0x");

    if stripped.contains("__") {
        anyhow::bail!("bytecode contains unlinked library placeholders");
    }
    if stripped.is_empty() {
        anyhow::bail!("bytecode is empty (abstract contract or interface?)");
    }

    Ok(Bytes::from(hex::decode(stripped)?))
}
