//! Content fingerprints of deployment steps.
//!
//! A fingerprint covers everything that determines the deployed contract: the artifact
//! reference, the creation bytecode and the constructor arguments. References to other
//! deployments are hashed by name, so a step hashes the same whether its dependency was
//! deployed in this run or an earlier one. Fingerprints are stored with each record and
//! compared on later runs to report declarations that changed after deployment.

use sha2::{Digest, Sha256};

use crate::{ContractArtifact, planner::ResolvedArg};

/// Compute the SHA-256 fingerprint of a step, hex encoded.
///
/// The hash is deterministic: the same artifact and arguments always produce the same
/// fingerprint. Fields are length-prefixed so that adjacent values cannot collide.
pub fn step_fingerprint(artifact: &ContractArtifact, args: &[ResolvedArg]) -> String {
    let mut hasher = Sha256::new();

    update_field(&mut hasher, artifact.name.as_bytes());
    update_field(&mut hasher, artifact.version.as_bytes());
    update_field(&mut hasher, &artifact.bytecode);

    for arg in args {
        let (tag, value) = match arg {
            ResolvedArg::Value(value) => ("value", value.as_str()),
            ResolvedArg::Deployed { name, .. } | ResolvedArg::Produced(name) => ("ref", name.as_str()),
        };
        update_field(&mut hasher, tag.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }

    hex::encode(hasher.finalize())
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use alloy_core::{dyn_abi::DynSolType, primitives::{Address, Bytes}};

    use super::*;

    fn artifact() -> ContractArtifact {
        ContractArtifact {
            name: "Vault".to_string(),
            version: "1.0.0".to_string(),
            bytecode: Bytes::from(vec![0x60, 0x80]),
            constructor_signature: vec![DynSolType::Address, DynSolType::Uint(256)],
        }
    }

    #[test]
    fn test_fingerprint_determinism() {
        let args = vec![
            ResolvedArg::Produced("Token".to_string()),
            ResolvedArg::Value("1000".to_string()),
        ];

        let first = step_fingerprint(&artifact(), &args);
        let second = step_fingerprint(&artifact(), &args);

        assert_eq!(first, second, "Fingerprint should be deterministic");
        assert_eq!(first.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_reference_form_does_not_matter() {
        let produced = vec![
            ResolvedArg::Produced("Token".to_string()),
            ResolvedArg::Value("1000".to_string()),
        ];
        let deployed = vec![
            ResolvedArg::Deployed {
                name: "Token".to_string(),
                address: Address::repeat_byte(0x11),
            },
            ResolvedArg::Value("1000".to_string()),
        ];

        assert_eq!(
            step_fingerprint(&artifact(), &produced),
            step_fingerprint(&artifact(), &deployed)
        );
    }

    #[test]
    fn test_fingerprint_changes_with_arguments() {
        let base = vec![ResolvedArg::Value("1000".to_string())];
        let changed = vec![ResolvedArg::Value("1001".to_string())];

        assert_ne!(
            step_fingerprint(&artifact(), &base),
            step_fingerprint(&artifact(), &changed),
            "Fingerprint should change when an argument changes"
        );
    }

    #[test]
    fn test_fingerprint_changes_with_bytecode() {
        let args = vec![ResolvedArg::Value("1000".to_string())];
        let mut recompiled = artifact();
        recompiled.bytecode = Bytes::from(vec![0x60, 0x81]);

        assert_ne!(
            step_fingerprint(&artifact(), &args),
            step_fingerprint(&recompiled, &args),
            "Fingerprint should change when the bytecode changes"
        );
    }

    #[test]
    fn test_value_and_reference_do_not_collide() {
        let as_value = vec![ResolvedArg::Value("Token".to_string())];
        let as_reference = vec![ResolvedArg::Produced("Token".to_string())];

        assert_ne!(
            step_fingerprint(&artifact(), &as_value),
            step_fingerprint(&artifact(), &as_reference)
        );
    }
}
