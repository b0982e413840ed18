//! migrant-deploy - Contract deployment orchestration.
//!
//! This crate deploys versioned contracts with constructor arguments to one or more
//! networks, in dependency order, recording every deployment in an append-only ledger
//! so that re-runs only deploy what is missing.

mod artifact;
pub use artifact::{
    ArtifactRef, ArtifactRegistry, ArtifactSource, CompiledArtifact, ContractArtifact,
    DirectoryArtifactSource,
};

pub mod config;
pub use config::{
    ConfirmationConfig, MIGRANT_CONFIG_FILENAME, MigrantConfig, NetworkConfig, RetryConfig,
    SignerConfig,
};

mod declaration;
pub use declaration::{ConstructorArg, DeclarationSet, DeploymentDeclaration};

mod deployer;
pub use deployer::{DeployOutcome, Deployer};

mod error;
pub use error::{DeployError, FailureCause, NetworkError};

mod executor;
pub use executor::{DeploymentExecutor, ExecutorConfig};

pub mod fingerprint;

pub mod ledger;
pub use ledger::{DeploymentLedger, DeploymentRecord, DroppedSubmission, PendingSubmission};

pub mod network;
pub use network::{
    JsonRpcNetwork, JsonRpcNetworkConfig, NetworkClient, SignedTransaction, TransactionParams,
    TxOutcome, UnsignedTransaction,
};

pub mod planner;
pub use planner::{
    DeploymentPlanner, Drift, ExecutionPlan, PlannedStep, ResolvedArg, SatisfiedDeclaration,
};

mod signer;
pub use signer::{LocalKeySigner, TransactionSigner};
