use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::{
    ArtifactRegistry, DeclarationSet, DeploymentExecutor, DeploymentLedger, DeploymentPlanner,
    DeploymentRecord, DirectoryArtifactSource, ExecutionPlan, ExecutorConfig, MigrantConfig,
    NetworkClient, TransactionSigner, planner::SatisfiedDeclaration,
};

/// Result of a deploy run.
#[derive(Debug, Clone, Default)]
pub struct DeployOutcome {
    /// Records written while settling submissions of an interrupted run.
    pub reconciled: Vec<DeploymentRecord>,
    /// Records written by this run's plan, in plan order.
    pub deployed: Vec<DeploymentRecord>,
    /// Declarations that were already deployed.
    pub satisfied: Vec<SatisfiedDeclaration>,
}

/// Deploys a set of declarations to one network.
///
/// Ties the artifact registry, the ledger, the planner and the executor together:
/// the ledger is locked, interrupted submissions are reconciled, then the remaining
/// declarations are planned and executed.
#[derive(Debug, Clone)]
pub struct Deployer {
    /// Name of the target network, as used in the ledger.
    pub network: String,
    pub registry: ArtifactRegistry,
    pub ledger_path: PathBuf,
    /// Network constants, overriding declaration-file constants.
    pub constants: BTreeMap<String, String>,
    pub executor: ExecutorConfig,
    /// Chain id the node must report, if any.
    pub chain_id: Option<u64>,
}

impl Deployer {
    pub fn new(
        network: impl Into<String>,
        registry: ArtifactRegistry,
        ledger_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            network: network.into(),
            registry,
            ledger_path: ledger_path.into(),
            constants: BTreeMap::new(),
            executor: ExecutorConfig::default(),
            chain_id: None,
        }
    }

    /// Build a deployer for `network` from the workspace configuration, loading every
    /// artifact under `artifacts_dir`.
    pub fn from_config(config: &MigrantConfig, network: &str) -> Result<Self> {
        let network_config = config.network(network)?;

        let registry = ArtifactRegistry::load(&DirectoryArtifactSource::new(&config.artifacts_dir))
            .with_context(|| {
                format!(
                    "Failed to load artifacts from {}",
                    config.artifacts_dir.display()
                )
            })?;

        Ok(Self {
            network: network.to_string(),
            registry,
            ledger_path: config.ledger_path(network),
            constants: network_config.constants.clone(),
            executor: ExecutorConfig {
                retry: config.retry.clone(),
                confirmation: config.confirmation_for(network),
            },
            chain_id: network_config.chain_id,
        })
    }

    pub fn with_constants(mut self, constants: BTreeMap<String, String>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_executor_config(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Plan against a read-only snapshot of the ledger. Nothing is locked or submitted.
    pub fn plan(&self, declarations: &DeclarationSet) -> Result<ExecutionPlan> {
        let ledger = DeploymentLedger::snapshot(&self.ledger_path, &self.network)?;
        Ok(self.plan_with(&ledger, declarations)?)
    }

    /// Records of this network, read from an unlocked snapshot of the ledger.
    pub fn records(&self) -> Result<Vec<DeploymentRecord>> {
        let ledger = DeploymentLedger::snapshot(&self.ledger_path, &self.network)?;
        Ok(ledger.records().cloned().collect())
    }

    fn plan_with(
        &self,
        ledger: &DeploymentLedger,
        declarations: &DeclarationSet,
    ) -> Result<ExecutionPlan, crate::DeployError> {
        DeploymentPlanner::new(&self.registry)
            .with_constants(declarations.constants.clone())
            .with_constants(self.constants.clone())
            .plan(&self.network, &declarations.deployments, ledger.records())
    }

    /// Deploy every declaration that is not in the ledger yet.
    ///
    /// A `true` on `cancel` stops the run between two steps.
    pub async fn deploy<N: NetworkClient, S: TransactionSigner>(
        &self,
        declarations: &DeclarationSet,
        network: &N,
        signer: &S,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<DeployOutcome> {
        tracing::info!(
            network = %self.network,
            ledger = %self.ledger_path.display(),
            declarations = declarations.deployments.len(),
            "Starting deployment..."
        );

        if let Some(expected) = self.chain_id {
            let actual = network
                .chain_id()
                .await
                .context("Failed to query the chain id")?;
            if actual != expected {
                anyhow::bail!(
                    "Network `{}` expects chain id {expected} but the node reports {actual}",
                    self.network
                );
            }
        }

        let mut ledger = DeploymentLedger::open(&self.ledger_path, &self.network)?;

        let mut executor =
            DeploymentExecutor::new(network, signer, &mut ledger, self.executor.clone());
        if let Some(cancel) = cancel {
            executor = executor.with_cancellation(cancel);
        }
        let reconciled = executor.reconcile().await?;

        let plan = self.plan_with(executor.ledger(), declarations)?;
        for satisfied in &plan.satisfied {
            tracing::info!(
                name = %satisfied.name,
                address = %satisfied.address,
                drift = %satisfied.drift,
                "Already deployed"
            );
        }

        if plan.is_complete() {
            tracing::info!(network = %self.network, "Nothing to deploy");
            return Ok(DeployOutcome {
                reconciled,
                deployed: Vec::new(),
                satisfied: plan.satisfied,
            });
        }

        tracing::info!(steps = plan.len(), "Executing deployment plan");

        let deployed = executor.execute(&plan).await?;

        tracing::info!("✓ Deployment complete!");

        Ok(DeployOutcome {
            reconciled,
            deployed,
            satisfied: plan.satisfied,
        })
    }
}
