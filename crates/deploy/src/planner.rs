//! Ordering declarations into an execution plan.
//!
//! Planning is pure: it reads declarations, ledger records, constants and the artifact
//! registry, and either returns a plan or a planning error. Nothing is submitted.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use alloy_core::primitives::{Address, TxHash};
use derive_more::Deref;

use crate::{
    ArtifactRegistry, ConstructorArg, ContractArtifact, DeployError, DeploymentDeclaration,
    DeploymentRecord, fingerprint::step_fingerprint,
};

/// A constructor argument after plan-time resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedArg {
    /// A literal value (constants are resolved into values).
    Value(String),
    /// A reference to a deployment already recorded in the ledger.
    Deployed { name: String, address: Address },
    /// A reference to a deployment produced earlier in the same run.
    Produced(String),
}

/// One deployment to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    /// Position of the step in the plan.
    pub index: usize,
    pub name: String,
    pub artifact: Arc<ContractArtifact>,
    pub args: Vec<ResolvedArg>,
    /// Steps of this plan that must be confirmed before this one.
    pub dependencies: Vec<String>,
    pub fingerprint: String,
}

/// Whether a satisfied declaration still matches what was deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Drift {
    Unchanged,
    Changed,
    /// The record carries no fingerprint, or the artifact is no longer available.
    Unknown,
}

/// A declaration that already has a ledger record and is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SatisfiedDeclaration {
    pub name: String,
    pub address: Address,
    pub tx_hash: TxHash,
    pub drift: Drift,
}

/// Topologically sorted steps for one network.
#[derive(Debug, Clone, PartialEq, Deref)]
pub struct ExecutionPlan {
    pub network: String,
    #[deref]
    pub steps: Vec<PlannedStep>,
    /// Declarations excluded from the plan because they are already deployed.
    pub satisfied: Vec<SatisfiedDeclaration>,
}

impl ExecutionPlan {
    /// Whether there is nothing left to deploy.
    pub fn is_complete(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Builds [`ExecutionPlan`]s from declarations and ledger state.
#[derive(Debug, Clone)]
pub struct DeploymentPlanner<'a> {
    registry: &'a ArtifactRegistry,
    constants: BTreeMap<String, String>,
}

impl<'a> DeploymentPlanner<'a> {
    pub fn new(registry: &'a ArtifactRegistry) -> Self {
        Self {
            registry,
            constants: BTreeMap::new(),
        }
    }

    /// Add named constants. Later calls override earlier ones with the same name.
    pub fn with_constants<I, K, V>(mut self, constants: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.constants
            .extend(constants.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Order `declarations` for `network`, skipping those already present in `records`.
    ///
    /// Ties between independent declarations are broken by authored order, so identical
    /// inputs always produce identical plans.
    pub fn plan<'r>(
        &self,
        network: &str,
        declarations: &[DeploymentDeclaration],
        records: impl IntoIterator<Item = &'r DeploymentRecord>,
    ) -> Result<ExecutionPlan, DeployError> {
        let mut positions = HashMap::with_capacity(declarations.len());
        for (i, declaration) in declarations.iter().enumerate() {
            if positions.insert(declaration.name.as_str(), i).is_some() {
                return Err(DeployError::DuplicateDeclaration {
                    name: declaration.name.clone(),
                });
            }
        }

        let recorded: HashMap<&str, &DeploymentRecord> = records
            .into_iter()
            .filter(|record| record.network == network)
            .map(|record| (record.name.as_str(), record))
            .collect();

        // Resolve arguments and collect the edges between declarations still to deploy,
        // alongside every declared edge for cycle detection.
        let mut resolved_args = Vec::with_capacity(declarations.len());
        let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); declarations.len()];
        let mut references: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); declarations.len()];

        for (i, declaration) in declarations.iter().enumerate() {
            let mut args = Vec::with_capacity(declaration.args.len());

            for arg in &declaration.args {
                let resolved = match arg {
                    ConstructorArg::Literal(value) => ResolvedArg::Value(value.clone()),
                    ConstructorArg::Constant(constant) => ResolvedArg::Value(
                        self.constants
                            .get(constant)
                            .cloned()
                            .ok_or_else(|| DeployError::UnknownConstant {
                                declaration: declaration.name.clone(),
                                constant: constant.clone(),
                            })?,
                    ),
                    ConstructorArg::Reference(target) => {
                        if let Some(&j) = positions.get(target.as_str()) {
                            references[i].insert(j);
                        }
                        if let Some(record) = recorded.get(target.as_str()) {
                            ResolvedArg::Deployed {
                                name: target.clone(),
                                address: record.address,
                            }
                        } else if let Some(&j) = positions.get(target.as_str()) {
                            dependencies[i].insert(j);
                            ResolvedArg::Produced(target.clone())
                        } else {
                            return Err(DeployError::UnresolvedReference {
                                declaration: declaration.name.clone(),
                                reference: target.clone(),
                            });
                        }
                    }
                };
                args.push(resolved);
            }

            resolved_args.push(args);
        }

        let cyclic = |cycle: Vec<usize>| DeployError::CyclicDependency {
            cycle: cycle
                .into_iter()
                .map(|i| declarations[i].name.clone())
                .collect(),
        };

        // A cycle is an error even when part of it is already recorded.
        let all: Vec<usize> = (0..declarations.len()).collect();
        topological_order(&all, &references).map_err(cyclic)?;

        let pending: Vec<usize> = (0..declarations.len())
            .filter(|&i| !recorded.contains_key(declarations[i].name.as_str()))
            .collect();

        let order = topological_order(&pending, &dependencies).map_err(cyclic)?;

        let mut steps = Vec::with_capacity(order.len());
        for (index, i) in order.into_iter().enumerate() {
            let declaration = &declarations[i];
            let artifact = self
                .registry
                .resolve(&declaration.artifact.name, &declaration.artifact.version)?;
            let args = std::mem::take(&mut resolved_args[i]);

            steps.push(PlannedStep {
                index,
                name: declaration.name.clone(),
                fingerprint: step_fingerprint(&artifact, &args),
                dependencies: dependencies[i]
                    .iter()
                    .map(|&j| declarations[j].name.clone())
                    .collect(),
                artifact,
                args,
            });
        }

        let satisfied = declarations
            .iter()
            .enumerate()
            .filter_map(|(i, declaration)| {
                let record = recorded.get(declaration.name.as_str())?;
                let drift = match (&record.fingerprint, self.registry.resolve(
                    &declaration.artifact.name,
                    &declaration.artifact.version,
                )) {
                    (Some(recorded_fingerprint), Ok(artifact)) => {
                        if *recorded_fingerprint == step_fingerprint(&artifact, &resolved_args[i]) {
                            Drift::Unchanged
                        } else {
                            Drift::Changed
                        }
                    }
                    _ => Drift::Unknown,
                };

                Some(SatisfiedDeclaration {
                    name: declaration.name.clone(),
                    address: record.address,
                    tx_hash: record.tx_hash,
                    drift,
                })
            })
            .collect();

        Ok(ExecutionPlan {
            network: network.to_string(),
            steps,
            satisfied,
        })
    }
}

/// Kahn's algorithm over the `nodes` subset, always taking the lowest ready index.
///
/// `dependencies[i]` lists the nodes `i` depends on; every listed dependency of a node in
/// `nodes` is itself in `nodes`. On failure returns the members of one cycle, in
/// traversal order.
fn topological_order(
    nodes: &[usize],
    dependencies: &[BTreeSet<usize>],
) -> Result<Vec<usize>, Vec<usize>> {
    let mut remaining_deps: HashMap<usize, usize> = nodes
        .iter()
        .map(|&i| (i, dependencies[i].len()))
        .collect();

    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for &i in nodes {
        for &j in &dependencies[i] {
            dependents.entry(j).or_default().push(i);
        }
    }

    let mut ready: BTreeSet<usize> = nodes
        .iter()
        .copied()
        .filter(|i| remaining_deps[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &dependent in dependents.get(&i).into_iter().flatten() {
            if let Some(count) = remaining_deps.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    // Every unordered node still waits on another unordered node, so walking the
    // lowest such dependency from any of them must revisit a node.
    let unordered: BTreeSet<usize> = nodes
        .iter()
        .copied()
        .filter(|i| remaining_deps[i] > 0)
        .collect();

    let mut path = Vec::new();
    let mut seen = HashMap::new();
    let mut next = unordered.first().copied();

    while let Some(current) = next {
        if let Some(&start) = seen.get(&current) {
            return Err(path.split_off(start));
        }
        seen.insert(current, path.len());
        path.push(current);
        next = dependencies[current]
            .iter()
            .copied()
            .find(|j| unordered.contains(j));
    }

    Err(path)
}
