//! Error taxonomy for planning and executing deployments.

use std::path::PathBuf;

use alloy_core::primitives::TxHash;

/// Errors surfaced by the planner, the executor and the ledger.
///
/// Planning errors (`ArtifactNotFound`, `CyclicDependency`, `UnresolvedReference`,
/// `UnknownConstant`, `DuplicateDeclaration`) are raised before any transaction is
/// built, so they never leave partial state behind.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("no compiled artifact for {name}@{version}")]
    ArtifactNotFound { name: String, version: String },

    #[error("cyclic dependency between declarations: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<String> },

    #[error("declaration `{declaration}` references `{reference}`, which is neither declared nor deployed")]
    UnresolvedReference {
        declaration: String,
        reference: String,
    },

    #[error("declaration `{declaration}` uses unknown constant `{constant}`")]
    UnknownConstant {
        declaration: String,
        constant: String,
    },

    #[error("deployment `{name}` is declared more than once")]
    DuplicateDeclaration { name: String },

    #[error("network error while deploying `{step}` (gave up after {attempts} attempts): {message}")]
    TransientNetworkError {
        step: String,
        attempts: usize,
        message: String,
    },

    #[error("transaction {tx_hash} for `{step}` was not confirmed within {timeout_secs}s")]
    ConfirmationTimeout {
        step: String,
        tx_hash: TxHash,
        timeout_secs: u64,
    },

    #[error("deployment of `{step}`{} failed: {cause}", format_index(.index))]
    DeploymentFailed {
        step: String,
        /// Position in the execution plan, absent when settling an earlier run's submission.
        index: Option<usize>,
        cause: FailureCause,
    },

    #[error("ledger already holds a different record for `{name}` on network `{network}`")]
    LedgerConflict { network: String, name: String },

    #[error("ledger {} is locked by another run", .path.display())]
    LedgerLocked { path: PathBuf },

    #[error("ledger {}: {message}", .path.display())]
    Ledger { path: PathBuf, message: String },

    #[error("run cancelled after {completed} completed deployments")]
    Cancelled { completed: usize },
}

impl DeployError {
    /// Name of the step that failed, for errors tied to a single step.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::TransientNetworkError { step, .. }
            | Self::ConfirmationTimeout { step, .. }
            | Self::DeploymentFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Whether the error was raised before any transaction could be submitted.
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            Self::ArtifactNotFound { .. }
                | Self::CyclicDependency { .. }
                | Self::UnresolvedReference { .. }
                | Self::UnknownConstant { .. }
                | Self::DuplicateDeclaration { .. }
        )
    }
}

fn format_cycle(cycle: &[String]) -> String {
    let mut path = cycle.join(" -> ");
    if let Some(first) = cycle.first() {
        path.push_str(" -> ");
        path.push_str(first);
    }
    path
}

fn format_index(index: &Option<usize>) -> String {
    index.map(|i| format!(" (step {i})")).unwrap_or_default()
}

/// Deterministic reasons a deployment step can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureCause {
    #[error("constructor reverted: {reason}")]
    Reverted { reason: String },

    #[error("transaction rejected by node: {message}")]
    Rejected { message: String },

    #[error("malformed constructor arguments: {message}")]
    MalformedArguments { message: String },

    #[error("signing failed: {message}")]
    Signing { message: String },
}

/// Failures reported by a [`crate::NetworkClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Timeouts, dropped connections, rate limiting. Safe to retry.
    #[error("transient: {0}")]
    Transient(String),

    /// The node refused the request (bad nonce, insufficient funds, ...).
    #[error("{0}")]
    Rejected(String),

    /// Execution of the creation code reverted during estimation.
    #[error("{0}")]
    Reverted(String),
}

impl NetworkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Convert a deterministic network failure into the matching failure cause.
    pub(crate) fn into_cause(self) -> FailureCause {
        match self {
            Self::Reverted(reason) => FailureCause::Reverted { reason },
            Self::Rejected(message) | Self::Transient(message) => {
                FailureCause::Rejected { message }
            }
        }
    }
}
