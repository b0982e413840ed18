//! Submitting planned deployments and recording their results.

use std::{collections::HashMap, future::Future};

use alloy_core::primitives::{Address, TxHash};
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use tokio::{sync::watch, time::Instant};

use crate::{
    DeployError, DeploymentLedger, DeploymentRecord, FailureCause, NetworkClient, NetworkError,
    TransactionSigner,
    config::{ConfirmationConfig, RetryConfig},
    ledger::{DroppedSubmission, PendingSubmission},
    network::{SignedTransaction, TxOutcome, UnsignedTransaction},
    planner::{ExecutionPlan, PlannedStep, ResolvedArg},
};

/// Retry and confirmation policies used by [`DeploymentExecutor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub retry: RetryConfig,
    pub confirmation: ConfirmationConfig,
}

/// Executes plans step by step against a network, writing every result to the ledger.
pub struct DeploymentExecutor<'a, N, S> {
    network: &'a N,
    signer: &'a S,
    ledger: &'a mut DeploymentLedger,
    config: ExecutorConfig,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, N: NetworkClient, S: TransactionSigner> DeploymentExecutor<'a, N, S> {
    pub fn new(
        network: &'a N,
        signer: &'a S,
        ledger: &'a mut DeploymentLedger,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            network,
            signer,
            ledger,
            config,
            cancel: None,
        }
    }

    /// Stop before the next step once the channel carries `true`.
    ///
    /// Cancellation is only observed between steps, so a submitted transaction is always
    /// awaited and recorded first.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn ledger(&self) -> &DeploymentLedger {
        self.ledger
    }

    /// Execute every step of `plan` in order and return the records written.
    ///
    /// On failure the records of the steps that completed are already in the ledger, so
    /// a later run resumes at the failed step.
    pub async fn execute(
        &mut self,
        plan: &ExecutionPlan,
    ) -> Result<Vec<DeploymentRecord>, DeployError> {
        if plan.network != self.ledger.network() {
            return Err(DeployError::Ledger {
                path: self.ledger.path().to_path_buf(),
                message: format!(
                    "plan targets network `{}` but the ledger is for `{}`",
                    plan.network,
                    self.ledger.network()
                ),
            });
        }

        self.preflight(plan)?;

        let mut produced: HashMap<&str, Address> = HashMap::new();
        let mut records = Vec::with_capacity(plan.len());

        for step in plan.iter() {
            if self.is_cancelled() {
                tracing::warn!(
                    completed = records.len(),
                    remaining = plan.len() - step.index,
                    "Cancellation requested, stopping before the next step"
                );
                return Err(DeployError::Cancelled {
                    completed: records.len(),
                });
            }

            if let Some(existing) = self.ledger.get(&step.name) {
                tracing::info!(step = %step.name, address = %existing.address, "Already recorded, skipping");
                produced.insert(&step.name, existing.address);
                continue;
            }

            let record = self.execute_step(step, &produced).await?;
            produced.insert(&step.name, record.address);
            records.push(record);
        }

        tracing::info!(
            network = %plan.network,
            deployed = records.len(),
            "Execution plan complete"
        );

        Ok(records)
    }

    /// Settle submissions journalled by an earlier run that never reached the ledger.
    ///
    /// Confirmed submissions are recorded, reverted or replaced ones are dropped, and
    /// submissions the node has never seen are re-broadcast and awaited. Returns the
    /// records written.
    pub async fn reconcile(&mut self) -> Result<Vec<DeploymentRecord>, DeployError> {
        let pending = self.ledger.unresolved_pending();
        let mut records = Vec::new();

        if pending.is_empty() {
            return Ok(records);
        }

        tracing::info!(count = pending.len(), "Reconciling pending submissions");

        for submission in pending {
            if self.ledger.get(&submission.name).is_some() {
                self.drop_submission(&submission.name, submission.tx_hash, "superseded by a recorded deployment")?;
                continue;
            }

            let step = submission.name.clone();
            let outcome = self
                .with_retry(&step, || self.network.transaction_result(submission.tx_hash))
                .await
                .map_err(|e| self.reconcile_error(&step, e))?;

            let outcome = match outcome {
                Some(_) => self.await_outcome(&step, None, submission.tx_hash).await?,
                None => {
                    let nonce = self
                        .with_retry(&step, || self.network.nonce(submission.from))
                        .await
                        .map_err(|e| self.reconcile_error(&step, e))?;

                    if nonce > submission.nonce {
                        tracing::warn!(
                            step = %step,
                            tx_hash = %submission.tx_hash,
                            nonce = submission.nonce,
                            "Pending submission was replaced"
                        );
                        self.drop_submission(&step, submission.tx_hash, "replaced by another transaction with the same nonce")?;
                        continue;
                    }

                    let signed = SignedTransaction {
                        from: submission.from,
                        nonce: submission.nonce,
                        hash: submission.tx_hash,
                        raw: submission.raw.clone(),
                    };

                    tracing::info!(step = %step, tx_hash = %signed.hash, "Re-broadcasting pending submission");

                    let submitted = self.with_retry(&step, || self.network.submit(&signed)).await;
                    match submitted {
                        Ok(_) => {}
                        Err(e) if e.is_transient() => return Err(self.reconcile_error(&step, e)),
                        Err(e) => {
                            tracing::warn!(step = %step, error = %e, "Pending submission rejected");
                            self.drop_submission(&step, signed.hash, &e.to_string())?;
                            continue;
                        }
                    }

                    self.await_outcome(&step, None, signed.hash).await?
                }
            };

            match outcome {
                TxOutcome::Success { contract_address } => {
                    let record = DeploymentRecord {
                        network: submission.network.clone(),
                        name: step.clone(),
                        address: contract_address,
                        tx_hash: submission.tx_hash,
                        deployed_at: Utc::now(),
                        fingerprint: submission.fingerprint.clone(),
                    };
                    self.ledger.record_deployment(record.clone())?;
                    tracing::info!(step = %step, address = %contract_address, "Pending submission confirmed");
                    records.push(record);
                }
                TxOutcome::Reverted { reason } => {
                    tracing::warn!(step = %step, tx_hash = %submission.tx_hash, reason = %reason, "Pending submission reverted");
                    self.drop_submission(&step, submission.tx_hash, &reason)?;
                }
            }
        }

        Ok(records)
    }

    /// Encode every step's constructor arguments before anything is submitted.
    ///
    /// Addresses produced during the run are not known yet; the zero address stands in
    /// for them, which is enough to check arity and types.
    fn preflight(&self, plan: &ExecutionPlan) -> Result<(), DeployError> {
        for step in plan.iter() {
            let args: Vec<String> = step
                .args
                .iter()
                .map(|arg| match arg {
                    ResolvedArg::Value(value) => value.clone(),
                    ResolvedArg::Deployed { address, .. } => address.to_string(),
                    ResolvedArg::Produced(_) => Address::ZERO.to_string(),
                })
                .collect();

            step.artifact
                .deployment_data(&args)
                .map_err(|e| malformed(step, e))?;
        }
        Ok(())
    }

    async fn execute_step(
        &mut self,
        step: &PlannedStep,
        produced: &HashMap<&str, Address>,
    ) -> Result<DeploymentRecord, DeployError> {
        let args = step
            .args
            .iter()
            .map(|arg| match arg {
                ResolvedArg::Value(value) => Ok(value.clone()),
                ResolvedArg::Deployed { address, .. } => Ok(address.to_string()),
                ResolvedArg::Produced(name) => produced
                    .get(name.as_str())
                    .copied()
                    .or_else(|| self.ledger.get(name).map(|record| record.address))
                    .map(|address| address.to_string())
                    .ok_or_else(|| DeployError::UnresolvedReference {
                        declaration: step.name.clone(),
                        reference: name.clone(),
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let data = step
            .artifact
            .deployment_data(&args)
            .map_err(|e| malformed(step, e))?;

        tracing::info!(
            step = %step.name,
            index = step.index,
            artifact = %step.artifact.artifact_ref(),
            "Deploying contract"
        );

        let from = self.signer.address();
        let params = self
            .with_retry(&step.name, || self.network.transaction_params(from, &data))
            .await
            .map_err(|e| self.step_error(step, e))?;

        let unsigned = UnsignedTransaction::new(params, data);
        let signed = self.signer.sign(&unsigned).map_err(|e| DeployError::DeploymentFailed {
            step: step.name.clone(),
            index: Some(step.index),
            cause: FailureCause::Signing {
                message: format!("{e:#}"),
            },
        })?;

        self.ledger.record_pending(PendingSubmission {
            network: self.ledger.network().to_string(),
            name: step.name.clone(),
            tx_hash: signed.hash,
            from: signed.from,
            nonce: signed.nonce,
            raw: signed.raw.clone(),
            submitted_at: Utc::now(),
            fingerprint: Some(step.fingerprint.clone()),
        })?;

        let submitted = self
            .with_retry(&step.name, || self.network.submit(&signed))
            .await;
        match submitted {
            Ok(tx_hash) if tx_hash != signed.hash => {
                tracing::warn!(step = %step.name, expected = %signed.hash, reported = %tx_hash, "Node reported a different transaction hash");
            }
            Ok(_) => {}
            Err(e) if e.is_transient() => return Err(self.step_error(step, e)),
            Err(e) => {
                self.drop_submission(&step.name, signed.hash, &e.to_string())?;
                return Err(self.step_error(step, e));
            }
        }

        tracing::info!(
            step = %step.name,
            tx_hash = %signed.hash,
            nonce = signed.nonce,
            "Transaction submitted, waiting for confirmation"
        );

        let outcome = self
            .await_outcome(&step.name, Some(step.index), signed.hash)
            .await?;

        match outcome {
            TxOutcome::Success { contract_address } => {
                let record = DeploymentRecord {
                    network: self.ledger.network().to_string(),
                    name: step.name.clone(),
                    address: contract_address,
                    tx_hash: signed.hash,
                    deployed_at: Utc::now(),
                    fingerprint: Some(step.fingerprint.clone()),
                };
                self.ledger.record_deployment(record.clone())?;

                tracing::info!(
                    step = %step.name,
                    address = %contract_address,
                    tx_hash = %signed.hash,
                    "Contract deployed"
                );

                Ok(record)
            }
            TxOutcome::Reverted { reason } => {
                tracing::error!(step = %step.name, tx_hash = %signed.hash, reason = %reason, "Deployment reverted");
                self.drop_submission(&step.name, signed.hash, &reason)?;
                Err(DeployError::DeploymentFailed {
                    step: step.name.clone(),
                    index: Some(step.index),
                    cause: FailureCause::Reverted { reason },
                })
            }
        }
    }

    /// Poll until the transaction is mined with enough confirmations, or reverted.
    ///
    /// Transient polling errors are tolerated until the confirmation timeout.
    async fn await_outcome(
        &self,
        step: &str,
        index: Option<usize>,
        tx_hash: TxHash,
    ) -> Result<TxOutcome, DeployError> {
        let required = self.config.confirmation.confirmations.max(1);
        let timeout = self.config.confirmation.timeout();
        let start = Instant::now();

        loop {
            match self.poll_outcome(tx_hash, required).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    tracing::trace!(step, tx_hash = %tx_hash, error = %e, "Confirmation poll failed, retrying...");
                }
                Err(e) => {
                    return Err(DeployError::DeploymentFailed {
                        step: step.to_string(),
                        index,
                        cause: e.into_cause(),
                    });
                }
            }

            if start.elapsed() >= timeout {
                return Err(DeployError::ConfirmationTimeout {
                    step: step.to_string(),
                    tx_hash,
                    timeout_secs: timeout.as_secs(),
                });
            }

            tokio::time::sleep(self.config.confirmation.poll_interval()).await;
        }
    }

    async fn poll_outcome(
        &self,
        tx_hash: TxHash,
        required: u64,
    ) -> Result<Option<TxOutcome>, NetworkError> {
        let outcome = self.network.transaction_result(tx_hash).await?;
        if let Some(TxOutcome::Success { .. }) = outcome {
            let depth = self.network.confirmation_depth(tx_hash).await?;
            if depth < required {
                tracing::debug!(tx_hash = %tx_hash, depth, required, "Waiting for confirmations");
                return Ok(None);
            }
        }
        Ok(outcome)
    }

    /// Run a network call, retrying transient failures with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, step: &str, operation: F) -> Result<T, NetworkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NetworkError>>,
    {
        let retry = &self.config.retry;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(retry.min_delay())
            .with_max_delay(retry.max_delay())
            .with_max_times(retry.max_attempts.saturating_sub(1));

        operation
            .retry(backoff)
            .when(NetworkError::is_transient)
            .notify(|e, delay| {
                tracing::warn!(step, error = %e, ?delay, "Transient network error, retrying");
            })
            .await
    }

    fn step_error(&self, step: &PlannedStep, err: NetworkError) -> DeployError {
        match err {
            NetworkError::Transient(message) => DeployError::TransientNetworkError {
                step: step.name.clone(),
                attempts: self.config.retry.max_attempts.max(1),
                message,
            },
            other => DeployError::DeploymentFailed {
                step: step.name.clone(),
                index: Some(step.index),
                cause: other.into_cause(),
            },
        }
    }

    fn reconcile_error(&self, step: &str, err: NetworkError) -> DeployError {
        match err {
            NetworkError::Transient(message) => DeployError::TransientNetworkError {
                step: step.to_string(),
                attempts: self.config.retry.max_attempts.max(1),
                message,
            },
            other => DeployError::DeploymentFailed {
                step: step.to_string(),
                index: None,
                cause: other.into_cause(),
            },
        }
    }

    fn drop_submission(&mut self, name: &str, tx_hash: TxHash, reason: &str) -> Result<(), DeployError> {
        self.ledger.record_dropped(DroppedSubmission {
            network: self.ledger.network().to_string(),
            name: name.to_string(),
            tx_hash,
            reason: reason.to_string(),
            dropped_at: Utc::now(),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }
}

fn malformed(step: &PlannedStep, err: anyhow::Error) -> DeployError {
    DeployError::DeploymentFailed {
        step: step.name.clone(),
        index: Some(step.index),
        cause: FailureCause::MalformedArguments {
            message: format!("{err:#}"),
        },
    }
}
