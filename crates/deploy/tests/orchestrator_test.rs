//! Integration tests for migrant-deploy.
//!
//! These tests run the full deploy flow (ledger, reconciliation, planning, execution)
//! against an in-memory chain. The mock chain mines every accepted transaction
//! immediately unless mining is paused, and can inject transient failures and reverts.
//! Run with: cargo test --test orchestrator_test

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::Mutex,
};

use alloy_core::{
    dyn_abi::DynSolType,
    primitives::{Address, Bytes, TxHash, keccak256},
};
use migrant_deploy::{
    ArtifactRegistry, ConfirmationConfig, ContractArtifact, DeclarationSet, DeployError,
    Deployer, DeploymentLedger, ExecutorConfig, FailureCause, NetworkClient, NetworkError,
    PendingSubmission, RetryConfig, SignedTransaction, TransactionParams, TransactionSigner,
    TxOutcome, UnsignedTransaction,
};
use tempdir::TempDir;
use tokio::sync::watch;

const NETWORK: &str = "devnet";
const CHAIN_ID: u64 = 31337;

const TOKEN_BYTECODE: [u8; 4] = [0x60, 0x01, 0x60, 0x00];
const VAULT_BYTECODE: [u8; 4] = [0x60, 0x02, 0x60, 0x00];

const DECLARATIONS: &str = r#"
[constants]
supply = "1000"

[[deployment]]
name = "Token"
version = "1.0.0"
args = [{ constant = "supply" }]

[[deployment]]
name = "Vault"
version = "1.0.0"
args = [{ ref = "Token" }]
"#;

// ------------------------------------------------------------------------------------
// Mock chain
// ------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MinedTx {
    block: u64,
    outcome: TxOutcome,
}

#[derive(Debug)]
struct ChainState {
    block: u64,
    nonces: HashMap<Address, u64>,
    mined: HashMap<TxHash, MinedTx>,
    mempool: Vec<(TxHash, Bytes)>,
    /// Creation data of every mined transaction, in mining order.
    deployments: Vec<Bytes>,
    submit_calls: usize,
    transient_submit_failures: usize,
    /// Creation data starting with one of these bytecodes reverts with the given reason.
    reverts: Vec<(Vec<u8>, String)>,
    mining: bool,
    cancel_on_submit: Option<watch::Sender<bool>>,
    /// When set, receipt lookups are refused with this message.
    refuse_lookups: Option<String>,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            block: 100,
            nonces: HashMap::new(),
            mined: HashMap::new(),
            mempool: Vec::new(),
            deployments: Vec::new(),
            submit_calls: 0,
            transient_submit_failures: 0,
            reverts: Vec::new(),
            mining: true,
            cancel_on_submit: None,
            refuse_lookups: None,
        }
    }
}

impl ChainState {
    fn nonce(&self, address: Address) -> u64 {
        self.nonces.get(&address).copied().unwrap_or(0)
    }

    fn mine(&mut self, hash: TxHash, raw: &Bytes) {
        let (from, nonce, data) = decode_raw(raw);
        self.block += 1;
        self.nonces.insert(from, nonce + 1);

        let outcome = match self
            .reverts
            .iter()
            .find(|(bytecode, _)| data.starts_with(bytecode))
        {
            Some((_, reason)) => TxOutcome::Reverted {
                reason: reason.clone(),
            },
            None => TxOutcome::Success {
                contract_address: from.create(nonce),
            },
        };

        self.deployments.push(data);
        self.mined.insert(
            hash,
            MinedTx {
                block: self.block,
                outcome,
            },
        );
    }
}

#[derive(Debug, Default)]
struct MockNetwork {
    state: Mutex<ChainState>,
}

impl MockNetwork {
    fn with_state<T>(&self, f: impl FnOnce(&mut ChainState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    fn submit_calls(&self) -> usize {
        self.with_state(|state| state.submit_calls)
    }

    fn deployments(&self) -> Vec<Bytes> {
        self.with_state(|state| state.deployments.clone())
    }

    fn mine_pending(&self) {
        self.with_state(|state| {
            for (hash, raw) in std::mem::take(&mut state.mempool) {
                state.mine(hash, &raw);
            }
        });
    }
}

impl NetworkClient for MockNetwork {
    async fn chain_id(&self) -> Result<u64, NetworkError> {
        Ok(CHAIN_ID)
    }

    async fn transaction_params(
        &self,
        from: Address,
        _data: &Bytes,
    ) -> Result<TransactionParams, NetworkError> {
        self.with_state(|state| {
            let queued = state
                .mempool
                .iter()
                .filter(|(_, raw)| decode_raw(raw).0 == from)
                .count() as u64;
            Ok(TransactionParams {
                chain_id: CHAIN_ID,
                nonce: state.nonce(from) + queued,
                gas_price: 1_000_000_000,
                gas_limit: 3_000_000,
            })
        })
    }

    async fn nonce(&self, address: Address) -> Result<u64, NetworkError> {
        Ok(self.with_state(|state| state.nonce(address)))
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<TxHash, NetworkError> {
        self.with_state(|state| {
            state.submit_calls += 1;

            if state.transient_submit_failures > 0 {
                state.transient_submit_failures -= 1;
                return Err(NetworkError::Transient("connection reset by peer".to_string()));
            }

            if state.mined.contains_key(&tx.hash)
                || state.mempool.iter().any(|(hash, _)| *hash == tx.hash)
            {
                return Ok(tx.hash);
            }

            let (from, nonce, _) = decode_raw(&tx.raw);
            if nonce < state.nonce(from) {
                return Err(NetworkError::Rejected("nonce too low".to_string()));
            }

            if let Some(cancel) = &state.cancel_on_submit {
                let _ = cancel.send(true);
            }

            if state.mining {
                state.mine(tx.hash, &tx.raw);
            } else {
                state.mempool.push((tx.hash, tx.raw.clone()));
            }

            Ok(tx.hash)
        })
    }

    async fn confirmation_depth(&self, tx_hash: TxHash) -> Result<u64, NetworkError> {
        Ok(self.with_state(|state| {
            state
                .mined
                .get(&tx_hash)
                .map(|tx| state.block - tx.block + 1)
                .unwrap_or(0)
        }))
    }

    async fn transaction_result(&self, tx_hash: TxHash) -> Result<Option<TxOutcome>, NetworkError> {
        self.with_state(|state| match &state.refuse_lookups {
            Some(message) => Err(NetworkError::Rejected(message.clone())),
            None => Ok(state.mined.get(&tx_hash).map(|tx| tx.outcome.clone())),
        })
    }
}

/// Signs by concatenating sender, nonce and data; the mock chain decodes the same layout.
#[derive(Debug)]
struct MockSigner {
    address: Address,
}

impl TransactionSigner for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, tx: &UnsignedTransaction) -> anyhow::Result<SignedTransaction> {
        let mut raw = self.address.to_vec();
        raw.extend_from_slice(&tx.nonce.to_be_bytes());
        raw.extend_from_slice(&tx.data);

        Ok(SignedTransaction {
            from: self.address,
            nonce: tx.nonce,
            hash: keccak256(&raw),
            raw: Bytes::from(raw),
        })
    }
}

fn decode_raw(raw: &Bytes) -> (Address, u64, Bytes) {
    let from = Address::from_slice(&raw[..20]);
    let nonce = u64::from_be_bytes(raw[20..28].try_into().unwrap());
    (from, nonce, Bytes::copy_from_slice(&raw[28..]))
}

// ------------------------------------------------------------------------------------
// Test context
// ------------------------------------------------------------------------------------

struct TestContext {
    _dir: TempDir,
    ledger_path: PathBuf,
    network: MockNetwork,
    signer: MockSigner,
}

impl TestContext {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let dir = TempDir::new("migrant-orchestrator").unwrap();
        let ledger_path = dir.path().join("deployments").join(format!("{NETWORK}.jsonl"));

        Self {
            _dir: dir,
            ledger_path,
            network: MockNetwork::default(),
            signer: MockSigner {
                address: Address::repeat_byte(0xaa),
            },
        }
    }

    fn deployer(&self) -> Deployer {
        Deployer::new(NETWORK, registry(), &self.ledger_path).with_executor_config(fast_config())
    }

    async fn deploy(
        &self,
        declarations: &DeclarationSet,
    ) -> anyhow::Result<migrant_deploy::DeployOutcome> {
        self.deployer()
            .deploy(declarations, &self.network, &self.signer, None)
            .await
    }

    fn ledger(&self) -> DeploymentLedger {
        DeploymentLedger::snapshot(&self.ledger_path, NETWORK).unwrap()
    }

    fn recorded_names(&self) -> Vec<String> {
        self.ledger().records().map(|r| r.name.clone()).collect()
    }
}

fn registry() -> ArtifactRegistry {
    let mut registry = ArtifactRegistry::default();
    registry.insert(ContractArtifact {
        name: "Token".to_string(),
        version: "1.0.0".to_string(),
        bytecode: Bytes::from(TOKEN_BYTECODE.to_vec()),
        constructor_signature: vec![DynSolType::Uint(256)],
    });
    registry.insert(ContractArtifact {
        name: "Vault".to_string(),
        version: "1.0.0".to_string(),
        bytecode: Bytes::from(VAULT_BYTECODE.to_vec()),
        constructor_signature: vec![DynSolType::Address],
    });
    registry
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        retry: RetryConfig {
            max_attempts: 5,
            min_delay_ms: 1,
            max_delay_ms: 5,
        },
        confirmation: ConfirmationConfig {
            confirmations: 1,
            poll_interval_ms: 1,
            timeout_secs: 5,
        },
    }
}

fn declarations() -> DeclarationSet {
    DeclarationSet::from_toml(DECLARATIONS).unwrap()
}

fn deploy_error(err: &anyhow::Error) -> &DeployError {
    err.downcast_ref::<DeployError>()
        .unwrap_or_else(|| panic!("expected a DeployError, got: {err:#}"))
}

/// The token data the executor would submit, for simulating interrupted runs.
fn token_data() -> Bytes {
    registry()
        .resolve("Token", "1.0.0")
        .unwrap()
        .deployment_data(&["1000"])
        .unwrap()
}

/// Journal and submit the Token deployment as an interrupted run would have.
async fn journal_token(ctx: &TestContext) -> SignedTransaction {
    let params = ctx
        .network
        .transaction_params(ctx.signer.address, &token_data())
        .await
        .unwrap();
    let signed = ctx
        .signer
        .sign(&UnsignedTransaction::new(params, token_data()))
        .unwrap();
    {
        let mut ledger = DeploymentLedger::open(&ctx.ledger_path, NETWORK).unwrap();
        ledger
            .record_pending(PendingSubmission {
                network: NETWORK.to_string(),
                name: "Token".to_string(),
                tx_hash: signed.hash,
                from: signed.from,
                nonce: signed.nonce,
                raw: signed.raw.clone(),
                submitted_at: chrono::Utc::now(),
                fingerprint: None,
            })
            .unwrap();
    }
    ctx.network.submit(&signed).await.unwrap();
    signed
}

// ------------------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------------------

#[tokio::test]
async fn test_first_run_deploys_in_order_and_second_run_is_a_noop() {
    let ctx = TestContext::new();
    let declarations = declarations();

    let outcome = ctx.deploy(&declarations).await.unwrap();

    let names: Vec<_> = outcome.deployed.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Token", "Vault"]);
    assert!(outcome.reconciled.is_empty());
    assert!(outcome.satisfied.is_empty());

    // Vault received the address Token was deployed at.
    let token_address = ctx.signer.address.create(0);
    assert_eq!(outcome.deployed[0].address, token_address);
    let deployments = ctx.network.deployments();
    assert_eq!(deployments.len(), 2);
    assert_eq!(&deployments[1][..4], &VAULT_BYTECODE[..]);
    assert_eq!(&deployments[1][4 + 12..4 + 32], token_address.as_slice());

    assert_eq!(ctx.recorded_names(), vec!["Token", "Vault"]);
    let ledger_before = std::fs::read_to_string(&ctx.ledger_path).unwrap();

    let second = ctx.deploy(&declarations).await.unwrap();

    assert!(second.deployed.is_empty());
    assert_eq!(second.satisfied.len(), 2);
    assert!(
        second
            .satisfied
            .iter()
            .all(|s| s.drift == migrant_deploy::Drift::Unchanged)
    );
    assert_eq!(ctx.network.submit_calls(), 2);
    assert_eq!(
        std::fs::read_to_string(&ctx.ledger_path).unwrap(),
        ledger_before,
        "A run with nothing to deploy must leave the ledger untouched"
    );
}

#[tokio::test]
async fn test_revert_keeps_earlier_steps_and_resumes_after_fix() {
    let ctx = TestContext::new();
    let declarations = declarations();
    ctx.network.with_state(|state| {
        state
            .reverts
            .push((VAULT_BYTECODE.to_vec(), "token not set".to_string()));
    });

    let err = ctx.deploy(&declarations).await.unwrap_err();

    match deploy_error(&err) {
        DeployError::DeploymentFailed { step, index, cause } => {
            assert_eq!(step, "Vault");
            assert_eq!(*index, Some(1));
            assert_eq!(
                *cause,
                FailureCause::Reverted {
                    reason: "token not set".to_string()
                }
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("Vault"));
    assert_eq!(ctx.recorded_names(), vec!["Token"]);
    assert!(
        ctx.ledger().unresolved_pending().is_empty(),
        "The reverted submission must be closed"
    );

    ctx.network.with_state(|state| state.reverts.clear());
    let outcome = ctx.deploy(&declarations).await.unwrap();

    let names: Vec<_> = outcome.deployed.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Vault"], "Token must not be re-deployed");
    assert_eq!(ctx.recorded_names(), vec!["Token", "Vault"]);
}

#[tokio::test]
async fn test_cycle_fails_without_submitting() {
    let ctx = TestContext::new();
    let declarations = DeclarationSet::from_toml(
        r#"
[[deployment]]
name = "Token"
version = "1.0.0"
args = [{ ref = "Vault" }]

[[deployment]]
name = "Vault"
version = "1.0.0"
args = [{ ref = "Token" }]
"#,
    )
    .unwrap();

    let err = ctx.deploy(&declarations).await.unwrap_err();

    match deploy_error(&err) {
        DeployError::CyclicDependency { cycle } => {
            assert!(cycle.contains(&"Token".to_string()));
            assert!(cycle.contains(&"Vault".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.network.submit_calls(), 0);
    assert!(ctx.recorded_names().is_empty());
}

#[tokio::test]
async fn test_malformed_arguments_fail_before_any_submission() {
    let ctx = TestContext::new();
    let declarations = DeclarationSet::from_toml(
        r#"
[[deployment]]
name = "Token"
version = "1.0.0"
args = [1000]

[[deployment]]
name = "Vault"
version = "1.0.0"
args = ["not-an-address"]
"#,
    )
    .unwrap();

    let err = ctx.deploy(&declarations).await.unwrap_err();

    assert!(matches!(
        deploy_error(&err),
        DeployError::DeploymentFailed {
            step,
            cause: FailureCause::MalformedArguments { .. },
            ..
        } if step == "Vault"
    ));
    assert_eq!(ctx.network.submit_calls(), 0);
}

#[tokio::test]
async fn test_transient_failures_within_bound_are_retried() {
    let ctx = TestContext::new();
    ctx.network
        .with_state(|state| state.transient_submit_failures = 2);

    let outcome = ctx.deploy(&declarations()).await.unwrap();

    assert_eq!(outcome.deployed.len(), 2);
    assert_eq!(ctx.network.submit_calls(), 4);
    assert_eq!(ctx.network.deployments().len(), 2);
}

#[tokio::test]
async fn test_transient_failures_beyond_bound_surface_and_resume() {
    let ctx = TestContext::new();
    ctx.network
        .with_state(|state| state.transient_submit_failures = 10);
    let deployer = Deployer::new(NETWORK, registry(), &ctx.ledger_path).with_executor_config(
        ExecutorConfig {
            retry: RetryConfig {
                max_attempts: 3,
                min_delay_ms: 1,
                max_delay_ms: 2,
            },
            ..fast_config()
        },
    );

    let err = deployer
        .deploy(&declarations(), &ctx.network, &ctx.signer, None)
        .await
        .unwrap_err();

    match deploy_error(&err) {
        DeployError::TransientNetworkError { step, attempts, .. } => {
            assert_eq!(step, "Token");
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.network.submit_calls(), 3);
    assert_eq!(ctx.ledger().unresolved_pending().len(), 1);

    // The node recovers: the journalled transaction is re-broadcast, not re-signed.
    ctx.network
        .with_state(|state| state.transient_submit_failures = 0);
    let outcome = ctx.deploy(&declarations()).await.unwrap();

    assert_eq!(outcome.reconciled.len(), 1);
    assert_eq!(outcome.reconciled[0].name, "Token");
    assert_eq!(outcome.deployed.len(), 1);
    assert_eq!(outcome.deployed[0].name, "Vault");
    assert_eq!(ctx.network.deployments().len(), 2);
}

#[tokio::test]
async fn test_mined_pending_submission_is_recorded_on_restart() {
    let ctx = TestContext::new();
    let declarations = declarations();
    let fingerprint = ctx.deployer().plan(&declarations).unwrap()[0]
        .fingerprint
        .clone();

    // A previous run journalled and submitted Token, then died before recording it.
    let params = ctx
        .network
        .transaction_params(ctx.signer.address, &token_data())
        .await
        .unwrap();
    let signed = ctx
        .signer
        .sign(&UnsignedTransaction::new(params, token_data()))
        .unwrap();
    {
        let mut ledger = DeploymentLedger::open(&ctx.ledger_path, NETWORK).unwrap();
        ledger
            .record_pending(PendingSubmission {
                network: NETWORK.to_string(),
                name: "Token".to_string(),
                tx_hash: signed.hash,
                from: signed.from,
                nonce: signed.nonce,
                raw: signed.raw.clone(),
                submitted_at: chrono::Utc::now(),
                fingerprint: Some(fingerprint),
            })
            .unwrap();
    }
    ctx.network.submit(&signed).await.unwrap();

    let outcome = ctx.deploy(&declarations).await.unwrap();

    assert_eq!(outcome.reconciled.len(), 1);
    assert_eq!(outcome.reconciled[0].tx_hash, signed.hash);
    let names: Vec<_> = outcome.deployed.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Vault"]);
    assert_eq!(ctx.network.deployments().len(), 2, "Token must be deployed once");

    let plan = ctx.deployer().plan(&declarations).unwrap();
    assert!(plan.is_complete());
    assert!(
        plan.satisfied
            .iter()
            .all(|s| s.drift == migrant_deploy::Drift::Unchanged)
    );
}

#[tokio::test]
async fn test_reverted_pending_submission_is_dropped_on_restart() {
    let ctx = TestContext::new();
    ctx.network.with_state(|state| {
        state
            .reverts
            .push((TOKEN_BYTECODE.to_vec(), "supply too large".to_string()));
    });
    let reverted = journal_token(&ctx).await;
    ctx.network.with_state(|state| state.reverts.clear());

    let outcome = ctx.deploy(&declarations()).await.unwrap();

    assert!(outcome.reconciled.is_empty());
    let names: Vec<_> = outcome.deployed.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Token", "Vault"]);
    assert_ne!(ctx.ledger().get("Token").unwrap().tx_hash, reverted.hash);
    assert!(ctx.ledger().unresolved_pending().is_empty());

    let ledger = std::fs::read_to_string(&ctx.ledger_path).unwrap();
    assert!(ledger.contains(r#""kind":"dropped""#));
    assert!(ledger.contains("supply too large"));
}

#[tokio::test]
async fn test_refused_lookup_during_reconciliation_is_a_deployment_failure() {
    let ctx = TestContext::new();
    journal_token(&ctx).await;
    ctx.network
        .with_state(|state| state.refuse_lookups = Some("unknown method".to_string()));

    let err = ctx.deploy(&declarations()).await.unwrap_err();

    match deploy_error(&err) {
        DeployError::DeploymentFailed { step, index, cause } => {
            assert_eq!(step, "Token");
            assert_eq!(*index, None);
            assert_eq!(
                *cause,
                FailureCause::Rejected {
                    message: "unknown method".to_string()
                }
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.network.submit_calls(), 1, "Nothing is submitted after the journal");
    assert_eq!(ctx.ledger().unresolved_pending().len(), 1);
}

#[tokio::test]
async fn test_replaced_pending_submission_is_dropped() {
    let ctx = TestContext::new();

    let params = ctx
        .network
        .transaction_params(ctx.signer.address, &token_data())
        .await
        .unwrap();
    let journalled = ctx
        .signer
        .sign(&UnsignedTransaction::new(params, token_data()))
        .unwrap();
    {
        let mut ledger = DeploymentLedger::open(&ctx.ledger_path, NETWORK).unwrap();
        ledger
            .record_pending(PendingSubmission {
                network: NETWORK.to_string(),
                name: "Token".to_string(),
                tx_hash: journalled.hash,
                from: journalled.from,
                nonce: journalled.nonce,
                raw: journalled.raw.clone(),
                submitted_at: chrono::Utc::now(),
                fingerprint: None,
            })
            .unwrap();
    }

    // Another transaction took the same nonce.
    let replacement = ctx
        .signer
        .sign(&UnsignedTransaction::new(params, Bytes::from(vec![0xfe])))
        .unwrap();
    ctx.network.submit(&replacement).await.unwrap();

    let outcome = ctx.deploy(&declarations()).await.unwrap();

    assert!(outcome.reconciled.is_empty());
    assert_eq!(outcome.deployed.len(), 2);
    assert_eq!(outcome.deployed[0].address, ctx.signer.address.create(1));
    assert!(ctx.ledger().unresolved_pending().is_empty());
    assert!(
        std::fs::read_to_string(&ctx.ledger_path)
            .unwrap()
            .contains(r#""kind":"dropped""#)
    );
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_leaves_submission_for_reconciliation() {
    let ctx = TestContext::new();
    ctx.network.with_state(|state| state.mining = false);
    let deployer = Deployer::new(NETWORK, registry(), &ctx.ledger_path).with_executor_config(
        ExecutorConfig {
            confirmation: ConfirmationConfig {
                confirmations: 1,
                poll_interval_ms: 100,
                timeout_secs: 2,
            },
            ..fast_config()
        },
    );

    let err = deployer
        .deploy(&declarations(), &ctx.network, &ctx.signer, None)
        .await
        .unwrap_err();

    assert!(matches!(
        deploy_error(&err),
        DeployError::ConfirmationTimeout { step, timeout_secs: 2, .. } if step == "Token"
    ));
    assert_eq!(ctx.ledger().unresolved_pending().len(), 1);

    ctx.network.with_state(|state| state.mining = true);
    ctx.network.mine_pending();

    let outcome = deployer
        .deploy(&declarations(), &ctx.network, &ctx.signer, None)
        .await
        .unwrap();

    assert_eq!(outcome.reconciled.len(), 1);
    assert_eq!(outcome.deployed.len(), 1);
    assert_eq!(ctx.recorded_names(), vec!["Token", "Vault"]);
}

#[tokio::test]
async fn test_cancellation_stops_at_step_boundary() {
    let ctx = TestContext::new();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    ctx.network
        .with_state(|state| state.cancel_on_submit = Some(cancel_tx));

    let err = ctx
        .deployer()
        .deploy(&declarations(), &ctx.network, &ctx.signer, Some(cancel_rx))
        .await
        .unwrap_err();

    assert!(matches!(
        deploy_error(&err),
        DeployError::Cancelled { completed: 1 }
    ));
    // The submitted step was still awaited and recorded.
    assert_eq!(ctx.recorded_names(), vec!["Token"]);
    assert_eq!(ctx.network.submit_calls(), 1);
}

#[tokio::test]
async fn test_second_writer_is_locked_out() {
    let ctx = TestContext::new();
    let _held = DeploymentLedger::open(&ctx.ledger_path, NETWORK).unwrap();

    let err = ctx.deploy(&declarations()).await.unwrap_err();

    assert!(matches!(deploy_error(&err), DeployError::LedgerLocked { .. }));
    assert_eq!(ctx.network.submit_calls(), 0);
}

#[tokio::test]
async fn test_dry_run_plan_writes_nothing() {
    let ctx = TestContext::new();

    let plan = ctx.deployer().plan(&declarations()).unwrap();

    let names: Vec<_> = plan.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Token", "Vault"]);
    assert_eq!(plan[1].dependencies, vec!["Token"]);
    assert!(!ctx.ledger_path.exists());
    assert_eq!(ctx.network.submit_calls(), 0);
}

#[tokio::test]
async fn test_network_constants_override_declaration_constants() {
    let ctx = TestContext::new();
    let deployer = ctx
        .deployer()
        .with_constants(BTreeMap::from([("supply".to_string(), "5".to_string())]));

    let plan = deployer.plan(&declarations()).unwrap();

    assert_eq!(
        plan[0].args,
        vec![migrant_deploy::ResolvedArg::Value("5".to_string())]
    );
}

#[tokio::test]
async fn test_chain_id_mismatch_is_refused() {
    let ctx = TestContext::new();

    let err = ctx
        .deployer()
        .with_chain_id(1)
        .deploy(&declarations(), &ctx.network, &ctx.signer, None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("chain id"));
    assert_eq!(ctx.network.submit_calls(), 0);
}
