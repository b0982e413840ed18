//! The network collaborator: everything the executor needs from a chain node.

mod rpc;

use std::future::Future;

use alloy_core::primitives::{Address, Bytes, TxHash};

pub use rpc::{JsonRpcNetwork, JsonRpcNetworkConfig};

use crate::NetworkError;

/// Parameters the node suggests for a contract-creation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionParams {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
}

/// A contract-creation transaction waiting for a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    pub data: Bytes,
}

impl UnsignedTransaction {
    pub fn new(params: TransactionParams, data: Bytes) -> Self {
        Self {
            chain_id: params.chain_id,
            nonce: params.nonce,
            gas_price: params.gas_price,
            gas_limit: params.gas_limit,
            data,
        }
    }
}

/// A signed, encoded transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub from: Address,
    pub nonce: u64,
    pub hash: TxHash,
    pub raw: Bytes,
}

/// Final outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Success { contract_address: Address },
    Reverted { reason: String },
}

/// Chain access used by the executor.
///
/// Implementations classify failures: [`NetworkError::Transient`] is retried by the
/// caller, every other variant is treated as a deterministic failure.
pub trait NetworkClient: Send + Sync {
    fn chain_id(&self) -> impl Future<Output = Result<u64, NetworkError>> + Send;

    /// Nonce, gas price and gas limit for deploying `data` from `from`.
    fn transaction_params(
        &self,
        from: Address,
        data: &Bytes,
    ) -> impl Future<Output = Result<TransactionParams, NetworkError>> + Send;

    /// Number of transactions mined from `address`.
    fn nonce(&self, address: Address) -> impl Future<Output = Result<u64, NetworkError>> + Send;

    /// Submit a signed transaction. Submitting the same transaction twice is not an error.
    fn submit(
        &self,
        tx: &SignedTransaction,
    ) -> impl Future<Output = Result<TxHash, NetworkError>> + Send;

    /// Blocks on top of (and including) the block that mined `tx_hash`, 0 when unmined.
    fn confirmation_depth(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<u64, NetworkError>> + Send;

    /// Outcome of a mined transaction, `None` when it is not mined (or unknown).
    fn transaction_result(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Option<TxOutcome>, NetworkError>> + Send;
}
