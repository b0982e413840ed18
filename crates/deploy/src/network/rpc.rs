//! [`NetworkClient`] over Ethereum JSON-RPC.

use std::time::Duration;

use alloy_core::primitives::{Address, Bytes, TxHash};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use super::{NetworkClient, SignedTransaction, TransactionParams, TxOutcome};
use crate::NetworkError;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-RPC error code some providers use for rate limiting.
const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// Connection settings for [`JsonRpcNetwork`].
#[derive(Debug, Clone)]
pub struct JsonRpcNetworkConfig {
    pub url: Url,
    pub request_timeout: Duration,
    /// Percentage applied to `eth_estimateGas` results, e.g. 120 for +20%.
    pub gas_limit_multiplier: u64,
}

impl JsonRpcNetworkConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            request_timeout: DEFAULT_TIMEOUT,
            gas_limit_multiplier: 120,
        }
    }
}

/// Transaction receipt fields used by the executor.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    status: Option<String>,
    contract_address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct TransactionInfo {
    from: Address,
    input: Bytes,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    gas: u64,
}

/// Deserialize a u64 from a hex string (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

fn parse_quantity(value: &str) -> Result<u128, NetworkError> {
    u128::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| NetworkError::Rejected(format!("Invalid quantity `{value}`: {e}")))
}

/// A chain node reached over HTTP JSON-RPC.
#[derive(Debug, Clone)]
pub struct JsonRpcNetwork {
    client: reqwest::Client,
    config: JsonRpcNetworkConfig,
}

impl JsonRpcNetwork {
    pub fn new(config: JsonRpcNetworkConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn url(&self) -> &Url {
        &self.config.url
    }

    /// Make a JSON-RPC call and deserialize the result.
    ///
    /// Transport failures, HTTP 429/5xx and rate-limit errors are transient. Any other
    /// JSON-RPC error object is reported as a rejection carrying the node's message
    /// (and revert data, if any).
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, NetworkError> {
        let response = self
            .client
            .post(self.config.url.clone())
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| NetworkError::Transient(format!("Failed to send {method} request: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(NetworkError::Transient(format!(
                "{method} returned HTTP {status}"
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| NetworkError::Transient(format!("Failed to parse {method} response: {e}")))?;

        if let Some(error) = result.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
                .to_string();

            if error.get("code").and_then(Value::as_i64) == Some(LIMIT_EXCEEDED_CODE) {
                return Err(NetworkError::Transient(message));
            }

            let message = match error.get("data") {
                Some(Value::String(data)) => format!("{message} ({data})"),
                _ => message,
            };
            return Err(NetworkError::Rejected(message));
        }

        let result_value = result
            .get("result")
            .cloned()
            .ok_or_else(|| NetworkError::Transient(format!("No result in {method} response")))?;

        serde_json::from_value(result_value)
            .map_err(|e| NetworkError::Rejected(format!("Failed to deserialize {method} result: {e}")))
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, NetworkError> {
        self.call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await
    }

    async fn block_number(&self) -> Result<u64, NetworkError> {
        let block: String = self.call("eth_blockNumber", vec![]).await?;
        Ok(parse_quantity(&block)? as u64)
    }

    /// Replay a reverted transaction with `eth_call` on its parent block to recover the
    /// revert message. Falls back to a generic reason.
    async fn revert_reason(&self, tx_hash: TxHash, block_number: u64) -> String {
        let fallback = format!("transaction reverted in block {block_number}");

        let tx: TransactionInfo = match self
            .call("eth_getTransactionByHash", vec![json!(tx_hash)])
            .await
        {
            Ok(Some(tx)) => tx,
            _ => return fallback,
        };

        let replay = self
            .call::<Value>(
                "eth_call",
                vec![
                    json!({
                        "from": tx.from,
                        "data": tx.input,
                        "gas": format!("0x{:x}", tx.gas),
                    }),
                    json!(format!("0x{:x}", block_number.saturating_sub(1))),
                ],
            )
            .await;

        match replay {
            Err(NetworkError::Rejected(message)) => message,
            _ => fallback,
        }
    }
}

fn is_revert(message: &str) -> bool {
    message.to_ascii_lowercase().contains("revert")
}

fn is_already_known(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already known")
        || message.contains("known transaction")
        || message.contains("already imported")
}

impl NetworkClient for JsonRpcNetwork {
    async fn chain_id(&self) -> Result<u64, NetworkError> {
        let chain_id: String = self.call("eth_chainId", vec![]).await?;
        Ok(parse_quantity(&chain_id)? as u64)
    }

    async fn transaction_params(
        &self,
        from: Address,
        data: &Bytes,
    ) -> Result<TransactionParams, NetworkError> {
        let chain_id = self.chain_id().await?;

        let nonce: String = self
            .call("eth_getTransactionCount", vec![json!(from), json!("pending")])
            .await?;
        let gas_price: String = self.call("eth_gasPrice", vec![]).await?;

        let estimate: String = self
            .call(
                "eth_estimateGas",
                vec![json!({ "from": from, "data": data })],
            )
            .await
            .map_err(|e| match e {
                NetworkError::Rejected(message) if is_revert(&message) => {
                    NetworkError::Reverted(message)
                }
                other => other,
            })?;

        let gas_limit = parse_quantity(&estimate)? as u64;

        Ok(TransactionParams {
            chain_id,
            nonce: parse_quantity(&nonce)? as u64,
            gas_price: parse_quantity(&gas_price)?,
            gas_limit: gas_limit.saturating_mul(self.config.gas_limit_multiplier) / 100,
        })
    }

    async fn nonce(&self, address: Address) -> Result<u64, NetworkError> {
        let nonce: String = self
            .call("eth_getTransactionCount", vec![json!(address), json!("latest")])
            .await?;
        Ok(parse_quantity(&nonce)? as u64)
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<TxHash, NetworkError> {
        match self
            .call::<TxHash>("eth_sendRawTransaction", vec![json!(tx.raw)])
            .await
        {
            Ok(hash) => Ok(hash),
            Err(NetworkError::Rejected(message)) if is_already_known(&message) => {
                tracing::debug!(tx_hash = %tx.hash, "Transaction already known to the node");
                Ok(tx.hash)
            }
            Err(e) => Err(e),
        }
    }

    async fn confirmation_depth(&self, tx_hash: TxHash) -> Result<u64, NetworkError> {
        let Some(receipt) = self.receipt(tx_hash).await? else {
            return Ok(0);
        };
        let latest = self.block_number().await?;
        Ok(latest.saturating_sub(receipt.block_number) + 1)
    }

    async fn transaction_result(&self, tx_hash: TxHash) -> Result<Option<TxOutcome>, NetworkError> {
        let Some(receipt) = self.receipt(tx_hash).await? else {
            return Ok(None);
        };

        if receipt.status.as_deref() == Some("0x0") {
            let reason = self.revert_reason(tx_hash, receipt.block_number).await;
            return Ok(Some(TxOutcome::Reverted { reason }));
        }

        match receipt.contract_address {
            Some(contract_address) => Ok(Some(TxOutcome::Success { contract_address })),
            None => Ok(Some(TxOutcome::Reverted {
                reason: "receipt has no contract address".to_string(),
            })),
        }
    }
}
