//! JSON-RPC Ledger Client
//!
//! `eth_getTransactionReceipt` and `eth_getLogs` over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::{LedgerClient, LedgerConfig};
use crate::error::{LedgerError, Result};
use crate::types::{normalize_hex, parse_quantity, to_quantity, LogEntry, LogFilter, Receipt};

/// HTTP JSON-RPC client
pub struct JsonRpcLedgerClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcLedgerClient {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        if config.rpc_url.trim().is_empty() {
            return Err(LedgerError::Config("LEDGER_RPC_URL is empty".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: config.rpc_url.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(&LedgerConfig::from_env())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::debug!(method, id, "Ledger RPC call");

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "{method} returned HTTP {}",
                response.status()
            )));
        }

        let envelope: RpcEnvelope = response.json().await?;
        if let Some(err) = envelope.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        match envelope.result {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedgerClient {
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        let raw: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", json!([normalize_hex(tx_hash)]))
            .await?;

        raw.map(RpcReceipt::into_receipt).transpose()
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let params = json!([{
            "address": normalize_hex(&filter.address),
            "topics": filter.topics,
            "fromBlock": to_quantity(filter.from_block),
            "toBlock": to_quantity(filter.to_block),
        }]);

        let raw: Option<Vec<RpcLog>> = self.call("eth_getLogs", params).await?;

        raw.unwrap_or_default()
            .into_iter()
            .map(RpcLog::into_entry)
            .collect()
    }

    fn name(&self) -> &str {
        "json-rpc"
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: String,
    #[serde(default)]
    status: Option<String>,
}

impl RpcReceipt {
    fn into_receipt(self) -> Result<Receipt> {
        let block_number = parse_quantity(&self.block_number).ok_or_else(|| {
            LedgerError::MalformedResponse(format!("blockNumber {}", self.block_number))
        })?;

        Ok(Receipt {
            transaction_hash: normalize_hex(&self.transaction_hash),
            block_number,
            // Pre-Byzantium receipts carry no status; treat as success
            success: self.status.as_deref().and_then(parse_quantity).is_none_or(|s| s == 1),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    transaction_hash: Option<String>,
    block_number: Option<String>,
    log_index: Option<String>,
}

impl RpcLog {
    fn into_entry(self) -> Result<LogEntry> {
        let transaction_hash = self
            .transaction_hash
            .ok_or_else(|| LedgerError::MalformedResponse("log without transactionHash".into()))?;
        let block_number = self
            .block_number
            .as_deref()
            .and_then(parse_quantity)
            .ok_or_else(|| LedgerError::MalformedResponse("log without blockNumber".into()))?;

        Ok(LogEntry {
            address: normalize_hex(&self.address),
            topics: self.topics.iter().map(|t| normalize_hex(t)).collect(),
            data: self.data,
            transaction_hash: normalize_hex(&transaction_hash),
            block_number,
            log_index: self.log_index.as_deref().and_then(parse_quantity).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_conversion() {
        let raw: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": "0xABC",
            "blockNumber": "0x2a",
            "status": "0x1"
        }))
        .unwrap();

        let receipt = raw.into_receipt().unwrap();
        assert_eq!(receipt.transaction_hash, "0xabc");
        assert_eq!(receipt.block_number, 42);
        assert!(receipt.success);
    }

    #[test]
    fn test_reverted_receipt() {
        let raw: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": "0xabc",
            "blockNumber": "0x1",
            "status": "0x0"
        }))
        .unwrap();
        assert!(!raw.into_receipt().unwrap().success);
    }

    #[test]
    fn test_log_conversion() {
        let raw: RpcLog = serde_json::from_value(json!({
            "address": "0xA97Cb465cf77b1f31a9b554491451cc94871E0A1",
            "topics": ["0xAA"],
            "data": "0x",
            "transactionHash": "0xDEF",
            "blockNumber": "0x10",
            "logIndex": "0x3"
        }))
        .unwrap();

        let entry = raw.into_entry().unwrap();
        assert_eq!(entry.address, "0xa97cb465cf77b1f31a9b554491451cc94871e0a1");
        assert_eq!(entry.topics, vec!["0xaa".to_string()]);
        assert_eq!(entry.block_number, 16);
        assert_eq!(entry.log_index, 3);
    }

    #[test]
    fn test_pending_log_rejected() {
        let raw: RpcLog = serde_json::from_value(json!({
            "address": "0x01",
            "topics": [],
            "data": "0x",
            "transactionHash": null,
            "blockNumber": null,
            "logIndex": null
        }))
        .unwrap();
        assert!(raw.into_entry().is_err());
    }

    #[test]
    fn test_empty_url_rejected() {
        let config = LedgerConfig {
            rpc_url: " ".into(),
            ..Default::default()
        };
        assert!(matches!(
            JsonRpcLedgerClient::new(&config),
            Err(LedgerError::Config(_))
        ));
    }
}
