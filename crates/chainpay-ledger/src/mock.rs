//! Mock Ledger Client
//!
//! In-memory chain for tests and demos. Payments are registered up front and
//! served back through the same `LedgerClient` interface the verifier uses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_primitives::U256;
use async_trait::async_trait;

use crate::client::{LedgerClient, DEFAULT_PAYMENTS_CONTRACT};
use crate::error::{LedgerError, Result};
use crate::events::PaymentReceived;
use crate::types::{normalize_hex, LogEntry, LogFilter, Receipt};

/// Mock ledger with static receipts and logs
#[derive(Debug)]
pub struct MockLedgerClient {
    contract: String,
    receipts: HashMap<String, Receipt>,
    logs: Vec<LogEntry>,
    next_block: u64,
    receipt_calls: AtomicUsize,
    fail_rpc: bool,
}

impl Default for MockLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self::with_contract(DEFAULT_PAYMENTS_CONTRACT)
    }

    pub fn with_contract(contract: &str) -> Self {
        Self {
            contract: normalize_hex(contract),
            receipts: HashMap::new(),
            logs: Vec::new(),
            next_block: 1_000,
            receipt_calls: AtomicUsize::new(0),
            fail_rpc: false,
        }
    }

    /// Every call fails with an RPC error (simulates an unreachable node)
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            fail_rpc: true,
            ..Self::new()
        }
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Register a transaction that emitted `PaymentReceived` from the payments contract
    #[must_use]
    pub fn with_payment(
        mut self,
        tx_hash: &str,
        merchant: &str,
        payer: &str,
        amount: U256,
        timestamp: i64,
    ) -> Self {
        let block = self.allocate_block();
        let event = PaymentReceived {
            merchant: normalize_hex(merchant),
            payer: normalize_hex(payer),
            amount,
            timestamp,
            transaction_hash: normalize_hex(tx_hash),
            block_number: block,
        };

        let index = self.logs.len() as u64;
        match event.to_log(&self.contract, index) {
            Ok(log) => self.logs.push(log),
            Err(e) => tracing::warn!(tx_hash, "Mock ledger could not encode event: {}", e),
        }
        self.insert_receipt(tx_hash, block);
        self
    }

    /// Register a transaction with a receipt but no payment event
    #[must_use]
    pub fn with_bare_transaction(mut self, tx_hash: &str) -> Self {
        let block = self.allocate_block();
        self.insert_receipt(tx_hash, block);
        self
    }

    /// Number of receipt lookups served
    pub fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }

    fn allocate_block(&mut self) -> u64 {
        self.next_block += 1;
        self.next_block
    }

    fn insert_receipt(&mut self, tx_hash: &str, block: u64) {
        let hash = normalize_hex(tx_hash);
        self.receipts.insert(
            hash.clone(),
            Receipt {
                transaction_hash: hash,
                block_number: block,
                success: true,
            },
        );
    }

    fn check_reachable(&self) -> Result<()> {
        if self.fail_rpc {
            return Err(LedgerError::Transport("mock ledger unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.receipts.get(&normalize_hex(tx_hash)).cloned())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        self.check_reachable()?;
        Ok(self
            .logs
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::payment_received_topic;

    const MERCHANT: &str = "0x1111111111111111111111111111111111111111";
    const PAYER: &str = "0x2222222222222222222222222222222222222222";

    #[tokio::test]
    async fn test_mock_serves_registered_payment() {
        let ledger = MockLedgerClient::new().with_payment(
            "0xABC",
            MERCHANT,
            PAYER,
            U256::from(5u64),
            1_700_000_000,
        );

        let receipt = ledger.get_transaction_receipt("0xabc").await.unwrap().unwrap();
        let filter = LogFilter::single_block(ledger.contract(), payment_received_topic(), receipt.block_number);
        let logs = ledger.get_logs(&filter).await.unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(PaymentReceived::decode(&logs[0]).unwrap().payer, PAYER);
        assert_eq!(ledger.receipt_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let ledger = MockLedgerClient::new();
        assert!(ledger.get_transaction_receipt("0xfeed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable() {
        let ledger = MockLedgerClient::unreachable();
        let err = ledger.get_transaction_receipt("0xfeed").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
