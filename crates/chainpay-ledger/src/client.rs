//! Ledger Client
//!
//! The two chain reads the payment verifier needs.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{LogEntry, LogFilter, Receipt};

/// Default JSON-RPC endpoint (Avalanche Fuji C-Chain)
pub const DEFAULT_RPC_URL: &str = "https://api.avax-test.network/ext/bc/C/rpc";

/// Default payments contract emitting `PaymentReceived`
pub const DEFAULT_PAYMENTS_CONTRACT: &str = "0xA97Cb465cf77b1f31a9b554491451cc94871E0A1";

/// Ledger client trait (Strategy pattern)
///
/// Implemented over JSON-RPC in production and by [`crate::MockLedgerClient`] in tests.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Receipt for `tx_hash`, or `None` when the chain has no such transaction
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>>;

    /// Logs matching `filter`
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>>;

    /// Client name for logging
    fn name(&self) -> &str;
}

/// Ledger configuration
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub payments_contract: String,
    pub timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.into(),
            payments_contract: DEFAULT_PAYMENTS_CONTRACT.into(),
            timeout_secs: 15,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rpc_url: std::env::var("LEDGER_RPC_URL").unwrap_or(defaults.rpc_url),
            payments_contract: std::env::var("PAYMENTS_CONTRACT_ADDRESS")
                .unwrap_or(defaults.payments_contract),
            timeout_secs: std::env::var("LEDGER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}
