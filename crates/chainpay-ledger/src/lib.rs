//! # chainpay-ledger
//!
//! Read-only access to the payments contract on an EVM chain.
//!
//! ```text
//! ┌──────────────┐  eth_getTransactionReceipt  ┌──────────────┐
//! │   Payment    │────────────────────────────▶│  JSON-RPC    │
//! │   Verifier   │  eth_getLogs (one block)    │  endpoint    │
//! │              │────────────────────────────▶│              │
//! └──────────────┘                             └──────────────┘
//!         │
//!         ▼
//!  PaymentReceived { merchant, payer, amount, timestamp }
//! ```
//!
//! The decoded event is the only source of payment amount and time; nothing
//! the caller claims is trusted.

pub mod client;
pub mod error;
pub mod events;
pub mod mock;
pub mod rpc;
pub mod types;

pub use alloy_primitives::U256;
pub use client::{LedgerClient, LedgerConfig};
pub use error::{LedgerError, Result};
pub use events::{payment_received_topic, PaymentReceived, PAYMENT_RECEIVED_SIGNATURE};
pub use mock::MockLedgerClient;
pub use rpc::JsonRpcLedgerClient;
pub use types::{normalize_hex, LogEntry, LogFilter, Receipt};
