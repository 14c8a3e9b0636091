//! PaymentReceived Event
//!
//! The payments contract emits one event per settled payment. Merchant and
//! payer are indexed (topics 1 and 2); amount and timestamp are the two
//! data words.

use alloy_primitives::{hex, Address, B256, U256};
use alloy_sol_types::{sol, SolEvent};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::types::{normalize_hex, LogEntry};

mod abi {
    use super::sol;

    sol! {
        /// Emitted by the payments contract when a payer settles with a merchant
        #[derive(Debug)]
        event PaymentReceived(
            address indexed merchant,
            address indexed payer,
            uint256 amount,
            uint256 timestamp
        );
    }
}

/// Canonical event signature
pub const PAYMENT_RECEIVED_SIGNATURE: &str = abi::PaymentReceived::SIGNATURE;

/// Topic0 of `PaymentReceived` as `0x` hex
pub fn payment_received_topic() -> String {
    hex::encode_prefixed(abi::PaymentReceived::SIGNATURE_HASH)
}

/// A decoded `PaymentReceived` log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceived {
    /// Lowercase merchant address
    pub merchant: String,
    /// Lowercase payer address
    pub payer: String,
    /// Amount in the chain's base unit
    pub amount: U256,
    /// Unix seconds as recorded by the contract
    pub timestamp: i64,
    pub transaction_hash: String,
    pub block_number: u64,
}

impl PaymentReceived {
    /// Decode from a raw log
    pub fn decode(log: &LogEntry) -> Result<Self> {
        let topics = log
            .topics
            .iter()
            .map(|topic| {
                normalize_hex(topic)
                    .parse::<B256>()
                    .map_err(|e| LedgerError::Decode(format!("topic '{topic}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let data = decode_hex(&log.data)?;

        let event = abi::PaymentReceived::decode_raw_log(topics, &data, true)
            .map_err(|e| LedgerError::Decode(e.to_string()))?;

        Ok(Self {
            merchant: hex::encode_prefixed(event.merchant),
            payer: hex::encode_prefixed(event.payer),
            amount: event.amount,
            timestamp: timestamp_seconds(event.timestamp)?,
            transaction_hash: normalize_hex(&log.transaction_hash),
            block_number: log.block_number,
        })
    }

    /// Encode back into a log emitted by `contract` (used by fixtures and the mock ledger)
    pub fn to_log(&self, contract: &str, log_index: u64) -> Result<LogEntry> {
        let timestamp = u64::try_from(self.timestamp)
            .map_err(|_| LedgerError::Decode("negative timestamp".into()))?;
        let event = abi::PaymentReceived {
            merchant: parse_address(&self.merchant)?,
            payer: parse_address(&self.payer)?,
            amount: self.amount,
            timestamp: U256::from(timestamp),
        };
        let encoded = event.encode_log_data();

        Ok(LogEntry {
            address: normalize_hex(contract),
            topics: encoded.topics().iter().map(hex::encode_prefixed).collect(),
            data: hex::encode_prefixed(&encoded.data),
            transaction_hash: normalize_hex(&self.transaction_hash),
            block_number: self.block_number,
            log_index,
        })
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(normalize_hex(value)).map_err(|e| LedgerError::Decode(e.to_string()))
}

fn parse_address(value: &str) -> Result<Address> {
    normalize_hex(value)
        .parse::<Address>()
        .map_err(|e| LedgerError::Decode(format!("address '{value}': {e}")))
}

/// The contract stores `block.timestamp`; anything past `i64` is corrupt
fn timestamp_seconds(word: U256) -> Result<i64> {
    let limbs = word.as_limbs();
    if limbs[1..].iter().any(|limb| *limb != 0) {
        return Err(LedgerError::Decode("timestamp exceeds 64 bits".into()));
    }
    i64::try_from(limbs[0]).map_err(|_| LedgerError::Decode("timestamp out of range".into()))
}
