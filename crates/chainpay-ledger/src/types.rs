//! Ledger Types
//!
//! Chain data as the billing core sees it: hex strings are kept lowercase
//! and `0x`-prefixed, block numbers are plain integers.

use serde::{Deserialize, Serialize};

/// Transaction receipt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: u64,
    /// `true` when the transaction executed without reverting
    pub success: bool,
}

/// A single event log entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Emitting contract
    pub address: String,
    /// Indexed topics; `topics[0]` is the event signature hash
    pub topics: Vec<String>,
    /// Non-indexed arguments, ABI-encoded hex
    pub data: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub log_index: u64,
}

/// Filter for `eth_getLogs`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub address: String,
    /// Topics to match by position
    pub topics: Vec<String>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    /// Logs from `address` with `topic0` in exactly one block
    pub fn single_block(address: impl Into<String>, topic0: impl Into<String>, block: u64) -> Self {
        Self {
            address: address.into(),
            topics: vec![topic0.into()],
            from_block: block,
            to_block: block,
        }
    }

    /// Whether `log` satisfies this filter
    pub fn matches(&self, log: &LogEntry) -> bool {
        log.address.eq_ignore_ascii_case(&self.address)
            && (self.from_block..=self.to_block).contains(&log.block_number)
            && self
                .topics
                .iter()
                .enumerate()
                .all(|(i, t)| log.topics.get(i).is_some_and(|lt| lt.eq_ignore_ascii_case(t)))
    }
}

/// Lowercase a hex string and make sure it carries a `0x` prefix
pub fn normalize_hex(value: &str) -> String {
    let trimmed = value.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", body.to_ascii_lowercase())
}

/// Parse a JSON-RPC hex quantity (`"0x1b4"`)
pub fn parse_quantity(value: &str) -> Option<u64> {
    let body = value.trim().strip_prefix("0x")?;
    if body.is_empty() {
        return None;
    }
    u64::from_str_radix(body, 16).ok()
}

/// Format an integer as a JSON-RPC hex quantity
pub fn to_quantity(value: u64) -> String {
    format!("{value:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_hex() {
        assert_eq!(normalize_hex(" 0xABcd "), "0xabcd");
        assert_eq!(normalize_hex("ABCD"), "0xabcd");
        assert_eq!(normalize_hex("0XFF"), "0xff");
    }

    #[test]
    fn test_quantities() {
        assert_eq!(parse_quantity("0x1b4"), Some(436));
        assert_eq!(parse_quantity("0x"), None);
        assert_eq!(parse_quantity("12"), None);
        assert_eq!(to_quantity(436), "0x1b4");
    }

    #[test]
    fn test_filter_matches() {
        let log = LogEntry {
            address: "0xabc".into(),
            topics: vec!["0xSIG".into(), "0xmerchant".into()],
            data: "0x".into(),
            transaction_hash: "0x01".into(),
            block_number: 10,
            log_index: 0,
        };

        assert!(LogFilter::single_block("0xABC", "0xsig", 10).matches(&log));
        assert!(!LogFilter::single_block("0xABC", "0xsig", 11).matches(&log));
        assert!(!LogFilter::single_block("0xdef", "0xsig", 10).matches(&log));
        assert!(!LogFilter::single_block("0xabc", "0xother", 10).matches(&log));
    }
}
