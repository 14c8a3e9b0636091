//! Billing Configuration

use std::str::FromStr;

/// Default grace window before a lapsed subscription expires (7 days)
pub const DEFAULT_GRACE_SECS: i64 = 7 * 24 * 60 * 60;

/// Tunables for the subscription engine and agent jobs
#[derive(Clone, Debug)]
pub struct BillingConfig {
    /// Time a `payment_required` subscription may stay unpaid past its period end
    pub grace_secs: i64,
    /// Payments invoiced per job run
    pub invoice_batch: usize,
    /// Subscriptions swept per job run
    pub renewal_batch: usize,
    /// Display symbol for amounts in prompts
    pub currency_symbol: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            grace_secs: DEFAULT_GRACE_SECS,
            invoice_batch: 10,
            renewal_batch: 20,
            currency_symbol: "AVAX".into(),
        }
    }
}

impl BillingConfig {
    /// Create config from environment variables
    ///
    /// Batch sizes are fixed; only the grace window and currency symbol are
    /// read from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            grace_secs: env_or("SUBSCRIPTION_GRACE_SECS", defaults.grace_secs).max(0),
            currency_symbol: std::env::var("CURRENCY_SYMBOL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.currency_symbol),
            ..defaults
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
