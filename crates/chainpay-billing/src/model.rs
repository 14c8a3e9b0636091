//! Domain Models
//!
//! Merchants, plans, payments and subscriptions. Amounts are 256-bit integers
//! in the chain's base unit and serialize as decimal strings; chain
//! timestamps and billing deadlines are unix seconds.

use std::str::FromStr;

use chainpay_ledger::U256;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BillingError;

/// Base-unit decimals of the settlement asset (wei-style)
pub const BASE_UNIT_DECIMALS: u32 = 18;

/// Lowercase and trim a wallet address
pub fn normalize_wallet(wallet: &str) -> String {
    wallet.trim().to_lowercase()
}

/// Merchant API key: `sk_` + random alphanumerics + creation time in millis
pub fn generate_api_key(now: DateTime<Utc>) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("sk_{}{}", random.to_lowercase(), now.timestamp_millis())
}

/// A merchant identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merchant {
    pub id: Uuid,
    /// Lowercase wallet, unique
    pub wallet: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

impl Merchant {
    pub fn new(wallet: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet: normalize_wallet(wallet),
            api_key: generate_api_key(now),
            created_at: now,
        }
    }
}

/// Billing interval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Weekly,
    Monthly,
    Yearly,
}

impl BillingInterval {
    /// Fixed-length period; months are 30 days and years 365 days
    pub const fn duration_secs(self) -> i64 {
        const DAY: i64 = 24 * 60 * 60;
        match self {
            BillingInterval::Weekly => 7 * DAY,
            BillingInterval::Monthly => 30 * DAY,
            BillingInterval::Yearly => 365 * DAY,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BillingInterval::Weekly => "weekly",
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingInterval {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weekly" => Ok(BillingInterval::Weekly),
            "monthly" => Ok(BillingInterval::Monthly),
            "yearly" => Ok(BillingInterval::Yearly),
            other => Err(BillingError::Validation(format!(
                "invalid interval '{other}', must be weekly, monthly, or yearly"
            ))),
        }
    }
}

/// Billing template owned by one merchant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub name: String,
    #[serde(with = "amount_string")]
    pub amount: U256,
    pub interval: BillingInterval,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(merchant_id: Uuid, name: impl Into<String>, amount: U256, interval: BillingInterval) -> Self {
        Self {
            id: Uuid::new_v4(),
            merchant_id,
            name: name.into(),
            amount,
            interval,
            created_at: Utc::now(),
        }
    }
}

/// Payment status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Verified,
}

impl PaymentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Verified => "verified",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "verified" => Ok(PaymentStatus::Verified),
            other => Err(BillingError::Validation(format!("unknown payment status '{other}'"))),
        }
    }
}

/// A verified on-chain payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub merchant_id: Uuid,
    /// Lowercase payer wallet
    pub payer: String,
    #[serde(with = "amount_string")]
    pub amount: U256,
    /// Lowercase transaction hash, unique
    pub tx_hash: String,
    /// Unix seconds from the chain event
    pub timestamp: i64,
    pub status: PaymentStatus,
    pub invoice_sent: bool,
    pub invoice_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Invoice number derived from the payment id (`INV-XXXXXXXX`)
    pub fn invoice_number(&self) -> String {
        let simple = self.id.simple().to_string().to_uppercase();
        format!("INV-{}", &simple[..8])
    }
}

/// Subscription lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PaymentRequired,
    Active,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::PaymentRequired => "payment_required",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Renewals and sweeps never move a terminal subscription
    pub const fn is_terminal(self) -> bool {
        matches!(self, SubscriptionStatus::Canceled | SubscriptionStatus::Expired)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "payment_required" => Ok(SubscriptionStatus::PaymentRequired),
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(BillingError::Validation(format!("unknown subscription status '{other}'"))),
        }
    }
}

/// A payer's recurring subscription to a plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub plan_id: Uuid,
    /// Lowercase payer wallet
    pub payer_wallet: String,
    pub status: SubscriptionStatus,
    /// Unix seconds
    pub current_period_end: i64,
    /// Transaction hash supplied at creation or the last renewal
    pub last_payment_tx: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Active and past its period end
    pub const fn is_due(&self, now: i64) -> bool {
        matches!(self.status, SubscriptionStatus::Active) && self.current_period_end < now
    }
}

/// Where a merchant receives webhook notifications
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub url: String,
    /// HMAC key; empty disables signing
    #[serde(default, skip_serializing)]
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    pub fn new(merchant_id: Uuid, url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            merchant_id,
            url: url.into(),
            secret: secret.into(),
            created_at: Utc::now(),
        }
    }
}

/// Parse a base-unit amount given as a decimal (or `0x` hex) string
pub fn parse_amount(value: &str) -> Result<U256, BillingError> {
    value
        .trim()
        .parse::<U256>()
        .map_err(|e| BillingError::Validation(format!("invalid amount '{value}': {e}")))
}

/// Scale a base-unit amount to display units, rounded half-up to 4 places
///
/// `1_500_000_000_000_000_000` → `"1.5000"`
pub fn to_display_units(amount: U256) -> String {
    let unit = U256::from(10u128.pow(BASE_UNIT_DECIMALS));
    let step = U256::from(10u128.pow(BASE_UNIT_DECIMALS - 4));
    let half_step = step / U256::from(2u8);

    let mut whole = amount / unit;
    let mut frac = (amount % unit + half_step) / step;
    if frac >= U256::from(10_000u32) {
        whole += U256::from(1u8);
        frac -= U256::from(10_000u32);
    }

    format!("{whole}.{:04}", frac.as_limbs()[0])
}

/// Serde adapter: `U256` as a decimal string
pub mod amount_string {
    use chainpay_ledger::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim().parse::<U256>().map_err(serde::de::Error::custom)
    }
}
