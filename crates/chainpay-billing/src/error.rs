//! Billing Error Types

use chainpay_agent::AgentError;
use chainpay_ledger::LedgerError;
use thiserror::Error;
use uuid::Uuid;

use crate::model::SubscriptionStatus;

/// Result type alias
pub type Result<T> = std::result::Result<T, BillingError>;

/// Billing errors
///
/// Uniqueness conflicts never appear here: the store resolves them into the
/// existing row and callers return that row.
#[derive(Error, Debug)]
pub enum BillingError {
    /// The chain has no transaction with this hash
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// The transaction emitted no matching payment event for the claimed merchant
    #[error("Payment event not found for transaction {tx_hash} and merchant {merchant}")]
    EventNotFound { tx_hash: String, merchant: String },

    #[error("Merchant not found: {0}")]
    MerchantNotFound(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    /// Renewal attempted before the current period lapsed
    #[error("Subscription {subscription_id} is not due until {current_period_end}")]
    NotDue {
        subscription_id: Uuid,
        current_period_end: i64,
    },

    /// Renewal attempted on a subscription in a terminal state
    #[error("Subscription {subscription_id} is {status} and cannot be renewed")]
    InvalidTransition {
        subscription_id: Uuid,
        status: SubscriptionStatus,
    },

    /// Text generator missing credentials
    #[error("Text generator not configured: {0}")]
    Unconfigured(String),

    /// Ledger, store or text generator call failed
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    /// Malformed input
    #[error("Invalid input: {0}")]
    Validation(String),
}

impl BillingError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            BillingError::EventNotFound { .. } => "EVENT_NOT_FOUND",
            BillingError::MerchantNotFound(_) => "MERCHANT_NOT_FOUND",
            BillingError::PlanNotFound(_) => "PLAN_NOT_FOUND",
            BillingError::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            BillingError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            BillingError::NotDue { .. } => "NOT_DUE",
            BillingError::InvalidTransition { .. } => "INVALID_TRANSITION",
            BillingError::Unconfigured(_) => "UNCONFIGURED",
            BillingError::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            BillingError::Validation(_) => "INVALID_INPUT",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BillingError::TransactionNotFound(_)
                | BillingError::EventNotFound { .. }
                | BillingError::MerchantNotFound(_)
                | BillingError::PlanNotFound(_)
                | BillingError::SubscriptionNotFound(_)
                | BillingError::PaymentNotFound(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::UpstreamFailure(_))
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            BillingError::TransactionNotFound(_) => "Transaction not found on chain.".into(),
            BillingError::EventNotFound { .. } => {
                "Payment event not found for this transaction.".into()
            }
            BillingError::NotDue { .. } => "Subscription not yet due for renewal.".into(),
            BillingError::InvalidTransition { status, .. } => {
                format!("Subscription is {status} and can no longer be renewed.")
            }
            BillingError::Unconfigured(_) => "Text generation is not configured.".into(),
            BillingError::UpstreamFailure(_) => {
                "An upstream service failed. Please try again.".into()
            }
            other => other.to_string(),
        }
    }
}

impl From<LedgerError> for BillingError {
    fn from(err: LedgerError) -> Self {
        BillingError::UpstreamFailure(format!("ledger: {err}"))
    }
}

#[cfg(feature = "postgres")]
impl From<diesel::result::Error> for BillingError {
    fn from(err: diesel::result::Error) -> Self {
        BillingError::UpstreamFailure(format!("store: {err}"))
    }
}

#[cfg(feature = "postgres")]
impl From<diesel::r2d2::PoolError> for BillingError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        BillingError::UpstreamFailure(format!("store pool: {err}"))
    }
}

impl From<AgentError> for BillingError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Unconfigured(msg) => BillingError::Unconfigured(msg),
            other => BillingError::UpstreamFailure(format!("text generator: {other}")),
        }
    }
}
