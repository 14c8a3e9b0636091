//! # chainpay-billing
//!
//! Reconciliation and billing core: on-chain payment verification, merchant
//! identity, the subscription lifecycle, webhook notifications and the batch
//! agent jobs that drive them.
//!
//! ## Verification flow
//!
//! ```text
//! tx_hash ─▶ PaymentVerifier ─▶ LedgerClient (receipt + PaymentReceived log)
//!                 │
//!                 ├─▶ MerchantDirectory::resolve_or_create(wallet)
//!                 ├─▶ BillingStore::insert_payment (tx_hash unique)
//!                 ├─▶ WebhookDispatcher: payment_succeeded   (new rows only)
//!                 └─▶ SubscriptionEngine::create             (plan supplied)
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use chainpay_billing::{BillingConfig, MemoryStore, PaymentVerifier, RecordingDispatcher, SubscriptionEngine};
//!
//! let store = Arc::new(MemoryStore::new());
//! let webhooks = Arc::new(RecordingDispatcher::new());
//! let engine = SubscriptionEngine::new(store.clone(), webhooks.clone(), BillingConfig::default());
//! let verifier = PaymentVerifier::new(ledger, contract, store, webhooks, engine);
//!
//! let verified = verifier.verify(&request).await?;
//! ```
//!
//! Every dependency is a trait object built by the caller, so tests swap in
//! `MockLedgerClient`, `MemoryStore`, `RecordingDispatcher` and `MockProvider`.

pub mod agents;
pub mod config;
pub mod error;
pub mod merchants;
pub mod model;
pub mod plans;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod prompts;
pub mod store;
pub mod subscriptions;
pub mod verifier;
pub mod webhook;

pub use agents::{AgentKind, AgentReport, AgentRequest, AgentRunner};
pub use config::BillingConfig;
pub use error::{BillingError, Result};
pub use merchants::MerchantDirectory;
pub use model::{
    normalize_wallet, parse_amount, to_display_units, BillingInterval, Merchant, Payment,
    PaymentStatus, Plan, Subscription, SubscriptionStatus, WebhookEndpoint,
};
pub use plans::PlanCatalog;
#[cfg(feature = "postgres")]
pub use postgres::{PgConfig, PgStore};
pub use store::{BillingStore, Insert, MemoryStore, SubscriptionFilter};
pub use subscriptions::{calculate_next_billing, LapsedSubscription, SubscriptionEngine};
pub use verifier::{PaymentVerifier, VerifiedPayment, VerifyPaymentRequest};
pub use webhook::{
    sign_payload, verify_signature, HttpWebhookDispatcher, RecordingDispatcher, SignatureError,
    WebhookConfig, WebhookDispatcher, WebhookEvent, WebhookEventType, SIGNATURE_HEADER,
};
