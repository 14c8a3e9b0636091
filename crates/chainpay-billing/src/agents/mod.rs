//! Agent Jobs
//!
//! Batch jobs composed from the billing components:
//!
//! - **invoice**: write invoice text for payments that have none
//! - **renew**: sweep lapsed subscriptions, remind payers, expire the abandoned
//! - **analytics**: revenue and subscription figures plus a narrative summary
//!
//! Invoice and renewal runs are bounded and safe to overlap: every write they
//! make is compare-and-set, and a failure on one item only skips that item.

mod analytics;
mod invoice;
mod renewal;

use std::sync::Arc;

use chainpay_agent::LlmProvider;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::Result;
use crate::merchants::MerchantDirectory;
use crate::store::BillingStore;
use crate::subscriptions::SubscriptionEngine;

pub use analytics::{AnalyticsMetrics, AnalyticsReport, RecentPayment};
pub use invoice::{GeneratedInvoice, InvoiceReport};
pub use renewal::{RenewalReminder, RenewalReport};

/// Which job to run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Invoice,
    #[serde(alias = "renewal")]
    Renew,
    Analytics,
}

/// A job invocation
#[derive(Clone, Debug, Deserialize)]
pub struct AgentRequest {
    pub agent: AgentKind,
    #[serde(default)]
    pub merchant_wallet: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<Uuid>,
}

/// Result of any job
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum AgentReport {
    Invoice(InvoiceReport),
    Renewal(RenewalReport),
    Analytics(AnalyticsReport),
}

/// Which merchants a batch job covers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    All,
    Merchant(Uuid),
    /// The requested wallet has no merchant; nothing to do
    Unknown,
}

impl Scope {
    const fn merchant_id(self) -> Option<Uuid> {
        match self {
            Scope::Merchant(id) => Some(id),
            Scope::All | Scope::Unknown => None,
        }
    }
}

/// Runs agent jobs against the store and text generator
#[derive(Clone)]
pub struct AgentRunner {
    store: Arc<dyn BillingStore>,
    merchants: MerchantDirectory,
    subscriptions: SubscriptionEngine,
    generator: Arc<dyn LlmProvider>,
    config: BillingConfig,
}

impl AgentRunner {
    pub fn new(
        store: Arc<dyn BillingStore>,
        subscriptions: SubscriptionEngine,
        generator: Arc<dyn LlmProvider>,
        config: BillingConfig,
    ) -> Self {
        Self {
            merchants: MerchantDirectory::new(store.clone()),
            store,
            subscriptions,
            generator,
            config,
        }
    }

    pub async fn run(&self, request: &AgentRequest) -> Result<AgentReport> {
        let wallet = request
            .merchant_wallet
            .as_deref()
            .filter(|w| !w.trim().is_empty());

        tracing::info!(
            agent = ?request.agent,
            merchant_wallet = ?wallet,
            merchant_id = ?request.merchant_id,
            "Running agent"
        );

        match request.agent {
            AgentKind::Invoice => {
                let scope = self.scope(wallet, request.merchant_id).await?;
                Ok(AgentReport::Invoice(self.run_invoices(scope).await?))
            }
            AgentKind::Renew => {
                let scope = self.scope(wallet, request.merchant_id).await?;
                Ok(AgentReport::Renewal(self.run_renewals(scope).await?))
            }
            AgentKind::Analytics => Ok(AgentReport::Analytics(
                self.run_analytics(request.merchant_id, wallet).await?,
            )),
        }
    }

    /// Invoice job for one merchant wallet, or all merchants
    pub async fn invoices(&self, merchant_wallet: Option<&str>) -> Result<InvoiceReport> {
        let scope = self.scope(merchant_wallet, None).await?;
        self.run_invoices(scope).await
    }

    /// Renewal job for one merchant wallet, or all merchants
    pub async fn renewals(&self, merchant_wallet: Option<&str>) -> Result<RenewalReport> {
        let scope = self.scope(merchant_wallet, None).await?;
        self.run_renewals(scope).await
    }

    async fn scope(&self, wallet: Option<&str>, merchant_id: Option<Uuid>) -> Result<Scope> {
        if let Some(wallet) = wallet {
            return Ok(match self.merchants.lookup(wallet).await? {
                Some(merchant) => Scope::Merchant(merchant.id),
                None => Scope::Unknown,
            });
        }
        if let Some(id) = merchant_id {
            return Ok(match self.merchants.by_id(id).await? {
                Some(merchant) => Scope::Merchant(merchant.id),
                None => Scope::Unknown,
            });
        }
        Ok(Scope::All)
    }
}

#[cfg(test)]
mod fixtures {
    use super::*;
    use chainpay_agent::MockProvider;
    use chainpay_ledger::U256;
    use chrono::Utc;

    use crate::model::{BillingInterval, Merchant, Payment, PaymentStatus, Plan, Subscription};
    use crate::store::MemoryStore;
    use crate::webhook::RecordingDispatcher;

    pub const MERCHANT: &str = "0x00000000000000000000000000000000000000aa";
    pub const PAYER: &str = "0x00000000000000000000000000000000000000bb";

    pub struct Fixture {
        pub store: Arc<MemoryStore>,
        pub provider: Arc<MockProvider>,
        pub engine: SubscriptionEngine,
        pub runner: AgentRunner,
        pub merchant: Merchant,
        pub plan: Plan,
    }

    impl Fixture {
        pub async fn new(provider: MockProvider) -> Self {
            let store = Arc::new(MemoryStore::new());
            let provider = Arc::new(provider);
            let engine = SubscriptionEngine::new(
                store.clone(),
                Arc::new(RecordingDispatcher::new()),
                BillingConfig::default(),
            );
            let runner = AgentRunner::new(
                store.clone(),
                engine.clone(),
                provider.clone(),
                BillingConfig::default(),
            );
            let merchant = MerchantDirectory::new(store.clone())
                .resolve_or_create(MERCHANT)
                .await
                .unwrap();
            let plan = store
                .insert_plan(Plan::new(
                    merchant.id,
                    "Pro",
                    U256::from(2_500_000_000_000_000_000u128),
                    BillingInterval::Monthly,
                ))
                .await
                .unwrap();

            Self {
                store,
                provider,
                engine,
                runner,
                merchant,
                plan,
            }
        }

        pub async fn payment(&self, tx_hash: &str, timestamp: i64) -> Payment {
            self.store
                .insert_payment(Payment {
                    id: Uuid::new_v4(),
                    merchant_id: self.merchant.id,
                    payer: PAYER.into(),
                    amount: U256::from(1_000_000_000_000_000_000u128),
                    tx_hash: tx_hash.into(),
                    timestamp,
                    status: PaymentStatus::Verified,
                    invoice_sent: false,
                    invoice_text: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap()
                .into_inner()
        }

        /// Active subscription whose period ended `ago` seconds before now
        pub async fn lapsed_subscription(&self, ago: i64) -> Subscription {
            let sub = self
                .engine
                .create(self.merchant.id, PAYER, self.plan.id, None)
                .await
                .unwrap();
            let moved = Subscription {
                current_period_end: Utc::now().timestamp() - ago,
                ..sub.clone()
            };
            assert!(self.store.update_subscription(&moved, &sub).await.unwrap());
            self.store.subscription_by_id(sub.id).await.unwrap().unwrap()
        }
    }
}
