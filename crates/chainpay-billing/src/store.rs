//! Billing Store
//!
//! Persistence boundary for merchants, plans, payments, subscriptions and
//! webhook endpoints. Uniqueness (`wallet`, `tx_hash`) is enforced here: an
//! insert that collides returns the row already stored instead of failing,
//! which is what makes verification and merchant creation idempotent without
//! locks held across calls.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::model::{Merchant, Payment, Plan, Subscription, SubscriptionStatus, WebhookEndpoint};

/// Outcome of an insert guarded by a uniqueness constraint
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Insert<T> {
    /// Row was written
    Created(T),
    /// A row with the same unique key already existed; it is returned unchanged
    Existing(T),
}

impl<T> Insert<T> {
    pub const fn is_created(&self) -> bool {
        matches!(self, Insert::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Insert::Created(row) | Insert::Existing(row) => row,
        }
    }

    /// Convert the row, keeping whether it was created
    pub fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<Insert<U>> {
        Ok(match self {
            Insert::Created(row) => Insert::Created(f(row)?),
            Insert::Existing(row) => Insert::Existing(f(row)?),
        })
    }
}

/// Equality filters for listing subscriptions
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    pub merchant_id: Option<Uuid>,
    pub payer_wallet: Option<String>,
    pub status: Option<SubscriptionStatus>,
}

impl SubscriptionFilter {
    fn matches(&self, sub: &Subscription) -> bool {
        self.merchant_id.is_none_or(|id| sub.merchant_id == id)
            && self
                .payer_wallet
                .as_deref()
                .is_none_or(|w| sub.payer_wallet == w)
            && self.status.is_none_or(|s| sub.status == s)
    }
}

/// Relational store operations used by the billing core
#[async_trait]
pub trait BillingStore: Send + Sync {
    // ---- merchants ----

    /// Insert unless the wallet is taken
    async fn insert_merchant(&self, merchant: Merchant) -> Result<Insert<Merchant>>;

    async fn merchant_by_wallet(&self, wallet: &str) -> Result<Option<Merchant>>;

    async fn merchant_by_id(&self, id: Uuid) -> Result<Option<Merchant>>;

    // ---- plans ----

    async fn insert_plan(&self, plan: Plan) -> Result<Plan>;

    async fn plan_by_id(&self, id: Uuid) -> Result<Option<Plan>>;

    /// Newest first
    async fn list_plans(&self, merchant_id: Option<Uuid>) -> Result<Vec<Plan>>;

    // ---- payments ----

    /// Insert unless the transaction hash is taken
    async fn insert_payment(&self, payment: Payment) -> Result<Insert<Payment>>;

    async fn payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>>;

    /// Ordered by chain timestamp, most recent first
    async fn payments_for_merchant(&self, merchant_id: Uuid) -> Result<Vec<Payment>>;

    /// Payments without an invoice, oldest first, at most `limit`
    async fn payments_pending_invoice(
        &self,
        merchant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Payment>>;

    /// Store invoice text if none was stored yet; false if another run won
    async fn mark_invoice_sent(&self, payment_id: Uuid, invoice_text: &str) -> Result<bool>;

    // ---- subscriptions ----

    async fn insert_subscription(&self, subscription: Subscription) -> Result<Subscription>;

    async fn subscription_by_id(&self, id: Uuid) -> Result<Option<Subscription>>;

    /// Replace the row if it still matches `previous` (status and `updated_at`)
    ///
    /// Returns false when a concurrent writer changed it first.
    async fn update_subscription(
        &self,
        updated: &Subscription,
        previous: &Subscription,
    ) -> Result<bool>;

    /// Newest first
    async fn list_subscriptions(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>>;

    /// Subscriptions in `status` whose period ended before `before`, earliest deadline first
    async fn due_subscriptions(
        &self,
        status: SubscriptionStatus,
        before: i64,
        merchant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Subscription>>;

    // ---- webhook endpoints ----

    async fn insert_webhook_endpoint(&self, endpoint: WebhookEndpoint) -> Result<WebhookEndpoint>;

    async fn webhook_endpoints(&self, merchant_id: Uuid) -> Result<Vec<WebhookEndpoint>>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct Tables {
    merchants: HashMap<Uuid, Merchant>,
    merchant_by_wallet: HashMap<String, Uuid>,
    plans: HashMap<Uuid, Plan>,
    payments: HashMap<Uuid, Payment>,
    payment_by_tx: HashMap<String, Uuid>,
    subscriptions: HashMap<Uuid, Subscription>,
    endpoints: Vec<WebhookEndpoint>,
}

/// In-memory store (development and tests)
///
/// All tables sit behind one lock so a uniqueness check and the write that
/// follows it are a single step.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn merchant_count(&self) -> usize {
        self.tables.read().await.merchants.len()
    }

    pub async fn payment_count(&self) -> usize {
        self.tables.read().await.payments.len()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn insert_merchant(&self, merchant: Merchant) -> Result<Insert<Merchant>> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .merchant_by_wallet
            .get(&merchant.wallet)
            .and_then(|id| tables.merchants.get(id))
        {
            return Ok(Insert::Existing(existing.clone()));
        }

        tables.merchant_by_wallet.insert(merchant.wallet.clone(), merchant.id);
        tables.merchants.insert(merchant.id, merchant.clone());
        Ok(Insert::Created(merchant))
    }

    async fn merchant_by_wallet(&self, wallet: &str) -> Result<Option<Merchant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .merchant_by_wallet
            .get(wallet)
            .and_then(|id| tables.merchants.get(id))
            .cloned())
    }

    async fn merchant_by_id(&self, id: Uuid) -> Result<Option<Merchant>> {
        Ok(self.tables.read().await.merchants.get(&id).cloned())
    }

    async fn insert_plan(&self, plan: Plan) -> Result<Plan> {
        let mut tables = self.tables.write().await;
        if !tables.merchants.contains_key(&plan.merchant_id) {
            return Err(BillingError::MerchantNotFound(plan.merchant_id.to_string()));
        }
        tables.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn plan_by_id(&self, id: Uuid) -> Result<Option<Plan>> {
        Ok(self.tables.read().await.plans.get(&id).cloned())
    }

    async fn list_plans(&self, merchant_id: Option<Uuid>) -> Result<Vec<Plan>> {
        let tables = self.tables.read().await;
        let mut plans: Vec<Plan> = tables
            .plans
            .values()
            .filter(|p| merchant_id.is_none_or(|id| p.merchant_id == id))
            .cloned()
            .collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    async fn insert_payment(&self, payment: Payment) -> Result<Insert<Payment>> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .payment_by_tx
            .get(&payment.tx_hash)
            .and_then(|id| tables.payments.get(id))
        {
            return Ok(Insert::Existing(existing.clone()));
        }

        tables.payment_by_tx.insert(payment.tx_hash.clone(), payment.id);
        tables.payments.insert(payment.id, payment.clone());
        Ok(Insert::Created(payment))
    }

    async fn payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payment_by_tx
            .get(tx_hash)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn payments_for_merchant(&self, merchant_id: Uuid) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.merchant_id == merchant_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(payments)
    }

    async fn payments_pending_invoice(
        &self,
        merchant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| !p.invoice_sent)
            .filter(|p| merchant_id.is_none_or(|id| p.merchant_id == id))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_invoice_sent(&self, payment_id: Uuid, invoice_text: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let payment = tables
            .payments
            .get_mut(&payment_id)
            .ok_or(BillingError::PaymentNotFound(payment_id))?;

        if payment.invoice_sent {
            return Ok(false);
        }
        payment.invoice_sent = true;
        payment.invoice_text = Some(invoice_text.to_string());
        Ok(true)
    }

    async fn insert_subscription(&self, subscription: Subscription) -> Result<Subscription> {
        let mut tables = self.tables.write().await;
        tables
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn subscription_by_id(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.tables.read().await.subscriptions.get(&id).cloned())
    }

    async fn update_subscription(
        &self,
        updated: &Subscription,
        previous: &Subscription,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .subscriptions
            .get_mut(&updated.id)
            .ok_or(BillingError::SubscriptionNotFound(updated.id))?;

        if stored.status != previous.status || stored.updated_at != previous.updated_at {
            return Ok(false);
        }

        *stored = updated.clone();
        if stored.updated_at == previous.updated_at {
            stored.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn list_subscriptions(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>> {
        let tables = self.tables.read().await;
        let mut subs: Vec<Subscription> = tables
            .subscriptions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subs)
    }

    async fn due_subscriptions(
        &self,
        status: SubscriptionStatus,
        before: i64,
        merchant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Subscription>> {
        let tables = self.tables.read().await;
        let mut due: Vec<Subscription> = tables
            .subscriptions
            .values()
            .filter(|s| s.status == status && s.current_period_end < before)
            .filter(|s| merchant_id.is_none_or(|id| s.merchant_id == id))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.current_period_end);
        due.truncate(limit);
        Ok(due)
    }

    async fn insert_webhook_endpoint(&self, endpoint: WebhookEndpoint) -> Result<WebhookEndpoint> {
        let mut tables = self.tables.write().await;
        if !tables.merchants.contains_key(&endpoint.merchant_id) {
            return Err(BillingError::MerchantNotFound(endpoint.merchant_id.to_string()));
        }
        tables.endpoints.push(endpoint.clone());
        Ok(endpoint)
    }

    async fn webhook_endpoints(&self, merchant_id: Uuid) -> Result<Vec<WebhookEndpoint>> {
        let tables = self.tables.read().await;
        Ok(tables
            .endpoints
            .iter()
            .filter(|e| e.merchant_id == merchant_id)
            .cloned()
            .collect())
    }
}
