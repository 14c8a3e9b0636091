//! Subscription Engine
//!
//! State machine:
//!
//! ```text
//!                 renew                     sweep (period lapsed)
//!  payment_required ─────▶ active ──────────────────────▶ payment_required
//!         │                  │                                  │
//!         │ cancel           │ cancel                           │ grace window passed
//!         ▼                  ▼                                  ▼
//!      canceled           canceled                           expired ──cancel──▶ canceled
//! ```
//!
//! Every transition is a compare-and-set against the row that was read, so two
//! sweeps or a sweep racing a renewal never both apply.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::model::{normalize_wallet, BillingInterval, Plan, Subscription, SubscriptionStatus};
use crate::store::{BillingStore, SubscriptionFilter};
use crate::webhook::{WebhookDispatcher, WebhookEvent, WebhookEventType};

/// Attempts for a renewal whose compare-and-set lost a race
const RENEW_ATTEMPTS: usize = 2;

/// Next period end for `interval` starting at `now` (unix seconds)
pub const fn calculate_next_billing(interval: BillingInterval, now: i64) -> i64 {
    now + interval.duration_secs()
}

/// A subscription moved to `payment_required` by a sweep, with its plan
#[derive(Clone, Debug)]
pub struct LapsedSubscription {
    pub subscription: Subscription,
    pub plan: Plan,
    /// The period end that was missed
    pub lapsed_at: i64,
}

/// Owns subscription lifecycle transitions
#[derive(Clone)]
pub struct SubscriptionEngine {
    store: Arc<dyn BillingStore>,
    webhooks: Arc<dyn WebhookDispatcher>,
    config: BillingConfig,
}

impl SubscriptionEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        webhooks: Arc<dyn WebhookDispatcher>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            webhooks,
            config,
        }
    }

    /// Create a paid subscription (`active`, one interval from now)
    pub async fn create(
        &self,
        merchant_id: Uuid,
        payer_wallet: &str,
        plan_id: Uuid,
        tx_hash: Option<&str>,
    ) -> Result<Subscription> {
        self.insert(merchant_id, payer_wallet, plan_id, tx_hash, SubscriptionStatus::Active)
            .await
    }

    /// Create a subscription ahead of payment (`payment_required`, due now)
    pub async fn create_pending(
        &self,
        merchant_id: Uuid,
        payer_wallet: &str,
        plan_id: Uuid,
    ) -> Result<Subscription> {
        self.insert(
            merchant_id,
            payer_wallet,
            plan_id,
            None,
            SubscriptionStatus::PaymentRequired,
        )
        .await
    }

    async fn insert(
        &self,
        merchant_id: Uuid,
        payer_wallet: &str,
        plan_id: Uuid,
        tx_hash: Option<&str>,
        status: SubscriptionStatus,
    ) -> Result<Subscription> {
        let payer_wallet = normalize_wallet(payer_wallet);
        if payer_wallet.is_empty() {
            return Err(BillingError::Validation("customer wallet is required".into()));
        }

        let plan = self
            .store
            .plan_by_id(plan_id)
            .await?
            .filter(|p| p.merchant_id == merchant_id)
            .ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))?;

        let now = Utc::now();
        let current_period_end = match status {
            SubscriptionStatus::Active => calculate_next_billing(plan.interval, now.timestamp()),
            _ => now.timestamp(),
        };

        let subscription = self
            .store
            .insert_subscription(Subscription {
                id: Uuid::new_v4(),
                merchant_id,
                plan_id: plan.id,
                payer_wallet,
                status,
                current_period_end,
                last_payment_tx: tx_hash.map(str::to_lowercase),
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            merchant_id = %merchant_id,
            plan_id = %plan.id,
            status = %subscription.status,
            "Created subscription"
        );

        self.notify(
            &subscription,
            WebhookEventType::SubscriptionCreated,
            json!({
                "merchant_id": subscription.merchant_id,
                "subscription_id": subscription.id,
                "customer": subscription.payer_wallet,
                "plan_id": subscription.plan_id,
                "status": subscription.status,
                "current_period_end": subscription.current_period_end,
            }),
        )
        .await;

        Ok(subscription)
    }

    /// Renew after the period lapsed, or settle a `payment_required` subscription
    ///
    /// An `active` subscription whose period has not ended fails with
    /// `NotDue` and is left untouched.
    pub async fn renew(&self, id: Uuid, tx_hash: Option<&str>) -> Result<Subscription> {
        for _ in 0..RENEW_ATTEMPTS {
            let current = self.get(id).await?;
            if current.status.is_terminal() {
                return Err(BillingError::InvalidTransition {
                    subscription_id: id,
                    status: current.status,
                });
            }

            let now = Utc::now();
            if current.status == SubscriptionStatus::Active
                && current.current_period_end > now.timestamp()
            {
                return Err(BillingError::NotDue {
                    subscription_id: id,
                    current_period_end: current.current_period_end,
                });
            }

            let plan = self.plan_for(&current).await?;
            let renewed = Subscription {
                status: SubscriptionStatus::Active,
                current_period_end: calculate_next_billing(plan.interval, now.timestamp()),
                last_payment_tx: tx_hash.map(str::to_lowercase).or(current.last_payment_tx.clone()),
                updated_at: now,
                ..current.clone()
            };

            if !self.store.update_subscription(&renewed, &current).await? {
                tracing::debug!(subscription_id = %id, "Renewal lost a concurrent update, re-reading");
                continue;
            }

            tracing::info!(
                subscription_id = %id,
                current_period_end = renewed.current_period_end,
                "Renewed subscription"
            );

            self.notify(
                &renewed,
                WebhookEventType::SubscriptionRenewed,
                json!({
                    "merchant_id": renewed.merchant_id,
                    "subscription_id": renewed.id,
                    "customer": renewed.payer_wallet,
                    "status": renewed.status,
                    "current_period_end": renewed.current_period_end,
                    "tx_hash": tx_hash,
                }),
            )
            .await;

            return Ok(renewed);
        }

        Err(BillingError::UpstreamFailure(format!(
            "subscription {id} kept changing during renewal"
        )))
    }

    /// Cancel a subscription from any state, expired included
    ///
    /// Canceling twice returns the canceled row and notifies once.
    pub async fn cancel(&self, id: Uuid) -> Result<Subscription> {
        loop {
            let current = self.get(id).await?;
            if current.status == SubscriptionStatus::Canceled {
                return Ok(current);
            }

            let canceled = Subscription {
                status: SubscriptionStatus::Canceled,
                updated_at: Utc::now(),
                ..current.clone()
            };

            if !self.store.update_subscription(&canceled, &current).await? {
                continue;
            }

            tracing::info!(subscription_id = %id, "Canceled subscription");

            self.notify(
                &canceled,
                WebhookEventType::SubscriptionCanceled,
                json!({
                    "merchant_id": canceled.merchant_id,
                    "subscription_id": canceled.id,
                    "customer": canceled.payer_wallet,
                    "status": canceled.status,
                }),
            )
            .await;

            return Ok(canceled);
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Subscription> {
        self.store
            .subscription_by_id(id)
            .await?
            .ok_or(BillingError::SubscriptionNotFound(id))
    }

    pub async fn list(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>> {
        self.store.list_subscriptions(filter).await
    }

    /// Active subscriptions whose period ended before `now`, at most `limit`
    pub async fn due_for_renewal(
        &self,
        merchant_id: Option<Uuid>,
        now: i64,
        limit: usize,
    ) -> Result<Vec<Subscription>> {
        self.store
            .due_subscriptions(SubscriptionStatus::Active, now, merchant_id, limit)
            .await
    }

    /// Move a lapsed active subscription to `payment_required` with a tentative
    /// next period end; `None` if it changed since it was read
    pub async fn mark_payment_required(
        &self,
        subscription: &Subscription,
        interval: BillingInterval,
        now: i64,
    ) -> Result<Option<Subscription>> {
        if subscription.status != SubscriptionStatus::Active {
            return Ok(None);
        }

        let lapsed = Subscription {
            status: SubscriptionStatus::PaymentRequired,
            current_period_end: calculate_next_billing(interval, now),
            updated_at: Utc::now(),
            ..subscription.clone()
        };

        if self.store.update_subscription(&lapsed, subscription).await? {
            tracing::info!(
                subscription_id = %lapsed.id,
                current_period_end = lapsed.current_period_end,
                "Subscription requires payment"
            );
            Ok(Some(lapsed))
        } else {
            Ok(None)
        }
    }

    /// Sweep up to `limit` lapsed active subscriptions into `payment_required`
    ///
    /// Items that fail or were changed concurrently are skipped.
    pub async fn sweep_lapsed(
        &self,
        merchant_id: Option<Uuid>,
        now: i64,
        limit: usize,
    ) -> Result<Vec<LapsedSubscription>> {
        let due = self.due_for_renewal(merchant_id, now, limit).await?;
        let mut lapsed = Vec::with_capacity(due.len());

        for subscription in due {
            let plan = match self.plan_for(&subscription).await {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(subscription_id = %subscription.id, "Skipping sweep: {}", e);
                    continue;
                }
            };

            let lapsed_at = subscription.current_period_end;
            match self.mark_payment_required(&subscription, plan.interval, now).await {
                Ok(Some(subscription)) => lapsed.push(LapsedSubscription {
                    subscription,
                    plan,
                    lapsed_at,
                }),
                Ok(None) => {
                    tracing::debug!(subscription_id = %subscription.id, "Already transitioned");
                }
                Err(e) => {
                    tracing::warn!(subscription_id = %subscription.id, "Sweep transition failed: {}", e);
                }
            }
        }

        Ok(lapsed)
    }

    /// Expire `payment_required` subscriptions unpaid past the grace window
    pub async fn expire_lapsed(
        &self,
        merchant_id: Option<Uuid>,
        now: i64,
        limit: usize,
    ) -> Result<Vec<Subscription>> {
        let cutoff = now - self.config.grace_secs;
        let overdue = self
            .store
            .due_subscriptions(SubscriptionStatus::PaymentRequired, cutoff, merchant_id, limit)
            .await?;

        let mut expired = Vec::new();
        for subscription in overdue {
            let next = Subscription {
                status: SubscriptionStatus::Expired,
                updated_at: Utc::now(),
                ..subscription.clone()
            };
            match self.store.update_subscription(&next, &subscription).await {
                Ok(true) => {
                    tracing::info!(subscription_id = %next.id, "Subscription expired");
                    expired.push(next);
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(subscription_id = %subscription.id, "Expiry failed: {}", e),
            }
        }

        Ok(expired)
    }

    async fn plan_for(&self, subscription: &Subscription) -> Result<Plan> {
        self.store
            .plan_by_id(subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(subscription.plan_id.to_string()))
    }

    async fn notify(&self, subscription: &Subscription, event_type: WebhookEventType, payload: serde_json::Value) {
        self.webhooks
            .trigger(WebhookEvent::new(subscription.merchant_id, event_type, payload))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merchants::MerchantDirectory;
    use crate::store::MemoryStore;
    use crate::webhook::RecordingDispatcher;
    use chainpay_ledger::U256;

    struct Fixture {
        store: Arc<MemoryStore>,
        webhooks: Arc<RecordingDispatcher>,
        engine: SubscriptionEngine,
        merchant_id: Uuid,
        plan: Plan,
    }

    async fn fixture(interval: BillingInterval) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let webhooks = Arc::new(RecordingDispatcher::new());
        let merchant = MerchantDirectory::new(store.clone())
            .resolve_or_create("0xmm")
            .await
            .unwrap();
        let plan = store
            .insert_plan(Plan::new(merchant.id, "Pro", U256::from(100u8), interval))
            .await
            .unwrap();
        let engine = SubscriptionEngine::new(store.clone(), webhooks.clone(), BillingConfig::default());

        Fixture {
            store,
            webhooks,
            engine,
            merchant_id: merchant.id,
            plan,
        }
    }

    /// Rewrite a stored subscription's deadline directly
    async fn set_period_end(store: &MemoryStore, sub: &Subscription, end: i64) -> Subscription {
        let moved = Subscription {
            current_period_end: end,
            ..sub.clone()
        };
        assert!(store.update_subscription(&moved, sub).await.unwrap());
        store.subscription_by_id(sub.id).await.unwrap().unwrap()
    }

    #[test]
    fn test_billing_math() {
        let t = 1_700_000_000;
        assert_eq!(calculate_next_billing(BillingInterval::Weekly, t), t + 604_800);
        assert_eq!(calculate_next_billing(BillingInterval::Monthly, t), t + 2_592_000);
        assert_eq!(calculate_next_billing(BillingInterval::Yearly, t), t + 31_536_000);
    }

    #[tokio::test]
    async fn test_create_active() {
        let f = fixture(BillingInterval::Weekly).await;
        let before = Utc::now().timestamp();

        let sub = f
            .engine
            .create(f.merchant_id, "0xPP", f.plan.id, Some("0xABC"))
            .await
            .unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.payer_wallet, "0xpp");
        assert_eq!(sub.last_payment_tx.as_deref(), Some("0xabc"));
        assert!(sub.current_period_end >= before + 604_800);
        assert_eq!(f.webhooks.count(WebhookEventType::SubscriptionCreated).await, 1);
    }

    #[tokio::test]
    async fn test_create_rejects_foreign_plan() {
        let f = fixture(BillingInterval::Weekly).await;
        let err = f
            .engine
            .create(Uuid::new_v4(), "0xpp", f.plan.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::PlanNotFound(_)));
        assert!(f.webhooks.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_renew_before_due_fails_without_mutation() {
        let f = fixture(BillingInterval::Monthly).await;
        let sub = f.engine.create(f.merchant_id, "0xpp", f.plan.id, None).await.unwrap();

        let err = f.engine.renew(sub.id, Some("0xdef")).await.unwrap_err();
        assert!(matches!(err, BillingError::NotDue { .. }));

        let stored = f.engine.get(sub.id).await.unwrap();
        assert_eq!(stored, sub);
        assert_eq!(f.webhooks.count(WebhookEventType::SubscriptionRenewed).await, 0);
    }

    #[tokio::test]
    async fn test_renew_after_lapse() {
        let f = fixture(BillingInterval::Weekly).await;
        let sub = f.engine.create(f.merchant_id, "0xpp", f.plan.id, None).await.unwrap();
        let now = Utc::now().timestamp();
        set_period_end(&f.store, &sub, now - 10).await;

        let renewed = f.engine.renew(sub.id, Some("0xDEF")).await.unwrap();

        assert_eq!(renewed.status, SubscriptionStatus::Active);
        assert!(renewed.current_period_end >= now + 604_800);
        assert_eq!(renewed.last_payment_tx.as_deref(), Some("0xdef"));

        let events = f.webhooks.events().await;
        let renewal = events
            .iter()
            .find(|e| e.event_type == WebhookEventType::SubscriptionRenewed)
            .unwrap();
        assert_eq!(renewal.payload["tx_hash"], "0xDEF");
    }

    #[tokio::test]
    async fn test_pending_subscription_renews_immediately() {
        let f = fixture(BillingInterval::Weekly).await;
        let pending = f
            .engine
            .create_pending(f.merchant_id, "0xpp", f.plan.id)
            .await
            .unwrap();
        assert_eq!(pending.status, SubscriptionStatus::PaymentRequired);

        let renewed = f.engine.renew(pending.id, None).await.unwrap();
        assert_eq!(renewed.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let f = fixture(BillingInterval::Weekly).await;
        let sub = f.engine.create(f.merchant_id, "0xpp", f.plan.id, None).await.unwrap();

        let canceled = f.engine.cancel(sub.id).await.unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);

        let again = f.engine.cancel(sub.id).await.unwrap();
        assert_eq!(again.status, SubscriptionStatus::Canceled);
        assert_eq!(f.webhooks.count(WebhookEventType::SubscriptionCanceled).await, 1);

        let err = f.engine.renew(sub.id, None).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_subscription() {
        let f = fixture(BillingInterval::Weekly).await;
        let err = f.engine.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BillingError::SubscriptionNotFound(_)));
    }

    #[tokio::test]
    async fn test_sweep_moves_lapsed_to_payment_required() {
        let f = fixture(BillingInterval::Monthly).await;
        let sub = f.engine.create(f.merchant_id, "0xpp", f.plan.id, None).await.unwrap();
        let now = Utc::now().timestamp();
        set_period_end(&f.store, &sub, now - 1).await;

        let lapsed = f.engine.sweep_lapsed(None, now, 20).await.unwrap();

        assert_eq!(lapsed.len(), 1);
        let swept = &lapsed[0].subscription;
        assert_eq!(swept.status, SubscriptionStatus::PaymentRequired);
        assert!(swept.current_period_end > now);
        assert_eq!(lapsed[0].lapsed_at, now - 1);

        // A second sweep finds nothing
        assert!(f.engine.sweep_lapsed(None, now, 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_transition_once() {
        let f = fixture(BillingInterval::Weekly).await;
        let sub = f.engine.create(f.merchant_id, "0xpp", f.plan.id, None).await.unwrap();
        let now = Utc::now().timestamp();
        let stale = set_period_end(&f.store, &sub, now - 5).await;

        let first = f
            .engine
            .mark_payment_required(&stale, BillingInterval::Weekly, now)
            .await
            .unwrap();
        let second = f
            .engine
            .mark_payment_required(&stale, BillingInterval::Weekly, now)
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_expire_after_grace() {
        let f = fixture(BillingInterval::Weekly).await;
        let pending = f
            .engine
            .create_pending(f.merchant_id, "0xpp", f.plan.id)
            .await
            .unwrap();
        let now = Utc::now().timestamp();

        assert!(f.engine.expire_lapsed(None, now, 20).await.unwrap().is_empty());

        let later = now + f.engine.config.grace_secs + 1;
        let expired = f.engine.expire_lapsed(None, later, 20).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, pending.id);
        assert_eq!(expired[0].status, SubscriptionStatus::Expired);

        let err = f.engine.renew(pending.id, None).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_expired_subscription() {
        let f = fixture(BillingInterval::Weekly).await;
        let pending = f
            .engine
            .create_pending(f.merchant_id, "0xpp", f.plan.id)
            .await
            .unwrap();
        let later = Utc::now().timestamp() + f.engine.config.grace_secs + 1;
        f.engine.expire_lapsed(None, later, 20).await.unwrap();

        let canceled = f.engine.cancel(pending.id).await.unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
        assert_eq!(f.webhooks.count(WebhookEventType::SubscriptionCanceled).await, 1);

        let stored = f.engine.get(pending.id).await.unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Canceled);
    }
}
