use chainpay_ledger::U256;
use serde::Serialize;
use uuid::Uuid;

use super::AgentRunner;
use crate::error::{BillingError, Result};
use crate::model::{to_display_units, Merchant, SubscriptionStatus};
use crate::prompts::{analytics_prompt, AnalyticsFigures};
use crate::store::SubscriptionFilter;

const RECENT_PAYMENTS: usize = 5;

#[derive(Clone, Debug, Serialize)]
pub struct AnalyticsMetrics {
    /// Display units, 4 decimals
    pub total_revenue: String,
    /// Base units
    pub total_revenue_base: String,
    pub payment_count: usize,
    pub average_payment: String,
    pub active_subscriptions: usize,
    pub payment_required_subscriptions: usize,
    pub canceled_subscriptions: usize,
    pub expired_subscriptions: usize,
    pub total_subscriptions: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RecentPayment {
    pub payment_id: Uuid,
    pub amount: String,
    pub tx_hash: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AnalyticsReport {
    pub merchant_id: Uuid,
    pub metrics: AnalyticsMetrics,
    pub recent_payments: Vec<RecentPayment>,
    pub summary: String,
}

impl AgentRunner {
    /// Figures and narrative for one merchant, by id or wallet
    ///
    /// Unlike the batch jobs, a text generator failure is returned to the caller.
    pub async fn run_analytics(
        &self,
        merchant_id: Option<Uuid>,
        merchant_wallet: Option<&str>,
    ) -> Result<AnalyticsReport> {
        let merchant = self.analytics_merchant(merchant_id, merchant_wallet).await?;

        let payments = self.store.payments_for_merchant(merchant.id).await?;
        let subscriptions = self
            .store
            .list_subscriptions(&SubscriptionFilter {
                merchant_id: Some(merchant.id),
                ..SubscriptionFilter::default()
            })
            .await?;

        let total = payments
            .iter()
            .fold(U256::ZERO, |acc, p| acc.saturating_add(p.amount));
        let average = if payments.is_empty() {
            U256::ZERO
        } else {
            total / U256::from(payments.len())
        };
        let count = |status: SubscriptionStatus| subscriptions.iter().filter(|s| s.status == status).count();

        let metrics = AnalyticsMetrics {
            total_revenue: to_display_units(total),
            total_revenue_base: total.to_string(),
            payment_count: payments.len(),
            average_payment: to_display_units(average),
            active_subscriptions: count(SubscriptionStatus::Active),
            payment_required_subscriptions: count(SubscriptionStatus::PaymentRequired),
            canceled_subscriptions: count(SubscriptionStatus::Canceled),
            expired_subscriptions: count(SubscriptionStatus::Expired),
            total_subscriptions: subscriptions.len(),
        };

        // Sorted most recent first by the store
        let recent = &payments[..payments.len().min(RECENT_PAYMENTS)];

        let prompt = analytics_prompt(
            &AnalyticsFigures {
                total_revenue: &metrics.total_revenue,
                payment_count: metrics.payment_count,
                average_payment: &metrics.average_payment,
                active: metrics.active_subscriptions,
                payment_required: metrics.payment_required_subscriptions,
                canceled: metrics.canceled_subscriptions,
                expired: metrics.expired_subscriptions,
                total_subscriptions: metrics.total_subscriptions,
                recent,
            },
            &self.config.currency_symbol,
        );
        let summary = self.generator.generate(&prompt).await?;

        tracing::info!(
            merchant_id = %merchant.id,
            payments = metrics.payment_count,
            subscriptions = metrics.total_subscriptions,
            "Analytics generated"
        );

        Ok(AnalyticsReport {
            merchant_id: merchant.id,
            recent_payments: recent
                .iter()
                .map(|p| RecentPayment {
                    payment_id: p.id,
                    amount: to_display_units(p.amount),
                    tx_hash: p.tx_hash.clone(),
                    timestamp: p.timestamp,
                })
                .collect(),
            metrics,
            summary,
        })
    }

    async fn analytics_merchant(
        &self,
        merchant_id: Option<Uuid>,
        merchant_wallet: Option<&str>,
    ) -> Result<Merchant> {
        if let Some(id) = merchant_id {
            return self
                .merchants
                .by_id(id)
                .await?
                .ok_or_else(|| BillingError::MerchantNotFound(id.to_string()));
        }

        let wallet = merchant_wallet.ok_or_else(|| {
            BillingError::Validation("merchant_id or merchant_wallet is required".into())
        })?;
        self.merchants
            .lookup(wallet)
            .await?
            .ok_or_else(|| BillingError::MerchantNotFound(wallet.to_string()))
    }
}
