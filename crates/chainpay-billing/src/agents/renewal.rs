use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::{AgentRunner, Scope};
use crate::error::Result;
use crate::prompts::renewal_prompt;
use crate::subscriptions::LapsedSubscription;

#[derive(Clone, Debug, Serialize)]
pub struct RenewalReminder {
    pub subscription_id: Uuid,
    pub customer: String,
    pub current_period_end: i64,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RenewalReport {
    pub status: String,
    /// Subscriptions moved to `payment_required`
    pub renewed: usize,
    pub reminders: Vec<RenewalReminder>,
    /// Reminders that could not be generated
    pub failed: usize,
    /// Subscriptions expired after the grace window
    pub expired: usize,
}

impl RenewalReport {
    fn empty() -> Self {
        Self {
            status: "no-expired-subscriptions".into(),
            renewed: 0,
            reminders: Vec::new(),
            failed: 0,
            expired: 0,
        }
    }
}

impl AgentRunner {
    pub(super) async fn run_renewals(&self, scope: Scope) -> Result<RenewalReport> {
        if scope == Scope::Unknown {
            return Ok(RenewalReport::empty());
        }

        let now = Utc::now().timestamp();
        let batch = self.config.renewal_batch;
        let lapsed = self
            .subscriptions
            .sweep_lapsed(scope.merchant_id(), now, batch)
            .await?;

        let mut report = RenewalReport::empty();
        report.renewed = lapsed.len();

        for item in &lapsed {
            match self.remind(item).await {
                Ok(reminder) => report.reminders.push(reminder),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        subscription_id = %item.subscription.id,
                        "Renewal reminder failed: {}",
                        e
                    );
                }
            }
        }

        report.expired = match self
            .subscriptions
            .expire_lapsed(scope.merchant_id(), now, batch)
            .await
        {
            Ok(expired) => expired.len(),
            Err(e) => {
                tracing::warn!("Expiry pass failed: {}", e);
                0
            }
        };

        if report.renewed > 0 || report.expired > 0 {
            report.status = "renewed".into();
        }

        tracing::info!(
            renewed = report.renewed,
            reminders = report.reminders.len(),
            failed = report.failed,
            expired = report.expired,
            "Renewal run complete"
        );
        Ok(report)
    }

    async fn remind(&self, item: &LapsedSubscription) -> Result<RenewalReminder> {
        let prompt = renewal_prompt(
            &item.subscription,
            &item.plan,
            item.lapsed_at,
            &self.config.currency_symbol,
        );
        let message = self.generator.generate(&prompt).await?;

        Ok(RenewalReminder {
            subscription_id: item.subscription.id,
            customer: item.subscription.payer_wallet.clone(),
            current_period_end: item.subscription.current_period_end,
            message,
        })
    }
}
