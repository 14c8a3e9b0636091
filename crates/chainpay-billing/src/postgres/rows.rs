//! Table rows and their conversions to domain models
//!
//! Amounts are stored as decimal text and enums as their wire names.
//! Timestamps are cut to microseconds on the way in, which is what
//! `TIMESTAMPTZ` keeps, so a row read back compares equal to the one written.

use chrono::{DateTime, SubsecRound, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{merchants, payments, plans, subscriptions, webhook_endpoints};
use crate::error::{BillingError, Result};
use crate::model::{
    parse_amount, BillingInterval, Merchant, Payment, PaymentStatus, Plan, Subscription,
    SubscriptionStatus, WebhookEndpoint,
};

pub fn stored_time(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

fn corrupt(table: &str, err: &BillingError) -> BillingError {
    BillingError::UpstreamFailure(format!("store: corrupt {table} row: {err}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = merchants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MerchantRow {
    pub id: Uuid,
    pub wallet: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Merchant> for MerchantRow {
    fn from(merchant: &Merchant) -> Self {
        Self {
            id: merchant.id,
            wallet: merchant.wallet.clone(),
            api_key: merchant.api_key.clone(),
            created_at: stored_time(merchant.created_at),
        }
    }
}

impl From<MerchantRow> for Merchant {
    fn from(row: MerchantRow) -> Self {
        Self {
            id: row.id,
            wallet: row.wallet,
            api_key: row.api_key,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = plans)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PlanRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub name: String,
    pub amount: String,
    pub billing_interval: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Plan> for PlanRow {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id,
            merchant_id: plan.merchant_id,
            name: plan.name.clone(),
            amount: plan.amount.to_string(),
            billing_interval: plan.interval.as_str().to_string(),
            created_at: stored_time(plan.created_at),
        }
    }
}

impl TryFrom<PlanRow> for Plan {
    type Error = BillingError;

    fn try_from(row: PlanRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            merchant_id: row.merchant_id,
            name: row.name,
            amount: parse_amount(&row.amount).map_err(|e| corrupt("plans", &e))?,
            interval: row
                .billing_interval
                .parse::<BillingInterval>()
                .map_err(|e| corrupt("plans", &e))?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub payer: String,
    pub amount: String,
    pub tx_hash: String,
    pub event_timestamp: i64,
    pub status: String,
    pub invoice_sent: bool,
    pub invoice_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Payment> for PaymentRow {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            merchant_id: payment.merchant_id,
            payer: payment.payer.clone(),
            amount: payment.amount.to_string(),
            tx_hash: payment.tx_hash.clone(),
            event_timestamp: payment.timestamp,
            status: payment.status.as_str().to_string(),
            invoice_sent: payment.invoice_sent,
            invoice_text: payment.invoice_text.clone(),
            created_at: stored_time(payment.created_at),
        }
    }
}

impl TryFrom<PaymentRow> for Payment {
    type Error = BillingError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            merchant_id: row.merchant_id,
            payer: row.payer,
            amount: parse_amount(&row.amount).map_err(|e| corrupt("payments", &e))?,
            tx_hash: row.tx_hash,
            timestamp: row.event_timestamp,
            status: row
                .status
                .parse::<PaymentStatus>()
                .map_err(|e| corrupt("payments", &e))?,
            invoice_sent: row.invoice_sent,
            invoice_text: row.invoice_text,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub plan_id: Uuid,
    pub payer_wallet: String,
    pub status: String,
    pub current_period_end: i64,
    pub last_payment_tx: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Subscription> for SubscriptionRow {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id,
            merchant_id: sub.merchant_id,
            plan_id: sub.plan_id,
            payer_wallet: sub.payer_wallet.clone(),
            status: sub.status.as_str().to_string(),
            current_period_end: sub.current_period_end,
            last_payment_tx: sub.last_payment_tx.clone(),
            created_at: stored_time(sub.created_at),
            updated_at: stored_time(sub.updated_at),
        }
    }
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            merchant_id: row.merchant_id,
            plan_id: row.plan_id,
            payer_wallet: row.payer_wallet,
            status: row
                .status
                .parse::<SubscriptionStatus>()
                .map_err(|e| corrupt("subscriptions", &e))?,
            current_period_end: row.current_period_end,
            last_payment_tx: row.last_payment_tx,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = webhook_endpoints)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WebhookEndpointRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub url: String,
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl From<&WebhookEndpoint> for WebhookEndpointRow {
    fn from(endpoint: &WebhookEndpoint) -> Self {
        Self {
            id: endpoint.id,
            merchant_id: endpoint.merchant_id,
            url: endpoint.url.clone(),
            secret: endpoint.secret.clone(),
            created_at: stored_time(endpoint.created_at),
        }
    }
}

impl From<WebhookEndpointRow> for WebhookEndpoint {
    fn from(row: WebhookEndpointRow) -> Self {
        Self {
            id: row.id,
            merchant_id: row.merchant_id,
            url: row.url,
            secret: row.secret,
            created_at: row.created_at,
        }
    }
}
