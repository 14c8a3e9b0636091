//! Postgres Store
//!
//! [`BillingStore`] on Postgres through diesel and an r2d2 pool. Unique
//! indexes on `merchants.wallet` and `payments.tx_hash` make concurrent
//! inserts from several server instances collapse onto one row, and
//! subscription updates are a single conditional `UPDATE`.
//!
//! Queries run on tokio's blocking pool.

mod rows;
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::{
    connection::SimpleConnection,
    dsl::exists,
    insert_into,
    prelude::*,
    r2d2::{ConnectionManager, Pool},
    select, update,
};
use uuid::Uuid;

use self::rows::{
    stored_time, MerchantRow, PaymentRow, PlanRow, SubscriptionRow, WebhookEndpointRow,
};
use self::schema::{merchants, payments, plans, subscriptions, webhook_endpoints};
use crate::error::{BillingError, Result};
use crate::model::{Merchant, Payment, Plan, Subscription, SubscriptionStatus, WebhookEndpoint};
use crate::store::{BillingStore, Insert, SubscriptionFilter};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Tables and indexes, idempotent
pub const SCHEMA: &str = include_str!("../../migrations/0001_billing.sql");

/// Database settings
#[derive(Clone, Debug)]
pub struct PgConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl PgConfig {
    /// Read `DATABASE_URL` and `DATABASE_MAX_CONNECTIONS`
    ///
    /// `None` when no database is configured.
    pub fn from_env() -> Option<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())?;
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(10);
        Some(Self {
            database_url,
            max_connections,
        })
    }
}

pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    /// Build the pool; fails if no connection can be opened
    pub async fn connect(config: &PgConfig) -> Result<Self> {
        let manager = ConnectionManager::<PgConnection>::new(config.database_url.clone());
        let builder = Pool::builder().max_size(config.max_connections);
        let pool = tokio::task::spawn_blocking(move || builder.build(manager))
            .await
            .map_err(|e| BillingError::UpstreamFailure(format!("store task: {e}")))??;

        Ok(Self::from_pool(Arc::new(pool)))
    }

    pub const fn from_pool(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create missing tables and indexes
    pub async fn migrate(&self) -> Result<()> {
        self.run(|conn| conn.batch_execute(SCHEMA)).await?;
        tracing::info!("Billing schema ready");
        Ok(())
    }

    async fn run<T, F>(&self, query: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> QueryResult<T> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || -> Result<T> {
            let mut conn = pool.get()?;
            Ok(query(&mut *conn)?)
        })
        .await
        .map_err(|e| BillingError::UpstreamFailure(format!("store task: {e}")))?
    }
}

fn limit_of(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn merchant_exists(conn: &mut PgConnection, id: Uuid) -> QueryResult<bool> {
    select(exists(merchants::table.find(id))).get_result(conn)
}

#[async_trait]
impl BillingStore for PgStore {
    async fn insert_merchant(&self, merchant: Merchant) -> Result<Insert<Merchant>> {
        let row = MerchantRow::from(&merchant);
        let inserted = self
            .run(move |conn| {
                let created = insert_into(merchants::table)
                    .values(&row)
                    .on_conflict(merchants::wallet)
                    .do_nothing()
                    .returning(MerchantRow::as_returning())
                    .get_result::<MerchantRow>(conn)
                    .optional()?;
                match created {
                    Some(created) => Ok(Insert::Created(created)),
                    None => merchants::table
                        .filter(merchants::wallet.eq(&row.wallet))
                        .select(MerchantRow::as_select())
                        .first::<MerchantRow>(conn)
                        .map(Insert::Existing),
                }
            })
            .await?;

        inserted.try_map(|row| Ok(Merchant::from(row)))
    }

    async fn merchant_by_wallet(&self, wallet: &str) -> Result<Option<Merchant>> {
        let wallet = wallet.to_string();
        let row = self
            .run(move |conn| {
                merchants::table
                    .filter(merchants::wallet.eq(wallet))
                    .select(MerchantRow::as_select())
                    .first::<MerchantRow>(conn)
                    .optional()
            })
            .await?;
        Ok(row.map(Merchant::from))
    }

    async fn merchant_by_id(&self, id: Uuid) -> Result<Option<Merchant>> {
        let row = self
            .run(move |conn| {
                merchants::table
                    .find(id)
                    .select(MerchantRow::as_select())
                    .first::<MerchantRow>(conn)
                    .optional()
            })
            .await?;
        Ok(row.map(Merchant::from))
    }

    async fn insert_plan(&self, plan: Plan) -> Result<Plan> {
        let merchant_id = plan.merchant_id;
        let row = PlanRow::from(&plan);
        let inserted = self
            .run(move |conn| {
                if !merchant_exists(conn, merchant_id)? {
                    return Ok(None);
                }
                insert_into(plans::table)
                    .values(&row)
                    .returning(PlanRow::as_returning())
                    .get_result::<PlanRow>(conn)
                    .map(Some)
            })
            .await?;

        inserted
            .ok_or_else(|| BillingError::MerchantNotFound(merchant_id.to_string()))?
            .try_into()
    }

    async fn plan_by_id(&self, id: Uuid) -> Result<Option<Plan>> {
        let row = self
            .run(move |conn| {
                plans::table
                    .find(id)
                    .select(PlanRow::as_select())
                    .first::<PlanRow>(conn)
                    .optional()
            })
            .await?;
        row.map(Plan::try_from).transpose()
    }

    async fn list_plans(&self, merchant_id: Option<Uuid>) -> Result<Vec<Plan>> {
        let rows = self
            .run(move |conn| {
                let mut query = plans::table
                    .select(PlanRow::as_select())
                    .order(plans::created_at.desc())
                    .into_boxed();
                if let Some(id) = merchant_id {
                    query = query.filter(plans::merchant_id.eq(id));
                }
                query.load::<PlanRow>(conn)
            })
            .await?;
        rows.into_iter().map(Plan::try_from).collect()
    }

    async fn insert_payment(&self, payment: Payment) -> Result<Insert<Payment>> {
        let row = PaymentRow::from(&payment);
        let inserted = self
            .run(move |conn| {
                let created = insert_into(payments::table)
                    .values(&row)
                    .on_conflict(payments::tx_hash)
                    .do_nothing()
                    .returning(PaymentRow::as_returning())
                    .get_result::<PaymentRow>(conn)
                    .optional()?;
                match created {
                    Some(created) => Ok(Insert::Created(created)),
                    None => payments::table
                        .filter(payments::tx_hash.eq(&row.tx_hash))
                        .select(PaymentRow::as_select())
                        .first::<PaymentRow>(conn)
                        .map(Insert::Existing),
                }
            })
            .await?;

        inserted.try_map(Payment::try_from)
    }

    async fn payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>> {
        let tx_hash = tx_hash.to_string();
        let row = self
            .run(move |conn| {
                payments::table
                    .filter(payments::tx_hash.eq(tx_hash))
                    .select(PaymentRow::as_select())
                    .first::<PaymentRow>(conn)
                    .optional()
            })
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn payments_for_merchant(&self, merchant_id: Uuid) -> Result<Vec<Payment>> {
        let rows = self
            .run(move |conn| {
                payments::table
                    .filter(payments::merchant_id.eq(merchant_id))
                    .order(payments::event_timestamp.desc())
                    .select(PaymentRow::as_select())
                    .load::<PaymentRow>(conn)
            })
            .await?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn payments_pending_invoice(
        &self,
        merchant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Payment>> {
        let rows = self
            .run(move |conn| {
                let mut query = payments::table
                    .filter(payments::invoice_sent.eq(false))
                    .order(payments::created_at.asc())
                    .limit(limit_of(limit))
                    .select(PaymentRow::as_select())
                    .into_boxed();
                if let Some(id) = merchant_id {
                    query = query.filter(payments::merchant_id.eq(id));
                }
                query.load::<PaymentRow>(conn)
            })
            .await?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn mark_invoice_sent(&self, payment_id: Uuid, invoice_text: &str) -> Result<bool> {
        let text = invoice_text.to_string();
        let outcome = self
            .run(move |conn| {
                let changed = update(
                    payments::table
                        .filter(payments::id.eq(payment_id))
                        .filter(payments::invoice_sent.eq(false)),
                )
                .set((
                    payments::invoice_sent.eq(true),
                    payments::invoice_text.eq(Some(text)),
                ))
                .execute(conn)?;
                if changed > 0 {
                    return Ok(Some(true));
                }
                let known: bool =
                    select(exists(payments::table.find(payment_id))).get_result(conn)?;
                Ok(known.then_some(false))
            })
            .await?;

        outcome.ok_or(BillingError::PaymentNotFound(payment_id))
    }

    async fn insert_subscription(&self, subscription: Subscription) -> Result<Subscription> {
        let row = SubscriptionRow::from(&subscription);
        let inserted = self
            .run(move |conn| {
                insert_into(subscriptions::table)
                    .values(&row)
                    .returning(SubscriptionRow::as_returning())
                    .get_result::<SubscriptionRow>(conn)
            })
            .await?;
        inserted.try_into()
    }

    async fn subscription_by_id(&self, id: Uuid) -> Result<Option<Subscription>> {
        let row = self
            .run(move |conn| {
                subscriptions::table
                    .find(id)
                    .select(SubscriptionRow::as_select())
                    .first::<SubscriptionRow>(conn)
                    .optional()
            })
            .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn update_subscription(
        &self,
        updated: &Subscription,
        previous: &Subscription,
    ) -> Result<bool> {
        let id = updated.id;
        let previous_status = previous.status.as_str();
        let previous_updated_at = stored_time(previous.updated_at);

        let mut row = SubscriptionRow::from(updated);
        if row.updated_at <= previous_updated_at {
            row.updated_at = stored_time(Utc::now())
                .max(previous_updated_at + chrono::Duration::microseconds(1));
        }

        let outcome = self
            .run(move |conn| {
                let changed = update(
                    subscriptions::table
                        .filter(subscriptions::id.eq(id))
                        .filter(subscriptions::status.eq(previous_status))
                        .filter(subscriptions::updated_at.eq(previous_updated_at)),
                )
                .set((
                    subscriptions::status.eq(&row.status),
                    subscriptions::current_period_end.eq(row.current_period_end),
                    subscriptions::last_payment_tx.eq(&row.last_payment_tx),
                    subscriptions::updated_at.eq(row.updated_at),
                ))
                .execute(conn)?;
                if changed > 0 {
                    return Ok(Some(true));
                }
                let known: bool =
                    select(exists(subscriptions::table.find(id))).get_result(conn)?;
                Ok(known.then_some(false))
            })
            .await?;

        outcome.ok_or(BillingError::SubscriptionNotFound(id))
    }

    async fn list_subscriptions(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>> {
        let filter = filter.clone();
        let rows = self
            .run(move |conn| {
                let mut query = subscriptions::table
                    .select(SubscriptionRow::as_select())
                    .order(subscriptions::created_at.desc())
                    .into_boxed();
                if let Some(id) = filter.merchant_id {
                    query = query.filter(subscriptions::merchant_id.eq(id));
                }
                if let Some(wallet) = filter.payer_wallet {
                    query = query.filter(subscriptions::payer_wallet.eq(wallet));
                }
                if let Some(status) = filter.status {
                    query = query.filter(subscriptions::status.eq(status.as_str()));
                }
                query.load::<SubscriptionRow>(conn)
            })
            .await?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn due_subscriptions(
        &self,
        status: SubscriptionStatus,
        before: i64,
        merchant_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Subscription>> {
        let rows = self
            .run(move |conn| {
                let mut query = subscriptions::table
                    .filter(subscriptions::status.eq(status.as_str()))
                    .filter(subscriptions::current_period_end.lt(before))
                    .order(subscriptions::current_period_end.asc())
                    .limit(limit_of(limit))
                    .select(SubscriptionRow::as_select())
                    .into_boxed();
                if let Some(id) = merchant_id {
                    query = query.filter(subscriptions::merchant_id.eq(id));
                }
                query.load::<SubscriptionRow>(conn)
            })
            .await?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn insert_webhook_endpoint(&self, endpoint: WebhookEndpoint) -> Result<WebhookEndpoint> {
        let merchant_id = endpoint.merchant_id;
        let row = WebhookEndpointRow::from(&endpoint);
        let inserted = self
            .run(move |conn| {
                if !merchant_exists(conn, merchant_id)? {
                    return Ok(None);
                }
                insert_into(webhook_endpoints::table)
                    .values(&row)
                    .returning(WebhookEndpointRow::as_returning())
                    .get_result::<WebhookEndpointRow>(conn)
                    .map(Some)
            })
            .await?;

        inserted
            .map(WebhookEndpoint::from)
            .ok_or_else(|| BillingError::MerchantNotFound(merchant_id.to_string()))
    }

    async fn webhook_endpoints(&self, merchant_id: Uuid) -> Result<Vec<WebhookEndpoint>> {
        let rows = self
            .run(move |conn| {
                webhook_endpoints::table
                    .filter(webhook_endpoints::merchant_id.eq(merchant_id))
                    .order(webhook_endpoints::created_at.asc())
                    .select(WebhookEndpointRow::as_select())
                    .load::<WebhookEndpointRow>(conn)
            })
            .await?;
        Ok(rows.into_iter().map(WebhookEndpoint::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpay_ledger::U256;

    use crate::model::{BillingInterval, PaymentStatus};

    #[test]
    fn test_schema_declares_unique_keys() {
        assert!(SCHEMA.contains("wallet TEXT NOT NULL UNIQUE"));
        assert!(SCHEMA.contains("tx_hash TEXT NOT NULL UNIQUE"));
        assert!(!SCHEMA.contains("DROP"));
    }

    #[test]
    fn test_limit_of_saturates() {
        assert_eq!(limit_of(20), 20);
        assert_eq!(limit_of(usize::MAX), i64::MAX);
    }

    async fn live_store() -> Option<PgStore> {
        let config = PgConfig::from_env()?;
        let store = PgStore::connect(&config).await.unwrap();
        store.migrate().await.unwrap();
        Some(store)
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_postgres_uniqueness_and_compare_and_set() {
        let Some(store) = live_store().await else {
            return;
        };

        let merchant = Merchant::new(&format!("0x{}", Uuid::new_v4().simple()));
        let first = store.insert_merchant(merchant.clone()).await.unwrap();
        assert!(first.is_created());
        let again = store
            .insert_merchant(Merchant::new(&merchant.wallet))
            .await
            .unwrap();
        assert!(!again.is_created());
        assert_eq!(again.into_inner().id, merchant.id);

        let payment = Payment {
            id: Uuid::new_v4(),
            merchant_id: merchant.id,
            payer: "0xpp".into(),
            amount: U256::from(5u8),
            tx_hash: format!("0x{}", Uuid::new_v4().simple()),
            timestamp: 1_700_000_000,
            status: PaymentStatus::Verified,
            invoice_sent: false,
            invoice_text: None,
            created_at: Utc::now(),
        };
        assert!(store.insert_payment(payment.clone()).await.unwrap().is_created());
        let duplicate = Payment {
            id: Uuid::new_v4(),
            ..payment.clone()
        };
        assert_eq!(
            store.insert_payment(duplicate).await.unwrap().into_inner().id,
            payment.id
        );
        assert!(store.mark_invoice_sent(payment.id, "INVOICE").await.unwrap());
        assert!(!store.mark_invoice_sent(payment.id, "INVOICE").await.unwrap());

        let plan = store
            .insert_plan(Plan::new(merchant.id, "Pro", U256::from(9u8), BillingInterval::Weekly))
            .await
            .unwrap();
        let now = Utc::now();
        let stored = store
            .insert_subscription(Subscription {
                id: Uuid::new_v4(),
                merchant_id: merchant.id,
                plan_id: plan.id,
                payer_wallet: "0xpp".into(),
                status: SubscriptionStatus::Active,
                current_period_end: now.timestamp(),
                last_payment_tx: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let canceled = Subscription {
            status: SubscriptionStatus::Canceled,
            ..stored.clone()
        };
        assert!(store.update_subscription(&canceled, &stored).await.unwrap());
        assert!(!store.update_subscription(&canceled, &stored).await.unwrap());

        let read = store.subscription_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(read.status, SubscriptionStatus::Canceled);
        assert!(read.updated_at > stored.updated_at);
    }
}
