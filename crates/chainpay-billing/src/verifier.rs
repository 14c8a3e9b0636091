//! Payment Verifier
//!
//! Confirms a claimed transaction against the payments contract and records
//! it exactly once. The decoded `PaymentReceived` event is the only source of
//! payer, amount and timestamp; request fields just locate the transaction.

use std::sync::Arc;

use chainpay_ledger::{
    normalize_hex, payment_received_topic, LedgerClient, LogFilter, PaymentReceived,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::merchants::MerchantDirectory;
use crate::model::{normalize_wallet, parse_amount, Merchant, Payment, PaymentStatus, Subscription};
use crate::store::{BillingStore, Insert};
use crate::subscriptions::SubscriptionEngine;
use crate::webhook::{WebhookDispatcher, WebhookEvent, WebhookEventType};

/// A client's claim that a payment happened
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyPaymentRequest {
    pub tx_hash: String,
    pub merchant_wallet: String,
    /// Advisory only; the chain event decides the amount
    #[serde(default)]
    pub claimed_amount: Option<String>,
    /// Subscribe the payer to this plan once the payment is recorded
    #[serde(default)]
    pub plan_id: Option<Uuid>,
}

/// Outcome of a verification
#[derive(Clone, Debug)]
pub struct VerifiedPayment {
    pub payment: Payment,
    pub merchant: Merchant,
    /// The transaction had already been recorded
    pub duplicate: bool,
    pub subscription: Option<Subscription>,
}

/// Ledger-backed payment verification
pub struct PaymentVerifier {
    ledger: Arc<dyn LedgerClient>,
    contract: String,
    merchants: MerchantDirectory,
    store: Arc<dyn BillingStore>,
    webhooks: Arc<dyn WebhookDispatcher>,
    subscriptions: SubscriptionEngine,
}

impl PaymentVerifier {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        contract: &str,
        store: Arc<dyn BillingStore>,
        webhooks: Arc<dyn WebhookDispatcher>,
        subscriptions: SubscriptionEngine,
    ) -> Self {
        Self {
            ledger,
            contract: normalize_hex(contract),
            merchants: MerchantDirectory::new(store.clone()),
            store,
            webhooks,
            subscriptions,
        }
    }

    /// Verify and record a payment
    ///
    /// Safe to repeat: a transaction already recorded returns the stored
    /// payment with `duplicate` set and triggers nothing.
    pub async fn verify(&self, request: &VerifyPaymentRequest) -> Result<VerifiedPayment> {
        if request.tx_hash.trim().is_empty() {
            return Err(BillingError::Validation("tx_hash is required".into()));
        }
        let merchant_wallet = normalize_wallet(&request.merchant_wallet);
        if merchant_wallet.is_empty() {
            return Err(BillingError::Validation("merchant_wallet is required".into()));
        }
        let claimed_amount = request
            .claimed_amount
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .map(parse_amount)
            .transpose()?;

        let tx_hash = normalize_hex(&request.tx_hash);
        let event = self.find_event(&tx_hash, &merchant_wallet).await?;

        if let Some(claimed) = claimed_amount.filter(|c| *c != event.amount) {
            tracing::warn!(
                tx_hash = %tx_hash,
                claimed = %claimed,
                on_chain = %event.amount,
                "Claimed amount differs from chain event; using chain value"
            );
        }

        let merchant = self.merchants.resolve_or_create(&event.merchant).await?;

        let inserted = self
            .store
            .insert_payment(Payment {
                id: Uuid::new_v4(),
                merchant_id: merchant.id,
                payer: event.payer.clone(),
                amount: event.amount,
                tx_hash: tx_hash.clone(),
                timestamp: event.timestamp,
                status: PaymentStatus::Verified,
                invoice_sent: false,
                invoice_text: None,
                created_at: Utc::now(),
            })
            .await?;

        let payment = match inserted {
            Insert::Existing(payment) => {
                tracing::info!(
                    payment_id = %payment.id,
                    tx_hash = %tx_hash,
                    "Payment already verified"
                );
                return Ok(VerifiedPayment {
                    payment,
                    merchant,
                    duplicate: true,
                    subscription: None,
                });
            }
            Insert::Created(payment) => payment,
        };

        tracing::info!(
            payment_id = %payment.id,
            merchant_id = %merchant.id,
            tx_hash = %tx_hash,
            amount = %payment.amount,
            "Payment verified"
        );

        self.webhooks
            .trigger(WebhookEvent::new(
                merchant.id,
                WebhookEventType::PaymentSucceeded,
                json!({
                    "merchant_id": merchant.id,
                    "payment_id": payment.id,
                    "merchant": merchant.wallet,
                    "payer": payment.payer,
                    "amount": payment.amount.to_string(),
                    "tx_hash": payment.tx_hash,
                    "timestamp": payment.timestamp,
                }),
            ))
            .await;

        let subscription = match request.plan_id {
            Some(plan_id) => self
                .subscriptions
                .create(merchant.id, &payment.payer, plan_id, Some(&payment.tx_hash))
                .await
                .inspect_err(|e| {
                    tracing::warn!(
                        payment_id = %payment.id,
                        plan_id = %plan_id,
                        "Subscription after payment failed: {}",
                        e
                    );
                })
                .ok(),
            None => None,
        };

        Ok(VerifiedPayment {
            payment,
            merchant,
            duplicate: false,
            subscription,
        })
    }

    /// Locate the `PaymentReceived` log for `tx_hash` paying `merchant_wallet`
    async fn find_event(&self, tx_hash: &str, merchant_wallet: &str) -> Result<PaymentReceived> {
        let receipt = self
            .ledger
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| BillingError::TransactionNotFound(tx_hash.to_string()))?;

        if !receipt.success {
            tracing::debug!(tx_hash, "Transaction reverted");
        }

        let filter = LogFilter::single_block(
            self.contract.clone(),
            payment_received_topic(),
            receipt.block_number,
        );
        let logs = self.ledger.get_logs(&filter).await?;

        logs.iter()
            .filter(|log| log.transaction_hash.eq_ignore_ascii_case(tx_hash))
            .filter_map(|log| match PaymentReceived::decode(log) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::debug!(tx_hash, "Skipping undecodable log: {}", e);
                    None
                }
            })
            .find(|event| event.merchant.eq_ignore_ascii_case(merchant_wallet))
            .ok_or_else(|| BillingError::EventNotFound {
                tx_hash: tx_hash.to_string(),
                merchant: merchant_wallet.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BillingConfig;
    use crate::model::{BillingInterval, Plan, SubscriptionStatus};
    use crate::store::MemoryStore;
    use crate::webhook::RecordingDispatcher;
    use chainpay_ledger::{MockLedgerClient, U256};

    const MERCHANT: &str = "0x00000000000000000000000000000000000000aa";
    const PAYER: &str = "0x00000000000000000000000000000000000000bb";
    const ONE_AVAX: u128 = 1_000_000_000_000_000_000;

    struct Harness {
        store: Arc<MemoryStore>,
        webhooks: Arc<RecordingDispatcher>,
        ledger: Arc<MockLedgerClient>,
        verifier: PaymentVerifier,
    }

    fn harness(ledger: MockLedgerClient) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let webhooks = Arc::new(RecordingDispatcher::new());
        let ledger = Arc::new(ledger);
        let engine = SubscriptionEngine::new(store.clone(), webhooks.clone(), BillingConfig::default());
        let verifier = PaymentVerifier::new(
            ledger.clone(),
            &ledger.contract().to_string(),
            store.clone(),
            webhooks.clone(),
            engine,
        );
        Harness {
            store,
            webhooks,
            ledger,
            verifier,
        }
    }

    fn request(tx_hash: &str, merchant: &str) -> VerifyPaymentRequest {
        VerifyPaymentRequest {
            tx_hash: tx_hash.into(),
            merchant_wallet: merchant.into(),
            claimed_amount: Some(ONE_AVAX.to_string()),
            plan_id: None,
        }
    }

    fn paid_ledger() -> MockLedgerClient {
        MockLedgerClient::new().with_payment(
            "0xabc",
            MERCHANT,
            PAYER,
            U256::from(ONE_AVAX),
            1_700_000_000,
        )
    }

    #[tokio::test]
    async fn test_verify_is_idempotent() {
        let h = harness(paid_ledger());
        let mixed_case = MERCHANT.to_uppercase().replace("0X", "0x");

        let first = h.verifier.verify(&request("0xABC", &mixed_case)).await.unwrap();
        let second = h.verifier.verify(&request("0xabc", MERCHANT)).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.payment.id, second.payment.id);
        assert_eq!(first.payment.amount, U256::from(ONE_AVAX));
        assert_eq!(first.payment.payer, PAYER);
        assert_eq!(first.payment.timestamp, 1_700_000_000);
        assert_eq!(first.merchant.wallet, MERCHANT);

        assert_eq!(h.store.payment_count().await, 1);
        assert_eq!(h.store.merchant_count().await, 1);
        assert_eq!(h.webhooks.count(WebhookEventType::PaymentSucceeded).await, 1);
    }

    #[tokio::test]
    async fn test_amount_comes_from_chain() {
        let h = harness(paid_ledger());
        let mut req = request("0xabc", MERCHANT);
        req.claimed_amount = Some("5".into());

        let verified = h.verifier.verify(&req).await.unwrap();
        assert_eq!(verified.payment.amount, U256::from(ONE_AVAX));

        let events = h.webhooks.events().await;
        assert_eq!(events[0].payload["amount"], "1000000000000000000");
        assert_eq!(events[0].payload["payer"], PAYER);
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let h = harness(MockLedgerClient::new());
        let err = h.verifier.verify(&request("0xdead", MERCHANT)).await.unwrap_err();
        assert!(matches!(err, BillingError::TransactionNotFound(_)));
    }

    #[tokio::test]
    async fn test_wrong_merchant_is_event_not_found() {
        let h = harness(paid_ledger());
        let other = "0x00000000000000000000000000000000000000cc";

        let err = h.verifier.verify(&request("0xabc", other)).await.unwrap_err();
        assert!(matches!(err, BillingError::EventNotFound { .. }));
        assert_eq!(h.store.payment_count().await, 0);
        assert_eq!(h.store.merchant_count().await, 0);
    }

    #[tokio::test]
    async fn test_transaction_without_event() {
        let h = harness(MockLedgerClient::new().with_bare_transaction("0xfee"));
        let err = h.verifier.verify(&request("0xfee", MERCHANT)).await.unwrap_err();
        assert!(matches!(err, BillingError::EventNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_ledger_is_upstream_failure() {
        let h = harness(MockLedgerClient::unreachable());
        let err = h.verifier.verify(&request("0xabc", MERCHANT)).await.unwrap_err();
        assert_eq!(err.code(), "UPSTREAM_FAILURE");
        assert_eq!(h.ledger.receipt_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_claimed_amount() {
        let h = harness(paid_ledger());
        let mut req = request("0xabc", MERCHANT);
        req.claimed_amount = Some("one avax".into());

        let err = h.verifier.verify(&req).await.unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
        assert_eq!(h.ledger.receipt_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_verification_single_rows() {
        let h = harness(
            paid_ledger().with_payment("0xdef", MERCHANT, PAYER, U256::from(7u8), 1_700_000_100),
        );
        let a = request("0xabc", MERCHANT);
        let b = request("0xdef", MERCHANT);
        let c = request("0xabc", MERCHANT);

        let (ra, rb, rc) = tokio::join!(
            h.verifier.verify(&a),
            h.verifier.verify(&b),
            h.verifier.verify(&c),
        );

        let (ra, rb, rc) = (ra.unwrap(), rb.unwrap(), rc.unwrap());
        assert_eq!(ra.merchant.id, rb.merchant.id);
        assert_eq!(ra.payment.id, rc.payment.id);
        assert_eq!(h.store.merchant_count().await, 1);
        assert_eq!(h.store.payment_count().await, 2);
        assert_eq!(h.webhooks.count(WebhookEventType::PaymentSucceeded).await, 2);
    }

    #[tokio::test]
    async fn test_plan_creates_subscription() {
        let h = harness(paid_ledger());
        let merchant = MerchantDirectory::new(h.store.clone())
            .resolve_or_create(MERCHANT)
            .await
            .unwrap();
        let plan = h
            .store
            .insert_plan(Plan::new(merchant.id, "Pro", U256::from(ONE_AVAX), BillingInterval::Monthly))
            .await
            .unwrap();

        let mut req = request("0xabc", MERCHANT);
        req.plan_id = Some(plan.id);
        let verified = h.verifier.verify(&req).await.unwrap();

        let subscription = verified.subscription.unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.payer_wallet, PAYER);
        assert_eq!(subscription.last_payment_tx.as_deref(), Some("0xabc"));
        assert_eq!(h.webhooks.count(WebhookEventType::SubscriptionCreated).await, 1);
    }

    #[tokio::test]
    async fn test_subscription_failure_keeps_payment() {
        let h = harness(paid_ledger());
        let mut req = request("0xabc", MERCHANT);
        req.plan_id = Some(Uuid::new_v4());

        let verified = h.verifier.verify(&req).await.unwrap();
        assert!(verified.subscription.is_none());
        assert_eq!(h.store.payment_count().await, 1);
        assert_eq!(h.webhooks.count(WebhookEventType::PaymentSucceeded).await, 1);
    }
}
