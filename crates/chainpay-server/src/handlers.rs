//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use chainpay_billing::{
    normalize_wallet, parse_amount, verify_signature, AgentReport, AgentRequest, BillingError,
    BillingInterval, Merchant, Plan, Subscription, SubscriptionFilter, SubscriptionStatus,
    VerifyPaymentRequest, WebhookEndpoint, SIGNATURE_HEADER,
};

use crate::error::{api_error, bad_request, billing_error, ApiResult};
use crate::state::AppState;

/// Header carrying a merchant's API key
pub const API_KEY_HEADER: &str = "x-api-key";

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub text_generator: String,
    pub text_generator_connected: bool,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub subscription_id: Uuid,
    pub status: SubscriptionStatus,
    pub current_period_end: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<&Subscription> for SubscriptionView {
    fn from(sub: &Subscription) -> Self {
        Self {
            subscription_id: sub.id,
            status: sub.status,
            current_period_end: sub.current_period_end,
            updated_at: sub.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub verified: bool,
    pub payment_id: Uuid,
    pub merchant_id: Uuid,
    pub merchant: String,
    pub payer: String,
    /// Base units, decimal string
    pub amount: String,
    pub timestamp: i64,
    pub tx_hash: String,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionView>,
}

#[derive(Debug, Serialize)]
pub struct MerchantSummary {
    pub id: Uuid,
    pub wallet: String,
    pub registered: DateTime<Utc>,
}

impl From<&Merchant> for MerchantSummary {
    fn from(merchant: &Merchant) -> Self {
        Self {
            id: merchant.id,
            wallet: merchant.wallet.clone(),
            registered: merchant.created_at,
        }
    }
}

/// The API key is only returned to the caller that created the merchant
#[derive(Debug, Serialize)]
pub struct RegisterMerchantResponse {
    pub merchant: MerchantSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct VerifyMerchantResponse {
    pub is_merchant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant: Option<MerchantSummary>,
}

#[derive(Debug, Serialize)]
pub struct PlanListResponse {
    pub plans: Vec<Plan>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionListResponse {
    pub subscriptions: Vec<Subscription>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WalletRequest {
    pub wallet: String,
}

#[derive(Debug, Deserialize)]
pub struct WalletQuery {
    #[serde(default)]
    pub wallet: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterWebhookRequest {
    pub merchant_wallet: String,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub merchant_wallet: String,
    pub name: String,
    /// Base units, decimal string
    pub amount: String,
    pub interval: String,
}

#[derive(Debug, Deserialize)]
pub struct PlanListQuery {
    #[serde(default)]
    pub merchant: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub merchant_id: Uuid,
    pub customer_wallet: String,
    pub plan_id: Uuid,
    #[serde(default)]
    pub tx_hash: Option<String>,
    /// Create in `payment_required` ahead of payment
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Deserialize)]
pub struct RenewSubscriptionRequest {
    pub subscription_id: Uuid,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub subscription_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionListQuery {
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = state.generator.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        text_generator: state.generator.name().to_string(),
        text_generator_connected: connected,
    })
}

/// Verify an on-chain payment
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> ApiResult<VerifyPaymentResponse> {
    let verified = state.verifier.verify(&payload).await.map_err(billing_error)?;

    Ok(Json(VerifyPaymentResponse {
        verified: true,
        payment_id: verified.payment.id,
        merchant_id: verified.merchant.id,
        merchant: verified.merchant.wallet.clone(),
        payer: verified.payment.payer.clone(),
        amount: verified.payment.amount.to_string(),
        timestamp: verified.payment.timestamp,
        tx_hash: verified.payment.tx_hash.clone(),
        duplicate: verified.duplicate,
        subscription: verified.subscription.as_ref().map(SubscriptionView::from),
    }))
}

/// Register a merchant wallet (idempotent)
pub async fn register_merchant(
    State(state): State<AppState>,
    Json(payload): Json<WalletRequest>,
) -> ApiResult<RegisterMerchantResponse> {
    if payload.wallet.trim().is_empty() {
        return Err(bad_request("Missing wallet address"));
    }

    let (merchant, created) = state
        .merchants
        .register(&payload.wallet)
        .await
        .map_err(billing_error)?;

    Ok(Json(RegisterMerchantResponse {
        merchant: MerchantSummary::from(&merchant),
        api_key: created.then(|| merchant.api_key.clone()),
        created,
    }))
}

/// Check whether a wallet is a registered merchant
pub async fn verify_merchant(
    State(state): State<AppState>,
    Json(payload): Json<WalletRequest>,
) -> ApiResult<VerifyMerchantResponse> {
    lookup_merchant(&state, &payload.wallet).await
}

/// `GET` form of [`verify_merchant`]
pub async fn verify_merchant_query(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
) -> ApiResult<VerifyMerchantResponse> {
    lookup_merchant(&state, query.wallet.as_deref().unwrap_or_default()).await
}

async fn lookup_merchant(state: &AppState, wallet: &str) -> ApiResult<VerifyMerchantResponse> {
    if wallet.trim().is_empty() {
        return Err(bad_request("Missing wallet address"));
    }

    let merchant = state.merchants.lookup(wallet).await.map_err(billing_error)?;

    Ok(Json(VerifyMerchantResponse {
        is_merchant: merchant.is_some(),
        merchant: merchant.as_ref().map(MerchantSummary::from),
    }))
}

/// Register a webhook endpoint for a merchant
///
/// Requires the merchant's API key in [`API_KEY_HEADER`].
pub async fn register_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterWebhookRequest>,
) -> ApiResult<WebhookEndpoint> {
    let url = payload.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(bad_request("Webhook url must be http(s)"));
    }

    let merchant = state
        .merchants
        .lookup(&payload.merchant_wallet)
        .await
        .map_err(billing_error)?
        .ok_or_else(|| {
            billing_error(BillingError::MerchantNotFound(
                payload.merchant_wallet.clone(),
            ))
        })?;

    let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if api_key != Some(merchant.api_key.as_str()) {
        tracing::warn!(merchant_id = %merchant.id, "Webhook registration with invalid API key");
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Invalid or missing API key",
        ));
    }

    let endpoint = state
        .store
        .insert_webhook_endpoint(WebhookEndpoint::new(
            merchant.id,
            url,
            payload.secret.unwrap_or_default(),
        ))
        .await
        .map_err(billing_error)?;

    tracing::info!(merchant_id = %merchant.id, url = %endpoint.url, "Registered webhook endpoint");
    Ok(Json(endpoint))
}

/// Create a plan
pub async fn create_plan(
    State(state): State<AppState>,
    Json(payload): Json<CreatePlanRequest>,
) -> ApiResult<Plan> {
    let amount = parse_amount(&payload.amount).map_err(billing_error)?;
    let interval: BillingInterval = payload.interval.parse().map_err(billing_error)?;

    let plan = state
        .plans
        .create(&payload.merchant_wallet, &payload.name, amount, interval)
        .await
        .map_err(billing_error)?;

    Ok(Json(plan))
}

/// List plans, optionally for one merchant wallet
pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<PlanListQuery>,
) -> ApiResult<PlanListResponse> {
    let merchant = query.merchant.as_deref().filter(|m| !m.trim().is_empty());
    let plans = state.plans.list(merchant).await.map_err(billing_error)?;

    Ok(Json(PlanListResponse {
        count: plans.len(),
        plans,
    }))
}

/// Create a subscription
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> ApiResult<SubscriptionView> {
    let subscription = if payload.pending {
        state
            .subscriptions
            .create_pending(payload.merchant_id, &payload.customer_wallet, payload.plan_id)
            .await
    } else {
        state
            .subscriptions
            .create(
                payload.merchant_id,
                &payload.customer_wallet,
                payload.plan_id,
                payload.tx_hash.as_deref(),
            )
            .await
    }
    .map_err(billing_error)?;

    Ok(Json(SubscriptionView::from(&subscription)))
}

/// Renew a subscription whose period has lapsed
pub async fn renew_subscription(
    State(state): State<AppState>,
    Json(payload): Json<RenewSubscriptionRequest>,
) -> ApiResult<SubscriptionView> {
    let subscription = state
        .subscriptions
        .renew(payload.subscription_id, payload.tx_hash.as_deref())
        .await
        .map_err(billing_error)?;

    Ok(Json(SubscriptionView::from(&subscription)))
}

/// Cancel a subscription
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Json(payload): Json<CancelSubscriptionRequest>,
) -> ApiResult<SubscriptionView> {
    let subscription = state
        .subscriptions
        .cancel(payload.subscription_id)
        .await
        .map_err(billing_error)?;

    Ok(Json(SubscriptionView::from(&subscription)))
}

/// List subscriptions by merchant wallet, customer wallet and status
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<SubscriptionListQuery>,
) -> ApiResult<SubscriptionListResponse> {
    let mut filter = SubscriptionFilter {
        payer_wallet: query
            .customer
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(normalize_wallet),
        ..SubscriptionFilter::default()
    };

    if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        filter.status = Some(status.parse().map_err(billing_error)?);
    }

    if let Some(wallet) = query.merchant.as_deref().filter(|m| !m.trim().is_empty()) {
        match state.merchants.lookup(wallet).await.map_err(billing_error)? {
            Some(merchant) => filter.merchant_id = Some(merchant.id),
            None => {
                return Ok(Json(SubscriptionListResponse {
                    subscriptions: Vec::new(),
                    count: 0,
                }));
            }
        }
    }

    let subscriptions = state.subscriptions.list(&filter).await.map_err(billing_error)?;

    Ok(Json(SubscriptionListResponse {
        count: subscriptions.len(),
        subscriptions,
    }))
}

/// Run an agent job on demand
pub async fn run_agent(
    State(state): State<AppState>,
    Json(payload): Json<AgentRequest>,
) -> ApiResult<AgentReport> {
    let report = state.agents.run(&payload).await.map_err(billing_error)?;
    Ok(Json(report))
}

/// Inbound webhook sink; verifies the signature when a secret is configured
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    let now = Utc::now();

    if let Some(secret) = state.webhook_receive_secret.as_deref() {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        verify_signature(
            secret,
            signature,
            &body,
            state.webhook_tolerance_secs,
            now.timestamp(),
        )
        .map_err(|e| {
            tracing::warn!("Inbound webhook rejected: {}", e);
            api_error(StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE", e.to_string())
        })?;
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("Invalid JSON body: {e}")))?;

    let event_type = payload
        .get("event_type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown");
    tracing::info!(event_type, "Webhook received");

    Ok(Json(WebhookAck {
        received: true,
        timestamp: now,
    }))
}
