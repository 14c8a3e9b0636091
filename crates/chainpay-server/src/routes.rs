//! Router

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    cancel_subscription, create_plan, create_subscription, health_check, list_plans,
    list_subscriptions, receive_webhook, register_merchant, register_webhook, renew_subscription,
    run_agent, verify_merchant, verify_merchant_query, verify_payment,
};
use crate::state::AppState;

/// `(method, path, description)` for every route, logged at startup
pub const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("GET", "/health", "Health check"),
    ("POST", "/api/payments/verify", "Verify an on-chain payment"),
    ("POST", "/api/merchants/register", "Register a merchant wallet"),
    ("POST", "/api/merchants/verify", "Check merchant registration"),
    ("POST", "/api/merchants/webhooks", "Register a webhook endpoint"),
    ("POST", "/api/plans/create", "Create a plan"),
    ("GET", "/api/plans/list", "List plans"),
    ("POST", "/api/subscriptions/create", "Create a subscription"),
    ("POST", "/api/subscriptions/renew", "Renew a subscription"),
    ("POST", "/api/subscriptions/cancel", "Cancel a subscription"),
    ("GET", "/api/subscriptions/list", "List subscriptions"),
    ("POST", "/api/agents/run", "Run an agent job"),
    ("POST", "/api/webhooks/receive", "Inbound webhook sink"),
];

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Payments
        .route("/api/payments/verify", post(verify_payment))
        // Merchants
        .route("/api/merchants/register", post(register_merchant))
        .route(
            "/api/merchants/verify",
            post(verify_merchant).get(verify_merchant_query),
        )
        .route("/api/merchants/webhooks", post(register_webhook))
        // Plans
        .route("/api/plans/create", post(create_plan))
        .route("/api/plans/list", get(list_plans))
        // Subscriptions
        .route("/api/subscriptions/create", post(create_subscription))
        .route("/api/subscriptions/renew", post(renew_subscription))
        .route("/api/subscriptions/cancel", post(cancel_subscription))
        .route("/api/subscriptions/list", get(list_subscriptions))
        // Agents
        .route("/api/agents/run", post(run_agent))
        // Webhooks
        .route("/api/webhooks/receive", post(receive_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chainpay_agent::MockProvider;
    use chainpay_billing::{
        sign_payload, BillingConfig, MemoryStore, RecordingDispatcher, WebhookEventType,
        SIGNATURE_HEADER,
    };
    use chainpay_ledger::{MockLedgerClient, U256};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::handlers::API_KEY_HEADER;

    const MERCHANT: &str = "0x00000000000000000000000000000000000000aa";
    const PAYER: &str = "0x00000000000000000000000000000000000000bb";
    const TX: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    struct Harness {
        app: Router,
        webhooks: Arc<RecordingDispatcher>,
    }

    fn harness(ledger: MockLedgerClient, receive_secret: Option<&str>) -> Harness {
        let webhooks = Arc::new(RecordingDispatcher::new());
        let contract = ledger.contract().to_string();
        let state = AppState::new(
            Arc::new(ledger),
            &contract,
            Arc::new(MemoryStore::new()),
            webhooks.clone(),
            Arc::new(MockProvider::with_reply("Generated text")),
            BillingConfig::default(),
        )
        .with_receive_secret(receive_secret.map(String::from), 300);

        Harness {
            app: router(state),
            webhooks,
        }
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_api_key(mut request: Request<Body>, key: &str) -> Request<Body> {
        request
            .headers_mut()
            .insert(API_KEY_HEADER, key.parse().unwrap());
        request
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn create_plan(app: &Router) -> Value {
        let (status, plan) = call(
            app,
            post_json(
                "/api/plans/create",
                &json!({
                    "merchant_wallet": MERCHANT,
                    "name": "Pro",
                    "amount": "2500000000000000000",
                    "interval": "monthly"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        plan
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(MockLedgerClient::new(), None);
        let (status, body) = call(&h.app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["text_generator_connected"], true);
    }

    #[tokio::test]
    async fn test_verify_payment_then_duplicate() {
        let amount = U256::from(1_000_000_000_000_000_000u128);
        let ledger = MockLedgerClient::new().with_payment(TX, MERCHANT, PAYER, amount, 1_700_000_000);
        let h = harness(ledger, None);
        let request = json!({ "tx_hash": TX, "merchant_wallet": MERCHANT });

        let (status, body) = call(&h.app, post_json("/api/payments/verify", &request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], true);
        assert_eq!(body["duplicate"], false);
        assert_eq!(body["payer"], PAYER);
        assert_eq!(body["amount"], "1000000000000000000");
        assert_eq!(body["timestamp"], 1_700_000_000);
        assert!(body.get("subscription").is_none());

        let (status, again) = call(&h.app, post_json("/api/payments/verify", &request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["duplicate"], true);
        assert_eq!(again["payment_id"], body["payment_id"]);
        assert_eq!(h.webhooks.count(WebhookEventType::PaymentSucceeded).await, 1);

        let (status, merchant) = call(
            &h.app,
            get(&format!("/api/merchants/verify?wallet={MERCHANT}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(merchant["is_merchant"], true);
        assert_eq!(merchant["merchant"]["id"], body["merchant_id"]);
    }

    #[tokio::test]
    async fn test_verify_unknown_transaction() {
        let h = harness(MockLedgerClient::new(), None);
        let (status, body) = call(
            &h.app,
            post_json(
                "/api/payments/verify",
                &json!({ "tx_hash": TX, "merchant_wallet": MERCHANT }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "TRANSACTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_ledger_unreachable_is_bad_gateway() {
        let h = harness(MockLedgerClient::unreachable(), None);
        let (status, body) = call(
            &h.app,
            post_json(
                "/api/payments/verify",
                &json!({ "tx_hash": TX, "merchant_wallet": MERCHANT }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "UPSTREAM_FAILURE");
    }

    #[tokio::test]
    async fn test_merchant_registration_is_idempotent() {
        let h = harness(MockLedgerClient::new(), None);
        let request = json!({ "wallet": "  0x00000000000000000000000000000000000000AA " });

        let (status, first) = call(&h.app, post_json("/api/merchants/register", &request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["created"], true);
        assert_eq!(first["merchant"]["wallet"], MERCHANT);
        assert!(first["api_key"].as_str().unwrap().starts_with("sk_"));
        assert!(first["merchant"].get("api_key").is_none());

        let (status, second) = call(&h.app, post_json("/api/merchants/register", &request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["created"], false);
        assert_eq!(second["merchant"]["id"], first["merchant"]["id"]);
        assert!(second.get("api_key").is_none());
        assert!(second["merchant"].get("api_key").is_none());

        let (status, _) = call(
            &h.app,
            post_json("/api/merchants/register", &json!({ "wallet": " " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_registration() {
        let h = harness(MockLedgerClient::new(), None);
        let (_, registered) =
            call(&h.app, post_json("/api/merchants/register", &json!({ "wallet": MERCHANT }))).await;
        let api_key = registered["api_key"].as_str().unwrap().to_string();
        let hook = json!({ "merchant_wallet": MERCHANT, "url": "https://example.com/hook", "secret": "s3cret" });

        let (status, body) = call(
            &h.app,
            post_json(
                "/api/merchants/webhooks",
                &json!({ "merchant_wallet": MERCHANT, "url": "ftp://example.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");

        let (status, body) = call(&h.app, post_json("/api/merchants/webhooks", &hook)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, _) = call(
            &h.app,
            with_api_key(post_json("/api/merchants/webhooks", &hook), "sk_wrong"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &h.app,
            with_api_key(post_json("/api/merchants/webhooks", &hook), &api_key),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "https://example.com/hook");
        assert!(body.get("secret").is_none());

        let (status, _) = call(
            &h.app,
            post_json(
                "/api/merchants/webhooks",
                &json!({ "merchant_wallet": "0xnobody", "url": "https://example.com/hook" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let h = harness(MockLedgerClient::new(), None);
        call(&h.app, post_json("/api/merchants/register", &json!({ "wallet": MERCHANT }))).await;
        let plan = create_plan(&h.app).await;
        assert_eq!(plan["amount"], "2500000000000000000");

        let (_, merchant) = call(
            &h.app,
            post_json("/api/merchants/verify", &json!({ "wallet": MERCHANT })),
        )
        .await;
        let merchant_id = merchant["merchant"]["id"].clone();

        let (status, created) = call(
            &h.app,
            post_json(
                "/api/subscriptions/create",
                &json!({
                    "merchant_id": merchant_id,
                    "customer_wallet": PAYER,
                    "plan_id": plan["id"],
                    "tx_hash": TX
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["status"], "active");
        let id = created["subscription_id"].clone();

        let (status, body) = call(
            &h.app,
            post_json("/api/subscriptions/renew", &json!({ "subscription_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "NOT_DUE");

        let (status, canceled) = call(
            &h.app,
            post_json("/api/subscriptions/cancel", &json!({ "subscription_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(canceled["status"], "canceled");

        let (status, body) = call(
            &h.app,
            post_json("/api/subscriptions/renew", &json!({ "subscription_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_TRANSITION");

        let (_, listed) = call(
            &h.app,
            get(&format!("/api/subscriptions/list?merchant={MERCHANT}&status=canceled")),
        )
        .await;
        assert_eq!(listed["count"], 1);

        let (_, listed) = call(&h.app, get("/api/subscriptions/list?merchant=0xnobody")).await;
        assert_eq!(listed["count"], 0);

        assert_eq!(h.webhooks.count(WebhookEventType::SubscriptionCreated).await, 1);
        assert_eq!(h.webhooks.count(WebhookEventType::SubscriptionCanceled).await, 1);
    }

    #[tokio::test]
    async fn test_plan_validation_and_listing() {
        let h = harness(MockLedgerClient::new(), None);

        let (status, body) = call(
            &h.app,
            post_json(
                "/api/plans/create",
                &json!({ "merchant_wallet": MERCHANT, "name": "Pro", "amount": "10", "interval": "daily" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");

        let (status, body) = call(
            &h.app,
            post_json(
                "/api/plans/create",
                &json!({ "merchant_wallet": MERCHANT, "name": "Pro", "amount": "10", "interval": "weekly" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "MERCHANT_NOT_FOUND");

        call(&h.app, post_json("/api/merchants/register", &json!({ "wallet": MERCHANT }))).await;
        create_plan(&h.app).await;

        let (_, listed) = call(&h.app, get(&format!("/api/plans/list?merchant={MERCHANT}"))).await;
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["plans"][0]["interval"], "monthly");
    }

    #[tokio::test]
    async fn test_run_agent() {
        let h = harness(MockLedgerClient::new(), None);

        let (status, body) = call(
            &h.app,
            post_json("/api/agents/run", &json!({ "agent": "invoice" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "no-new-payments");

        let (status, body) = call(
            &h.app,
            post_json("/api/agents/run", &json!({ "agent": "analytics" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_receive_webhook_signature() {
        let h = harness(MockLedgerClient::new(), Some("whsec"));
        let body = json!({ "event_type": "payment_succeeded", "payload": {} }).to_string();

        let unsigned = Request::post("/api/webhooks/receive")
            .body(Body::from(body.clone()))
            .unwrap();
        let (status, response) = call(&h.app, unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response["code"], "INVALID_SIGNATURE");

        let signature = sign_payload("whsec", chrono::Utc::now().timestamp(), body.as_bytes());
        let signed = Request::post("/api/webhooks/receive")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap();
        let (status, response) = call(&h.app, signed).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["received"], true);
    }

    #[tokio::test]
    async fn test_receive_webhook_rejects_invalid_json() {
        let h = harness(MockLedgerClient::new(), None);
        let request = Request::post("/api/webhooks/receive")
            .body(Body::from("not json"))
            .unwrap();
        let (status, _) = call(&h.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
