//! chainpay HTTP Server
//!
//! Axum-based server for on-chain payment verification, merchant
//! registration, subscriptions and agent jobs.

mod config;
mod error;
mod handlers;
mod routes;
mod scheduler;
mod state;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainpay_billing::{
    BillingConfig, BillingStore, HttpWebhookDispatcher, MemoryStore, WebhookConfig,
};
use chainpay_ledger::{JsonRpcLedgerClient, LedgerConfig};

use crate::config::ServerConfig;
use crate::routes::{router, ENDPOINTS};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let server = ServerConfig::from_env();
    let billing = BillingConfig::from_env();

    // Ledger
    let ledger_config = LedgerConfig::from_env();
    let ledger = Arc::new(JsonRpcLedgerClient::new(&ledger_config)?);
    tracing::info!(
        rpc_url = %ledger_config.rpc_url,
        contract = %ledger_config.payments_contract,
        "Ledger configured"
    );

    // Text generator
    let generator = chainpay_runtime::provider_from_env();
    match generator.health_check().await {
        Ok(true) => tracing::info!("✓ Text generator '{}' available", generator.name()),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Text generator '{}' not available", generator.name());
            tracing::warn!("  Invoice and renewal jobs will skip items until it is");
        }
    }

    // Store and webhooks
    let store = open_store().await?;
    let webhook_config = WebhookConfig::from_env();
    if webhook_config.default_url.is_some() {
        tracing::info!("✓ Default webhook target configured");
    }
    let webhooks = Arc::new(HttpWebhookDispatcher::new(store.clone(), webhook_config));

    let state = AppState::new(
        ledger,
        &ledger_config.payments_contract,
        store,
        webhooks,
        generator,
        billing,
    )
    .with_receive_secret(
        server.webhook_receive_secret.clone(),
        server.webhook_tolerance_secs,
    );

    if server.webhook_receive_secret.is_none() {
        tracing::warn!("⚠ WEBHOOK_RECEIVE_SECRET not set - inbound webhooks are unsigned");
    }

    if let Some(every) = server.agent_schedule {
        tokio::spawn(scheduler::run_agent_schedule(state.agents.clone(), every));
    }

    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&server.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 chainpay server running on http://{}", server.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    for (method, path, description) in ENDPOINTS {
        tracing::info!("  {:<4} {:<28} - {}", method, path, description);
    }
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "postgres")]
async fn open_store() -> anyhow::Result<Arc<dyn BillingStore>> {
    use chainpay_billing::{PgConfig, PgStore};

    let Some(config) = PgConfig::from_env() else {
        tracing::warn!("⚠ DATABASE_URL not set - using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let store = PgStore::connect(&config).await?;
    store.migrate().await?;
    tracing::info!(max_connections = config.max_connections, "✓ Postgres store connected");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_store() -> anyhow::Result<Arc<dyn BillingStore>> {
    if std::env::var("DATABASE_URL").is_ok_and(|url| !url.trim().is_empty()) {
        tracing::warn!("⚠ DATABASE_URL is set but this build lacks the `postgres` feature");
    }
    tracing::warn!("⚠ Using in-memory store - data is lost on restart");
    Ok(Arc::new(MemoryStore::new()))
}
