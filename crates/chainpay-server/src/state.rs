//! Application State

use std::sync::Arc;

use chainpay_agent::LlmProvider;
use chainpay_billing::{
    AgentRunner, BillingConfig, BillingStore, MerchantDirectory, PaymentVerifier, PlanCatalog,
    SubscriptionEngine, WebhookDispatcher,
};
use chainpay_ledger::LedgerClient;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BillingStore>,

    /// Text generator for agent jobs (Gemini, Ollama, or disabled)
    pub generator: Arc<dyn LlmProvider>,

    pub merchants: MerchantDirectory,
    pub plans: PlanCatalog,
    pub subscriptions: SubscriptionEngine,
    pub verifier: Arc<PaymentVerifier>,
    pub agents: AgentRunner,

    /// Secret for inbound webhook signatures (None accepts unsigned)
    pub webhook_receive_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
}

impl AppState {
    /// Wire the billing components around shared dependencies
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        payments_contract: &str,
        store: Arc<dyn BillingStore>,
        webhooks: Arc<dyn WebhookDispatcher>,
        generator: Arc<dyn LlmProvider>,
        billing: BillingConfig,
    ) -> Self {
        let subscriptions = SubscriptionEngine::new(store.clone(), webhooks.clone(), billing.clone());
        let verifier = PaymentVerifier::new(
            ledger,
            payments_contract,
            store.clone(),
            webhooks,
            subscriptions.clone(),
        );
        let agents = AgentRunner::new(store.clone(), subscriptions.clone(), generator.clone(), billing);

        Self {
            merchants: MerchantDirectory::new(store.clone()),
            plans: PlanCatalog::new(store.clone()),
            store,
            generator,
            subscriptions,
            verifier: Arc::new(verifier),
            agents,
            webhook_receive_secret: None,
            webhook_tolerance_secs: 300,
        }
    }

    #[must_use]
    pub fn with_receive_secret(mut self, secret: Option<String>, tolerance_secs: i64) -> Self {
        self.webhook_receive_secret = secret;
        self.webhook_tolerance_secs = tolerance_secs;
        self
    }
}
