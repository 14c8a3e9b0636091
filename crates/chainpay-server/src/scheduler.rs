//! Scheduled agent runs

use std::time::Duration;

use chainpay_billing::AgentRunner;

/// Run the invoice and renewal jobs for every merchant, forever
pub async fn run_agent_schedule(agents: AgentRunner, every: Duration) {
    tracing::info!(interval_secs = every.as_secs(), "Agent schedule started");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_once(&agents).await;
    }
}

/// One pass of both jobs; errors are logged and the next tick retries
pub async fn run_once(agents: &AgentRunner) {
    match agents.invoices(None).await {
        Ok(report) => tracing::info!(
            processed = report.processed,
            failed = report.failed,
            "Scheduled invoice run"
        ),
        Err(e) => tracing::error!("Scheduled invoice run failed: {}", e),
    }

    match agents.renewals(None).await {
        Ok(report) => tracing::info!(
            renewed = report.renewed,
            expired = report.expired,
            "Scheduled renewal run"
        ),
        Err(e) => tracing::error!("Scheduled renewal run failed: {}", e),
    }
}
