//! Server Configuration

use std::time::Duration;

/// Process-level settings read from the environment
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Run invoice and renewal jobs on this period; unset disables the schedule
    pub agent_schedule: Option<Duration>,
    /// Verify signatures on `/api/webhooks/receive` when set
    pub webhook_receive_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            agent_schedule: None,
            webhook_receive_secret: None,
            webhook_tolerance_secs: 300,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            agent_schedule: std::env::var("AGENT_SCHEDULE_SECS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            webhook_receive_secret: std::env::var("WEBHOOK_RECEIVE_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            ..defaults
        }
    }
}
