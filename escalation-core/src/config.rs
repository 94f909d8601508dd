use crate::notifier::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    /// How often the scheduler looks for overdue incidents.
    pub sweep_interval: Duration,
    /// Attempts at a compare-and-swap commit before giving up.
    pub max_transition_retries: u32,
    pub notifier: NotifierConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("escalations.db"),
            sweep_interval: Duration::from_secs(15),
            max_transition_retries: 5,
            notifier: NotifierConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NotifierConfig {
    pub retry: RetryPolicy,
    pub email_gateway_url: Option<String>,
    pub sms_gateway_url: Option<String>,
    /// Log email/SMS deliveries when no gateway is configured.
    pub log_fallback: bool,
    pub http_timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            email_gateway_url: None,
            sms_gateway_url: None,
            log_fallback: true,
            http_timeout: Duration::from_secs(10),
        }
    }
}
