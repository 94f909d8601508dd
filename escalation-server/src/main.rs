use anyhow::{Context, Result};
use clap::Parser;
use escalation_core::{
    EngineConfig, EscalationEngine, EscalationScheduler, NotifierConfig, RetryPolicy,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Rule-driven incident escalation service.
#[derive(Debug, Parser)]
#[command(name = "escalation-server")]
#[command(about = "Notification escalation rule engine")]
#[command(version)]
struct Cli {
    /// SQLite database holding rules, incidents and timelines
    #[arg(long, env = "ESCALATION_DB", default_value = "escalations.db")]
    db: PathBuf,

    /// Address to listen on
    #[arg(long, env = "ESCALATION_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Seconds between scheduler sweeps
    #[arg(long, env = "ESCALATION_SWEEP_SECS", default_value_t = 15)]
    sweep_secs: u64,

    /// Attempts at committing a contended incident change
    #[arg(long, env = "ESCALATION_TRANSITION_RETRIES", default_value_t = 5)]
    transition_retries: u32,

    /// HTTP gateway for email deliveries
    #[arg(long, env = "EMAIL_GATEWAY_URL")]
    email_gateway_url: Option<String>,

    /// HTTP gateway for SMS deliveries
    #[arg(long, env = "SMS_GATEWAY_URL")]
    sms_gateway_url: Option<String>,

    /// Delivery attempts per recipient
    #[arg(long, env = "NOTIFY_MAX_ATTEMPTS", default_value_t = 3)]
    notify_max_attempts: u32,

    /// Backoff before the first retry, in milliseconds
    #[arg(long, env = "NOTIFY_BACKOFF_MS", default_value_t = 500)]
    notify_backoff_ms: u64,

    /// Upper bound on retry backoff, in milliseconds
    #[arg(long, env = "NOTIFY_MAX_BACKOFF_MS", default_value_t = 10_000)]
    notify_max_backoff_ms: u64,

    /// Timeout for outbound HTTP deliveries, in seconds
    #[arg(long, env = "NOTIFY_TIMEOUT_SECS", default_value_t = 10)]
    notify_timeout_secs: u64,

    /// Fault email/SMS deliveries without a gateway instead of logging them
    #[arg(long, env = "NOTIFY_REQUIRE_GATEWAYS")]
    require_gateways: bool,

    /// Emit logs as JSON
    #[arg(long, env = "ESCALATION_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            database_path: self.db.clone(),
            sweep_interval: Duration::from_secs(self.sweep_secs.max(1)),
            max_transition_retries: self.transition_retries,
            notifier: NotifierConfig {
                retry: RetryPolicy {
                    max_attempts: self.notify_max_attempts.max(1),
                    initial_backoff: Duration::from_millis(self.notify_backoff_ms),
                    max_backoff: Duration::from_millis(self.notify_max_backoff_ms),
                },
                email_gateway_url: self.email_gateway_url.clone(),
                sms_gateway_url: self.sms_gateway_url.clone(),
                log_fallback: !self.require_gateways,
                http_timeout: Duration::from_secs(self.notify_timeout_secs.max(1)),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.engine_config();
    let engine = EscalationEngine::from_config(&config)
        .with_context(|| format!("failed to open engine at {}", config.database_path.display()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = EscalationScheduler::new(engine.clone(), config.sweep_interval);
    let sweeper = tokio::spawn(scheduler.run(shutdown_rx));

    let app = escalation_server::router(engine);
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;

    tracing::info!(
        bind = %cli.bind,
        db = %config.database_path.display(),
        sweep_secs = config.sweep_interval.as_secs(),
        "escalation-server listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    sweeper.await.context("scheduler task panicked")?;
    tracing::info!("escalation-server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("escalation_core=info,escalation_server=info,warn"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
