//! # Hook Relay Server
//!
//! Standalone HTTP service in front of the relay pipeline. It answers the
//! platform's subscription handshake, acknowledges inbound events at once
//! and forwards them to the owning tenant in the background.

mod config;
mod routes;

pub use config::{
    ConfigError, LogFormat, ServerConfig, load_config, load_tenants_file, parse_tenants,
};
pub use routes::{AppState, MAX_WEBHOOK_BODY_BYTES, router};

use axum::Router;
use hook_relay::{
    FanoutAuditor, InMemoryDeliveryLog, InMemoryTenantStore, InboundRateLimiter,
    StaticTenantSource, SubscriptionVerifier, TenantResolver, TracingAuditor, WebhookRelay,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// How often expired delivery records are swept.
pub const LOG_RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Server startup or runtime error.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    tenant_store: Arc<InMemoryTenantStore>,
    state: AppState,
}

impl RelayServer {
    /// Wires the relay from configuration.
    ///
    /// Tenants resolve from the in-memory primary store first and from the
    /// configured tenants file second.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let fallback = match &config.tenants_file {
            Some(path) => {
                let records = load_tenants_file(path)?;
                tracing::info!(
                    path = %path.display(),
                    tenants = records.len(),
                    "Loaded fallback tenants"
                );
                StaticTenantSource::new(records)
            }
            None => StaticTenantSource::empty(),
        };

        let tenant_store = InMemoryTenantStore::shared();
        let resolver = TenantResolver::new()
            .with_source(tenant_store.clone())
            .with_source(Arc::new(fallback));

        let delivery_log = Arc::new(InMemoryDeliveryLog::new());
        let auditor = FanoutAuditor::new()
            .with(delivery_log.clone())
            .with(Arc::new(TracingAuditor));

        let relay = Arc::new(WebhookRelay::new(
            config.relay_config(),
            resolver,
            Arc::new(auditor),
        ));

        let state = AppState {
            relay,
            verifier: SubscriptionVerifier::new(config.verify_token.clone()),
            rate_limiter: Arc::new(InboundRateLimiter::per_minute(
                config.webhook_rate_limit_per_minute,
            )),
            delivery_log,
            trusted_proxy_hops: config.trusted_proxy_hops,
            environment: config.environment.clone(),
        };

        Ok(Self {
            config,
            tenant_store,
            state,
        })
    }

    /// Primary tenant store. Registrations made here take precedence over
    /// the tenants file.
    pub fn tenant_store(&self) -> &Arc<InMemoryTenantStore> {
        &self.tenant_store
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The configuration the server was built from.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The application router.
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serves until Ctrl-C or SIGTERM, then cancels pending retries.
    pub async fn run(self) -> Result<(), ServerError> {
        let address = self.config.bind_address();
        let listener = tokio::net::TcpListener::bind(&address).await?;

        if self.state.verifier.has_token() {
            tracing::info!(
                token = %self.state.verifier.masked_token(),
                token_len = self.state.verifier.token_len(),
                "Verify token configured"
            );
        } else {
            tracing::warn!("FB_VERIFY_TOKEN is not set; handshakes only succeed with an empty token");
        }
        tracing::info!(
            address = %address,
            environment = %self.config.environment,
            max_retry_attempts = self.config.max_retry_attempts,
            "Starting hook relay server"
        );

        let retention = (self.config.delivery_log_retention_days > 0).then(|| {
            spawn_log_retention(
                Arc::clone(&self.state.delivery_log),
                self.config.delivery_log_retention_days,
                LOG_RETENTION_SWEEP_INTERVAL,
            )
        });

        let app = self.router();
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        if let Some(retention) = retention {
            retention.abort();
        }
        let cancelled = self.state.relay.shutdown().await;
        served?;
        tracing::info!(cancelled_retries = cancelled, "Server stopped");
        Ok(())
    }
}

/// Periodically drops delivery records older than `retention_days`.
///
/// The first sweep runs immediately. The task runs until aborted.
pub fn spawn_log_retention(
    log: Arc<InMemoryDeliveryLog>,
    retention_days: u32,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = log.cleanup_older_than(retention_days).await;
            if removed > 0 {
                tracing::info!(removed, retention_days, "Expired delivery records removed");
            }
        }
    })
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
