//! Relay pipeline - main entry point.
//!
//! Ties extraction, tenant resolution, delivery and retry scheduling
//! together. Inbound events are acknowledged before any forwarding happens;
//! each event's attempts then run strictly one after another.

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::audit::DeliveryAuditor;
use crate::delivery::{DeliveryAttempt, DeliveryClient, DeliveryOutcome};
use crate::error::{RelayError, RelayResult};
use crate::extract::extract_object_id;
use crate::resolver::TenantResolver;
use crate::retry::{ExponentialBackoff, RetryDecision, RetryStrategy};
use crate::scheduler::{RetryScheduler, ScheduledTask};
use crate::tenant::TenantRoute;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Timeout for one forwarding attempt.
    pub forward_timeout: Duration,
    /// Total attempts per event, including the first.
    pub max_attempts: u32,
    /// Backoff base; attempt `k + 1` waits `base * 2^k`.
    pub base_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            forward_timeout: Duration::from_millis(4500),
            max_attempts: 5,
            base_backoff: Duration::from_millis(1000),
        }
    }
}

impl RelayConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the forwarding timeout.
    pub fn forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    /// Sets the attempt budget.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the backoff base.
    pub fn base_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }
}

/// Acknowledgement handed back to the inbound caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    /// Id assigned to the event, sent to the tenant on every attempt.
    pub request_id: String,
}

/// Pipeline counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
    exhausted: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub received: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub retried: u64,
    pub exhausted: u64,
}

impl RelayStats {
    /// Reads every counter.
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// An event whose tenant has been resolved. Shared by all its attempts.
struct PendingEvent {
    request_id: String,
    route: TenantRoute,
    payload: Bytes,
}

/// The relay pipeline.
pub struct WebhookRelay {
    resolver: TenantResolver,
    client: DeliveryClient,
    strategy: Arc<dyn RetryStrategy>,
    scheduler: Arc<RetryScheduler>,
    forward_timeout: Duration,
    stats: RelayStats,
}

impl WebhookRelay {
    /// Creates a relay with exponential backoff and its own scheduler.
    pub fn new(
        config: RelayConfig,
        resolver: TenantResolver,
        auditor: Arc<dyn DeliveryAuditor>,
    ) -> Self {
        let strategy = ExponentialBackoff::new()
            .base(config.base_backoff)
            .max_attempts(config.max_attempts);

        Self {
            resolver,
            client: DeliveryClient::new(auditor),
            strategy: Arc::new(strategy),
            scheduler: Arc::new(RetryScheduler::new()),
            forward_timeout: config.forward_timeout,
            stats: RelayStats::default(),
        }
    }

    /// Uses a custom retry strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Uses a shared scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<RetryScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Uses a preconfigured delivery client.
    pub fn with_client(mut self, client: DeliveryClient) -> Self {
        self.client = client;
        self
    }

    /// Accepts an inbound event and returns immediately.
    ///
    /// Extraction, resolution and every delivery attempt run in the
    /// background; their failures are logged, never returned.
    pub fn ingest(self: &Arc<Self>, payload: Bytes) -> IngestReceipt {
        let request_id = uuid::Uuid::new_v4().to_string();
        RelayStats::incr(&self.stats.received);

        let relay = Arc::clone(self);
        let id = request_id.clone();
        tokio::spawn(async move {
            relay.process(id, payload).await;
        });

        IngestReceipt { request_id }
    }

    /// Resolves the tenant for an object id.
    pub async fn resolve(&self, object_id: &str) -> Option<TenantRoute> {
        self.resolver.resolve(object_id).await
    }

    /// Performs exactly one audited attempt and waits for it. No retries.
    pub async fn deliver_once(
        &self,
        route: &TenantRoute,
        payload: &Bytes,
        request_id: &str,
    ) -> RelayResult<DeliveryAttempt> {
        self.client
            .attempt(route, payload, request_id, 0, self.forward_timeout)
            .await
    }

    /// Cancels every pending retry. Returns how many were cancelled.
    pub async fn shutdown(&self) -> usize {
        self.scheduler.stop().await
    }

    /// Pipeline counters.
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// The retry scheduler.
    pub fn scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }

    async fn process(self: Arc<Self>, request_id: String, payload: Bytes) {
        let Some(object_id) = extract_object_id(&payload) else {
            warn!(request_id = %request_id, "Unable to determine object id from webhook payload");
            RelayStats::incr(&self.stats.dropped);
            return;
        };

        let Some(route) = self.resolver.resolve(&object_id).await else {
            warn!(
                request_id = %request_id,
                object_id = %object_id,
                "No usable tenant configuration for object id"
            );
            RelayStats::incr(&self.stats.dropped);
            return;
        };

        let event = Arc::new(PendingEvent {
            request_id,
            route,
            payload,
        });
        Arc::clone(&self).run_attempt(event, 0).await;
    }

    fn run_attempt(self: Arc<Self>, event: Arc<PendingEvent>, attempt: u32) -> ScheduledTask {
        Box::pin(async move {
            let result = self
                .client
                .attempt(
                    &event.route,
                    &event.payload,
                    &event.request_id,
                    attempt,
                    self.forward_timeout,
                )
                .await;

            let delivered = match result {
                Ok(delivered) => delivered,
                Err(e) => {
                    warn!(request_id = %event.request_id, error = %e, "Dropping event");
                    RelayStats::incr(&self.stats.dropped);
                    return;
                }
            };

            match self.strategy.decide(delivered.outcome, attempt) {
                RetryDecision::Stop => self.finish(&event, &delivered),
                RetryDecision::Retry {
                    next_attempt,
                    delay,
                } => {
                    let task = Arc::clone(&self).run_attempt(Arc::clone(&event), next_attempt);
                    match self.scheduler.schedule(delay, task).await {
                        Ok(_) => RelayStats::incr(&self.stats.retried),
                        Err(e) => warn!(
                            request_id = %event.request_id,
                            attempt = next_attempt,
                            error = %e,
                            "Retry not scheduled"
                        ),
                    }
                }
                RetryDecision::Exhausted => {
                    RelayStats::incr(&self.stats.exhausted);
                    let err = RelayError::ExhaustedRetries {
                        attempts: attempt + 1,
                    };
                    error!(
                        request_id = %event.request_id,
                        object_id = %event.route.object_id,
                        error = %err,
                        "Max retry attempts reached, dropping event"
                    );
                }
            }
        })
    }

    fn finish(&self, event: &PendingEvent, delivered: &DeliveryAttempt) {
        match delivered.outcome {
            DeliveryOutcome::Success => {
                RelayStats::incr(&self.stats.delivered);
                info!(
                    request_id = %event.request_id,
                    object_id = %event.route.object_id,
                    attempt = delivered.attempt_number,
                    "Event delivered"
                );
            }
            DeliveryOutcome::PermanentFailure => {
                RelayStats::incr(&self.stats.rejected);
                let err = RelayError::PermanentDelivery {
                    status_code: delivered.status_code,
                };
                warn!(
                    request_id = %event.request_id,
                    object_id = %event.route.object_id,
                    status_code = delivered.status_code,
                    error = %err,
                    "Event not retried"
                );
            }
            DeliveryOutcome::TransientFailure => {}
        }
    }
}
