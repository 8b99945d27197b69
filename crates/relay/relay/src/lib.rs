//! # Hook Relay
//!
//! Multi-tenant webhook relay core:
//! - Subscription verification handshake
//! - Tenant resolution across primary and fallback stores
//! - HMAC-signed forwarding of raw payloads
//! - Exponential backoff retries on a cancellable scheduler
//! - Best-effort delivery auditing
//!
//! ## Example
//!
//! ```rust,ignore
//! use hook_relay::{
//!     InMemoryDeliveryLog, InMemoryTenantStore, RelayConfig, TenantRecord, TenantResolver,
//!     WebhookRelay,
//! };
//!
//! let store = InMemoryTenantStore::shared();
//! store.upsert(TenantRecord::new("1234567890", "https://tenant.example.com/hooks", "secret")).await;
//!
//! let relay = Arc::new(WebhookRelay::new(
//!     RelayConfig::default(),
//!     TenantResolver::new().with_source(store),
//!     Arc::new(InMemoryDeliveryLog::new()),
//! ));
//!
//! // Returns at once; forwarding happens in the background.
//! let receipt = relay.ingest(body);
//! ```

mod audit;
mod delivery;
mod error;
mod extract;
mod rate_limiter;
mod relay;
mod resolver;
mod retry;
mod scheduler;
mod signature;
mod tenant;
mod verification;

pub use audit::{
    record_best_effort, DeliveryAuditor, DeliveryRecord, FanoutAuditor, InMemoryDeliveryLog, TracingAuditor,
};
pub use delivery::{DeliveryAttempt, DeliveryClient, DeliveryOutcome, OBJECT_ID_HEADER, REQUEST_ID_HEADER};
pub use error::{RelayError, RelayResult};
pub use extract::{extract_from_value, extract_object_id, ExtractionStrategy, STRATEGIES};
pub use rate_limiter::{InboundRateLimiter, RateLimitInfo};
pub use relay::{IngestReceipt, RelayConfig, RelayStats, RelayStatsSnapshot, WebhookRelay};
pub use resolver::{InMemoryTenantStore, StaticTenantSource, TenantResolver, TenantSource};
pub use retry::{ExponentialBackoff, RetryDecision, RetryStrategy};
pub use scheduler::{RetryScheduler, ScheduledTask};
pub use signature::{PayloadSigner, SIGNATURE_HEADER, SIGNATURE_PREFIX};
pub use tenant::{mask_secret, TenantRecord, TenantRoute};
pub use verification::{
    SubscriptionVerifier, VerificationFailure, VerificationOutcome, VerificationRequest, SUBSCRIBE_MODE,
};
