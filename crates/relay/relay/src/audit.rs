//! Delivery auditing.
//!
//! Every delivery attempt, terminal or not, produces one [`DeliveryRecord`].
//! Auditing is best-effort: a failing auditor never changes the delivery
//! outcome or the retry decision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::delivery::{DeliveryAttempt, DeliveryOutcome};
use crate::error::RelayResult;

/// Persisted outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Inbound event id, stable across retries.
    pub request_id: String,
    /// Tenant object id.
    pub object_id: String,
    /// Tenant callback URL.
    pub callback_url: String,
    /// 0-indexed attempt number.
    pub attempt: u32,
    /// Classified outcome.
    pub outcome: DeliveryOutcome,
    /// HTTP status, 0 when no response was obtained.
    pub status_code: u16,
    /// Whether the tenant accepted the payload.
    pub success: bool,
    /// Error text, empty on success.
    pub error_message: String,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// When the attempt completed.
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Builds the record for a finished attempt.
    pub fn from_attempt(attempt: &DeliveryAttempt, callback_url: &str) -> Self {
        Self {
            request_id: attempt.request_id.clone(),
            object_id: attempt.object_id.clone(),
            callback_url: callback_url.to_string(),
            attempt: attempt.attempt_number,
            outcome: attempt.outcome,
            status_code: attempt.status_code,
            success: attempt.outcome == DeliveryOutcome::Success,
            error_message: attempt.error.clone().unwrap_or_default(),
            latency_ms: attempt.latency_ms,
            payload_size: attempt.payload.len(),
            created_at: Utc::now(),
        }
    }
}

/// Sink for delivery records.
#[async_trait]
pub trait DeliveryAuditor: Send + Sync {
    /// Persists a record.
    async fn record(&self, record: &DeliveryRecord) -> RelayResult<()>;
}

/// Records through `auditor`, logging and discarding any failure.
pub async fn record_best_effort(auditor: &dyn DeliveryAuditor, record: &DeliveryRecord) {
    if let Err(e) = auditor.record(record).await {
        warn!(
            request_id = %record.request_id,
            attempt = record.attempt,
            error = %e,
            "Failed to persist delivery log"
        );
    }
}

/// Append-only in-memory delivery log.
pub struct InMemoryDeliveryLog {
    records: RwLock<Vec<DeliveryRecord>>,
}

impl InMemoryDeliveryLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// All records in completion order.
    pub async fn records(&self) -> Vec<DeliveryRecord> {
        self.records.read().await.clone()
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Records for one inbound event, in attempt order.
    pub async fn records_for_request(&self, request_id: &str) -> Vec<DeliveryRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|r| r.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Most recent records for a tenant, newest first.
    pub async fn recent_for_object(&self, object_id: &str, limit: usize) -> Vec<DeliveryRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .rev()
            .filter(|r| r.object_id == object_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drops records older than `days`. Returns how many were removed.
    pub async fn cleanup_older_than(&self, days: u32) -> usize {
        let mut records = self.records.write().await;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let before_len = records.len();
        records.retain(|r| r.created_at > cutoff);
        before_len - records.len()
    }
}

impl Default for InMemoryDeliveryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryAuditor for InMemoryDeliveryLog {
    async fn record(&self, record: &DeliveryRecord) -> RelayResult<()> {
        let mut records = self.records.write().await;
        records.push(record.clone());
        Ok(())
    }
}

/// Auditor that only emits a structured log event per attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditor;

#[async_trait]
impl DeliveryAuditor for TracingAuditor {
    async fn record(&self, record: &DeliveryRecord) -> RelayResult<()> {
        info!(
            request_id = %record.request_id,
            object_id = %record.object_id,
            attempt = record.attempt,
            outcome = ?record.outcome,
            status_code = record.status_code,
            latency_ms = record.latency_ms,
            payload_size = record.payload_size,
            "Delivery attempt recorded"
        );
        Ok(())
    }
}

/// Hands each record to several auditors in order.
///
/// Every auditor is tried; the first error is returned after all ran.
#[derive(Clone, Default)]
pub struct FanoutAuditor {
    auditors: Vec<Arc<dyn DeliveryAuditor>>,
}

impl FanoutAuditor {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an auditor.
    pub fn with(mut self, auditor: Arc<dyn DeliveryAuditor>) -> Self {
        self.auditors.push(auditor);
        self
    }
}

#[async_trait]
impl DeliveryAuditor for FanoutAuditor {
    async fn record(&self, record: &DeliveryRecord) -> RelayResult<()> {
        let mut first_error = None;
        for auditor in &self.auditors {
            if let Err(e) = auditor.record(record).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    fn record(request_id: &str, object_id: &str, attempt: u32) -> DeliveryRecord {
        DeliveryRecord {
            request_id: request_id.to_string(),
            object_id: object_id.to_string(),
            callback_url: "https://t.example.com".to_string(),
            attempt,
            outcome: DeliveryOutcome::TransientFailure,
            status_code: 503,
            success: false,
            error_message: "HTTP 503".to_string(),
            latency_ms: 12,
            payload_size: 64,
            created_at: Utc::now(),
        }
    }

    struct BrokenAuditor;

    #[async_trait]
    impl DeliveryAuditor for BrokenAuditor {
        async fn record(&self, _record: &DeliveryRecord) -> RelayResult<()> {
            Err(RelayError::Audit("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_in_memory_log_queries() {
        let log = InMemoryDeliveryLog::new();
        log.record(&record("req-1", "page-1", 0)).await.unwrap();
        log.record(&record("req-2", "page-2", 0)).await.unwrap();
        log.record(&record("req-1", "page-1", 1)).await.unwrap();

        assert_eq!(log.len().await, 3);

        let for_request = log.records_for_request("req-1").await;
        assert_eq!(for_request.len(), 2);
        assert_eq!(for_request[0].attempt, 0);
        assert_eq!(for_request[1].attempt, 1);

        let recent = log.recent_for_object("page-1", 1).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].attempt, 1);
    }

    #[tokio::test]
    async fn test_cleanup_older_than() {
        let log = InMemoryDeliveryLog::new();
        let mut old = record("req-old", "page-1", 0);
        old.created_at = Utc::now() - chrono::Duration::days(40);
        log.record(&old).await.unwrap();
        log.record(&record("req-new", "page-1", 0)).await.unwrap();

        assert_eq!(log.cleanup_older_than(30).await, 1);
        assert_eq!(log.records().await[0].request_id, "req-new");
    }

    #[tokio::test]
    async fn test_fanout_records_everywhere() {
        let log = Arc::new(InMemoryDeliveryLog::new());
        let fanout = FanoutAuditor::new()
            .with(Arc::new(BrokenAuditor))
            .with(log.clone())
            .with(Arc::new(TracingAuditor));

        let result = fanout.record(&record("req-1", "page-1", 0)).await;
        assert!(matches!(result, Err(RelayError::Audit(_))));
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_best_effort_swallows_errors() {
        record_best_effort(&BrokenAuditor, &record("req-1", "page-1", 0)).await;
        record_best_effort(&TracingAuditor, &record("req-1", "page-1", 0)).await;
    }
}
