//! Single forwarding attempts to a tenant callback.

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::audit::{record_best_effort, DeliveryAuditor, DeliveryRecord};
use crate::error::{RelayError, RelayResult};
use crate::signature::{PayloadSigner, SIGNATURE_HEADER};
use crate::tenant::TenantRoute;

/// Header carrying the inbound event id.
pub const REQUEST_ID_HEADER: &str = "X-Service-Request-Id";

/// Header carrying the tenant object id.
pub const OBJECT_ID_HEADER: &str = "X-Facebook-Page-Id";

/// Classified result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    /// 2xx response.
    Success,
    /// Timeout, connection failure or 5xx response. Retriable.
    TransientFailure,
    /// Any other response. Not retried.
    PermanentFailure,
}

impl DeliveryOutcome {
    /// Classifies an HTTP status; `0` means no response was obtained.
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            200..=299 => DeliveryOutcome::Success,
            0 | 500..=599 => DeliveryOutcome::TransientFailure,
            _ => DeliveryOutcome::PermanentFailure,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryOutcome::TransientFailure)
    }
}

/// One forwarding try.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// Inbound event id, stable across retries.
    pub request_id: String,
    /// Tenant object id.
    pub object_id: String,
    /// 0-indexed attempt number.
    pub attempt_number: u32,
    /// Forwarded bytes, identical across all attempts of one event.
    pub payload: Bytes,
    /// Classified outcome.
    pub outcome: DeliveryOutcome,
    /// HTTP status, 0 when no response was obtained.
    pub status_code: u16,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
    /// Error text for failed attempts.
    pub error: Option<String>,
}

/// Performs forwarding attempts and hands every outcome to the auditor.
pub struct DeliveryClient {
    client: reqwest::Client,
    signer: PayloadSigner,
    auditor: Arc<dyn DeliveryAuditor>,
}

impl DeliveryClient {
    /// Creates a client with a default HTTP connection pool.
    pub fn new(auditor: Arc<dyn DeliveryAuditor>) -> Self {
        Self::with_client(reqwest::Client::new(), auditor)
    }

    /// Creates a client around an existing HTTP client.
    pub fn with_client(client: reqwest::Client, auditor: Arc<dyn DeliveryAuditor>) -> Self {
        Self {
            client,
            signer: PayloadSigner::new(),
            auditor,
        }
    }

    /// Forwards `payload` to the tenant once.
    ///
    /// Network and HTTP failures are encoded in the returned attempt's
    /// outcome. The attempt is audited before this returns.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Configuration` if the route has an empty or
    /// non-HTTP callback URL or an empty secret. Nothing is sent or
    /// audited in that case.
    pub async fn attempt(
        &self,
        route: &TenantRoute,
        payload: &Bytes,
        request_id: &str,
        attempt_number: u32,
        timeout: Duration,
    ) -> RelayResult<DeliveryAttempt> {
        validate_callback_url(&route.callback_url)?;
        let signature = self.signer.sign(payload, &route.secret_token)?;

        let started = Instant::now();
        let response = self
            .client
            .post(&route.callback_url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(REQUEST_ID_HEADER, request_id)
            .header(OBJECT_ID_HEADER, &route.object_id)
            .timeout(timeout)
            .body(payload.clone())
            .send()
            .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (status_code, error) = match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let error = (!resp.status().is_success()).then(|| format!("HTTP {}", status));
                (status, error)
            }
            Err(e) => (0, Some(e.to_string())),
        };

        let attempt = DeliveryAttempt {
            request_id: request_id.to_string(),
            object_id: route.object_id.clone(),
            attempt_number,
            payload: payload.clone(),
            outcome: DeliveryOutcome::from_status(status_code),
            status_code,
            latency_ms,
            error,
        };

        match attempt.outcome {
            DeliveryOutcome::Success => debug!(
                request_id,
                object_id = %route.object_id,
                attempt = attempt_number,
                status_code,
                latency_ms,
                "Payload forwarded"
            ),
            DeliveryOutcome::TransientFailure => warn!(
                request_id,
                object_id = %route.object_id,
                attempt = attempt_number,
                status_code,
                latency_ms,
                error = attempt.error.as_deref().unwrap_or_default(),
                "Transient delivery failure"
            ),
            DeliveryOutcome::PermanentFailure => warn!(
                request_id,
                object_id = %route.object_id,
                attempt = attempt_number,
                status_code,
                latency_ms,
                "Tenant rejected delivery"
            ),
        }

        let record = DeliveryRecord::from_attempt(&attempt, &route.callback_url);
        record_best_effort(self.auditor.as_ref(), &record).await;

        Ok(attempt)
    }
}

fn validate_callback_url(callback_url: &str) -> RelayResult<()> {
    if callback_url.trim().is_empty() {
        return Err(RelayError::Configuration(
            "callback URL must not be empty".to_string(),
        ));
    }

    let url = reqwest::Url::parse(callback_url)
        .map_err(|e| RelayError::Configuration(format!("invalid callback URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RelayError::Configuration(format!(
            "unsupported callback URL scheme: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryDeliveryLog;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(DeliveryOutcome::from_status(200), DeliveryOutcome::Success);
        assert_eq!(DeliveryOutcome::from_status(204), DeliveryOutcome::Success);
        assert_eq!(DeliveryOutcome::from_status(0), DeliveryOutcome::TransientFailure);
        assert_eq!(DeliveryOutcome::from_status(500), DeliveryOutcome::TransientFailure);
        assert_eq!(DeliveryOutcome::from_status(503), DeliveryOutcome::TransientFailure);
        assert_eq!(DeliveryOutcome::from_status(301), DeliveryOutcome::PermanentFailure);
        assert_eq!(DeliveryOutcome::from_status(404), DeliveryOutcome::PermanentFailure);
        assert_eq!(DeliveryOutcome::from_status(429), DeliveryOutcome::PermanentFailure);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(DeliveryOutcome::TransientFailure.is_retryable());
        assert!(!DeliveryOutcome::Success.is_retryable());
        assert!(!DeliveryOutcome::PermanentFailure.is_retryable());
    }

    #[test]
    fn test_callback_url_validation() {
        assert!(validate_callback_url("https://t.example.com/hook").is_ok());
        assert!(validate_callback_url("http://127.0.0.1:8080").is_ok());
        assert!(validate_callback_url("").is_err());
        assert!(validate_callback_url("ftp://t.example.com").is_err());
        assert!(validate_callback_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_precondition_failure_is_not_audited() {
        let log = Arc::new(InMemoryDeliveryLog::new());
        let client = DeliveryClient::new(log.clone());
        let route = TenantRoute::new("1", "", "secret");

        let result = client
            .attempt(&route, &Bytes::from_static(b"{}"), "req-1", 0, Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(RelayError::Configuration(_))));
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        let log = Arc::new(InMemoryDeliveryLog::new());
        let client = DeliveryClient::new(log.clone());
        // Port 9 (discard) on localhost is not expected to accept connections.
        let route = TenantRoute::new("1", "http://127.0.0.1:9/hook", "secret");

        let attempt = client
            .attempt(
                &route,
                &Bytes::from_static(b"{}"),
                "req-1",
                0,
                Duration::from_millis(500),
            )
            .await
            .unwrap();

        assert_eq!(attempt.status_code, 0);
        assert_eq!(attempt.outcome, DeliveryOutcome::TransientFailure);
        assert!(attempt.error.is_some());
        assert_eq!(log.len().await, 1);
    }
}
