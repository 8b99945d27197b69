//! Subscription verification handshake.
//!
//! The platform confirms endpoint ownership by sending `hub.mode`,
//! `hub.verify_token` and `hub.challenge`; the endpoint echoes the challenge
//! when the token matches.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::tenant::mask_secret;

/// The only mode the handshake accepts.
pub const SUBSCRIBE_MODE: &str = "subscribe";

/// Handshake parameters. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// `hub.mode`.
    #[serde(rename = "hub.mode", default)]
    pub mode: Option<String>,
    /// `hub.verify_token`.
    #[serde(rename = "hub.verify_token", default)]
    pub verify_token: Option<String>,
    /// `hub.challenge`.
    #[serde(rename = "hub.challenge", default)]
    pub challenge: Option<String>,
}

impl VerificationRequest {
    /// Creates a request from the three parameters.
    pub fn new(
        mode: Option<impl Into<String>>,
        verify_token: Option<impl Into<String>>,
        challenge: Option<impl Into<String>>,
    ) -> Self {
        Self {
            mode: mode.map(Into::into),
            verify_token: verify_token.map(Into::into),
            challenge: challenge.map(Into::into),
        }
    }

    fn mode(&self) -> Option<&str> {
        present(self.mode.as_deref())
    }

    fn verify_token(&self) -> Option<&str> {
        present(self.verify_token.as_deref())
    }

    fn challenge(&self) -> Option<&str> {
        present(self.challenge.as_deref())
    }

    fn is_empty(&self) -> bool {
        self.mode().is_none() && self.verify_token().is_none() && self.challenge().is_none()
    }
}

/// Why a handshake was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    /// `hub.mode` is not `subscribe`.
    InvalidMode,
    /// `hub.verify_token` does not match the configured token.
    VerifyTokenMismatch,
    /// `hub.challenge` is absent.
    MissingChallenge,
}

impl VerificationFailure {
    /// Wire name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationFailure::InvalidMode => "invalid_mode",
            VerificationFailure::VerifyTokenMismatch => "verify_token_mismatch",
            VerificationFailure::MissingChallenge => "missing_challenge",
        }
    }
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Echo `challenge` back as plain text. Empty when none was sent.
    Verified { challenge: String },
    /// No parameter was supplied at all.
    MissingParameters,
    /// Every applicable failure reason, in a fixed order.
    Rejected { reasons: Vec<VerificationFailure> },
}

impl VerificationOutcome {
    /// Whether the handshake succeeded.
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified { .. })
    }
}

/// Checks handshakes against the configured verify token.
#[derive(Clone)]
pub struct SubscriptionVerifier {
    expected_token: String,
}

impl SubscriptionVerifier {
    /// Creates a verifier. Surrounding whitespace in the token is ignored.
    pub fn new(expected_token: impl Into<String>) -> Self {
        Self {
            expected_token: expected_token.into().trim().to_string(),
        }
    }

    /// Whether a non-empty token is configured.
    pub fn has_token(&self) -> bool {
        !self.expected_token.is_empty()
    }

    /// Masked form of the configured token, for logs.
    pub fn masked_token(&self) -> String {
        if self.has_token() {
            mask_secret(&self.expected_token)
        } else {
            "not set".to_string()
        }
    }

    /// Length of the configured token.
    pub fn token_len(&self) -> usize {
        self.expected_token.len()
    }

    /// Runs the handshake.
    pub fn verify(&self, request: &VerificationRequest) -> VerificationOutcome {
        let provided = request.verify_token.as_deref().unwrap_or_default().trim();
        let mode_ok = request.mode() == Some(SUBSCRIBE_MODE);
        let token_ok = self.token_matches(provided);

        if mode_ok && token_ok {
            let challenge = request.challenge.clone().unwrap_or_default();
            info!(
                challenge_len = challenge.len(),
                "Webhook verification succeeded"
            );
            return VerificationOutcome::Verified { challenge };
        }

        if request.is_empty() {
            return VerificationOutcome::MissingParameters;
        }

        let mut reasons = Vec::new();
        if !mode_ok {
            reasons.push(VerificationFailure::InvalidMode);
        }
        if !token_ok {
            reasons.push(VerificationFailure::VerifyTokenMismatch);
        }
        if request.challenge().is_none() {
            reasons.push(VerificationFailure::MissingChallenge);
        }

        warn!(
            mode = request.mode().unwrap_or_default(),
            challenge_present = request.challenge().is_some(),
            provided_token = %masked_or_none(provided),
            expected_token = %masked_or_none(&self.expected_token),
            provided_token_len = provided.len(),
            expected_token_len = self.expected_token.len(),
            reasons = ?reasons,
            "Webhook verification failed"
        );

        VerificationOutcome::Rejected { reasons }
    }

    fn token_matches(&self, provided: &str) -> bool {
        provided.as_bytes().ct_eq(self.expected_token.as_bytes()).into()
    }
}

impl std::fmt::Debug for SubscriptionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionVerifier")
            .field("expected_token", &self.masked_token())
            .finish()
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn masked_or_none(value: &str) -> String {
    if value.is_empty() {
        "none".to_string()
    } else {
        mask_secret(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: Option<&str>, token: Option<&str>, challenge: Option<&str>) -> VerificationRequest {
        VerificationRequest::new(mode, token, challenge)
    }

    #[test]
    fn test_successful_handshake_echoes_challenge() {
        let verifier = SubscriptionVerifier::new("my-verify-token");
        let outcome = verifier.verify(&request(
            Some("subscribe"),
            Some("my-verify-token"),
            Some("123456789"),
        ));

        assert_eq!(
            outcome,
            VerificationOutcome::Verified {
                challenge: "123456789".to_string()
            }
        );
    }

    #[test]
    fn test_tokens_are_trimmed() {
        let verifier = SubscriptionVerifier::new("  my-verify-token\n");
        let outcome = verifier.verify(&request(
            Some("subscribe"),
            Some(" my-verify-token "),
            Some("abc"),
        ));
        assert!(outcome.is_verified());
    }

    #[test]
    fn test_success_without_challenge_returns_empty_body() {
        let verifier = SubscriptionVerifier::new("token");
        let outcome = verifier.verify(&request(Some("subscribe"), Some("token"), None));
        assert_eq!(
            outcome,
            VerificationOutcome::Verified {
                challenge: String::new()
            }
        );
    }

    #[test]
    fn test_no_parameters() {
        let verifier = SubscriptionVerifier::new("token");
        assert_eq!(
            verifier.verify(&VerificationRequest::default()),
            VerificationOutcome::MissingParameters
        );
        assert_eq!(
            verifier.verify(&request(Some(""), Some(""), Some(""))),
            VerificationOutcome::MissingParameters
        );
    }

    #[test]
    fn test_token_mismatch() {
        let verifier = SubscriptionVerifier::new("token");
        let outcome = verifier.verify(&request(Some("subscribe"), Some("wrong"), Some("c")));
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected {
                reasons: vec![VerificationFailure::VerifyTokenMismatch]
            }
        );
    }

    #[test]
    fn test_all_reasons_reported() {
        let verifier = SubscriptionVerifier::new("token");
        let outcome = verifier.verify(&request(Some("unsubscribe"), Some("wrong"), None));
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected {
                reasons: vec![
                    VerificationFailure::InvalidMode,
                    VerificationFailure::VerifyTokenMismatch,
                    VerificationFailure::MissingChallenge,
                ]
            }
        );
    }

    #[test]
    fn test_invalid_mode_only() {
        let verifier = SubscriptionVerifier::new("token");
        let outcome = verifier.verify(&request(None, Some("token"), Some("c")));
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected {
                reasons: vec![VerificationFailure::InvalidMode]
            }
        );
    }

    #[test]
    fn test_reason_wire_names() {
        let json = serde_json::to_string(&vec![
            VerificationFailure::InvalidMode,
            VerificationFailure::VerifyTokenMismatch,
            VerificationFailure::MissingChallenge,
        ])
        .unwrap();
        assert_eq!(
            json,
            r#"["invalid_mode","verify_token_mismatch","missing_challenge"]"#
        );
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let verifier = SubscriptionVerifier::new("super-secret-token");
        let rendered = format!("{:?}", verifier);
        assert!(!rendered.contains("super-secret-token"));
    }
}
