//! HMAC signature generation and verification for forwarded payloads.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{RelayError, RelayResult};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Service-Signature";

/// Prefix of every signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signs raw payload bytes so a tenant can check the relay's authenticity.
///
/// The MAC is always computed over the exact bytes that go on the wire.
/// Tenants recompute it over the body they receive, so the payload must
/// never be re-serialized between receipt and forwarding.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadSigner;

impl PayloadSigner {
    /// Creates a new signer.
    pub fn new() -> Self {
        Self
    }

    /// Returns the header value `sha256=<hex-hmac>` for `payload`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Configuration` if `secret` is empty.
    pub fn sign(&self, payload: &[u8], secret: &str) -> RelayResult<String> {
        let digest = Self::mac(payload, secret)?;
        Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(digest)))
    }

    /// Checks a signature header value against `payload`.
    ///
    /// Returns `false` for malformed headers and for an empty secret.
    pub fn verify(&self, header: &str, payload: &[u8], secret: &str) -> bool {
        let Some(provided_hex) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
            return false;
        };
        let Ok(provided) = hex::decode(provided_hex) else {
            return false;
        };
        let Ok(expected) = Self::mac(payload, secret) else {
            return false;
        };

        expected.as_slice().ct_eq(provided.as_slice()).into()
    }

    fn mac(payload: &[u8], secret: &str) -> RelayResult<Vec<u8>> {
        if secret.is_empty() {
            return Err(RelayError::Configuration(
                "signing secret must not be empty".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| RelayError::Internal(e.to_string()))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
