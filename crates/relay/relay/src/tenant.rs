//! Tenant records and resolved delivery routes.

use serde::{Deserialize, Serialize};

/// Tenant configuration as returned by a store.
///
/// Stores may hold incomplete records; only records with a callback URL and
/// a signing secret can be turned into a [`TenantRoute`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Platform-assigned object identifier (page or group id).
    pub object_id: String,
    /// Tenant callback URL.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Application secret, preferred for signing.
    #[serde(default)]
    pub app_secret: Option<String>,
    /// Verify token, used for signing when no app secret is set.
    #[serde(default)]
    pub verify_token: Option<String>,
}

impl TenantRecord {
    /// Creates a record with a callback URL and an app secret.
    pub fn new(
        object_id: impl Into<String>,
        callback_url: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            callback_url: Some(callback_url.into()),
            app_secret: Some(app_secret.into()),
            verify_token: None,
        }
    }

    /// Sets the verify token.
    pub fn with_verify_token(mut self, token: impl Into<String>) -> Self {
        self.verify_token = Some(token.into());
        self
    }

    /// The secret used to sign forwarded requests.
    pub fn signing_secret(&self) -> Option<&str> {
        non_empty(self.app_secret.as_deref()).or_else(|| non_empty(self.verify_token.as_deref()))
    }

    /// Converts the record into a route if it is usable.
    pub fn to_route(&self) -> Option<TenantRoute> {
        let callback_url = non_empty(self.callback_url.as_deref())?;
        let secret_token = self.signing_secret()?;

        Some(TenantRoute {
            object_id: self.object_id.clone(),
            callback_url: callback_url.to_string(),
            secret_token: secret_token.to_string(),
        })
    }
}

/// Resolved delivery target for one tenant.
///
/// A read-only snapshot taken per event; never mutated by the relay.
#[derive(Clone, PartialEq, Eq)]
pub struct TenantRoute {
    /// Platform-assigned object identifier.
    pub object_id: String,
    /// Absolute HTTP(S) callback URL.
    pub callback_url: String,
    /// Shared secret used to sign forwarded requests.
    pub secret_token: String,
}

impl TenantRoute {
    /// Creates a new route.
    pub fn new(
        object_id: impl Into<String>,
        callback_url: impl Into<String>,
        secret_token: impl Into<String>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            callback_url: callback_url.into(),
            secret_token: secret_token.into(),
        }
    }
}

impl std::fmt::Debug for TenantRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRoute")
            .field("object_id", &self.object_id)
            .field("callback_url", &self.callback_url)
            .field("secret_token", &mask_secret(&self.secret_token))
            .finish()
    }
}

/// Masks a secret for logging: `abc***xyz` when longer than six
/// characters, `***` otherwise.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 6 {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}***{}", head, tail)
    } else {
        "***".to_string()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
