//! Server configuration.
//!
//! Values are layered: built-in defaults, then the `[server]` table of an
//! optional TOML file, then environment variables.

use hook_relay::{RelayConfig, TenantRecord, mask_secret};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Invalid(format!("unknown log format '{other}'"))),
        }
    }
}

/// Server-level configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Deployment environment name, informational only.
    pub environment: String,
    /// Log level used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Per-attempt forwarding timeout.
    pub forward_timeout_ms: u64,
    /// Total attempts per event, including the first.
    pub max_retry_attempts: u32,
    /// Backoff base; attempt `k + 1` waits `base * 2^k`.
    pub retry_backoff_base_ms: u64,
    /// Relay-wide verify token for the subscription handshake.
    pub verify_token: String,
    /// Optional TOML file of fallback tenants.
    pub tenants_file: Option<PathBuf>,
    /// Inbound requests allowed per client and minute on webhook routes.
    pub webhook_rate_limit_per_minute: u32,
    /// Reverse proxies in front of the relay. The client address is the
    /// `X-Forwarded-For` entry this many hops from the right; 0 ignores
    /// the header.
    pub trusted_proxy_hops: usize,
    /// Days delivery records are kept in memory; 0 keeps them forever.
    pub delivery_log_retention_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            forward_timeout_ms: 4500,
            max_retry_attempts: 5,
            retry_backoff_base_ms: 1000,
            verify_token: String::new(),
            tenants_file: None,
            webhook_rate_limit_per_minute: 1200,
            trusted_proxy_hops: 1,
            delivery_log_retention_days: 30,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("forward_timeout_ms", &self.forward_timeout_ms)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("retry_backoff_base_ms", &self.retry_backoff_base_ms)
            .field("verify_token", &mask_secret(&self.verify_token))
            .field("tenants_file", &self.tenants_file)
            .field(
                "webhook_rate_limit_per_minute",
                &self.webhook_rate_limit_per_minute,
            )
            .field("trusted_proxy_hops", &self.trusted_proxy_hops)
            .field(
                "delivery_log_retention_days",
                &self.delivery_log_retention_days,
            )
            .finish()
    }
}

impl ServerConfig {
    /// Parses the `[server]` table of a TOML document. Missing keys keep
    /// their defaults; a document without the table yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let document: toml::Value =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let server = document
            .get("server")
            .map(|v| toml::Value::try_into(v.clone()))
            .transpose()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .unwrap_or_default();

        Ok(server)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// Taking the lookup as a closure keeps this testable without touching
    /// the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = lookup("APP_ENV") {
            self.environment = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.log_format = v.parse()?;
        }
        if let Some(v) = lookup("FORWARD_TIMEOUT_MS") {
            self.forward_timeout_ms = parse_var("FORWARD_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("MAX_RETRY_ATTEMPTS") {
            self.max_retry_attempts = parse_var("MAX_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("RETRY_BACKOFF_BASE_MS") {
            self.retry_backoff_base_ms = parse_var("RETRY_BACKOFF_BASE_MS", &v)?;
        }
        if let Some(v) = lookup("FB_VERIFY_TOKEN") {
            self.verify_token = v;
        }
        if let Some(v) = lookup("TENANTS_FILE") {
            self.tenants_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("WEBHOOK_RATE_LIMIT_PER_MINUTE") {
            self.webhook_rate_limit_per_minute = parse_var("WEBHOOK_RATE_LIMIT_PER_MINUTE", &v)?;
        }
        if let Some(v) = lookup("TRUSTED_PROXY_HOPS") {
            self.trusted_proxy_hops = parse_var("TRUSTED_PROXY_HOPS", &v)?;
        }
        if let Some(v) = lookup("DELIVERY_LOG_RETENTION_DAYS") {
            self.delivery_log_retention_days = parse_var("DELIVERY_LOG_RETENTION_DAYS", &v)?;
        }
        Ok(())
    }

    /// Rejects values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.forward_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "forward_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.webhook_rate_limit_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "webhook_rate_limit_per_minute must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Relay settings derived from this configuration.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig::new()
            .forward_timeout(Duration::from_millis(self.forward_timeout_ms))
            .max_attempts(self.max_retry_attempts)
            .base_backoff(Duration::from_millis(self.retry_backoff_base_ms))
    }

    /// `host:port` for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration: defaults, then `path` if given, then the process
/// environment. The result is validated.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
            ServerConfig::from_toml_str(&content)?
        }
        None => ServerConfig::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Deserialize)]
struct TenantsFile {
    #[serde(default)]
    tenants: Vec<TenantRecord>,
}

/// Parses a tenants document made of `[[tenants]]` entries.
pub fn parse_tenants(content: &str) -> Result<Vec<TenantRecord>, ConfigError> {
    let file: TenantsFile =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if let Some(record) = file.tenants.iter().find(|r| r.object_id.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "tenant entry without object_id (callback_url: {:?})",
            record.callback_url
        )));
    }

    Ok(file.tenants)
}

/// Reads the fallback tenants file.
pub fn load_tenants_file(path: &Path) -> Result<Vec<TenantRecord>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
    parse_tenants(&content)
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} has an invalid value '{value}'")))
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.forward_timeout_ms, 4500);
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.retry_backoff_base_ms, 1000);
        assert!(config.verify_token.is_empty());
        assert_eq!(config.trusted_proxy_hops, 1);
        assert_eq!(config.delivery_log_retention_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_server_table_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            [server]
            port = 8080
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.max_retry_attempts, 5);
    }

    #[test]
    fn test_missing_server_table_is_default() {
        let config = ServerConfig::from_toml_str("[other]\nkey = 1\n").unwrap();
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_malformed_toml() {
        let result = ServerConfig::from_toml_str("[server\nport = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env_overrides(env(&[
                ("PORT", "9000"),
                ("FB_VERIFY_TOKEN", "relay-token"),
                ("MAX_RETRY_ATTEMPTS", "3"),
                ("LOG_FORMAT", "JSON"),
                ("TENANTS_FILE", "/etc/relay/tenants.toml"),
                ("TRUSTED_PROXY_HOPS", "2"),
                ("DELIVERY_LOG_RETENTION_DAYS", "7"),
            ]))
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.verify_token, "relay-token");
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.tenants_file.as_deref(),
            Some(Path::new("/etc/relay/tenants.toml"))
        );
        assert_eq!(config.trusted_proxy_hops, 2);
        assert_eq!(config.delivery_log_retention_days, 7);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = ServerConfig::default();
        let result = config.apply_env_overrides(env(&[("PORT", "eighty")]));
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("PORT")));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = ServerConfig::default();
        config.max_retry_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.forward_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.webhook_rate_limit_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_config_conversion() {
        let mut config = ServerConfig::default();
        config.retry_backoff_base_ms = 250;
        let relay = config.relay_config();
        assert_eq!(relay.forward_timeout, Duration::from_millis(4500));
        assert_eq!(relay.max_attempts, 5);
        assert_eq!(relay.base_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_debug_masks_verify_token() {
        let mut config = ServerConfig::default();
        config.verify_token = "super-secret-token".to_string();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("sup***ken"));
    }

    #[test]
    fn test_parse_tenants() {
        let tenants = parse_tenants(
            r#"
            [[tenants]]
            object_id = "1234567890"
            callback_url = "https://tenant-a.example.com/hooks"
            app_secret = "secret-a"

            [[tenants]]
            object_id = "987"
            callback_url = "https://tenant-b.example.com/hooks"
            verify_token = "token-b"
            "#,
        )
        .unwrap();

        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].signing_secret(), Some("secret-a"));
        assert_eq!(tenants[1].signing_secret(), Some("token-b"));
    }

    #[test]
    fn test_parse_tenants_requires_object_id() {
        let result = parse_tenants(
            r#"
            [[tenants]]
            object_id = ""
            callback_url = "https://tenant.example.com/hooks"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_tenants_document() {
        assert!(parse_tenants("").unwrap().is_empty());
    }
}
