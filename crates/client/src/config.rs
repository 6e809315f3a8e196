//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKETSTALL_API_BASE_URL` - REST backend base URL (http or https)
//!
//! ## Optional
//! - `MARKETSTALL_PAYMENT_PUBLISHABLE_KEY` - Payment provider publishable key
//! - `MARKETSTALL_HTTP_TIMEOUT_SECS` - Request timeout (default: 30)
//! - `MARKETSTALL_PAYMENT_MOUNT_ATTEMPTS` - Card form visibility checks (default: 10)
//! - `MARKETSTALL_PAYMENT_MOUNT_DELAY_MS` - Delay between checks (default: 100)
//! - `MARKETSTALL_CATALOG_CACHE_TTL_SECS` - Catalog cache lifetime (default: 300)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::payment::MountPolicy;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CATALOG_CACHE_TTL_SECS: u64 = 300;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Placeholder value in {0}: {1}")]
    Placeholder(String, String),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL without trailing slash
    pub api_base_url: String,
    /// Per-request timeout
    pub http_timeout: Duration,
    /// Lifetime of cached catalog responses
    pub catalog_cache_ttl: Duration,
    /// Card payment settings
    pub payment: PaymentConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Card payment settings.
#[derive(Debug, Clone, Default)]
pub struct PaymentConfig {
    /// Provider publishable key; card payments are unavailable without it
    pub publishable_key: Option<String>,
    /// How long to wait for the card form host
    pub mount: MountPolicy,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the base URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the URL is not http(s) with a
    /// host.
    pub fn new(api_base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base_url: normalize_base_url("MARKETSTALL_API_BASE_URL", api_base_url)?,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            catalog_cache_ttl: Duration::from_secs(DEFAULT_CATALOG_CACHE_TTL_SECS),
            payment: PaymentConfig::default(),
            sentry_dsn: None,
            sentry_environment: None,
        })
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or any value
    /// is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if set.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let base_url = env.required("MARKETSTALL_API_BASE_URL")?;
        let mut config = Self::new(&base_url)?;

        config.http_timeout = Duration::from_secs(
            env.parsed("MARKETSTALL_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
        );
        config.catalog_cache_ttl = Duration::from_secs(env.parsed(
            "MARKETSTALL_CATALOG_CACHE_TTL_SECS",
            DEFAULT_CATALOG_CACHE_TTL_SECS,
        )?);

        let defaults = MountPolicy::default();
        let max_attempts: u32 =
            env.parsed("MARKETSTALL_PAYMENT_MOUNT_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "MARKETSTALL_PAYMENT_MOUNT_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let delay_ms: u64 = env.parsed(
            "MARKETSTALL_PAYMENT_MOUNT_DELAY_MS",
            u64::try_from(defaults.delay.as_millis()).unwrap_or(100),
        )?;

        let publishable_key = env.optional("MARKETSTALL_PAYMENT_PUBLISHABLE_KEY");
        if let Some(key) = &publishable_key {
            reject_placeholder("MARKETSTALL_PAYMENT_PUBLISHABLE_KEY", key)?;
        }
        config.payment = PaymentConfig {
            publishable_key,
            mount: MountPolicy {
                max_attempts,
                delay: Duration::from_millis(delay_ms),
            },
        };

        config.sentry_dsn = env.optional("SENTRY_DSN");
        config.sentry_environment = env.optional("SENTRY_ENVIRONMENT");
        Ok(config)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    /// Set and non-blank value.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |value| {
            value
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }
}

fn normalize_base_url(key: &str, raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar(key.to_string(), reason);
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("must have a host".to_string()));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn reject_placeholder(key: &str, value: &str) -> Result<(), ConfigError> {
    let lower = value.to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::Placeholder(
                key.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("MARKETSTALL_API_BASE_URL", "https://api.marketstall.test/")]).unwrap();

        assert_eq!(config.api_base_url, "https://api.marketstall.test");
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.catalog_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.payment.mount, MountPolicy::default());
        assert!(config.payment.publishable_key.is_none());
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_base_url_keeps_path() {
        let config = load(&[("MARKETSTALL_API_BASE_URL", "http://localhost:8080/api/")]).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080/api");
    }

    #[test]
    fn test_missing_base_url() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnvVar(_))));
        assert!(matches!(
            load(&[("MARKETSTALL_API_BASE_URL", "   ")]),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            load(&[("MARKETSTALL_API_BASE_URL", "ftp://files.test")]),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert!(matches!(
            load(&[
                ("MARKETSTALL_API_BASE_URL", "https://api.test"),
                ("MARKETSTALL_HTTP_TIMEOUT_SECS", "soon"),
            ]),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert!(matches!(
            load(&[
                ("MARKETSTALL_API_BASE_URL", "https://api.test"),
                ("MARKETSTALL_PAYMENT_MOUNT_ATTEMPTS", "0"),
            ]),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
    }

    #[test]
    fn test_placeholder_publishable_key() {
        let err = load(&[
            ("MARKETSTALL_API_BASE_URL", "https://api.test"),
            ("MARKETSTALL_PAYMENT_PUBLISHABLE_KEY", "pk_test_your-key-here"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Placeholder(_, _)));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("MARKETSTALL_API_BASE_URL", "https://api.test"),
            ("MARKETSTALL_PAYMENT_PUBLISHABLE_KEY", "pk_live_51Hq8sK2eZvKYlo2C"),
            ("MARKETSTALL_PAYMENT_MOUNT_ATTEMPTS", "4"),
            ("MARKETSTALL_PAYMENT_MOUNT_DELAY_MS", "250"),
            ("MARKETSTALL_HTTP_TIMEOUT_SECS", "5"),
            ("SENTRY_DSN", "https://key@sentry.test/1"),
        ])
        .unwrap();

        assert_eq!(config.payment.mount.max_attempts, 4);
        assert_eq!(config.payment.mount.delay, Duration::from_millis(250));
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert!(config.payment.publishable_key.is_some());
        assert!(config.sentry_dsn.is_some());
    }
}
