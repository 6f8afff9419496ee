//! Configuration file parsing and validation.
//!
//! The shop reads a single TOML file. Secrets may instead come from the
//! environment (`PAYPAL_SHARED_SECRET`, `PAYPAL_CLIENT_SECRET`), which wins
//! over the file. Anything invalid, including the price catalog, stops the
//! process before it binds a socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::catalog::{PriceCatalog, TierConfig};
use crate::domain::{Currency, Error};
use crate::history::DEFAULT_PAGE_SIZE;
use crate::provider::paypal::{
    LIVE_API_BASE_URL, LIVE_IPN_VERIFY_URL, SANDBOX_API_BASE_URL, SANDBOX_IPN_VERIFY_URL,
};
use crate::provider::{PaypalSettings, RetryPolicy};

pub const SHARED_SECRET_ENV: &str = "PAYPAL_SHARED_SECRET";
pub const CLIENT_SECRET_ENV: &str = "PAYPAL_CLIENT_SECRET";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    auth: RawAuth,
    paypal: RawPaypal,
    #[serde(default)]
    audit: AuditConfig,
    #[serde(default)]
    history: HistoryConfig,
    catalog: RawCatalog,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// When off, order outcomes only go to the log.
    #[serde(default = "default_audit_files")]
    pub files: bool,
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            files: default_audit_files(),
            dir: default_audit_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAuth {
    #[serde(default)]
    shared_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPaypal {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    currency: String,
    #[serde(default = "default_sandbox")]
    sandbox: bool,
    #[serde(default)]
    api_base_url: Option<String>,
    #[serde(default)]
    ipn_verify_url: Option<String>,
    #[serde(default)]
    receiver_email: Option<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCatalog {
    tiers: Vec<TierConfig>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("coin_shop.db")
}
fn default_audit_files() -> bool {
    true
}
fn default_audit_dir() -> PathBuf {
    PathBuf::from("order_logs")
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_sandbox() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_retry_backoff_ms() -> u64 {
    250
}

/// Settings the browser needs to load the PayPal SDK. Nothing secret.
#[derive(Debug, Clone)]
pub struct PublicPaypalConfig {
    pub client_id: String,
    pub currency: Currency,
    pub sandbox: bool,
}

/// Validated configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub audit: AuditConfig,
    pub history: HistoryConfig,
    pub shared_secret: SecretString,
    pub paypal: PublicPaypalConfig,
    pub paypal_client_secret: SecretString,
    pub api_base_url: String,
    pub ipn_verify_url: String,
    /// IPN listener is disabled when unset.
    pub receiver_email: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub catalog: PriceCatalog,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Loads a configuration file, letting the process environment supply
    /// secrets.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content, |key| std::env::var(key).ok())
    }

    pub fn from_toml(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Error> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        let shared_secret = non_empty(env(SHARED_SECRET_ENV))
            .or_else(|| non_empty(raw.auth.shared_secret))
            .ok_or_else(|| {
                Error::Config(format!(
                    "shared secret missing: set {} or [auth].shared_secret",
                    SHARED_SECRET_ENV
                ))
            })?;
        let client_secret = non_empty(env(CLIENT_SECRET_ENV))
            .or_else(|| non_empty(raw.paypal.client_secret))
            .ok_or_else(|| {
                Error::Config(format!(
                    "PayPal client secret missing: set {} or [paypal].client_secret",
                    CLIENT_SECRET_ENV
                ))
            })?;

        let currency = Currency::new(&raw.paypal.currency).ok_or_else(|| {
            Error::Config(format!("invalid currency {:?}", raw.paypal.currency))
        })?;
        let catalog = PriceCatalog::from_config(currency, &raw.catalog.tiers)?;

        if raw.history.page_size == 0 {
            return Err(Error::Config("history page_size must be positive".to_string()));
        }
        if raw.paypal.timeout_ms == 0 {
            return Err(Error::Config("paypal timeout_ms must be positive".to_string()));
        }

        let (default_api, default_ipn) = if raw.paypal.sandbox {
            (SANDBOX_API_BASE_URL, SANDBOX_IPN_VERIFY_URL)
        } else {
            (LIVE_API_BASE_URL, LIVE_IPN_VERIFY_URL)
        };

        Ok(Self {
            server: raw.server,
            database: raw.database,
            audit: raw.audit,
            history: raw.history,
            shared_secret: SecretString::from(shared_secret),
            paypal: PublicPaypalConfig {
                client_id: raw.paypal.client_id,
                currency,
                sandbox: raw.paypal.sandbox,
            },
            paypal_client_secret: SecretString::from(client_secret),
            api_base_url: non_empty(raw.paypal.api_base_url)
                .unwrap_or_else(|| default_api.to_string()),
            ipn_verify_url: non_empty(raw.paypal.ipn_verify_url)
                .unwrap_or_else(|| default_ipn.to_string()),
            receiver_email: non_empty(raw.paypal.receiver_email),
            timeout: Duration::from_millis(raw.paypal.timeout_ms),
            retry: RetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(raw.paypal.retry_backoff_ms),
            },
            catalog,
        })
    }

    /// Builds the provider settings, handing over the client secret.
    pub fn paypal_settings(&self) -> PaypalSettings {
        use secrecy::ExposeSecret;

        PaypalSettings {
            api_base_url: self.api_base_url.clone(),
            ipn_verify_url: self.ipn_verify_url.clone(),
            client_id: self.paypal.client_id.clone(),
            client_secret: SecretString::from(self.paypal_client_secret.expose_secret().to_string()),
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
[server]
port = 5050

[auth]
shared_secret = "from-file"

[paypal]
client_id = "AbC"
client_secret = "file-client-secret"
currency = "EUR"

[[catalog.tiers]]
price = "5.00"
coins = 500
image = "/images/coins_500.png"

[[catalog.tiers]]
price = "10.00"
coins = 1100
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parses_with_defaults() {
        let cfg = AppConfig::from_toml(SAMPLE, no_env).unwrap();
        assert_eq!(cfg.server.port, 5050);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.history.page_size, 25);
        assert_eq!(cfg.shared_secret.expose_secret(), "from-file");
        assert_eq!(cfg.api_base_url, SANDBOX_API_BASE_URL);
        assert!(cfg.receiver_email.is_none());
        assert_eq!(cfg.catalog.list_tiers().len(), 2);
        assert_eq!(cfg.retry.attempts, 2);
        assert!(cfg.audit.files);
        assert_eq!(cfg.audit.dir, PathBuf::from("order_logs"));
    }

    #[test]
    fn environment_overrides_secrets() {
        let cfg = AppConfig::from_toml(SAMPLE, |key| match key {
            SHARED_SECRET_ENV => Some("from-env".to_string()),
            CLIENT_SECRET_ENV => Some("client-secret".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.shared_secret.expose_secret(), "from-env");
        assert_eq!(cfg.paypal_client_secret.expose_secret(), "client-secret");
    }

    #[test]
    fn missing_shared_secret_is_fatal() {
        let content = SAMPLE.replace("shared_secret = \"from-file\"", "");
        let err = AppConfig::from_toml(&content, no_env).unwrap_err();
        assert!(err.to_string().contains(SHARED_SECRET_ENV));
    }

    #[test]
    fn missing_client_secret_is_fatal() {
        let content = SAMPLE.replace("client_secret = \"file-client-secret\"", "");
        let err = AppConfig::from_toml(&content, no_env).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains(CLIENT_SECRET_ENV));

        let cfg = AppConfig::from_toml(&content, |key| {
            (key == CLIENT_SECRET_ENV).then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(cfg.paypal_client_secret.expose_secret(), "from-env");
    }

    #[test]
    fn invalid_catalog_is_fatal() {
        let content = SAMPLE.replace("price = \"10.00\"", "price = \"5.0\"");
        assert!(matches!(
            AppConfig::from_toml(&content, no_env),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let content = SAMPLE.replace("port = 5050", "port = 5050\nprot = 1");
        assert!(AppConfig::from_toml(&content, no_env).is_err());
    }

    #[test]
    fn live_mode_uses_live_endpoints() {
        let content = SAMPLE.replace("currency = \"EUR\"", "currency = \"EUR\"\nsandbox = false");
        let cfg = AppConfig::from_toml(&content, no_env).unwrap();
        assert_eq!(cfg.api_base_url, LIVE_API_BASE_URL);
        assert_eq!(cfg.ipn_verify_url, LIVE_IPN_VERIFY_URL);
    }
}
