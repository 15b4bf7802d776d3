//! rolepoll configuration loaded from `rolepoll.toml`.
//!
//! [`PollerConfig`] holds every tunable. Values missing from the file fall back
//! to defaults. `ROLEPOLL_CLIENT_ID`, `ROLEPOLL_CLIENT_SECRET` and
//! `ROLEPOLL_LOG_LEVEL` take precedence over the file.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::retry::{JitterDelay, RetryPolicy};
use crate::vendor::{PayloadSchema, Vendor};

const DEFAULT_CONFIG_FILE: &str = "rolepoll.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub vendor: Vendor,
    /// `EnvFilter` directive, e.g. `info` or `rolepoll=debug`.
    pub log_level: String,
    pub log_format: LogFormat,
    pub gateway: GatewayConfig,
    pub vendor_api: VendorApiConfig,
    pub retry: RetrySpec,
    /// Overrides the vendor's payload field names when set.
    pub schema: Option<PayloadSchema>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// The API gateway fronting both vendors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VendorApiConfig {
    /// Vendor token endpoint; SailPoint only.
    pub token_url: String,
    /// Empty means the vendor's default endpoint.
    pub taskresults_endpoint: String,
    pub log_api_call_details: bool,
    pub timeout_secs: u64,
}

impl Default for VendorApiConfig {
    fn default() -> Self {
        Self {
            token_url: String::new(),
            taskresults_endpoint: String::new(),
            log_api_call_details: false,
            timeout_secs: 30,
        }
    }
}

/// Retry settings for the GET TaskResults call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySpec {
    /// Attempts made by the inner retry engine.
    pub max_attempt_number: u32,
    pub wait_jitter_min_secs: f64,
    pub wait_jitter_max_secs: f64,
    /// Fixed sleep after a non-auth retriable failure.
    pub wait_time_secs: u64,
    /// Re-authenticate-and-fetch rounds around the inner engine.
    pub outer_max_attempts: u32,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempt_number: 3,
            wait_jitter_min_secs: 1.0,
            wait_jitter_max_secs: 3.0,
            wait_time_secs: 10,
            outer_max_attempts: 2,
        }
    }
}

impl RetrySpec {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempt_number)
    }

    pub fn jitter(&self) -> JitterDelay {
        JitterDelay::new(
            Duration::try_from_secs_f64(self.wait_jitter_min_secs).unwrap_or_default(),
            Duration::try_from_secs_f64(self.wait_jitter_max_secs).unwrap_or_default(),
        )
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            vendor: Vendor::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            gateway: GatewayConfig::default(),
            vendor_api: VendorApiConfig::default(),
            retry: RetrySpec::default(),
            schema: None,
        }
    }
}

impl PollerConfig {
    /// Loads from `path`, or from `rolepoll.toml` in the working directory.
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str::<PollerConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Environment wins over the file for secrets and log level.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(id) = non_empty("ROLEPOLL_CLIENT_ID") {
            self.gateway.client_id = id;
        }
        if let Some(secret) = non_empty("ROLEPOLL_CLIENT_SECRET") {
            self.gateway.client_secret = secret;
        }
        if let Some(level) = non_empty("ROLEPOLL_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Checks values serde cannot: counts, ranges and required URLs.
    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if retry.max_attempt_number == 0 {
            bail!("retry.max_attempt_number must be at least 1");
        }
        if retry.outer_max_attempts == 0 {
            bail!("retry.outer_max_attempts must be at least 1");
        }
        if !(retry.wait_jitter_min_secs >= 0.0 && retry.wait_jitter_max_secs >= 0.0) {
            bail!("retry jitter bounds must be non-negative");
        }
        if retry.wait_jitter_min_secs > retry.wait_jitter_max_secs {
            bail!(
                "retry.wait_jitter_min_secs ({}) exceeds wait_jitter_max_secs ({})",
                retry.wait_jitter_min_secs,
                retry.wait_jitter_max_secs
            );
        }
        if self.gateway.base_url.is_empty() {
            bail!("gateway.base_url must be set");
        }
        Ok(())
    }

    /// Payload field names: the override if present, else the vendor's.
    pub fn schema(&self) -> PayloadSchema {
        self.schema
            .clone()
            .unwrap_or_else(|| self.vendor.default_schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> PollerConfig {
        PollerConfig {
            gateway: GatewayConfig {
                base_url: "https://gateway.example.com".into(),
                ..GatewayConfig::default()
            },
            ..PollerConfig::default()
        }
    }

    #[test]
    fn default_config_values() {
        let config = PollerConfig::default();
        assert_eq!(config.vendor, Vendor::SailPoint);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.retry.max_attempt_number, 3);
        assert_eq!(config.retry.outer_max_attempts, 2);
        assert_eq!(config.retry.wait_time(), Duration::from_secs(10));
        assert_eq!(config.vendor_api.timeout_secs, 30);
        assert!(config.schema.is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            vendor = "cyberark"
            log_format = "json"

            [gateway]
            base_url = "https://gw"

            [retry]
            max_attempt_number = 5
        "#;
        let config: PollerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.vendor, Vendor::CyberArk);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.gateway.base_url, "https://gw");
        assert_eq!(config.retry.max_attempt_number, 5);
        assert_eq!(config.retry.wait_time_secs, 10);
        assert_eq!(config.schema().terminated, "isTerminated");
    }

    #[test]
    fn schema_override_wins_over_vendor_default() {
        let toml_str = r#"
            [schema]
            failures = "roleErrors"
        "#;
        let config: PollerConfig = toml::from_str(toml_str).unwrap();
        let schema = config.schema();
        assert_eq!(schema.failures, "roleErrors");
        assert_eq!(schema.completion_status, "completionStatus");
    }

    #[test]
    fn env_overrides_secrets_and_level() {
        let mut config = valid();
        config.gateway.client_id = "from-file".into();
        config.apply_overrides(|key| match key {
            "ROLEPOLL_CLIENT_SECRET" => Some("env-secret".into()),
            "ROLEPOLL_LOG_LEVEL" => Some("debug".into()),
            "ROLEPOLL_CLIENT_ID" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.gateway.client_id, "from-file");
        assert_eq!(config.gateway.client_secret, "env-secret");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nbase_url = \"https://gw.internal\"").unwrap();
        let config = PollerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.gateway.base_url, "https://gw.internal");
        config.validate().unwrap();
    }

    #[test]
    fn load_fails_for_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(PollerConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn validate_rejects_bad_retry_settings() {
        let mut config = valid();
        config.retry.max_attempt_number = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.outer_max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.wait_jitter_min_secs = 5.0;
        config.retry.wait_jitter_max_secs = 1.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.wait_jitter_min_secs = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_gateway_url() {
        assert!(PollerConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }
}
