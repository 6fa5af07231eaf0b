//! Configuration file management.
//!
//! `config.toml` lives in the data directory. Every field has a default, so
//! a missing file or section yields a working daemon.

use std::path::PathBuf;
use std::time::Duration;

use ephemera_resilience::RetryPolicy;
use ephemera_types::billing::Tier;
use ephemera_types::PrincipalId;
use serde::{Deserialize, Serialize};

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "EPHEMERA_DATA_DIR";

/// Comma-separated operator ids added to `[authorization] operators`.
pub const OPERATOR_IDS_ENV: &str = "EPHEMERA_OPERATOR_IDS";

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    /// Storage and transport calls.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Removal of delivered items; kept short so timers stay bounded.
    #[serde(default = "default_revocation_retry")]
    pub revocation_retry: RetryConfig,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    /// Purchase plans.
    #[serde(default = "ephemera_types::billing::default_tiers")]
    pub tiers: Vec<Tier>,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Access gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Free views per principal without a subscription.
    #[serde(default = "default_free_limit")]
    pub free_limit: u32,
    /// Entitlement cache lifetime. 0 disables the cache.
    #[serde(default = "default_cache_ttl")]
    pub entitlement_cache_ttl_secs: u64,
    /// Reject principal requests without a positive `member` verdict.
    #[serde(default = "default_true")]
    pub require_membership: bool,
}

/// Delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Seconds before a delivered item is removed.
    #[serde(default = "default_delivery_ttl")]
    pub ttl_secs: u64,
}

/// Lifecycle notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_notifier_interval")]
    pub interval_secs: u64,
    /// Warn this long before a subscription ends.
    #[serde(default = "default_warning_window")]
    pub warning_window_secs: u64,
}

/// Retry policy for one class of calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

/// Role allow-lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub owners: Vec<PrincipalId>,
    #[serde(default)]
    pub operators: Vec<PrincipalId>,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_free_limit() -> u32 {
    ephemera_types::DEFAULT_FREE_LIMIT
}

fn default_cache_ttl() -> u64 {
    ephemera_gate::cache::DEFAULT_CACHE_TTL_SECS
}

fn default_delivery_ttl() -> u64 {
    ephemera_types::DEFAULT_DELIVERY_TTL_SECS
}

fn default_notifier_interval() -> u64 {
    ephemera_notifier::DEFAULT_INTERVAL.as_secs()
}

fn default_warning_window() -> u64 {
    ephemera_notifier::DEFAULT_WARNING_WINDOW_SECS
}

fn default_max_attempts() -> u32 {
    ephemera_resilience::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    ephemera_resilience::DEFAULT_BASE_DELAY.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    ephemera_resilience::DEFAULT_MAX_DELAY.as_millis() as u64
}

fn default_revocation_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        ..RetryConfig::default()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            access: AccessConfig::default(),
            delivery: DeliveryConfig::default(),
            notifier: NotifierConfig::default(),
            retry: RetryConfig::default(),
            revocation_retry: default_revocation_retry(),
            authorization: AuthorizationConfig::default(),
            tiers: ephemera_types::billing::default_tiers(),
            advanced: AdvancedConfig::default(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            free_limit: default_free_limit(),
            entitlement_cache_ttl_secs: default_cache_ttl(),
            require_membership: true,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_delivery_ttl(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_notifier_interval(),
            warning_window_secs: default_warning_window(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

impl NotifierConfig {
    pub fn interval(&self) -> Duration {
        // A zero interval would make tokio's interval panic.
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist. Operator ids from
    /// the environment are merged in either way.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<DaemonConfig>(&content)?
        } else {
            Self::default()
        };
        if let Ok(ids) = std::env::var(OPERATOR_IDS_ENV) {
            config.merge_operators(parse_principal_ids(&ids));
        }
        Ok(config)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    fn merge_operators(&mut self, ids: impl IntoIterator<Item = PrincipalId>) {
        for id in ids {
            if !self.authorization.operators.contains(&id) {
                self.authorization.operators.push(id);
            }
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Ephemera")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".ephemera")
        }
    }
}

/// Parse a comma-separated id list, skipping anything non-numeric.
pub fn parse_principal_ids(raw: &str) -> Vec<PrincipalId> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<PrincipalId>().ok())
        .collect()
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/ephemera"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.access.free_limit, 3);
        assert!(config.access.require_membership);
        assert_eq!(config.delivery.ttl_secs, 900);
        assert_eq!(config.notifier.warning_window_secs, 86_400);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.revocation_retry.max_attempts, 3);
        assert_eq!(config.tiers.len(), 2);
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: DaemonConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.tiers, config.tiers);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: DaemonConfig = toml::from_str(
            r#"
            [access]
            free_limit = 5

            [authorization]
            operators = [11, 12]

            [[tiers]]
            name = "daily"
            price = 29
            days_valid = 1
            "#,
        )
        .expect("parse");
        assert_eq!(parsed.access.free_limit, 5);
        assert_eq!(parsed.access.entitlement_cache_ttl_secs, 30);
        assert_eq!(parsed.authorization.operators, vec![11, 12]);
        assert_eq!(parsed.tiers.len(), 1);
        assert_eq!(parsed.revocation_retry.max_attempts, 3);
    }

    #[test]
    fn test_parse_principal_ids() {
        assert_eq!(parse_principal_ids("1, 2,abc,,3 "), vec![1, 2, 3]);
        assert!(parse_principal_ids("").is_empty());
    }

    #[test]
    fn test_merge_operators_dedups() {
        let mut config = DaemonConfig::default();
        config.authorization.operators = vec![1];
        config.merge_operators([1, 2]);
        assert_eq!(config.authorization.operators, vec![1, 2]);
    }

    #[test]
    fn test_retry_policy_conversion() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }
}
