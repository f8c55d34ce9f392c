use std::path::PathBuf;
use std::time::Duration;

use amfork_logging::LogFormat;
use amfork_router_core::MigrationMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RouterConfig {
    #[serde(default = "default_service_name")]
    #[validate(length(min = 1))]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    #[validate(length(min = 1))]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Port of the readiness / metrics endpoint
    #[serde(default = "default_listen_port")]
    #[validate(range(min = 1, max = 65535))]
    pub listen_port: u16,
    #[serde(default)]
    pub mode: MigrationMode,
    #[serde(default = "default_sync_interval_secs")]
    #[validate(range(min = 1))]
    pub sync_interval_secs: u64,
    /// Grafana-style user configuration; the built-in default is used when unset
    #[serde(default)]
    pub alertmanager_config_path: Option<PathBuf>,
    #[serde(default = "default_org_id")]
    pub org_id: i64,
    #[serde(default)]
    pub local: LocalConfig,
    #[validate(nested)]
    pub remote: RemoteConfig,
}

/// Embedded Alertmanager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory holding the silence snapshot; state is memory-only when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Remote (hosted) Alertmanager connection
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RemoteConfig {
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 1))]
    pub tenant_id: String,
    /// Basic auth password, the tenant id is the user
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 100, max = 120000))]
    pub timeout_ms: u64,
}

impl RouterConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            listen_port: default_listen_port(),
            mode: MigrationMode::default(),
            sync_interval_secs: default_sync_interval_secs(),
            alertmanager_config_path: None,
            org_id: default_org_id(),
            local: LocalConfig::default(),
            remote: RemoteConfig {
                url: "http://localhost:9009".to_string(),
                tenant_id: "1".to_string(),
                password: None,
                timeout_ms: default_timeout_ms(),
            },
        }
    }
}

fn default_service_name() -> String {
    "amfork".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_port() -> u16 {
    9093
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_org_id() -> i64 {
    1
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Load configuration from file, overridden by `AMFORK_*` environment variables
/// (`AMFORK_REMOTE__URL` sets `remote.url`)
pub fn load_config<T>(path: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let config: T = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(
            config::Environment::with_prefix("AMFORK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ConfigError::LoadError(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::LoadError(e.to_string()))?;

    config
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    Ok(config)
}

/// Load configuration from YAML string (for testing)
pub fn load_from_yaml<T>(yaml: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let config: T =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::LoadError(e.to_string()))?;
    config
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RouterConfig::default();
        assert_eq!(config.service_name, "amfork");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.listen_port, 9093);
        assert_eq!(config.mode, MigrationMode::RemoteSecondary);
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
service_name: amfork-test
log_level: debug
log_format: plain
mode: remote_primary
sync_interval_secs: 15
alertmanager_config_path: /etc/amfork/alertmanager.json
local:
  data_dir: /var/lib/amfork
remote:
  url: https://mimir.example.com
  tenant_id: "42"
  password: s3cret
"#;
        let config: RouterConfig = load_from_yaml(yaml).unwrap();
        assert_eq!(config.service_name, "amfork-test");
        assert_eq!(config.log_format, LogFormat::Plain);
        assert_eq!(config.mode, MigrationMode::RemotePrimary);
        assert_eq!(config.sync_interval_secs, 15);
        assert_eq!(config.listen_port, 9093);
        assert_eq!(config.remote.tenant_id, "42");
        assert_eq!(config.remote.password.as_deref(), Some("s3cret"));
        assert_eq!(config.remote.timeout(), Duration::from_secs(10));
        assert_eq!(
            config.alertmanager_config_path,
            Some(PathBuf::from("/etc/amfork/alertmanager.json"))
        );
        assert_eq!(config.local.data_dir, Some(PathBuf::from("/var/lib/amfork")));
    }

    #[test]
    fn test_validation_error() {
        let yaml = r#"
service_name: ""
remote:
  url: https://mimir.example.com
  tenant_id: "1"
"#;
        let result: Result<RouterConfig, _> = load_from_yaml(yaml);
        match result {
            Err(ConfigError::ValidationError(_)) => (), // Expected
            _ => panic!("Expected ValidationError"),
        }
    }

    #[test]
    fn test_nested_remote_validation() {
        let yaml = r#"
remote:
  url: not a url
  tenant_id: "1"
"#;
        let result: Result<RouterConfig, _> = load_from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_unknown_mode_is_load_error() {
        let yaml = r#"
mode: remote_only
remote:
  url: https://mimir.example.com
  tenant_id: "1"
"#;
        let result: Result<RouterConfig, _> = load_from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
