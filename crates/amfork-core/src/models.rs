//! Payloads exchanged with Alertmanager backends.
//!
//! Shapes follow the Alertmanager v2 API and the Grafana configuration
//! documents so they can be forwarded to a remote instance unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub type LabelSet = BTreeMap<String, String>;

/// Stored configuration as produced by the configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertConfiguration {
    #[serde(default)]
    pub id: i64,
    /// Raw JSON of a [`PostableUserConfig`]
    pub alertmanager_configuration: String,
    pub configuration_hash: String,
    #[serde(default)]
    pub configuration_version: String,
    /// Unix seconds
    pub created_at: i64,
    #[serde(default)]
    pub default: bool,
    pub org_id: i64,
}

impl AlertConfiguration {
    /// Build a configuration record, hashing the raw document
    pub fn new(org_id: i64, raw: impl Into<String>, default: bool) -> Self {
        let raw = raw.into();
        Self {
            id: 0,
            configuration_hash: config_hash(&raw),
            alertmanager_configuration: raw,
            configuration_version: "v1".to_string(),
            created_at: Utc::now().timestamp(),
            default,
            org_id,
        }
    }
}

/// Hex SHA-256 of a raw configuration document
pub fn config_hash(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// User-supplied configuration (templates + Alertmanager config)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostableUserConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_files: BTreeMap<String, String>,
    pub alertmanager_config: UserAlertmanagerConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserAlertmanagerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Value>,
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub name: String,
    /// `*_configs` arrays, `grafana_managed_receiver_configs`, ...
    #[serde(flatten)]
    pub integrations: Map<String, Value>,
}

// ========================================
// Silences
// ========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    pub name: String,
    pub value: String,
    pub is_regex: bool,
    #[serde(default = "default_true")]
    pub is_equal: bool,
}

impl Matcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            is_regex: false,
            is_equal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableSilence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub matchers: Vec<Matcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_by: String,
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    Expired,
    Active,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceStatus {
    pub state: SilenceState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GettableSilence {
    pub id: String,
    pub status: SilenceStatus,
    pub updated_at: DateTime<Utc>,
    pub matchers: Vec<Matcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_by: String,
    pub comment: String,
}

// ========================================
// Alerts
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableAlert {
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: LabelSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "generatorURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub generator_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Unprocessed,
    Active,
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    pub state: AlertState,
    #[serde(default)]
    pub silenced_by: Vec<String>,
    #[serde(default)]
    pub inhibited_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiverRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GettableAlert {
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: LabelSet,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fingerprint: String,
    #[serde(default)]
    pub receivers: Vec<ReceiverRef>,
    pub status: AlertStatus,
    #[serde(
        default,
        rename = "generatorURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub generator_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertGroup {
    pub labels: LabelSet,
    pub receiver: ReceiverRef,
    pub alerts: Vec<GettableAlert>,
}

/// Filters shared by `get_alerts` and `get_alert_groups`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertQuery {
    pub active: bool,
    pub silenced: bool,
    pub inhibited: bool,
    /// Matcher expressions, e.g. `severity="critical"`
    pub filter: Vec<String>,
    /// Regex over receiver names
    pub receiver: Option<String>,
}

impl Default for AlertQuery {
    fn default() -> Self {
        Self {
            active: true,
            silenced: true,
            inhibited: true,
            filter: Vec::new(),
            receiver: None,
        }
    }
}

// ========================================
// Receivers & status
// ========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub name: String,
    #[serde(default)]
    pub send_resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub integrations: Vec<Integration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub status: String,
    #[serde(default)]
    pub peers: Vec<PeerStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GettableStatus {
    pub cluster: ClusterStatus,
    #[serde(default)]
    pub config: Value,
    pub uptime: DateTime<Utc>,
}

// ========================================
// Dry-run tests
// ========================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestAlert {
    #[serde(default)]
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: LabelSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReceiversConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<TestAlert>,
    pub receivers: Vec<ReceiverConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestIntegrationResult {
    pub name: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReceiverResult {
    pub name: String,
    pub configs: Vec<TestIntegrationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReceiversResult {
    pub alert: TestAlert,
    pub receivers: Vec<TestReceiverResult>,
    pub notified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTemplatesConfig {
    #[serde(default)]
    pub alerts: Vec<PostableAlert>,
    pub template: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTemplateResult {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTemplateError {
    pub name: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestTemplatesResults {
    #[serde(default)]
    pub results: Vec<TestTemplateResult>,
    #[serde(default)]
    pub errors: Vec<TestTemplateError>,
}

fn default_true() -> bool {
    true
}
