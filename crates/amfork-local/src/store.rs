use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use amfork_core::{
    config_hash, AlertConfiguration, AlertGroup, AlertQuery, AlertState, AlertStatus, Alertmanager,
    AlertmanagerError, CallContext, ClusterStatus, GettableAlert, GettableSilence, GettableStatus,
    LabelSet, PostableAlert, PostableSilence, PostableUserConfig, Receiver, ReceiverRef, Result,
    SilenceState, SilenceStatus, TestAlert, TestReceiverResult, TestReceiversConfig,
    TestReceiversResult, TestTemplatesConfig, TestTemplatesResults,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::matchers::{self, valid_label_name, LabelMatcher};
use crate::routing::{self, GroupBy, DEFAULT_CONFIG};

/// Alerts without an explicit end resolve after this many minutes
const RESOLVE_TIMEOUT_MINUTES: i64 = 5;

const SILENCES_FILE: &str = "silences.json";

struct ActiveConfig {
    hash: String,
    parsed: PostableUserConfig,
    default: bool,
}

#[derive(Default)]
struct State {
    config: Option<ActiveConfig>,
    silences: HashMap<String, GettableSilence>,
    alerts: HashMap<String, GettableAlert>,
}

/// In-process Alertmanager.
///
/// Holds configuration, silences and alerts in memory. Silences can be
/// snapshotted to `silences.json` under a data directory so they survive a
/// restart. Notifications are never delivered.
pub struct MemoryAlertmanager {
    org_id: i64,
    data_dir: Option<PathBuf>,
    started_at: DateTime<Utc>,
    stopped: AtomicBool,
    state: RwLock<State>,
}

impl MemoryAlertmanager {
    /// Memory-only instance
    pub fn new(org_id: i64) -> Self {
        Self {
            org_id,
            data_dir: None,
            started_at: Utc::now(),
            stopped: AtomicBool::new(false),
            state: RwLock::new(State::default()),
        }
    }

    /// Instance backed by a silence snapshot in `data_dir`
    pub fn open(org_id: i64, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            AlertmanagerError::Internal(format!("create {}: {e}", data_dir.display()))
        })?;

        let mut state = State::default();
        let path = data_dir.join(SILENCES_FILE);
        if path.exists() {
            let data = std::fs::read(&path).map_err(|e| {
                AlertmanagerError::Internal(format!("read {}: {e}", path.display()))
            })?;
            let silences: Vec<GettableSilence> = serde_json::from_slice(&data)?;
            info!(count = silences.len(), path = %path.display(), "Loaded silence snapshot");
            state.silences = silences.into_iter().map(|s| (s.id.clone(), s)).collect();
        }

        Ok(Self {
            org_id,
            data_dir: Some(data_dir),
            started_at: Utc::now(),
            stopped: AtomicBool::new(false),
            state: RwLock::new(state),
        })
    }

    pub fn org_id(&self) -> i64 {
        self.org_id
    }

    /// Hash of the active configuration, if any
    pub fn config_hash(&self) -> Option<String> {
        self.state.read().config.as_ref().map(|c| c.hash.clone())
    }

    /// Whether the active configuration is the built-in default
    pub fn is_default_config(&self) -> bool {
        self.state
            .read()
            .config
            .as_ref()
            .map(|c| c.default)
            .unwrap_or(false)
    }

    fn ensure_running(&self, ctx: &CallContext) -> Result<()> {
        ctx.check()?;
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AlertmanagerError::Stopped);
        }
        Ok(())
    }

    /// Returns false when the configuration was already active
    fn install(&self, hash: String, parsed: PostableUserConfig, default: bool) -> bool {
        let mut state = self.state.write();
        if state.config.as_ref().map(|c| c.hash == hash).unwrap_or(false) {
            return false;
        }
        info!(org_id = self.org_id, hash = %hash, default, "Applied alertmanager configuration");
        state.config = Some(ActiveConfig {
            hash,
            parsed,
            default,
        });
        true
    }

    fn persist_silences(&self) {
        let Some(dir) = &self.data_dir else {
            return;
        };
        let mut silences: Vec<GettableSilence> =
            self.state.read().silences.values().cloned().collect();
        silences.sort_by(|a, b| a.id.cmp(&b.id));
        if let Err(e) = write_snapshot(dir, &silences) {
            warn!(error = %e, path = %dir.display(), "Failed to write silence snapshot");
        }
    }

    fn collect_alerts(
        &self,
        state: &State,
        query: &AlertQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<GettableAlert>> {
        let filter = matchers::parse_filter(&query.filter)?;
        let receiver_re = query
            .receiver
            .as_deref()
            .map(|r| {
                Regex::new(&format!("^(?:{r})$"))
                    .map_err(|e| AlertmanagerError::InvalidMatcher(e.to_string()))
            })
            .transpose()?;

        let receiver = state
            .config
            .as_ref()
            .and_then(|c| routing::root_receiver(&c.parsed))
            .map(|name| ReceiverRef {
                name: name.to_string(),
            });

        // 有効なサイレンスのみ
        let active: Vec<(&str, Vec<LabelMatcher>)> = state
            .silences
            .values()
            .filter(|s| silence_state(s, now) == SilenceState::Active)
            .filter_map(|s| {
                matchers::compile(&s.matchers)
                    .ok()
                    .map(|m| (s.id.as_str(), m))
            })
            .collect();

        let mut out = Vec::new();
        for alert in state.alerts.values() {
            if alert.ends_at <= now {
                continue;
            }
            let mut silenced_by: Vec<String> = active
                .iter()
                .filter(|(_, m)| matchers::matches_all(m, &alert.labels))
                .map(|(id, _)| id.to_string())
                .collect();
            silenced_by.sort();

            let silenced = !silenced_by.is_empty();
            if (silenced && !query.silenced) || (!silenced && !query.active) {
                continue;
            }
            if !matchers::matches_all(&filter, &alert.labels) {
                continue;
            }
            let receivers: Vec<ReceiverRef> = receiver.iter().cloned().collect();
            if let Some(re) = &receiver_re {
                if !receivers.iter().any(|r| re.is_match(&r.name)) {
                    continue;
                }
            }

            let mut alert = alert.clone();
            alert.receivers = receivers;
            alert.status = AlertStatus {
                state: if silenced {
                    AlertState::Suppressed
                } else {
                    AlertState::Active
                },
                silenced_by,
                inhibited_by: Vec::new(),
            };
            out.push(alert);
        }
        out.sort_by(|a, b| a.labels.cmp(&b.labels));
        Ok(out)
    }
}

#[async_trait]
impl Alertmanager for MemoryAlertmanager {
    async fn apply_config(&self, ctx: &CallContext, config: &AlertConfiguration) -> Result<()> {
        self.ensure_running(ctx)?;
        if config.org_id != self.org_id {
            return Err(AlertmanagerError::InvalidConfig(format!(
                "configuration for org {} applied to org {}",
                config.org_id, self.org_id
            )));
        }
        let hash = config_hash(&config.alertmanager_configuration);
        if self.config_hash().as_deref() == Some(hash.as_str()) {
            debug!(hash = %hash, "Configuration unchanged");
            return Ok(());
        }
        let parsed: PostableUserConfig = serde_json::from_str(&config.alertmanager_configuration)
            .map_err(|e| AlertmanagerError::InvalidConfig(e.to_string()))?;
        routing::validate(&parsed)?;
        self.install(hash, parsed, config.default);
        Ok(())
    }

    async fn save_and_apply_config(
        &self,
        ctx: &CallContext,
        config: &PostableUserConfig,
    ) -> Result<()> {
        self.ensure_running(ctx)?;
        routing::validate(config)?;
        let raw = serde_json::to_string(config)?;
        self.install(config_hash(&raw), config.clone(), false);
        Ok(())
    }

    async fn save_and_apply_default_config(&self, ctx: &CallContext) -> Result<()> {
        self.ensure_running(ctx)?;
        let parsed: PostableUserConfig = serde_json::from_str(DEFAULT_CONFIG)?;
        self.install(config_hash(DEFAULT_CONFIG), parsed, true);
        Ok(())
    }

    async fn get_status(&self, ctx: &CallContext) -> Result<GettableStatus> {
        self.ensure_running(ctx)?;
        let config = match &self.state.read().config {
            Some(active) => serde_json::to_value(&active.parsed.alertmanager_config)?,
            None => serde_json::Value::Null,
        };
        Ok(GettableStatus {
            cluster: ClusterStatus {
                status: "disabled".to_string(),
                peers: Vec::new(),
            },
            config,
            uptime: self.started_at,
        })
    }

    async fn create_silence(
        &self,
        ctx: &CallContext,
        silence: &PostableSilence,
    ) -> Result<String> {
        self.ensure_running(ctx)?;
        let compiled = validate_silence(silence)?;
        let now = Utc::now();

        let id = {
            let mut state = self.state.write();
            let id = match silence.id.as_deref().filter(|id| !id.is_empty()) {
                Some(id) => {
                    if !state.silences.contains_key(id) {
                        return Err(AlertmanagerError::SilenceNotFound(id.to_string()));
                    }
                    id.to_string()
                }
                None => {
                    if silence.ends_at <= now {
                        return Err(AlertmanagerError::InvalidSilence(
                            "silence already ended".to_string(),
                        ));
                    }
                    Uuid::new_v4().to_string()
                }
            };

            let mut stored = GettableSilence {
                id: id.clone(),
                status: SilenceStatus {
                    state: SilenceState::Pending,
                },
                updated_at: now,
                matchers: silence.matchers.clone(),
                starts_at: silence.starts_at,
                ends_at: silence.ends_at,
                created_by: silence.created_by.clone(),
                comment: silence.comment.clone(),
            };
            stored.status.state = silence_state(&stored, now);
            debug!(
                silence_id = %id,
                matchers = compiled.len(),
                state = ?stored.status.state,
                "Stored silence"
            );
            state.silences.insert(id.clone(), stored);
            id
        };

        self.persist_silences();
        Ok(id)
    }

    async fn delete_silence(&self, ctx: &CallContext, id: &str) -> Result<()> {
        self.ensure_running(ctx)?;
        let now = Utc::now();
        {
            let mut state = self.state.write();
            let silence = state
                .silences
                .get_mut(id)
                .ok_or_else(|| AlertmanagerError::SilenceNotFound(id.to_string()))?;
            match silence_state(silence, now) {
                SilenceState::Expired => return Ok(()),
                SilenceState::Pending => {
                    silence.starts_at = now;
                    silence.ends_at = now;
                }
                SilenceState::Active => silence.ends_at = now,
            }
            silence.updated_at = now;
            silence.status.state = SilenceState::Expired;
        }
        debug!(silence_id = %id, "Expired silence");
        self.persist_silences();
        Ok(())
    }

    async fn get_silence(&self, ctx: &CallContext, id: &str) -> Result<GettableSilence> {
        self.ensure_running(ctx)?;
        let now = Utc::now();
        self.state
            .read()
            .silences
            .get(id)
            .map(|s| with_state(s, now))
            .ok_or_else(|| AlertmanagerError::SilenceNotFound(id.to_string()))
    }

    async fn list_silences(
        &self,
        ctx: &CallContext,
        filter: &[String],
    ) -> Result<Vec<GettableSilence>> {
        self.ensure_running(ctx)?;
        let filter = matchers::parse_filter(filter)?;
        let now = Utc::now();

        let mut out: Vec<GettableSilence> = self
            .state
            .read()
            .silences
            .values()
            .filter(|s| matchers::matches_all(&filter, &implied_labels(s)))
            .map(|s| with_state(s, now))
            .collect();
        out.sort_by_key(|s| (state_rank(s.status.state), s.ends_at));
        Ok(out)
    }

    async fn get_alerts(
        &self,
        ctx: &CallContext,
        query: &AlertQuery,
    ) -> Result<Vec<GettableAlert>> {
        self.ensure_running(ctx)?;
        let state = self.state.read();
        self.collect_alerts(&state, query, Utc::now())
    }

    async fn get_alert_groups(
        &self,
        ctx: &CallContext,
        query: &AlertQuery,
    ) -> Result<Vec<AlertGroup>> {
        self.ensure_running(ctx)?;
        let state = self.state.read();
        let alerts = self.collect_alerts(&state, query, Utc::now())?;
        let group_by = state
            .config
            .as_ref()
            .map(|c| routing::group_by(&c.parsed))
            .unwrap_or(GroupBy::Labels(Vec::new()));

        let mut groups: BTreeMap<(String, LabelSet), Vec<GettableAlert>> = BTreeMap::new();
        for alert in alerts {
            let key: LabelSet = match &group_by {
                GroupBy::All => alert.labels.clone(),
                GroupBy::Labels(names) => alert
                    .labels
                    .iter()
                    .filter(|(k, _)| names.contains(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            };
            for receiver in &alert.receivers {
                groups
                    .entry((receiver.name.clone(), key.clone()))
                    .or_default()
                    .push(alert.clone());
            }
        }

        Ok(groups
            .into_iter()
            .map(|((receiver, labels), alerts)| AlertGroup {
                labels,
                receiver: ReceiverRef { name: receiver },
                alerts,
            })
            .collect())
    }

    async fn put_alerts(&self, ctx: &CallContext, alerts: &[PostableAlert]) -> Result<()> {
        self.ensure_running(ctx)?;
        for alert in alerts {
            validate_alert(alert)?;
        }

        let now = Utc::now();
        let mut state = self.state.write();
        for alert in alerts {
            let fingerprint = fingerprint(&alert.labels);
            let mut starts_at = alert.starts_at.unwrap_or(now);
            let ends_at = alert
                .ends_at
                .unwrap_or(now + Duration::minutes(RESOLVE_TIMEOUT_MINUTES));

            if let Some(existing) = state.alerts.get(&fingerprint) {
                // 解決前の再送は開始時刻を維持
                if existing.ends_at > now && existing.starts_at < starts_at {
                    starts_at = existing.starts_at;
                }
            }

            state.alerts.insert(
                fingerprint.clone(),
                GettableAlert {
                    labels: alert.labels.clone(),
                    annotations: alert.annotations.clone(),
                    starts_at,
                    ends_at,
                    updated_at: now,
                    fingerprint,
                    receivers: Vec::new(),
                    status: AlertStatus {
                        state: AlertState::Unprocessed,
                        silenced_by: Vec::new(),
                        inhibited_by: Vec::new(),
                    },
                    generator_url: alert.generator_url.clone(),
                },
            );
        }
        debug!(count = alerts.len(), "Received alerts");
        Ok(())
    }

    async fn get_receivers(&self, ctx: &CallContext) -> Result<Vec<Receiver>> {
        self.ensure_running(ctx)?;
        let state = self.state.read();
        let Some(active) = &state.config else {
            return Ok(Vec::new());
        };
        let referenced = active
            .parsed
            .alertmanager_config
            .route
            .as_ref()
            .map(routing::route_receivers)
            .unwrap_or_default();

        Ok(active
            .parsed
            .alertmanager_config
            .receivers
            .iter()
            .map(|r| Receiver {
                name: r.name.clone(),
                active: referenced.contains(&r.name),
                integrations: routing::integrations(r),
            })
            .collect())
    }

    async fn test_receivers(
        &self,
        ctx: &CallContext,
        config: &TestReceiversConfig,
    ) -> Result<TestReceiversResult> {
        self.ensure_running(ctx)?;
        let receivers = config
            .receivers
            .iter()
            .map(|r| TestReceiverResult {
                name: r.name.clone(),
                configs: routing::check_receiver(r),
            })
            .collect();
        Ok(TestReceiversResult {
            alert: config.alert.clone().unwrap_or_else(default_test_alert),
            receivers,
            notified_at: Utc::now(),
        })
    }

    async fn test_template(
        &self,
        ctx: &CallContext,
        _config: &TestTemplatesConfig,
    ) -> Result<TestTemplatesResults> {
        self.ensure_running(ctx)?;
        Err(AlertmanagerError::Unsupported("template testing"))
    }

    fn clean_up(&self) {
        let now = Utc::now();
        let (silences, alerts) = {
            let mut state = self.state.write();
            let silences = state.silences.len();
            let alerts = state.alerts.len();
            state
                .silences
                .retain(|_, s| silence_state(s, now) != SilenceState::Expired);
            state.alerts.retain(|_, a| a.ends_at > now);
            (
                silences - state.silences.len(),
                alerts - state.alerts.len(),
            )
        };
        if silences > 0 {
            self.persist_silences();
        }
        debug!(silences, alerts, "Purged expired state");
    }

    async fn stop_and_wait(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.persist_silences();
        info!(org_id = self.org_id, "Local alertmanager stopped");
    }

    async fn ready(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.state.read().config.is_some()
    }
}

fn validate_silence(silence: &PostableSilence) -> Result<Vec<LabelMatcher>> {
    if silence.matchers.is_empty() {
        return Err(AlertmanagerError::InvalidSilence(
            "at least one matcher is required".to_string(),
        ));
    }
    let compiled = matchers::compile(&silence.matchers)?;
    if compiled.iter().all(|m| m.matches_value("")) {
        return Err(AlertmanagerError::InvalidSilence(
            "silence would match every alert".to_string(),
        ));
    }
    if silence.ends_at <= silence.starts_at {
        return Err(AlertmanagerError::InvalidSilence(
            "end time must be after start time".to_string(),
        ));
    }
    Ok(compiled)
}

fn validate_alert(alert: &PostableAlert) -> Result<()> {
    if alert.labels.is_empty() {
        return Err(AlertmanagerError::InvalidAlert(
            "at least one label is required".to_string(),
        ));
    }
    for (name, value) in &alert.labels {
        if !valid_label_name(name) {
            return Err(AlertmanagerError::InvalidAlert(format!(
                "invalid label name {name:?}"
            )));
        }
        if value.is_empty() {
            return Err(AlertmanagerError::InvalidAlert(format!(
                "empty value for label {name:?}"
            )));
        }
    }
    if let (Some(start), Some(end)) = (alert.starts_at, alert.ends_at) {
        if end < start {
            return Err(AlertmanagerError::InvalidAlert(
                "end time before start time".to_string(),
            ));
        }
    }
    Ok(())
}

/// First 16 hex chars of SHA-256 over the sorted label pairs
pub fn fingerprint(labels: &LabelSet) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in labels {
        hasher.update(name.as_bytes());
        hasher.update(b"\xff");
        hasher.update(value.as_bytes());
        hasher.update(b"\xff");
    }
    hex::encode(&hasher.finalize()[..8])
}

fn silence_state(silence: &GettableSilence, now: DateTime<Utc>) -> SilenceState {
    if now < silence.starts_at {
        SilenceState::Pending
    } else if now >= silence.ends_at {
        SilenceState::Expired
    } else {
        SilenceState::Active
    }
}

fn with_state(silence: &GettableSilence, now: DateTime<Utc>) -> GettableSilence {
    let mut silence = silence.clone();
    silence.status.state = silence_state(&silence, now);
    silence
}

fn state_rank(state: SilenceState) -> u8 {
    match state {
        SilenceState::Active => 0,
        SilenceState::Pending => 1,
        SilenceState::Expired => 2,
    }
}

/// Labels an alert must carry to be silenced, from equality matchers only
fn implied_labels(silence: &GettableSilence) -> LabelSet {
    silence
        .matchers
        .iter()
        .filter(|m| m.is_equal && !m.is_regex)
        .map(|m| (m.name.clone(), m.value.clone()))
        .collect()
}

fn default_test_alert() -> TestAlert {
    TestAlert {
        labels: LabelSet::from([
            ("alertname".to_string(), "TestAlert".to_string()),
            ("instance".to_string(), "Grafana".to_string()),
        ]),
        annotations: LabelSet::from([(
            "summary".to_string(),
            "Notification test".to_string(),
        )]),
    }
}

fn write_snapshot(dir: &Path, silences: &[GettableSilence]) -> std::io::Result<()> {
    let data = serde_json::to_vec_pretty(silences)?;
    let tmp = dir.join(format!("{SILENCES_FILE}.tmp"));
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, dir.join(SILENCES_FILE))
}
