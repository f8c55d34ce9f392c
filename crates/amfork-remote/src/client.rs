use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use amfork_core::{
    config_hash, AlertConfiguration, AlertGroup, AlertQuery, Alertmanager, AlertmanagerError,
    CallContext, GettableAlert, GettableSilence, GettableStatus, Integration, PostableAlert,
    PostableSilence, PostableUserConfig, Receiver, Result, TestReceiversConfig,
    TestReceiversResult, TestTemplatesConfig, TestTemplatesResults,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

const TENANT_HEADER: &str = "X-Scope-OrgID";
const CONFIG_PATH: &str = "/api/v1/grafana/config";
const API_V2: &str = "/alertmanager/api/v2";
const READY_PATH: &str = "/-/ready";

/// Connection settings for a hosted, multi-tenant Alertmanager
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub url: String,
    pub tenant_id: String,
    /// Basic auth password, the tenant id is the user
    pub password: Option<String>,
    pub timeout: Duration,
}

/// Body of the Grafana configuration endpoint
#[derive(Debug, Serialize, Deserialize)]
struct UserGrafanaConfig {
    grafana_alertmanager_config: Value,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    default: bool,
}

#[derive(Deserialize)]
struct SilenceCreated {
    #[serde(rename = "silenceID")]
    silence_id: String,
}

/// `/receivers` only guarantees the name
#[derive(Deserialize)]
struct RemoteReceiver {
    name: String,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    integrations: Vec<Integration>,
}

/// HTTP client for a Mimir-style Alertmanager.
pub struct RemoteAlertmanager {
    client: Client,
    base_url: String,
    tenant_id: String,
    password: Option<String>,
    shutdown: CancellationToken,
    /// Requests currently in flight; drained by `stop_and_wait`
    in_flight: TaskTracker,
    stopped: AtomicBool,
}

impl RemoteAlertmanager {
    pub fn new(settings: RemoteSettings) -> Result<Self> {
        Url::parse(&settings.url).map_err(|e| {
            AlertmanagerError::InvalidConfig(format!("remote url {:?}: {e}", settings.url))
        })?;
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            tenant_id: settings.tenant_id,
            password: settings.password,
            shutdown: CancellationToken::new(),
            in_flight: TaskTracker::new(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Number of requests that have not returned yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(TENANT_HEADER, &self.tenant_id);
        match &self.password {
            Some(password) => req.basic_auth(&self.tenant_id, Some(password)),
            None => req,
        }
    }

    /// Runs `fut` under the caller's context and the client's shutdown token
    async fn guarded<T, F>(&self, ctx: &CallContext, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AlertmanagerError::Stopped);
        }
        self.in_flight
            .track_future(async {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Err(AlertmanagerError::Stopped),
                    result = ctx.run(fut) => result,
                }
            })
            .await
    }

    async fn fetch<T: DeserializeOwned>(&self, ctx: &CallContext, req: RequestBuilder) -> Result<T> {
        self.guarded(ctx, async move {
            let resp = send(req).await?;
            let body = resp.bytes().await.map_err(transport_error)?;
            Ok(serde_json::from_slice(&body)?)
        })
        .await
    }

    async fn execute(&self, ctx: &CallContext, req: RequestBuilder) -> Result<()> {
        self.guarded(ctx, async move { send(req).await.map(|_| ()) })
            .await
    }

    async fn post_config(&self, ctx: &CallContext, raw: &str, default: bool) -> Result<()> {
        let body = UserGrafanaConfig {
            grafana_alertmanager_config: serde_json::from_str(raw)
                .map_err(|e| AlertmanagerError::InvalidConfig(e.to_string()))?,
            hash: config_hash(raw),
            created_at: Utc::now().timestamp(),
            default,
        };
        let hash = body.hash.clone();
        self.execute(ctx, self.request(Method::POST, CONFIG_PATH).json(&body))
            .await?;
        info!(hash = %hash, default, "Sent configuration to remote alertmanager");
        Ok(())
    }

    /// Hash of the configuration the remote currently holds, `None` when it has none
    async fn remote_config_hash(&self, ctx: &CallContext) -> Result<Option<String>> {
        match self
            .fetch::<UserGrafanaConfig>(ctx, self.request(Method::GET, CONFIG_PATH))
            .await
        {
            Ok(config) => Ok(Some(config.hash)),
            Err(AlertmanagerError::Remote { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Alertmanager for RemoteAlertmanager {
    async fn apply_config(&self, ctx: &CallContext, config: &AlertConfiguration) -> Result<()> {
        let hash = config_hash(&config.alertmanager_configuration);
        if self.remote_config_hash(ctx).await?.as_deref() == Some(hash.as_str()) {
            debug!(hash = %hash, "Remote configuration already up to date");
            return Ok(());
        }
        self.post_config(ctx, &config.alertmanager_configuration, config.default)
            .await
    }

    async fn save_and_apply_config(
        &self,
        ctx: &CallContext,
        config: &PostableUserConfig,
    ) -> Result<()> {
        let raw = serde_json::to_string(config)?;
        self.post_config(ctx, &raw, false).await
    }

    async fn save_and_apply_default_config(&self, ctx: &CallContext) -> Result<()> {
        self.execute(ctx, self.request(Method::DELETE, CONFIG_PATH))
            .await
    }

    async fn get_status(&self, ctx: &CallContext) -> Result<GettableStatus> {
        self.fetch(ctx, self.request(Method::GET, &format!("{API_V2}/status")))
            .await
    }

    async fn create_silence(
        &self,
        ctx: &CallContext,
        silence: &PostableSilence,
    ) -> Result<String> {
        let req = self
            .request(Method::POST, &format!("{API_V2}/silences"))
            .json(silence);
        let created: SilenceCreated = self.fetch(ctx, req).await.map_err(|e| match &silence.id {
            Some(id) => silence_not_found(e, id),
            None => e,
        })?;
        Ok(created.silence_id)
    }

    async fn delete_silence(&self, ctx: &CallContext, id: &str) -> Result<()> {
        self.execute(
            ctx,
            self.request(Method::DELETE, &format!("{API_V2}/silence/{id}")),
        )
        .await
        .map_err(|e| silence_not_found(e, id))
    }

    async fn get_silence(&self, ctx: &CallContext, id: &str) -> Result<GettableSilence> {
        self.fetch(ctx, self.request(Method::GET, &format!("{API_V2}/silence/{id}")))
            .await
            .map_err(|e| silence_not_found(e, id))
    }

    async fn list_silences(
        &self,
        ctx: &CallContext,
        filter: &[String],
    ) -> Result<Vec<GettableSilence>> {
        let params: Vec<(&str, &str)> = filter.iter().map(|f| ("filter", f.as_str())).collect();
        self.fetch(
            ctx,
            self.request(Method::GET, &format!("{API_V2}/silences"))
                .query(&params),
        )
        .await
    }

    async fn get_alerts(
        &self,
        ctx: &CallContext,
        query: &AlertQuery,
    ) -> Result<Vec<GettableAlert>> {
        self.fetch(
            ctx,
            self.request(Method::GET, &format!("{API_V2}/alerts"))
                .query(&query_params(query)),
        )
        .await
    }

    async fn get_alert_groups(
        &self,
        ctx: &CallContext,
        query: &AlertQuery,
    ) -> Result<Vec<AlertGroup>> {
        self.fetch(
            ctx,
            self.request(Method::GET, &format!("{API_V2}/alerts/groups"))
                .query(&query_params(query)),
        )
        .await
    }

    async fn put_alerts(&self, ctx: &CallContext, alerts: &[PostableAlert]) -> Result<()> {
        self.execute(
            ctx,
            self.request(Method::POST, &format!("{API_V2}/alerts"))
                .json(alerts),
        )
        .await
    }

    async fn get_receivers(&self, ctx: &CallContext) -> Result<Vec<Receiver>> {
        let receivers: Vec<RemoteReceiver> = self
            .fetch(ctx, self.request(Method::GET, &format!("{API_V2}/receivers")))
            .await?;
        Ok(receivers
            .into_iter()
            .map(|r| Receiver {
                name: r.name,
                active: r.active.unwrap_or(true),
                integrations: r.integrations,
            })
            .collect())
    }

    async fn test_receivers(
        &self,
        _ctx: &CallContext,
        _config: &TestReceiversConfig,
    ) -> Result<TestReceiversResult> {
        Err(AlertmanagerError::Unsupported("receiver testing"))
    }

    async fn test_template(
        &self,
        _ctx: &CallContext,
        _config: &TestTemplatesConfig,
    ) -> Result<TestTemplatesResults> {
        Err(AlertmanagerError::Unsupported("template testing"))
    }

    fn clean_up(&self) {}

    async fn stop_and_wait(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.in_flight.close();
        self.in_flight.wait().await;
        info!(url = %self.base_url, "Remote alertmanager client stopped");
    }

    async fn ready(&self) -> bool {
        let ctx = CallContext::background();
        self.execute(&ctx, self.request(Method::GET, READY_PATH))
            .await
            .is_ok()
    }
}

async fn send(req: RequestBuilder) -> Result<reqwest::Response> {
    let resp = req.send().await.map_err(transport_error)?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(AlertmanagerError::Remote {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}

fn transport_error(e: reqwest::Error) -> AlertmanagerError {
    if e.is_timeout() {
        AlertmanagerError::DeadlineExceeded
    } else {
        AlertmanagerError::Transport(e.to_string())
    }
}

fn silence_not_found(e: AlertmanagerError, id: &str) -> AlertmanagerError {
    match e {
        AlertmanagerError::Remote { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
            AlertmanagerError::SilenceNotFound(id.to_string())
        }
        other => other,
    }
}

fn query_params(query: &AlertQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("active", query.active.to_string()),
        ("silenced", query.silenced.to_string()),
        ("inhibited", query.inhibited.to_string()),
    ];
    params.extend(query.filter.iter().map(|f| ("filter", f.clone())));
    if let Some(receiver) = &query.receiver {
        params.push(("receiver", receiver.clone()));
    }
    params
}
