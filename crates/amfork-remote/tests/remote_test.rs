use std::sync::Arc;
use std::time::Duration;

use amfork_core::{
    AlertConfiguration, AlertQuery, Alertmanager, AlertmanagerError, CallContext, LabelSet,
    Matcher, PostableAlert, PostableSilence, TestReceiversConfig,
};
use amfork_remote::{RemoteAlertmanager, RemoteSettings};
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;

#[derive(Default)]
struct Stub {
    config: Option<Value>,
    config_posts: usize,
    tenants: Vec<String>,
    auth: Vec<String>,
    queries: Vec<String>,
}

type Shared = Arc<Mutex<Stub>>;

async fn record(state: &Shared, headers: &HeaderMap) {
    let mut stub = state.lock().await;
    if let Some(tenant) = headers.get("x-scope-orgid") {
        stub.tenants.push(tenant.to_str().unwrap().to_string());
    }
    if let Some(auth) = headers.get("authorization") {
        stub.auth.push(auth.to_str().unwrap().to_string());
    }
}

async fn get_config(State(state): State<Shared>, headers: HeaderMap) -> impl IntoResponse {
    record(&state, &headers).await;
    match state.lock().await.config.clone() {
        Some(config) => (StatusCode::OK, Json(config)).into_response(),
        None => (StatusCode::NOT_FOUND, "no configuration").into_response(),
    }
}

async fn post_config(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    record(&state, &headers).await;
    let mut stub = state.lock().await;
    stub.config = Some(body);
    stub.config_posts += 1;
    StatusCode::CREATED
}

async fn delete_config(State(state): State<Shared>) -> StatusCode {
    state.lock().await.config = None;
    StatusCode::OK
}

async fn create_silence(Json(body): Json<Value>) -> impl IntoResponse {
    match body.get("id").and_then(Value::as_str) {
        Some("missing") => (StatusCode::NOT_FOUND, "silence not found").into_response(),
        Some(id) => Json(json!({ "silenceID": id })).into_response(),
        None => Json(json!({ "silenceID": "new-silence" })).into_response(),
    }
}

fn silence_json(id: &str) -> Value {
    let now = Utc::now();
    json!({
        "id": id,
        "status": {"state": "active"},
        "updatedAt": now,
        "matchers": [{"name": "alertname", "value": "Down", "isRegex": false, "isEqual": true}],
        "startsAt": now,
        "endsAt": now + chrono::Duration::hours(1),
        "createdBy": "tester",
        "comment": "maintenance"
    })
}

async fn get_silence(Path(id): Path<String>) -> impl IntoResponse {
    if id == "missing" {
        return (StatusCode::NOT_FOUND, "silence not found").into_response();
    }
    Json(silence_json(&id)).into_response()
}

async fn delete_silence(Path(id): Path<String>) -> StatusCode {
    if id == "missing" {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    }
}

async fn list_silences(State(state): State<Shared>, RawQuery(query): RawQuery) -> Json<Value> {
    state.lock().await.queries.push(query.unwrap_or_default());
    Json(json!([silence_json("s1")]))
}

async fn get_alerts(State(state): State<Shared>, RawQuery(query): RawQuery) -> Json<Value> {
    state.lock().await.queries.push(query.unwrap_or_default());
    Json(json!([]))
}

async fn post_alerts() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "ingester down\n")
}

async fn slow_status() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({}))
}

async fn start_stub() -> (String, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route(
            "/api/v1/grafana/config",
            get(get_config).post(post_config).delete(delete_config),
        )
        .route("/alertmanager/api/v2/status", get(slow_status))
        .route(
            "/alertmanager/api/v2/silences",
            get(list_silences).post(create_silence),
        )
        .route(
            "/alertmanager/api/v2/silence/:id",
            get(get_silence).delete(delete_silence),
        )
        .route("/alertmanager/api/v2/alerts", get(get_alerts).post(post_alerts))
        .route("/alertmanager/api/v2/alerts/groups", get(get_alerts))
        .route(
            "/alertmanager/api/v2/receivers",
            get(|| async { Json(json!([{"name": "team-a"}])) }),
        )
        .route("/-/ready", get(|| async { "ready" }))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn client(url: &str, password: Option<&str>) -> RemoteAlertmanager {
    RemoteAlertmanager::new(RemoteSettings {
        url: url.to_string(),
        tenant_id: "42".to_string(),
        password: password.map(str::to_string),
        timeout: Duration::from_secs(10),
    })
    .unwrap()
}

fn ctx() -> CallContext {
    CallContext::background()
}

const RAW_CONFIG: &str =
    r#"{"alertmanager_config":{"route":{"receiver":"a"},"receivers":[{"name":"a"}]}}"#;

#[tokio::test]
async fn test_apply_config_skips_unchanged_hash() {
    let (url, state) = start_stub().await;
    let remote = client(&url, Some("s3cret"));
    let config = AlertConfiguration::new(1, RAW_CONFIG, false);

    remote.apply_config(&ctx(), &config).await.unwrap();
    remote.apply_config(&ctx(), &config).await.unwrap();

    let stub = state.lock().await;
    assert_eq!(stub.config_posts, 1);
    let body = stub.config.as_ref().unwrap();
    assert_eq!(body["hash"], config.configuration_hash.as_str());
    assert_eq!(body["default"], false);
    assert_eq!(
        body["grafana_alertmanager_config"]["alertmanager_config"]["route"]["receiver"],
        "a"
    );
    assert!(stub.tenants.iter().all(|t| t == "42"));
    assert!(stub.auth.iter().all(|a| a.starts_with("Basic ")));
    assert!(!stub.auth.is_empty());
}

#[tokio::test]
async fn test_default_config_deletes_remote_config() {
    let (url, state) = start_stub().await;
    let remote = client(&url, None);
    remote
        .apply_config(&ctx(), &AlertConfiguration::new(1, RAW_CONFIG, false))
        .await
        .unwrap();
    remote.save_and_apply_default_config(&ctx()).await.unwrap();

    let stub = state.lock().await;
    assert!(stub.config.is_none());
    assert!(stub.auth.is_empty());
}

#[tokio::test]
async fn test_invalid_raw_config_is_rejected_locally() {
    let (url, state) = start_stub().await;
    let remote = client(&url, None);
    let result = remote
        .apply_config(&ctx(), &AlertConfiguration::new(1, "not json", false))
        .await;
    assert!(matches!(result, Err(AlertmanagerError::InvalidConfig(_))));
    assert_eq!(state.lock().await.config_posts, 0);
}

#[tokio::test]
async fn test_silences() {
    let (url, state) = start_stub().await;
    let remote = client(&url, None);
    let now = Utc::now();
    let mut silence = PostableSilence {
        id: None,
        matchers: vec![Matcher::equal("alertname", "Down")],
        starts_at: now,
        ends_at: now + chrono::Duration::hours(1),
        created_by: "tester".to_string(),
        comment: "maintenance".to_string(),
    };

    assert_eq!(
        remote.create_silence(&ctx(), &silence).await.unwrap(),
        "new-silence"
    );
    silence.id = Some("missing".to_string());
    assert!(matches!(
        remote.create_silence(&ctx(), &silence).await,
        Err(AlertmanagerError::SilenceNotFound(id)) if id == "missing"
    ));

    let got = remote.get_silence(&ctx(), "s9").await.unwrap();
    assert_eq!(got.id, "s9");
    assert!(remote
        .get_silence(&ctx(), "missing")
        .await
        .unwrap_err()
        .is_not_found());

    remote.delete_silence(&ctx(), "s9").await.unwrap();
    assert!(matches!(
        remote.delete_silence(&ctx(), "missing").await,
        Err(AlertmanagerError::SilenceNotFound(_))
    ));

    let listed = remote
        .list_silences(&ctx(), &["alertname=Down".to_string()])
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(
        state.lock().await.queries.last().unwrap(),
        "filter=alertname%3DDown"
    );
}

#[tokio::test]
async fn test_alert_query_encoding() {
    let (url, state) = start_stub().await;
    let remote = client(&url, None);
    let query = AlertQuery {
        silenced: false,
        filter: vec!["severity=critical".to_string()],
        receiver: Some("team-a".to_string()),
        ..AlertQuery::default()
    };
    assert!(remote.get_alerts(&ctx(), &query).await.unwrap().is_empty());
    assert!(remote
        .get_alert_groups(&ctx(), &AlertQuery::default())
        .await
        .unwrap()
        .is_empty());

    let stub = state.lock().await;
    assert_eq!(
        stub.queries[0],
        "active=true&silenced=false&inhibited=true&filter=severity%3Dcritical&receiver=team-a"
    );
    assert_eq!(stub.queries[1], "active=true&silenced=true&inhibited=true");
}

#[tokio::test]
async fn test_non_success_status_is_remote_error() {
    let (url, _) = start_stub().await;
    let remote = client(&url, None);
    let alert = PostableAlert {
        labels: LabelSet::from([("alertname".to_string(), "Down".to_string())]),
        annotations: LabelSet::new(),
        starts_at: None,
        ends_at: None,
        generator_url: None,
    };
    match remote.put_alerts(&ctx(), &[alert]).await {
        Err(AlertmanagerError::Remote { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "ingester down");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_receivers_default_to_active() {
    let (url, _) = start_stub().await;
    let receivers = client(&url, None).get_receivers(&ctx()).await.unwrap();
    assert_eq!(receivers.len(), 1);
    assert_eq!(receivers[0].name, "team-a");
    assert!(receivers[0].active);
}

#[tokio::test]
async fn test_deadline_applies_to_requests() {
    let (url, _) = start_stub().await;
    let remote = client(&url, None);
    let ctx = CallContext::background().with_timeout(Duration::from_millis(50));
    assert!(matches!(
        remote.get_status(&ctx).await,
        Err(AlertmanagerError::DeadlineExceeded)
    ));
}

#[tokio::test]
async fn test_cancelled_context_aborts_request() {
    let (url, _) = start_stub().await;
    let remote = client(&url, None);
    let ctx = CallContext::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    assert!(matches!(
        remote.get_status(&ctx).await,
        Err(AlertmanagerError::Cancelled)
    ));
}

#[tokio::test]
async fn test_stop_aborts_in_flight_requests() {
    let (url, _) = start_stub().await;
    let remote = Arc::new(client(&url, None));
    assert!(remote.ready().await);

    let in_flight = {
        let remote = remote.clone();
        tokio::spawn(async move { remote.get_status(&CallContext::background()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.in_flight(), 1);
    remote.stop_and_wait().await;
    // stop returns only once the request has let go
    assert_eq!(remote.in_flight(), 0);

    assert!(matches!(
        in_flight.await.unwrap(),
        Err(AlertmanagerError::Stopped)
    ));
    assert!(!remote.ready().await);
    assert!(matches!(
        remote.get_receivers(&ctx()).await,
        Err(AlertmanagerError::Stopped)
    ));
}

#[tokio::test]
async fn test_unreachable_remote() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = client(&format!("http://{addr}"), None);
    assert!(!remote.ready().await);
    let err = remote.get_receivers(&ctx()).await.unwrap_err();
    assert!(matches!(err, AlertmanagerError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_dry_run_operations_are_unsupported() {
    let remote = client("http://127.0.0.1:1", None);
    let config = TestReceiversConfig {
        alert: None,
        receivers: vec![],
    };
    assert!(matches!(
        remote.test_receivers(&ctx(), &config).await,
        Err(AlertmanagerError::Unsupported(_))
    ));
}
