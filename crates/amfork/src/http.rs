use std::sync::Arc;

use amfork_core::Alertmanager;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

type Shared = Arc<dyn Alertmanager>;

/// Readiness and metrics endpoints
pub fn router(am: Shared) -> Router {
    Router::new()
        .route("/-/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(am)
}

pub async fn serve(listener: TcpListener, am: Shared, shutdown: CancellationToken) -> std::io::Result<()> {
    axum::serve(listener, router(am))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn ready(State(am): State<Shared>) -> impl IntoResponse {
    if am.ready().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        amfork_metrics::gather_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use amfork_core::CallContext;
    use amfork_local::MemoryAlertmanager;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_path(app: Router, path: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_ready_follows_backend() {
        let am = Arc::new(MemoryAlertmanager::new(1));
        let (status, _) = get_path(router(am.clone()), "/-/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        am.save_and_apply_default_config(&CallContext::background())
            .await
            .unwrap();
        let (status, body) = get_path(router(am), "/-/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        amfork_metrics::register_metrics();
        amfork_metrics::record_config_sync(true);
        let (status, body) = get_path(router(Arc::new(MemoryAlertmanager::new(1))), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("amfork_config_syncs_total"));
    }
}
