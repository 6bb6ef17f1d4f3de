use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::core::ProxyMetrics;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Create the observability router: `/health` and `/metrics`
pub fn create_metrics_router(metrics: Arc<ProxyMetrics>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn render_metrics(State(metrics): State<Arc<ProxyMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        metrics.render_prometheus(),
    )
}

/// Serve metrics on `0.0.0.0:port` until `shutdown` is cancelled.
///
/// Bind and serve failures are logged; the proxy keeps running without metrics.
pub async fn serve_metrics(port: u16, metrics: Arc<ProxyMetrics>, shutdown: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(%addr, error = %e, "Failed to bind metrics server");
            return;
        }
    };

    info!(%addr, "Metrics server listening");
    let app = create_metrics_router(metrics);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        warn!(error = %e, "Metrics server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_metrics_router(Arc::new(ProxyMetrics::new()));
        let (status, body) = get_body(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let metrics = Arc::new(ProxyMetrics::new());
        metrics.record_request();
        metrics.record_cache_hit();

        let app = create_metrics_router(metrics);
        let (status, body) = get_body(app, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("tts_proxy_requests_total 1"));
        assert!(body.contains("tts_proxy_cache_hits_total 1"));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = create_metrics_router(Arc::new(ProxyMetrics::new()));
        let (status, _) = get_body(app, "/nope").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
