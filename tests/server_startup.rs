//! Server Startup Tests
//!
//! Lifecycle checks: loading a YAML file, binding the configured listener,
//! serving traffic while the metrics router reflects it, and shutting down.

mod mock_upstream;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request};
use http_body_util::BodyExt;
use serial_test::serial;
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

use mock_upstream::{MockUpstream, audio_response};
use tts_proxy::config::{ConfigOverrides, ProxyConfig};
use tts_proxy::protocol::{Event, Synthesize, UpstreamClient};
use tts_proxy::routes::metrics::create_metrics_router;
use tts_proxy::{ProxyContext, ProxyMetrics, ProxyServer};

fn cleanup_env_vars() {
    unsafe {
        for var in [
            "LISTEN_URI",
            "UPSTREAM_TTS_URI",
            "CACHE_ENABLED",
            "CACHE_DIR",
            "CACHE_MAX_SIZE_MB",
            "METRICS_PORT",
            "LOG_FORMAT",
            "STREAM_TTS",
        ] {
            std::env::remove_var(var);
        }
    }
}

fn write_config(dir: &TempDir, upstream: &MockUpstream) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    let cache_dir = dir.path().join("cache");
    fs::write(
        &path,
        format!(
            r#"
server:
  uri: "tcp://127.0.0.1:0"
upstreams:
  - "{upstream}"
timeouts:
  connect_secs: 2
  read_secs: 2
cache:
  enabled: true
  path: "{cache}"
  max_size_mb: 1
normalize_markdown: true
"#,
            upstream = upstream.uri(),
            cache = cache_dir.display(),
        ),
    )
    .unwrap();
    path
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
#[serial]
async fn test_server_starts_from_yaml_and_serves() {
    cleanup_env_vars();
    let dir = TempDir::new().unwrap();
    let upstream = MockUpstream::healthy(audio_response()).await;
    let path = write_config(&dir, &upstream);

    let config = ProxyConfig::load(Some(&path), ConfigOverrides::default()).unwrap();
    assert!(config.cache.enabled);
    assert_eq!(config.cache.max_size_bytes, 1024 * 1024);
    assert!(config.normalizer.normalize_markdown);

    let metrics = Arc::new(ProxyMetrics::new());
    let server = ProxyServer::bind(Arc::new(ProxyContext::new(config, metrics.clone())))
        .await
        .unwrap();
    let proxy = server.local_endpoint().unwrap();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(server.run(shutdown.clone()));

    // One connection: events are handled in order, so the cache write of the
    // first request lands before the second is read.
    let wait = Duration::from_secs(2);
    let mut conn = UpstreamClient::connect(&proxy, wait).await.unwrap();
    for _ in 0..2 {
        conn.write_event(&Event::Synthesize(Synthesize {
            text: "# Hello".to_string(),
            ..Default::default()
        }))
        .await
        .unwrap();
        for expected in audio_response() {
            assert_eq!(conn.read_event(wait).await.unwrap(), Some(expected));
        }
    }

    let requests = upstream.stats.requests();
    assert_eq!(requests.len(), 1);
    assert!(matches!(&requests[0][0], Event::Synthesize(s) if s.text == "Hello"));

    let app = create_metrics_router(metrics);
    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_text(response).await;
    assert!(body.contains("tts_proxy_requests_total 2"));
    assert!(body.contains("tts_proxy_cache_hits_total 1"));
    assert!(body.contains("tts_proxy_latency_seconds_count 1"));

    shutdown.cancel();
    timeout(Duration::from_secs(2), running)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
#[serial]
async fn test_cli_overrides_beat_yaml() {
    cleanup_env_vars();
    let dir = TempDir::new().unwrap();
    let upstream = MockUpstream::healthy(audio_response()).await;
    let path = write_config(&dir, &upstream);

    let config = ProxyConfig::load(
        Some(&path),
        ConfigOverrides {
            listen_uri: Some("tcp://127.0.0.1:0".to_string()),
            upstream_uris: vec!["tcp://10.0.0.1:10200".to_string()],
            stream_tts: true,
            metrics_port: Some(9300),
            log_format: Some("json".to_string()),
        },
    )
    .unwrap();

    assert_eq!(config.upstream_uris.len(), 1);
    assert_eq!(config.upstream_uris[0].to_string(), "tcp://10.0.0.1:10200");
    assert!(config.stream_tts);
    assert_eq!(config.metrics_port, 9300);
}

#[tokio::test]
#[serial]
async fn test_startup_rejects_missing_upstreams() {
    cleanup_env_vars();

    let err = ProxyConfig::load(None, ConfigOverrides::default()).unwrap_err();

    assert!(err.issues().iter().any(|issue| issue.field == "upstreams"));
}

#[tokio::test]
async fn test_bind_fails_when_port_taken() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let mut config = ProxyConfig::with_upstreams(Vec::new());
    config.listen_uri = format!("tcp://127.0.0.1:{port}").parse().unwrap();
    let ctx = Arc::new(ProxyContext::new(config, Arc::new(ProxyMetrics::new())));

    assert!(ProxyServer::bind(ctx).await.is_err());
}
