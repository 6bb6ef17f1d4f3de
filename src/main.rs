use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tts_proxy::{
    ProxyConfig, ProxyContext, ProxyMetrics, ProxyServer,
    config::ConfigOverrides,
    routes::metrics::serve_metrics,
    telemetry,
};

/// TTS proxy - failover, text normalization and audio caching for TTS services
#[derive(Parser, Debug)]
#[command(name = "tts-proxy")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen URI (tcp://host:port or unix:///path)
    #[arg(long = "uri", value_name = "URI")]
    uri: Option<String>,

    /// Upstream TTS URI; repeat for failover order
    #[arg(long = "upstream-tts-uri", value_name = "URI")]
    upstream_tts_uri: Vec<String>,

    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "CONFIG_FILE_PATH")]
    config: Option<PathBuf>,

    /// Always send start/chunk/stop to upstreams
    #[arg(long = "stream-tts")]
    stream_tts: bool,

    /// Port for /metrics and /health (0 disables)
    #[arg(long = "metrics-port", value_name = "PORT")]
    metrics_port: Option<u16>,

    /// Log output format: text or json
    #[arg(long = "log-format", value_name = "FORMAT")]
    log_format: Option<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen_uri: self.uri.clone(),
            upstream_uris: self.upstream_tts_uri.clone(),
            stream_tts: self.stream_tts,
            metrics_port: self.metrics_port,
            log_format: self.log_format.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be set up yet if configuration failed.
            eprintln!("tts-proxy: {e:#}");
            error!(error = %format!("{e:#}"), "Proxy exited with error");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ProxyConfig> {
    ProxyConfig::load(cli.config.as_deref(), cli.overrides())
        .context("Failed to load configuration")
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    telemetry::init(config.log_format);
    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loaded configuration file");
    }
    info!(
        listen = %config.listen_uri,
        upstreams = ?config.upstream_uris.iter().map(|u| u.to_string()).collect::<Vec<_>>(),
        cache_enabled = config.cache.enabled,
        stream_tts = config.stream_tts,
        "Starting TTS proxy"
    );

    let metrics = Arc::new(ProxyMetrics::new());
    let shutdown = CancellationToken::new();

    if config.metrics_port > 0 {
        tokio::spawn(serve_metrics(
            config.metrics_port,
            metrics.clone(),
            shutdown.clone(),
        ));
    }

    let listen_uri = config.listen_uri.clone();
    let ctx = Arc::new(ProxyContext::new(config, metrics));
    let server = ProxyServer::bind(ctx)
        .await
        .with_context(|| format!("Failed to bind {listen_uri}"))?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            signal.cancel();
        }
    });

    server.run(shutdown).await?;
    Ok(())
}
