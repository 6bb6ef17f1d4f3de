//! Per-connection event processing
//!
//! [`ConnectionHandler`] owns one client connection's state and dispatches
//! every incoming event by kind:
//! - `describe` - ask upstreams for their capabilities, falling back to a
//!   self-description when none answers
//! - `synthesize` - run the synthesis pipeline directly
//! - `synthesize-start` / `-chunk` / `-stop` - reassemble a streamed request,
//!   run the pipeline, then send `synthesize-stopped`
//! - anything else - ignored
//!
//! The synthesis pipeline normalizes text, short-circuits empty text with a
//! silent response, replays cache hits, and otherwise relays the response of
//! the first upstream that completes, caching it afterwards.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::core::{
    AudioCache, CacheKey, FailoverSelector, FirstAudioProbe, ProxyMetrics, StreamingAccumulator,
    TextNormalizer, UpstreamRequest, UpstreamTarget, UpstreamTimeouts,
};
use crate::errors::SinkError;
use crate::handlers::EventSink;
use crate::protocol::{
    Attribution, AudioFormat, Event, Info, Synthesize, SynthesizeVoice, TtsProgram,
};

/// Error text sent to the client when no upstream could serve a request.
pub const ALL_UPSTREAMS_FAILED: &str = "All upstream TTS services failed.";

/// Process-wide state shared by every connection.
pub struct ProxyContext {
    pub config: ProxyConfig,
    pub normalizer: TextNormalizer,
    pub cache: Arc<AudioCache>,
    pub selector: FailoverSelector,
    pub metrics: Arc<ProxyMetrics>,
}

impl ProxyContext {
    pub fn new(config: ProxyConfig, metrics: Arc<ProxyMetrics>) -> Self {
        let selector = FailoverSelector::new(
            UpstreamTarget::from_endpoints(&config.upstream_uris),
            UpstreamTimeouts {
                connect: config.connect_timeout,
                read: config.read_timeout,
                describe: config.describe_timeout,
            },
            metrics.clone(),
        );

        Self {
            normalizer: TextNormalizer::new(config.normalizer.clone()),
            cache: Arc::new(AudioCache::new(&config.cache)),
            selector,
            metrics,
            config,
        }
    }

    /// Discovery response naming only the proxy itself.
    pub fn fallback_info(&self) -> Info {
        let program = &self.config.program;
        Info {
            tts: vec![TtsProgram {
                name: program.name.clone(),
                description: Some(program.description.clone()),
                attribution: Attribution {
                    name: program.attribution_name.clone(),
                    url: program.attribution_url.clone(),
                },
                installed: true,
                version: Some(program.version.clone()),
                voices: Vec::new(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

/// Which entry point reached the synthesis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPath {
    OneShot { force_streaming: bool },
    Streamed,
}

/// State machine for a single client connection.
pub struct ConnectionHandler<S> {
    ctx: Arc<ProxyContext>,
    sink: S,
    streaming: StreamingAccumulator,
    client: String,
}

impl<S: EventSink> ConnectionHandler<S> {
    pub fn new(ctx: Arc<ProxyContext>, sink: S, client: impl Into<String>) -> Self {
        Self {
            ctx,
            sink,
            streaming: StreamingAccumulator::new(),
            client: client.into(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Process one client event.
    ///
    /// # Returns
    /// * `bool` - true to keep the connection open, false once the client can
    ///   no longer be written to
    pub async fn handle_event(&mut self, event: Event) -> bool {
        debug!(client = %self.client, kind = event.kind(), "Received event");

        let result = match event {
            Event::Describe => self.handle_describe().await,
            Event::Synthesize(request) => self.handle_synthesize(request).await,
            Event::SynthesizeStart(start) => {
                self.ctx.metrics.record_request();
                info!(client = %self.client, "Starting streaming synthesis");
                self.streaming.start(start.voice);
                Ok(())
            }
            Event::SynthesizeChunk(chunk) => {
                self.streaming.push(&chunk.text);
                Ok(())
            }
            Event::SynthesizeStop => self.handle_synthesize_stop().await,
            other => {
                debug!(client = %self.client, kind = other.kind(), "Ignoring event");
                Ok(())
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(client = %self.client, error = %e, "Client connection lost");
                false
            }
        }
    }

    async fn handle_describe(&mut self) -> Result<(), SinkError> {
        let info = match self.ctx.selector.describe().await {
            Some((upstream, info)) => {
                debug!(upstream = %upstream, "Forwarding upstream info");
                info.via_proxy(&self.ctx.config.program.name)
            }
            None => {
                warn!("All upstreams failed for describe, sending proxy info");
                self.ctx.fallback_info()
            }
        };
        self.sink.send(&Event::Info(info)).await
    }

    async fn handle_synthesize(&mut self, request: Synthesize) -> Result<(), SinkError> {
        self.ctx.metrics.record_request();
        let force_streaming = self.ctx.config.stream_tts || request.stream == Some(true);
        self.synthesize(
            &request.text,
            request.voice,
            RequestPath::OneShot { force_streaming },
        )
        .await
    }

    async fn handle_synthesize_stop(&mut self) -> Result<(), SinkError> {
        let Some(request) = self.streaming.finish() else {
            return Ok(());
        };

        info!(client = %self.client, "Streaming synthesis complete, processing accumulated text");
        self.synthesize(&request.text, request.voice, RequestPath::Streamed)
            .await?;
        self.sink.send(&Event::SynthesizeStopped).await
    }

    /// Shared synthesis pipeline for one-shot and streamed requests.
    async fn synthesize(
        &mut self,
        text: &str,
        voice: Option<SynthesizeVoice>,
        path: RequestPath,
    ) -> Result<(), SinkError> {
        let mut probe = FirstAudioProbe::start();

        let normalized = self.ctx.normalizer.normalize(text);
        info!(
            client = %self.client,
            original = %preview(text),
            normalized = %preview(&normalized),
            voice = voice.as_ref().and_then(|v| v.name.as_deref()).unwrap_or(""),
            "Synthesis request"
        );

        if normalized.is_empty() {
            warn!("Text became empty after normalization");
            self.sink
                .send(&Event::audio_start(AudioFormat::SILENCE))
                .await?;
            return self.sink.send(&Event::audio_stop()).await;
        }

        let key = CacheKey::new(&normalized, voice.as_ref().and_then(|v| v.name.as_deref()));
        if let Some(events) = cache_get(&self.ctx.cache, &key).await {
            self.ctx.metrics.record_cache_hit();
            info!(key = %key, events = events.len(), "Serving response from cache");
            for event in &events {
                self.sink.send(event).await?;
            }
            return Ok(());
        }

        let final_text = self.ctx.config.render_template(&normalized);
        let streaming = match path {
            RequestPath::OneShot { force_streaming } => force_streaming,
            RequestPath::Streamed => true,
        };
        let request = UpstreamRequest::new(final_text, voice, streaming);

        match self
            .ctx
            .selector
            .synthesize(&request, &mut self.sink, &mut probe)
            .await?
        {
            Some(relayed) => {
                if relayed.ended_in_error() {
                    warn!(upstream = %relayed.endpoint, "Upstream answered with an error event");
                }
                cache_set(&self.ctx.cache, key, relayed.events).await;
            }
            None => {
                error!(client = %self.client, "All upstreams failed for synthesis");
                self.sink.send(&Event::error(ALL_UPSTREAMS_FAILED)).await?;
            }
        }
        Ok(())
    }
}

async fn cache_get(cache: &Arc<AudioCache>, key: &CacheKey) -> Option<Vec<Event>> {
    if !cache.is_enabled() {
        return None;
    }
    let cache = cache.clone();
    let key = key.clone();
    match tokio::task::spawn_blocking(move || cache.get(&key)).await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "Cache lookup task failed");
            None
        }
    }
}

async fn cache_set(cache: &Arc<AudioCache>, key: CacheKey, events: Vec<Event>) {
    if !cache.is_enabled() {
        return;
    }
    let cache = cache.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || cache.set(&key, &events)).await {
        warn!(error = %e, "Cache write task failed");
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 50;
    if text.chars().count() <= LIMIT {
        return text.to_string();
    }
    let mut out: String = text.chars().take(LIMIT).collect();
    out.push_str("...");
    out
}
