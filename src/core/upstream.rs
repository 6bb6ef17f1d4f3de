//! Ordered failover across upstream TTS services.
//!
//! [`UpstreamAttempt`] drives one exchange with one upstream over a scoped
//! connection. [`FailoverSelector`] walks the configured targets in priority
//! order and returns on the first candidate that produces a terminal event.
//! Candidate failures are counted and logged, never propagated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::metrics::ProxyMetrics;
use crate::errors::{SinkError, UpstreamError};
use crate::handlers::EventSink;
use crate::protocol::{
    Event, Info, Synthesize, SynthesizeChunk, SynthesizeStart, SynthesizeVoice, UpstreamClient,
};
use crate::protocol::Endpoint;

/// One configured upstream. Priority is the position in the configured list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub endpoint: Endpoint,
    pub priority: usize,
}

impl UpstreamTarget {
    pub fn from_endpoints(endpoints: &[Endpoint]) -> Vec<Self> {
        endpoints
            .iter()
            .enumerate()
            .map(|(priority, endpoint)| Self {
                endpoint: endpoint.clone(),
                priority,
            })
            .collect()
    }

    pub fn uri(&self) -> String {
        self.endpoint.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpstreamTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub describe: Duration,
}

/// How a synthesis request is sent upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamRequest {
    /// A single `synthesize` event.
    OneShot {
        text: String,
        voice: Option<SynthesizeVoice>,
    },
    /// `synthesize-start`, one `synthesize-chunk`, `synthesize-stop`.
    Streaming {
        text: String,
        voice: Option<SynthesizeVoice>,
    },
}

impl UpstreamRequest {
    pub fn new(text: String, voice: Option<SynthesizeVoice>, streaming: bool) -> Self {
        if streaming {
            UpstreamRequest::Streaming { text, voice }
        } else {
            UpstreamRequest::OneShot { text, voice }
        }
    }

    pub fn events(&self) -> Vec<Event> {
        match self {
            UpstreamRequest::OneShot { text, voice } => vec![Event::Synthesize(Synthesize {
                text: text.clone(),
                voice: voice.clone(),
                stream: None,
            })],
            UpstreamRequest::Streaming { text, voice } => vec![
                Event::SynthesizeStart(SynthesizeStart {
                    voice: voice.clone(),
                }),
                Event::SynthesizeChunk(SynthesizeChunk { text: text.clone() }),
                Event::SynthesizeStop,
            ],
        }
    }
}

/// Records the time to the first relayed audio chunk, once per request.
pub struct FirstAudioProbe {
    started: Instant,
    recorded: bool,
}

impl FirstAudioProbe {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            recorded: false,
        }
    }

    fn observe(&mut self, event: &Event, metrics: &ProxyMetrics) {
        if self.recorded || !matches!(event, Event::AudioChunk(_)) {
            return;
        }
        self.recorded = true;
        metrics.record_latency(self.started.elapsed());
    }
}

/// Result of one candidate.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A terminal event arrived. `events` holds everything relayed, terminal last.
    Completed(Vec<Event>),
    /// The candidate failed; try the next one.
    Failed(UpstreamError),
    /// Writing to the client failed; stop everything.
    ClientGone(SinkError),
}

/// A response produced by one upstream and already relayed to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Relayed {
    pub endpoint: Endpoint,
    pub events: Vec<Event>,
}

impl Relayed {
    /// True when the upstream answered with an error event instead of audio.
    pub fn ended_in_error(&self) -> bool {
        matches!(self.events.last(), Some(Event::Error(_)))
    }
}

/// A single exchange with one upstream.
pub struct UpstreamAttempt<'a> {
    target: &'a UpstreamTarget,
    timeouts: UpstreamTimeouts,
}

impl<'a> UpstreamAttempt<'a> {
    pub fn new(target: &'a UpstreamTarget, timeouts: UpstreamTimeouts) -> Self {
        Self { target, timeouts }
    }

    /// Send `request` and relay the response to `sink` until a terminal event.
    ///
    /// The connection lives for the duration of this call only.
    pub async fn synthesize(
        &self,
        request: &[Event],
        sink: &mut dyn EventSink,
        probe: &mut FirstAudioProbe,
        metrics: &ProxyMetrics,
    ) -> AttemptOutcome {
        let mut client =
            match UpstreamClient::connect(&self.target.endpoint, self.timeouts.connect).await {
                Ok(client) => client,
                Err(e) => return AttemptOutcome::Failed(e),
            };

        for event in request {
            if let Err(e) = client.write_event(event).await {
                return AttemptOutcome::Failed(e);
            }
        }

        let mut relayed = Vec::new();
        loop {
            let event = match client.read_event(self.timeouts.read).await {
                Ok(Some(event)) => event,
                Ok(None) => return AttemptOutcome::Failed(UpstreamError::Closed),
                Err(e) => return AttemptOutcome::Failed(e),
            };

            probe.observe(&event, metrics);
            if let Err(e) = sink.send(&event).await {
                return AttemptOutcome::ClientGone(e);
            }

            let terminal = event.is_terminal();
            relayed.push(event);
            if terminal {
                return AttemptOutcome::Completed(relayed);
            }
        }
    }

    /// Ask this upstream to describe itself.
    pub async fn describe(&self) -> Result<Info, UpstreamError> {
        let mut client = UpstreamClient::connect(&self.target.endpoint, self.timeouts.connect).await?;
        client.write_event(&Event::Describe).await?;

        match client.read_event(self.timeouts.describe).await? {
            Some(Event::Info(info)) => Ok(info),
            Some(other) => Err(UpstreamError::UnexpectedResponse(format!(
                "expected info, got {}",
                other.kind()
            ))),
            None => Err(UpstreamError::Closed),
        }
    }
}

/// Walks upstream targets strictly in priority order.
pub struct FailoverSelector {
    targets: Vec<UpstreamTarget>,
    timeouts: UpstreamTimeouts,
    metrics: Arc<ProxyMetrics>,
}

impl FailoverSelector {
    pub fn new(
        targets: Vec<UpstreamTarget>,
        timeouts: UpstreamTimeouts,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            targets,
            timeouts,
            metrics,
        }
    }

    pub fn targets(&self) -> &[UpstreamTarget] {
        &self.targets
    }

    /// Relay a synthesis response from the first upstream that completes.
    ///
    /// `Ok(None)` means every candidate failed. `Err` means the client went
    /// away mid-relay; no further candidates are tried.
    pub async fn synthesize(
        &self,
        request: &UpstreamRequest,
        sink: &mut dyn EventSink,
        probe: &mut FirstAudioProbe,
    ) -> Result<Option<Relayed>, SinkError> {
        let events = request.events();

        for target in &self.targets {
            let attempt = UpstreamAttempt::new(target, self.timeouts);
            debug!(upstream = %target.endpoint, priority = target.priority, "Trying upstream");

            match attempt.synthesize(&events, sink, probe, &self.metrics).await {
                AttemptOutcome::Completed(events) => {
                    info!(
                        upstream = %target.endpoint,
                        events = events.len(),
                        "Upstream completed synthesis"
                    );
                    return Ok(Some(Relayed {
                        endpoint: target.endpoint.clone(),
                        events,
                    }));
                }
                AttemptOutcome::Failed(e) => {
                    warn!(upstream = %target.endpoint, error = %e, "Upstream synthesis failed");
                    self.metrics.record_upstream_failure(&target.uri());
                }
                AttemptOutcome::ClientGone(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Capability description from the first upstream that answers.
    pub async fn describe(&self) -> Option<(Endpoint, Info)> {
        for target in &self.targets {
            match UpstreamAttempt::new(target, self.timeouts).describe().await {
                Ok(info) => {
                    debug!(upstream = %target.endpoint, "Upstream answered describe");
                    return Some((target.endpoint.clone(), info));
                }
                Err(e) => {
                    warn!(upstream = %target.endpoint, error = %e, "Upstream describe failed");
                    self.metrics.record_upstream_failure(&target.uri());
                }
            }
        }
        None
    }
}
