//! Typed protocol events.
//!
//! Every unit on the wire is a [`RawEvent`]: a type tag, a JSON data object and
//! an optional binary payload. [`Event`] is the typed view the proxy works with.
//! Kinds the proxy does not understand are carried as [`Event::Other`] so that
//! they survive relaying and cache replay unchanged.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;

/// Protocol version written into every header this proxy encodes.
pub const PROTOCOL_VERSION: &str = "1.5.2";

pub const DESCRIBE: &str = "describe";
pub const INFO: &str = "info";
pub const SYNTHESIZE: &str = "synthesize";
pub const SYNTHESIZE_START: &str = "synthesize-start";
pub const SYNTHESIZE_CHUNK: &str = "synthesize-chunk";
pub const SYNTHESIZE_STOP: &str = "synthesize-stop";
pub const SYNTHESIZE_STOPPED: &str = "synthesize-stopped";
pub const AUDIO_START: &str = "audio-start";
pub const AUDIO_CHUNK: &str = "audio-chunk";
pub const AUDIO_STOP: &str = "audio-stop";
pub const ERROR: &str = "error";

/// Untyped event as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawEvent {
    pub kind: String,
    pub data: Map<String, Value>,
    pub payload: Option<Bytes>,
}

impl RawEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }
}

/// Voice selection attached to synthesis requests.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SynthesizeVoice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl SynthesizeVoice {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// One-shot synthesis request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Synthesize {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<SynthesizeVoice>,
    /// Client hint asking the proxy to talk to the upstream in streaming form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SynthesizeStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<SynthesizeVoice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SynthesizeChunk {
    pub text: String,
}

/// PCM format description shared by audio-start and audio-chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub rate: u32,
    pub width: u32,
    pub channels: u32,
}

impl AudioFormat {
    /// 16 kHz, 16-bit, mono.
    pub const SILENCE: AudioFormat = AudioFormat {
        rate: 16000,
        width: 2,
        channels: 1,
    };
}

// Data keys the proxy does not model are kept in `extra` so relayed and
// cached audio events re-encode with the same data object.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStart {
    #[serde(flatten)]
    pub format: AudioFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunk {
    #[serde(flatten)]
    pub format: AudioFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(skip)]
    pub audio: Bytes,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AudioChunk {
    pub fn new(format: AudioFormat, audio: Bytes) -> Self {
        Self {
            format,
            timestamp: None,
            audio,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioStop {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attribution {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// A voice advertised by a TTS program. Fields the proxy does not inspect
/// are kept verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TtsVoice {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TtsProgram {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub attribution: Attribution,
    #[serde(default)]
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub voices: Vec<TtsVoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_synthesize_streaming: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Capability description returned for a describe request.
///
/// Only the TTS list is interpreted; other service lists (asr, wake, ...)
/// pass through untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub tts: Vec<TtsProgram>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Info {
    /// Rename every TTS program to show that it is reached through `proxy_name`.
    pub fn via_proxy(mut self, proxy_name: &str) -> Self {
        for program in &mut self.tts {
            program.name = format!("{} (via {})", program.name, proxy_name);
        }
        self
    }
}

/// Typed protocol event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Describe,
    Info(Info),
    Synthesize(Synthesize),
    SynthesizeStart(SynthesizeStart),
    SynthesizeChunk(SynthesizeChunk),
    SynthesizeStop,
    SynthesizeStopped,
    AudioStart(AudioStart),
    AudioChunk(AudioChunk),
    AudioStop(AudioStop),
    Error(ErrorInfo),
    Other(RawEvent),
}

impl Event {
    pub fn kind(&self) -> &str {
        match self {
            Event::Describe => DESCRIBE,
            Event::Info(_) => INFO,
            Event::Synthesize(_) => SYNTHESIZE,
            Event::SynthesizeStart(_) => SYNTHESIZE_START,
            Event::SynthesizeChunk(_) => SYNTHESIZE_CHUNK,
            Event::SynthesizeStop => SYNTHESIZE_STOP,
            Event::SynthesizeStopped => SYNTHESIZE_STOPPED,
            Event::AudioStart(_) => AUDIO_START,
            Event::AudioChunk(_) => AUDIO_CHUNK,
            Event::AudioStop(_) => AUDIO_STOP,
            Event::Error(_) => ERROR,
            Event::Other(raw) => &raw.kind,
        }
    }

    /// True for events that end a synthesis response.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::AudioStop(_) | Event::Error(_) | Event::SynthesizeStopped
        )
    }

    pub fn error(text: impl Into<String>) -> Self {
        Event::Error(ErrorInfo {
            text: text.into(),
            ..Default::default()
        })
    }

    pub fn audio_start(format: AudioFormat) -> Self {
        Event::AudioStart(AudioStart {
            format,
            timestamp: None,
            extra: Map::new(),
        })
    }

    pub fn audio_stop() -> Self {
        Event::AudioStop(AudioStop::default())
    }

    /// Parse a wire event into its typed form.
    pub fn from_raw(raw: RawEvent) -> Result<Self, ProtocolError> {
        let RawEvent {
            kind,
            data,
            payload,
        } = raw;

        let event = match kind.as_str() {
            DESCRIBE => Event::Describe,
            INFO => Event::Info(parse_data(&kind, data)?),
            SYNTHESIZE => Event::Synthesize(parse_data(&kind, data)?),
            SYNTHESIZE_START => Event::SynthesizeStart(parse_data(&kind, data)?),
            SYNTHESIZE_CHUNK => Event::SynthesizeChunk(parse_data(&kind, data)?),
            SYNTHESIZE_STOP => Event::SynthesizeStop,
            SYNTHESIZE_STOPPED => Event::SynthesizeStopped,
            AUDIO_START => Event::AudioStart(parse_data(&kind, data)?),
            AUDIO_CHUNK => {
                let mut chunk: AudioChunk = parse_data(&kind, data)?;
                chunk.audio = payload.unwrap_or_default();
                Event::AudioChunk(chunk)
            }
            AUDIO_STOP => Event::AudioStop(parse_data(&kind, data)?),
            ERROR => Event::Error(parse_data(&kind, data)?),
            _ => Event::Other(RawEvent {
                kind,
                data,
                payload,
            }),
        };

        Ok(event)
    }

    /// Convert back to the wire form.
    pub fn to_raw(&self) -> RawEvent {
        let kind = self.kind().to_string();
        match self {
            Event::Describe | Event::SynthesizeStop | Event::SynthesizeStopped => {
                RawEvent::new(kind)
            }
            Event::Info(info) => with_data(kind, info),
            Event::Synthesize(request) => with_data(kind, request),
            Event::SynthesizeStart(start) => with_data(kind, start),
            Event::SynthesizeChunk(chunk) => with_data(kind, chunk),
            Event::AudioStart(start) => with_data(kind, start),
            Event::AudioChunk(chunk) => {
                let mut raw = with_data(kind, chunk);
                raw.payload = Some(chunk.audio.clone());
                raw
            }
            Event::AudioStop(stop) => with_data(kind, stop),
            Event::Error(error) => with_data(kind, error),
            Event::Other(raw) => raw.clone(),
        }
    }
}

fn parse_data<T: DeserializeOwned>(kind: &str, data: Map<String, Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(data)).map_err(|e| ProtocolError::invalid_data(kind, e))
}

fn with_data<T: Serialize>(kind: String, value: &T) -> RawEvent {
    // Every data struct above serializes to a JSON object.
    let data = match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    RawEvent {
        kind,
        data,
        payload: None,
    }
}
