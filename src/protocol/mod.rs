//! Event-based TTS wire protocol: typed events, framing codec, URIs and the
//! upstream client.

pub mod client;
pub mod codec;
pub mod event;
pub mod uri;

pub use client::{BoxedStream, EventStream, UpstreamClient};
pub use codec::{EventCodec, decode_events, encode_events};
pub use event::{
    Attribution, AudioChunk, AudioFormat, AudioStart, AudioStop, ErrorInfo, Event, Info,
    RawEvent, Synthesize, SynthesizeChunk, SynthesizeStart, SynthesizeVoice, TtsProgram,
    TtsVoice,
};
pub use uri::Endpoint;
