//! In-process mock TTS upstream
//!
//! Speaks the event protocol over a local TCP listener and records every
//! request it receives. Behaviours:
//! - `Healthy` - answers describe with the configured info and synthesis with
//!   the configured response
//! - `DropConnection` - accepts, reads the request, closes without replying
//! - `Hang` - accepts, reads the request, never replies

// Not every test uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use tts_proxy::protocol::{
    AudioChunk, AudioFormat, Endpoint, Event, EventCodec, Info, TtsProgram, TtsVoice,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Healthy,
    DropConnection,
    Hang,
}

#[derive(Default)]
pub struct MockStats {
    pub connections: AtomicU64,
    pub requests: Mutex<Vec<Vec<Event>>>,
}

impl MockStats {
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<Event>> {
        self.requests.lock().clone()
    }
}

pub struct MockUpstream {
    pub endpoint: Endpoint,
    pub stats: Arc<MockStats>,
    handle: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(behavior: Behavior, response: Vec<Event>, info: Info) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(MockStats::default());

        let task_stats = stats.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                task_stats.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(
                    socket,
                    behavior,
                    response.clone(),
                    info.clone(),
                    task_stats.clone(),
                ));
            }
        });

        Self {
            endpoint: Endpoint::Tcp {
                host: addr.ip().to_string(),
                port: addr.port(),
            },
            stats,
            handle,
        }
    }

    pub async fn healthy(response: Vec<Event>) -> Self {
        Self::start(Behavior::Healthy, response, piper_info()).await
    }

    pub async fn failing(behavior: Behavior) -> Self {
        Self::start(behavior, audio_response(), piper_info()).await
    }

    pub fn uri(&self) -> String {
        self.endpoint.to_string()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    socket: TcpStream,
    behavior: Behavior,
    response: Vec<Event>,
    info: Info,
    stats: Arc<MockStats>,
) {
    let mut framed = Framed::new(socket, EventCodec::new());

    let Some(request) = read_request(&mut framed).await else {
        return;
    };
    let is_describe = matches!(request.first(), Some(Event::Describe));
    stats.requests.lock().push(request);

    match behavior {
        Behavior::DropConnection => return,
        Behavior::Hang => {
            // Hold the socket open until the proxy gives up.
            while let Some(Ok(_)) = framed.next().await {}
            return;
        }
        Behavior::Healthy => {}
    }

    let reply = if is_describe {
        vec![Event::Info(info)]
    } else {
        response
    };
    for event in &reply {
        if framed.send(event).await.is_err() {
            return;
        }
    }

    // Wait for the proxy to hang up.
    while let Some(Ok(_)) = framed.next().await {}
}

/// One request: a single describe/synthesize, or start..stop.
async fn read_request(framed: &mut Framed<TcpStream, EventCodec>) -> Option<Vec<Event>> {
    let first = framed.next().await?.ok()?;
    let mut request = vec![first];
    if matches!(request[0], Event::SynthesizeStart(_)) {
        loop {
            let event = framed.next().await?.ok()?;
            let done = matches!(event, Event::SynthesizeStop);
            request.push(event);
            if done {
                break;
            }
        }
    }
    Some(request)
}

pub fn audio_chunk(bytes: &'static [u8]) -> Event {
    Event::AudioChunk(AudioChunk::new(
        AudioFormat {
            rate: 22050,
            width: 2,
            channels: 1,
        },
        Bytes::from_static(bytes),
    ))
}

/// audio-start, two chunks, audio-stop.
pub fn audio_response() -> Vec<Event> {
    vec![
        Event::audio_start(AudioFormat {
            rate: 22050,
            width: 2,
            channels: 1,
        }),
        audio_chunk(&[1, 2, 3, 4]),
        audio_chunk(&[5, 6, 7, 8]),
        Event::audio_stop(),
    ]
}

pub fn piper_info() -> Info {
    let mut info: Info = serde_json::from_value(serde_json::json!({
        "asr": [],
        "tts": [{
            "name": "piper",
            "description": "Fast local TTS",
            "attribution": { "name": "rhasspy", "url": "https://github.com/rhasspy/piper" },
            "installed": true,
            "version": "1.2.0",
            "voices": [],
            "supports_synthesize_streaming": true
        }]
    }))
    .unwrap();
    info.tts[0].voices.push(TtsVoice {
        name: "en_US-amy-medium".to_string(),
        ..Default::default()
    });
    info
}

pub fn program(info: &Info) -> &TtsProgram {
    &info.tts[0]
}
