//! Reassembly of a chunked synthesis request.

use tracing::warn;

use crate::protocol::SynthesizeVoice;

/// A completed streaming request, ready for the synthesis pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamedRequest {
    pub text: String,
    pub voice: Option<SynthesizeVoice>,
}

/// Per-connection buffer for `synthesize-start` / `-chunk` / `-stop`.
///
/// `Idle -> Active` on start, `Active -> Active` on chunk, `Active -> Idle`
/// on stop. Chunks and stops while idle are ignored.
#[derive(Debug, Default)]
pub struct StreamingAccumulator {
    active: bool,
    voice: Option<SynthesizeVoice>,
    fragments: Vec<String>,
}

impl StreamingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Begin a session, discarding anything left from an unfinished one.
    pub fn start(&mut self, voice: Option<SynthesizeVoice>) {
        if self.active {
            warn!(
                fragments = self.fragments.len(),
                "Streaming session restarted before stop, discarding buffered text"
            );
        }
        self.active = true;
        self.voice = voice;
        self.fragments.clear();
    }

    /// Append a fragment. Returns false if no session is active.
    pub fn push(&mut self, text: &str) -> bool {
        if !self.active {
            warn!("Received synthesize-chunk without synthesize-start, ignoring");
            return false;
        }
        self.fragments.push(text.to_string());
        true
    }

    /// End the session and hand back the concatenated text.
    pub fn finish(&mut self) -> Option<StreamedRequest> {
        if !self.active {
            warn!("Received synthesize-stop without synthesize-start, ignoring");
            return None;
        }
        self.active = false;
        Some(StreamedRequest {
            text: std::mem::take(&mut self.fragments).concat(),
            voice: self.voice.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_concatenate_in_order() {
        let mut acc = StreamingAccumulator::new();
        acc.start(Some(SynthesizeVoice::named("amy")));
        assert!(acc.push("ab"));
        assert!(acc.push("cd"));

        let request = acc.finish().unwrap();
        assert_eq!(request.text, "abcd");
        assert_eq!(request.voice, Some(SynthesizeVoice::named("amy")));
        assert!(!acc.is_active());
    }

    #[test]
    fn test_idle_chunk_and_stop_are_ignored() {
        let mut acc = StreamingAccumulator::new();
        assert!(!acc.push("lost"));
        assert!(acc.finish().is_none());

        acc.start(None);
        let request = acc.finish().unwrap();
        assert_eq!(request.text, "");
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_restart_clears_buffer() {
        let mut acc = StreamingAccumulator::new();
        acc.start(Some(SynthesizeVoice::named("amy")));
        acc.push("stale");
        acc.start(None);
        acc.push("fresh");

        let request = acc.finish().unwrap();
        assert_eq!(request.text, "fresh");
        assert!(request.voice.is_none());
    }
}
