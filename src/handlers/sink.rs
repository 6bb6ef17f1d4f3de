//! Client-facing event writer.

use async_trait::async_trait;
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use crate::errors::SinkError;
use crate::protocol::{Event, EventCodec};

/// Destination for events sent back to the client.
///
/// A failed send means the client is gone and the connection must end.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: &Event) -> Result<(), SinkError>;
}

/// Writes framed events to a byte stream, flushing after each one so audio
/// reaches the client as soon as it is relayed.
pub struct FramedEventSink<W> {
    inner: FramedWrite<W, EventCodec>,
}

impl<W: AsyncWrite + Unpin + Send> FramedEventSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, EventCodec::new()),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for FramedEventSink<W> {
    async fn send(&mut self, event: &Event) -> Result<(), SinkError> {
        self.inner.send(event).await?;
        Ok(())
    }
}

/// Collects events in memory.
#[async_trait]
impl EventSink for Vec<Event> {
    async fn send(&mut self, event: &Event) -> Result<(), SinkError> {
        self.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_events;

    #[tokio::test]
    async fn test_framed_sink_writes_wire_format() {
        let mut sink = FramedEventSink::new(Vec::<u8>::new());
        sink.send(&Event::error("nope")).await.unwrap();
        sink.send(&Event::audio_stop()).await.unwrap();

        let bytes = sink.into_inner();
        assert_eq!(
            decode_events(&bytes).unwrap(),
            vec![Event::error("nope"), Event::audio_stop()]
        );
    }

    #[tokio::test]
    async fn test_closed_client_is_an_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let mut sink = FramedEventSink::new(server);
        assert!(sink.send(&Event::audio_stop()).await.is_err());
    }
}
