//! Scoped connection to one upstream TTS service.
//!
//! The socket is owned by [`UpstreamClient`] and closed when the client is
//! dropped, so every early return in the caller releases it.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use super::codec::EventCodec;
use super::event::Event;
use super::uri::Endpoint;
use crate::errors::UpstreamError;

/// Byte stream usable as a transport for [`Framed`].
pub trait EventStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> EventStream for T {}

pub type BoxedStream = Box<dyn EventStream>;

pub struct UpstreamClient {
    endpoint: Endpoint,
    framed: Framed<BoxedStream, EventCodec>,
}

impl UpstreamClient {
    /// Open a connection, giving up after `connect_timeout`.
    pub async fn connect(
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let stream = tokio::time::timeout(connect_timeout, open_stream(endpoint))
            .await
            .map_err(|_| UpstreamError::Timeout(connect_timeout))?
            .map_err(|source| UpstreamError::Connect {
                uri: endpoint.to_string(),
                source,
            })?;

        debug!(upstream = %endpoint, "Connected to upstream");
        Ok(Self {
            endpoint: endpoint.clone(),
            framed: Framed::new(stream, EventCodec::new()),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn write_event(&mut self, event: &Event) -> Result<(), UpstreamError> {
        self.framed.send(event).await?;
        Ok(())
    }

    /// Read the next event, waiting at most `wait`.
    ///
    /// `Ok(None)` means the upstream closed the stream cleanly.
    pub async fn read_event(&mut self, wait: Duration) -> Result<Option<Event>, UpstreamError> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Err(_) => Err(UpstreamError::Timeout(wait)),
            Ok(None) => Ok(None),
            Ok(Some(result)) => Ok(Some(result?)),
        }
    }
}

impl Drop for UpstreamClient {
    fn drop(&mut self) {
        debug!(upstream = %self.endpoint, "Closing upstream connection");
    }
}

async fn open_stream(endpoint: &Endpoint) -> std::io::Result<BoxedStream> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(path) => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unix sockets are not supported here: {}", path.display()),
        )),
    }
}
