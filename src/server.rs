//! Listening socket and per-connection tasks.
//!
//! Each accepted connection gets its own task, its own [`ConnectionHandler`]
//! and therefore its own streaming buffer. A decode error or end of stream
//! closes that connection only.

use std::io;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handlers::{ConnectionHandler, FramedEventSink, ProxyContext};
use crate::protocol::{Endpoint, EventCodec};

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: std::path::PathBuf,
    },
}

pub struct ProxyServer {
    ctx: Arc<ProxyContext>,
    listener: Listener,
}

impl ProxyServer {
    /// Bind the configured listen URI. A stale Unix socket file is removed first.
    pub async fn bind(ctx: Arc<ProxyContext>) -> io::Result<Self> {
        let listener = match &ctx.config.listen_uri {
            Endpoint::Tcp { host, port } => {
                Listener::Tcp(TcpListener::bind((host.as_str(), *port)).await?)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Listener::Unix {
                    listener: tokio::net::UnixListener::bind(path)?,
                    path: path.clone(),
                }
            }
            #[cfg(not(unix))]
            Endpoint::Unix(path) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("unix sockets are not supported here: {}", path.display()),
                ));
            }
        };

        Ok(Self { ctx, listener })
    }

    /// Address actually bound, with the real port for `tcp://...:0`.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match &self.listener {
            Listener::Tcp(listener) => {
                let addr = listener.local_addr()?;
                Ok(Endpoint::Tcp {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                })
            }
            #[cfg(unix)]
            Listener::Unix { path, .. } => Ok(Endpoint::Unix(path.clone())),
        }
    }

    /// Accept connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        info!(uri = %self.local_endpoint()?, "Proxy listening");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.accept() => accepted,
            };

            match accepted {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            }
        }

        info!("Proxy shutting down");
        #[cfg(unix)]
        if let Listener::Unix { path, .. } = &self.listener {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    async fn accept(&self) -> io::Result<()> {
        match &self.listener {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                tokio::spawn(serve_connection(self.ctx.clone(), stream, peer.to_string()));
            }
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                let peer = format!("unix:{}", path.display());
                tokio::spawn(serve_connection(self.ctx.clone(), stream, peer));
            }
        }
        Ok(())
    }
}

/// Read events from one client until it disconnects or sends garbage.
pub async fn serve_connection<T>(ctx: Arc<ProxyContext>, stream: T, peer: String)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    info!(client = %peer, "Client connected");
    let (reader, writer) = tokio::io::split(stream);
    let mut events = FramedRead::new(reader, EventCodec::new());
    let mut handler = ConnectionHandler::new(ctx, FramedEventSink::new(writer), peer.clone());

    while let Some(next) = events.next().await {
        match next {
            Ok(event) => {
                if !handler.handle_event(event).await {
                    break;
                }
            }
            Err(e) => {
                warn!(client = %peer, error = %e, "Invalid event from client, closing connection");
                break;
            }
        }
    }

    debug!(client = %peer, "Client disconnected");
}
