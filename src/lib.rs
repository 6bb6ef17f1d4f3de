pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod telemetry;

// Re-export commonly used items for convenience
pub use config::ProxyConfig;
pub use crate::core::*;
pub use errors::{CacheError, ConfigError, ProtocolError, SinkError, UpstreamError};
pub use handlers::{ConnectionHandler, EventSink, ProxyContext};
pub use server::ProxyServer;
