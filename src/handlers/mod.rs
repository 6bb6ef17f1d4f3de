//! Per-connection protocol handling
//!
//! - `connection` - Event dispatch, discovery and the synthesis pipeline
//! - `sink` - Writer seam for events going back to the client

pub mod connection;
pub mod sink;

pub use connection::{ConnectionHandler, ProxyContext};
pub use sink::{EventSink, FramedEventSink};
