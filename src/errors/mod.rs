pub mod config_error;
pub mod proxy_error;

pub use config_error::{ConfigError, ConfigIssue};
pub use proxy_error::{CacheError, ProtocolError, SinkError, UpstreamError};
