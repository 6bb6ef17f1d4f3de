use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

/// A stream-socket address given as `tcp://host:port` or `unix://path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(format!("'{uri}' is missing a socket path"));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        let url = Url::parse(uri).map_err(|e| format!("'{uri}' is not a valid URI: {e}"))?;
        if url.scheme() != "tcp" {
            return Err(format!(
                "'{uri}' has unsupported scheme '{}', expected tcp:// or unix://",
                url.scheme()
            ));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| format!("'{uri}' is missing a host"))?;
        let port = url
            .port()
            .ok_or_else(|| format!("'{uri}' is missing a port"))?;

        // IPv6 hosts come back bracketed from the url crate.
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        Ok(Endpoint::Tcp { host, port })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            }
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
