//! tracing-subscriber setup.
//!
//! The filter comes from `RUST_LOG`, then `LOGLEVEL`, then defaults to `info`.

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

pub const DEFAULT_FILTER: &str = "info";

/// Build the filter directive from the environment.
pub fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    std::env::var("LOGLEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level.to_ascii_lowercase()).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Calling this twice is harmless; the
/// second call is ignored.
pub fn init(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_target(true);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };

    if result.is_ok() {
        tracing::debug!(?format, "Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_loglevel_fallback() {
        unsafe {
            env::remove_var("RUST_LOG");
            env::set_var("LOGLEVEL", "DEBUG");
        }
        assert_eq!(filter_from_env().to_string(), "debug");

        unsafe {
            env::remove_var("LOGLEVEL");
        }
        assert_eq!(filter_from_env().to_string(), DEFAULT_FILTER);
    }

    #[test]
    #[serial]
    fn test_init_twice_is_harmless() {
        init(LogFormat::Json);
        init(LogFormat::Text);
    }
}
