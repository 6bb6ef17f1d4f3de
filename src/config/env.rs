//! Environment variable layer. `.env` is loaded by `main` before this runs.

use std::env;
use std::str::FromStr;

use crate::errors::ConfigIssue;

/// Values read from the process environment. Parse failures are collected
/// as issues instead of aborting so validation can report everything at once.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub listen_uri: Option<String>,
    pub upstream_uris: Option<Vec<String>>,
    pub cache_enabled: Option<bool>,
    pub cache_dir: Option<String>,
    pub cache_max_size_mb: Option<u64>,
    pub metrics_port: Option<u16>,
    pub log_format: Option<String>,
    pub stream_tts: Option<bool>,
    pub issues: Vec<ConfigIssue>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let mut config = EnvConfig {
            listen_uri: non_empty("LISTEN_URI"),
            upstream_uris: non_empty("UPSTREAM_TTS_URI").map(|value| split_list(&value)),
            cache_dir: non_empty("CACHE_DIR"),
            log_format: non_empty("LOG_FORMAT"),
            ..Default::default()
        };

        config.cache_enabled = config.parse_var("CACHE_ENABLED", parse_bool);
        config.cache_max_size_mb = config.parse_var("CACHE_MAX_SIZE_MB", parse_number);
        config.metrics_port = config.parse_var("METRICS_PORT", parse_number);
        config.stream_tts = config.parse_var("STREAM_TTS", parse_bool);
        config
    }

    fn parse_var<T>(&mut self, name: &str, parse: fn(&str) -> Result<T, String>) -> Option<T> {
        let raw = non_empty(name)?;
        match parse(&raw) {
            Ok(value) => Some(value),
            Err(message) => {
                self.issues.push(ConfigIssue::new(name, message));
                None
            }
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Comma-separated list, blanks dropped.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub(crate) fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

fn parse_number<T: FromStr>(value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| format!("'{value}' is not a valid number: {e}"))
}
