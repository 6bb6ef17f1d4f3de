use serde::Deserialize;
use std::path::Path;

use crate::errors::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override environment variables; CLI flags override both.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   uri: "tcp://0.0.0.0:10201"
///
/// upstreams:
///   - "tcp://piper-primary:10200"
///   - "tcp://piper-backup:10200"
///
/// timeouts:
///   connect_secs: 5
///   read_secs: 30
///   describe_secs: 5
///
/// cache:
///   enabled: true
///   path: "/var/cache/tts-proxy"
///   max_size_mb: 100
///
/// metrics:
///   port: 9090
///
/// logging:
///   format: "json"
///
/// ssml_template: "<speak>{{text}}</speak>"
/// stream_tts: false
///
/// normalize_markdown: true
/// remove_emoji: true
/// remove_asterisks: true
/// remove_urls: false
/// collapse_whitespace: true
/// remove_code_blocks: false
/// max_text_length: 0
/// replacements:
///   - regex: "LLM"
///     replace: "Large Language Model"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstreams: Option<Vec<String>>,
    pub timeouts: Option<TimeoutsYaml>,
    pub cache: Option<CacheYaml>,
    pub metrics: Option<MetricsYaml>,
    pub logging: Option<LoggingYaml>,
    pub program: Option<ProgramYaml>,
    pub ssml_template: Option<String>,
    pub stream_tts: Option<bool>,

    // Text normalization options
    pub normalize_markdown: Option<bool>,
    pub remove_emoji: Option<bool>,
    pub remove_asterisks: Option<bool>,
    pub remove_urls: Option<bool>,
    pub collapse_whitespace: Option<bool>,
    pub remove_code_blocks: Option<bool>,
    pub max_text_length: Option<usize>,
    pub replacements: Option<Vec<ReplacementYaml>>,
}

/// Listening surface from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub uri: Option<String>,
}

/// Upstream timeouts from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimeoutsYaml {
    pub connect_secs: Option<u64>,
    pub read_secs: Option<u64>,
    pub describe_secs: Option<u64>,
}

/// Cache configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CacheYaml {
    pub enabled: Option<bool>,
    pub path: Option<String>,
    pub max_size_mb: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MetricsYaml {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingYaml {
    pub format: Option<String>,
}

/// Identity the proxy advertises when every upstream fails discovery
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProgramYaml {
    pub name: Option<String>,
    pub description: Option<String>,
    pub attribution_name: Option<String>,
    pub attribution_url: Option<String>,
}

/// Custom pattern replacement. `regex` is required; it is optional here so
/// validation can report it alongside every other problem.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReplacementYaml {
    pub regex: Option<String>,
    pub replace: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse_str(&contents)
    }

    pub fn parse_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
