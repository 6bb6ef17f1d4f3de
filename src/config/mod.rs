//! Configuration module for the TTS proxy
//!
//! Configuration comes from a YAML file, environment variables and CLI flags.
//! Priority: CLI flags > YAML > ENV vars (.env values included) > defaults.
//! Everything is validated once at load time; the proxy never starts with an
//! invalid configuration.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `validation`: Merging the layers and validating every field
//!
//! # Example
//! ```rust,no_run
//! use tts_proxy::config::{ConfigOverrides, ProxyConfig};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProxyConfig::load(Some(&PathBuf::from("config.yaml")), ConfigOverrides::default())?;
//! println!("Proxy listening on {}", config.listen_uri);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;

mod env;
mod validation;
mod yaml;

pub use env::EnvConfig;
pub use yaml::YamlConfig;

use crate::errors::ConfigError;
use crate::protocol::Endpoint;

pub const DEFAULT_LISTEN_URI: &str = "tcp://0.0.0.0:10201";
pub const DEFAULT_CACHE_DIR: &str = "./tts_cache";
pub const DEFAULT_CACHE_MAX_SIZE_MB: u64 = 100;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DESCRIBE_TIMEOUT_SECS: u64 = 5;
pub const TEMPLATE_PLACEHOLDER: &str = "{{text}}";

/// Audio cache settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: PathBuf,
    /// Byte budget for the whole cache directory
    pub max_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from(DEFAULT_CACHE_DIR),
            max_size_bytes: DEFAULT_CACHE_MAX_SIZE_MB * 1024 * 1024,
        }
    }
}

/// Identity advertised in discovery responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub attribution_name: String,
    pub attribution_url: String,
}

impl Default for ProgramInfo {
    fn default() -> Self {
        Self {
            name: "tts-proxy".to_string(),
            description: "TTS proxy with failover, text normalization and audio cache"
                .to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            attribution_name: "tts-proxy".to_string(),
            attribution_url: "https://github.com/tts-proxy/tts-proxy".to_string(),
        }
    }
}

/// A compiled custom replacement rule
#[derive(Debug, Clone)]
pub struct Replacement {
    pub pattern: Regex,
    pub replace: String,
}

/// Text normalization options
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub normalize_markdown: bool,
    pub remove_emoji: bool,
    pub remove_asterisks: bool,
    pub remove_urls: bool,
    pub collapse_whitespace: bool,
    pub remove_code_blocks: bool,
    /// 0 means unlimited
    pub max_text_length: usize,
    pub replacements: Vec<Replacement>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            normalize_markdown: false,
            remove_emoji: false,
            remove_asterisks: true,
            remove_urls: false,
            collapse_whitespace: true,
            remove_code_blocks: false,
            max_text_length: 0,
            replacements: Vec::new(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected text or json")),
        }
    }
}

/// Values supplied on the command line. They win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen_uri: Option<String>,
    pub upstream_uris: Vec<String>,
    pub stream_tts: bool,
    pub metrics_port: Option<u16>,
    pub log_format: Option<String>,
}

/// Proxy configuration
///
/// Contains everything needed to run the proxy:
/// - Listening surface and upstream targets (in priority order)
/// - Upstream timeouts
/// - Audio cache settings
/// - Request shaping (SSML template, forced streaming)
/// - Text normalization options
/// - Observability (metrics port, log format)
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_uri: Endpoint,
    /// Upstream targets; list position is priority
    pub upstream_uris: Vec<Endpoint>,

    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub describe_timeout: Duration,

    pub cache: CacheConfig,

    /// Template with a single `{{text}}` placeholder wrapped around normalized text
    pub ssml_template: Option<String>,
    /// Always send start/chunk/stop upstream, even for one-shot requests
    pub stream_tts: bool,

    /// 0 disables the metrics server
    pub metrics_port: u16,
    pub log_format: LogFormat,

    pub program: ProgramInfo,
    pub normalizer: NormalizerConfig,
}

impl ProxyConfig {
    /// Load configuration from an optional YAML file, the environment and CLI overrides
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Any field fails validation (all failures are reported together)
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let yaml = match path {
            Some(path) => YamlConfig::from_file(path)?,
            None => YamlConfig::default(),
        };
        validation::build(yaml, EnvConfig::from_env(), overrides)
    }

    /// Load from environment variables and CLI overrides only
    pub fn from_env(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::load(None, overrides)
    }

    /// Apply the response template, if any, to already-normalized text
    pub fn render_template(&self, normalized_text: &str) -> String {
        match &self.ssml_template {
            Some(template) => template.replace(TEMPLATE_PLACEHOLDER, normalized_text),
            None => normalized_text.to_string(),
        }
    }

    /// Configuration with the given upstreams and defaults everywhere else
    pub fn with_upstreams(upstream_uris: Vec<Endpoint>) -> Self {
        Self {
            listen_uri: Endpoint::Tcp {
                host: "0.0.0.0".to_string(),
                port: 10201,
            },
            upstream_uris,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            describe_timeout: Duration::from_secs(DEFAULT_DESCRIBE_TIMEOUT_SECS),
            cache: CacheConfig::default(),
            ssml_template: None,
            stream_tts: false,
            metrics_port: 0,
            log_format: LogFormat::Text,
            program: ProgramInfo::default(),
            normalizer: NormalizerConfig::default(),
        }
    }
}
