//! Layer merging and per-field validation.
//!
//! Each field is resolved as CLI > YAML > ENV > default and validated by its
//! own function. Problems are pushed onto a shared list so a broken config
//! reports everything wrong with it in one go.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;

use super::env::EnvConfig;
use super::yaml::{ReplacementYaml, YamlConfig};
use super::{
    CacheConfig, ConfigOverrides, DEFAULT_CACHE_DIR, DEFAULT_CACHE_MAX_SIZE_MB,
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DESCRIBE_TIMEOUT_SECS, DEFAULT_LISTEN_URI,
    DEFAULT_READ_TIMEOUT_SECS, LogFormat, NormalizerConfig, ProgramInfo, ProxyConfig, Replacement,
    TEMPLATE_PLACEHOLDER,
};
use crate::errors::{ConfigError, ConfigIssue};
use crate::protocol::Endpoint;

const BYTES_PER_MB: u64 = 1024 * 1024;

pub(super) fn build(
    yaml: YamlConfig,
    env: EnvConfig,
    overrides: ConfigOverrides,
) -> Result<ProxyConfig, ConfigError> {
    let mut issues = env.issues.clone();

    let listen_raw = overrides
        .listen_uri
        .clone()
        .or_else(|| yaml.server.as_ref().and_then(|s| s.uri.clone()))
        .or_else(|| env.listen_uri.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN_URI.to_string());
    let listen_uri = validate_endpoint("server.uri", &listen_raw, &mut issues);

    let upstream_raw = if !overrides.upstream_uris.is_empty() {
        overrides.upstream_uris.clone()
    } else if let Some(list) = yaml.upstreams.clone().filter(|l| !l.is_empty()) {
        list
    } else {
        env.upstream_uris.clone().unwrap_or_default()
    };
    let upstream_uris = validate_upstreams(&upstream_raw, &mut issues);

    let timeouts = yaml.timeouts.clone().unwrap_or_default();
    let connect_timeout = validate_timeout(
        "timeouts.connect_secs",
        timeouts.connect_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        &mut issues,
    );
    let read_timeout = validate_timeout(
        "timeouts.read_secs",
        timeouts.read_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
        &mut issues,
    );
    let describe_timeout = validate_timeout(
        "timeouts.describe_secs",
        timeouts
            .describe_secs
            .unwrap_or(DEFAULT_DESCRIBE_TIMEOUT_SECS),
        &mut issues,
    );

    let cache_yaml = yaml.cache.clone().unwrap_or_default();
    let cache = CacheConfig {
        enabled: cache_yaml.enabled.or(env.cache_enabled).unwrap_or(false),
        path: PathBuf::from(
            cache_yaml
                .path
                .clone()
                .or_else(|| env.cache_dir.clone())
                .unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string()),
        ),
        max_size_bytes: validate_cache_size(
            cache_yaml
                .max_size_mb
                .or(env.cache_max_size_mb)
                .unwrap_or(DEFAULT_CACHE_MAX_SIZE_MB),
            &mut issues,
        ),
    };

    let ssml_template = validate_template(yaml.ssml_template.clone(), &mut issues);
    let stream_tts = overrides.stream_tts || yaml.stream_tts.or(env.stream_tts).unwrap_or(false);

    let metrics_port = overrides
        .metrics_port
        .or_else(|| yaml.metrics.as_ref().and_then(|m| m.port))
        .or(env.metrics_port)
        .unwrap_or(0);

    let log_format_raw = overrides
        .log_format
        .clone()
        .or_else(|| yaml.logging.as_ref().and_then(|l| l.format.clone()))
        .or_else(|| env.log_format.clone());
    let log_format = validate_log_format(log_format_raw.as_deref(), &mut issues);

    let program = merge_program(&yaml);
    let normalizer = build_normalizer(&yaml, &mut issues);

    if !issues.is_empty() {
        return Err(ConfigError::Invalid(issues));
    }

    // Both are Some when no issue was recorded.
    let Some(listen_uri) = listen_uri else {
        return Err(ConfigError::Invalid(vec![ConfigIssue::new(
            "server.uri",
            "listen URI is required",
        )]));
    };

    Ok(ProxyConfig {
        listen_uri,
        upstream_uris,
        connect_timeout,
        read_timeout,
        describe_timeout,
        cache,
        ssml_template,
        stream_tts,
        metrics_port,
        log_format,
        program,
        normalizer,
    })
}

fn validate_endpoint(field: &str, raw: &str, issues: &mut Vec<ConfigIssue>) -> Option<Endpoint> {
    match Endpoint::from_str(raw.trim()) {
        Ok(endpoint) => Some(endpoint),
        Err(message) => {
            issues.push(ConfigIssue::new(field, message));
            None
        }
    }
}

fn validate_upstreams(raw: &[String], issues: &mut Vec<ConfigIssue>) -> Vec<Endpoint> {
    if raw.is_empty() {
        issues.push(ConfigIssue::new(
            "upstreams",
            "at least one upstream TTS URI is required (--upstream-tts-uri or UPSTREAM_TTS_URI)",
        ));
        return Vec::new();
    }

    raw.iter()
        .enumerate()
        .filter_map(|(i, uri)| validate_endpoint(&format!("upstreams[{i}]"), uri, issues))
        .collect()
}

fn validate_timeout(field: &str, secs: u64, issues: &mut Vec<ConfigIssue>) -> Duration {
    if secs == 0 {
        issues.push(ConfigIssue::new(field, "must be greater than 0"));
    }
    Duration::from_secs(secs)
}

fn validate_cache_size(max_size_mb: u64, issues: &mut Vec<ConfigIssue>) -> u64 {
    match max_size_mb.checked_mul(BYTES_PER_MB) {
        Some(bytes) => bytes,
        None => {
            issues.push(ConfigIssue::new("cache.max_size_mb", "value is too large"));
            0
        }
    }
}

fn validate_template(template: Option<String>, issues: &mut Vec<ConfigIssue>) -> Option<String> {
    let template = template.filter(|t| !t.is_empty())?;
    if !template.contains(TEMPLATE_PLACEHOLDER) {
        issues.push(ConfigIssue::new(
            "ssml_template",
            format!("must contain the {TEMPLATE_PLACEHOLDER} placeholder"),
        ));
    }
    Some(template)
}

fn validate_log_format(raw: Option<&str>, issues: &mut Vec<ConfigIssue>) -> LogFormat {
    match raw.map(LogFormat::from_str) {
        None => LogFormat::default(),
        Some(Ok(format)) => format,
        Some(Err(message)) => {
            issues.push(ConfigIssue::new("logging.format", message));
            LogFormat::default()
        }
    }
}

fn validate_replacement(
    index: usize,
    rule: &ReplacementYaml,
    issues: &mut Vec<ConfigIssue>,
) -> Option<Replacement> {
    let field = format!("replacements[{index}].regex");
    let Some(pattern) = rule.regex.as_deref() else {
        issues.push(ConfigIssue::new(field, "missing required 'regex' key"));
        return None;
    };

    match Regex::new(pattern) {
        Ok(pattern) => Some(Replacement {
            pattern,
            replace: rule.replace.clone().unwrap_or_default(),
        }),
        Err(e) => {
            issues.push(ConfigIssue::new(
                field,
                format!("invalid regex '{pattern}': {e}"),
            ));
            None
        }
    }
}

fn build_normalizer(yaml: &YamlConfig, issues: &mut Vec<ConfigIssue>) -> NormalizerConfig {
    let defaults = NormalizerConfig::default();
    let replacements = yaml
        .replacements
        .as_deref()
        .unwrap_or_default()
        .iter()
        .enumerate()
        .filter_map(|(i, rule)| validate_replacement(i, rule, issues))
        .collect();

    NormalizerConfig {
        normalize_markdown: yaml
            .normalize_markdown
            .unwrap_or(defaults.normalize_markdown),
        remove_emoji: yaml.remove_emoji.unwrap_or(defaults.remove_emoji),
        remove_asterisks: yaml.remove_asterisks.unwrap_or(defaults.remove_asterisks),
        remove_urls: yaml.remove_urls.unwrap_or(defaults.remove_urls),
        collapse_whitespace: yaml
            .collapse_whitespace
            .unwrap_or(defaults.collapse_whitespace),
        remove_code_blocks: yaml
            .remove_code_blocks
            .unwrap_or(defaults.remove_code_blocks),
        max_text_length: yaml.max_text_length.unwrap_or(defaults.max_text_length),
        replacements,
    }
}

fn merge_program(yaml: &YamlConfig) -> ProgramInfo {
    let defaults = ProgramInfo::default();
    let Some(program) = yaml.program.as_ref() else {
        return defaults;
    };

    ProgramInfo {
        name: program.name.clone().unwrap_or(defaults.name),
        description: program.description.clone().unwrap_or(defaults.description),
        version: defaults.version,
        attribution_name: program
            .attribution_name
            .clone()
            .unwrap_or(defaults.attribution_name),
        attribution_url: program
            .attribution_url
            .clone()
            .unwrap_or(defaults.attribution_url),
    }
}
