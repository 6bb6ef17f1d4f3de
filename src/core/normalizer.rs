//! Text normalization applied before cache lookup and synthesis.
//!
//! The chain is linear and stateless; every option is independent and
//! the fixed patterns are compiled once per process.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::NormalizerConfig;

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("code block pattern"));
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:https?://|www\.)\S+").expect("url pattern"));
static BOLD_STARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("bold pattern"));
static BOLD_UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__(.*?)__").expect("bold pattern"));
static ITALIC_STARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.*?)\*").expect("italic pattern"));
static ITALIC_UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(.*?)_").expect("italic pattern"));
static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#+\s+").expect("header pattern"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]\(.*?\)").expect("link pattern"));
// Pictographs plus the joiners, selectors, skin tones and flags that build sequences.
static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\p{Extended_Pictographic}\p{Emoji_Modifier}\u{1F1E6}-\u{1F1FF}\u{200D}\u{FE0E}\u{FE0F}\u{20E3}]",
    )
    .expect("emoji pattern")
});
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

#[derive(Debug, Clone, Default)]
pub struct TextNormalizer {
    config: NormalizerConfig,
}

impl TextNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn normalize(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let config = &self.config;

        let mut out = text.to_string();
        for rule in &config.replacements {
            out = rule
                .pattern
                .replace_all(&out, rule.replace.as_str())
                .into_owned();
        }

        if config.remove_code_blocks {
            out = CODE_BLOCK.replace_all(&out, "").into_owned();
        }

        if config.remove_urls {
            out = URL.replace_all(&out, "").into_owned();
        }

        if config.normalize_markdown {
            out = strip_markdown(&out);
        } else if config.remove_asterisks {
            out = out.replace('*', "");
        }

        if config.remove_emoji {
            out = EMOJI.replace_all(&out, "").into_owned();
        }

        if config.collapse_whitespace {
            out = WHITESPACE.replace_all(&out, " ").into_owned();
        }

        let mut out = out.trim().to_string();

        if config.max_text_length > 0 && out.chars().count() > config.max_text_length {
            out = out.chars().take(config.max_text_length).collect();
            out.truncate(out.trim_end().len());
        }

        debug!(original = %text, normalized = %out, "Normalized text");
        out
    }
}

fn strip_markdown(text: &str) -> String {
    let text = BOLD_STARS.replace_all(text, "$1");
    let text = BOLD_UNDERSCORES.replace_all(&text, "$1");
    let text = ITALIC_STARS.replace_all(&text, "$1");
    let text = ITALIC_UNDERSCORES.replace_all(&text, "$1");
    let text = HEADER.replace_all(&text, "");
    let text = LINK.replace_all(&text, "$1");
    text.replace('`', "")
}
