//! Input classification: share-page URLs by platform, everything else a file.

use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    ChatGpt,
    Gemini,
    Perplexity,
    /// Any other URL
    Generic,
    /// Local file path
    File,
}

impl SourceKind {
    pub fn platform(&self) -> &'static str {
        match self {
            Self::ChatGpt => "chatgpt",
            Self::Gemini => "gemini",
            Self::Perplexity => "perplexity",
            Self::Generic => "generic",
            Self::File => "file",
        }
    }

    pub fn is_url(&self) -> bool {
        !matches!(self, Self::File)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.platform())
    }
}

fn case_insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("Invalid source pattern regex")
}

static PLATFORMS: LazyLock<Vec<(Regex, SourceKind)>> = LazyLock::new(|| {
    vec![
        (case_insensitive(r"chatgpt\.com/share"), SourceKind::ChatGpt),
        (
            case_insensitive(r"g\.co/gemini|gemini\.google\.com"),
            SourceKind::Gemini,
        ),
        (case_insensitive(r"perplexity\.(?:ai|com)"), SourceKind::Perplexity),
    ]
});

static SHARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"share/([A-Za-z0-9_-]+)").expect("Invalid share id regex"));

static LONG_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9]{10,}").expect("Invalid token regex"));

/// Classify an ingest input
pub fn detect_source(input: &str) -> SourceKind {
    let s = input.trim();
    let is_web = Url::parse(s)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false);
    if !is_web {
        return SourceKind::File;
    }
    PLATFORMS
        .iter()
        .find(|(re, _)| re.is_match(s))
        .map(|(_, kind)| *kind)
        .unwrap_or(SourceKind::Generic)
}

/// Short corpus name for a URL: `{platform}_{id}` with the id capped at 30
/// characters, or `{platform}_import` when no id is found
pub fn derive_slug(input: &str, kind: SourceKind) -> String {
    let s = input.trim();
    let id = SHARE_ID
        .captures(s)
        .and_then(|c| c.get(1))
        .or_else(|| LONG_TOKEN.find(s))
        .map(|m| m.as_str().chars().take(30).collect::<String>());
    match id {
        Some(id) => format!("{}_{}", kind.platform(), id),
        None => format!("{}_import", kind.platform()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platforms() {
        assert_eq!(
            detect_source("https://chatgpt.com/share/abc-123"),
            SourceKind::ChatGpt
        );
        assert_eq!(detect_source("https://g.co/gemini/share/x"), SourceKind::Gemini);
        assert_eq!(
            detect_source("HTTPS://GEMINI.GOOGLE.COM/share/x"),
            SourceKind::Gemini
        );
        assert_eq!(
            detect_source("https://www.perplexity.ai/search/q"),
            SourceKind::Perplexity
        );
        assert_eq!(detect_source("https://example.org/chat"), SourceKind::Generic);
        assert_eq!(detect_source("notes/chat.md"), SourceKind::File);
        assert_eq!(detect_source("chat"), SourceKind::File);
        assert_eq!(detect_source("C:\\notes\\chat.md"), SourceKind::File);
        assert_eq!(detect_source("Http://example.org/chat"), SourceKind::Generic);
    }

    #[test]
    fn test_slugs() {
        assert_eq!(
            derive_slug("https://chatgpt.com/share/6791-ab_cd", SourceKind::ChatGpt),
            "chatgpt_6791-ab_cd"
        );
        let long = format!("https://chatgpt.com/share/{}", "a".repeat(40));
        assert_eq!(
            derive_slug(&long, SourceKind::ChatGpt),
            format!("chatgpt_{}", "a".repeat(30))
        );
        assert_eq!(
            derive_slug("https://example.org/c/Abcdef12345", SourceKind::Generic),
            "generic_Abcdef12345"
        );
        assert_eq!(
            derive_slug("https://x.io/a", SourceKind::Generic),
            "generic_import"
        );
    }
}
