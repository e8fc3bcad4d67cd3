//! Share-page crawler.
//!
//! Fetches a conversation page and collects message text through a list of
//! CSS selectors. Share pages often serve a thin shell first, so a result
//! below the minimum size is re-fetched a few times before the last result
//! is kept as-is.

use std::collections::HashSet;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use super::source::SourceKind;
use crate::config::IngestConfig;
use crate::types::{ReportError, Result};

const CHATGPT_SELECTORS: &[&str] = &[
    "[data-message-author-role]",
    "[class*='message']",
    "article",
    "main [class*='markdown']",
    ".prose",
    "[class*='Conversation'] div",
];

const GENERIC_SELECTORS: &[&str] = &[
    "article",
    "[role='article']",
    "main [class*='message']",
    "main [class*='conversation']",
    "[class*='message']",
    "[class*='chat']",
    "[class*='response']",
    ".prose",
    "main .markdown",
    "[class*='markdown']",
    "main",
];

pub fn selectors_for(kind: SourceKind) -> &'static [&'static str] {
    match kind {
        SourceKind::ChatGpt => CHATGPT_SELECTORS,
        _ => GENERIC_SELECTORS,
    }
}

fn element_text(element: scraper::ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text of every element matched by `selectors`, in selector order, with
/// duplicates and fragments of two characters or less dropped. Falls back
/// to `main` or `body` when nothing matches.
pub fn collect_text(html: &str, selectors: &[&str]) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<String> = Vec::new();

    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            debug!(selector = raw, "Skipping unparsable selector");
            continue;
        };
        for element in document.select(&selector) {
            let text = element_text(element);
            if text.chars().count() > 2 {
                parts.push(text);
            }
        }
    }

    if parts.is_empty() {
        let fallback = ["main", "body"]
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .find_map(|s| document.select(&s).next())
            .map(element_text)
            .unwrap_or_default();
        if !fallback.is_empty() {
            parts.push(fallback);
        }
    }

    let mut seen = HashSet::new();
    parts.retain(|p| seen.insert(p.clone()));
    parts.join("\n\n")
}

#[derive(Debug)]
enum Attempt {
    /// Page fetched but the collected text is below the minimum size
    Short(String),
    Failed(ReportError),
}

pub struct Crawler {
    client: reqwest::Client,
    config: IngestConfig,
}

impl Crawler {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| ReportError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn fetch_once(&self, url: &str, selectors: &[&str]) -> std::result::Result<String, Attempt> {
        let fetch_error = |e: reqwest::Error| {
            Attempt::Failed(ReportError::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            })
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;
        let html = response.text().await.map_err(fetch_error)?;
        let content = collect_text(&html, selectors);
        if content.len() < self.config.min_content_bytes {
            return Err(Attempt::Short(content));
        }
        Ok(content)
    }

    /// Fetch `url` and collect its conversation text
    pub async fn crawl(&self, url: &str, kind: SourceKind) -> Result<String> {
        let selectors = selectors_for(kind);
        let backoff = ConstantBuilder::default()
            .with_delay(Duration::from_secs(self.config.crawl_retry_wait_secs))
            .with_max_times(self.config.crawl_max_retries.saturating_sub(1));

        info!(url, platform = %kind, "Fetching share page");
        let outcome = (|| self.fetch_once(url, selectors))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|e| matches!(e, Attempt::Short(_)))
            .notify(|e, wait| {
                if let Attempt::Short(content) = e {
                    warn!(bytes = content.len(), ?wait, "Page content looks incomplete, retrying");
                }
            })
            .await;

        match outcome {
            Ok(content) => Ok(content),
            Err(Attempt::Short(content)) => Ok(content),
            Err(Attempt::Failed(e)) => Err(e),
        }
    }
}
