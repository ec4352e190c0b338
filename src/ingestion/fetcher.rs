//! Polite breadth-first crawler for documentation sites.
//!
//! Starting from a source's seed URLs, the fetcher walks same-site links in
//! waves of at most `max_concurrent` in-flight requests, sleeping
//! `delay_seconds` between waves. Discovered links are followed only when
//! they match a discovery pattern and no exclude pattern. Individual page
//! failures are logged and skipped; a crawl only fails outright on
//! configuration problems.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::settings::Settings;
use crate::sources::SourceConfig;
use crate::types::PipelineError;

/// Minimum extracted-text length for a page to be kept.
const MIN_PAGE_CHARS: usize = 100;
/// Minimum text length for one content container to count.
const MIN_BLOCK_CHARS: usize = 50;
/// Minimum text length for an extracted code block.
const MIN_CODE_CHARS: usize = 10;

/// Block-level elements that carry readable text. Each match becomes one
/// line-separated block so downstream chunking sees real boundaries.
const BLOCK_ELEMENTS: &str = "p, li, h1, h2, h3, h4, h5, h6, pre, blockquote, dt, dd, td";

/// Elements pruned from the whole-body fallback extraction.
const CHROME_ELEMENTS: [&str; 6] = ["nav", "header", "footer", "aside", "script", "style"];

/// One successfully fetched and extracted page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub title: String,
    /// Extracted body text. Paragraph-level blocks are separated by blank
    /// lines; code blocks keep their internal newlines.
    pub text: String,
    pub code_blocks: Vec<String>,
    /// Source key this page was crawled under.
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn has_code(&self) -> bool {
        !self.code_blocks.is_empty()
    }
}

/// Counters describing one crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub pages: Vec<FetchedPage>,
    /// URLs dequeued and requested.
    pub attempted: usize,
    /// Requests that failed (network, status, parse) and were skipped.
    pub failed: usize,
    /// Pages dropped for having too little extracted text.
    pub skipped_short: usize,
}

/// Crawler for a single configured source.
///
/// All CSS selectors are compiled at construction; an invalid selector in
/// the source configuration surfaces as [`PipelineError::Config`] before any
/// request is made.
pub struct DocumentFetcher {
    client: reqwest::Client,
    source_key: String,
    source: SourceConfig,
    title_selectors: Vec<Selector>,
    content_selectors: Vec<Selector>,
    code_selectors: Vec<Selector>,
    block_selector: Selector,
    link_selector: Selector,
    body_selector: Selector,
}

impl DocumentFetcher {
    pub fn new(
        source_key: &str,
        source: &SourceConfig,
        settings: &Settings,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(settings.request_timeout)
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            client,
            source_key: source_key.to_string(),
            source: source.clone(),
            title_selectors: compile_selectors(&source.title_selectors)?,
            content_selectors: compile_selectors(&source.content_selectors)?,
            code_selectors: compile_selectors(&source.code_selectors)?,
            block_selector: compile_selector(BLOCK_ELEMENTS)?,
            link_selector: compile_selector("a")?,
            body_selector: compile_selector("body")?,
        })
    }

    /// Crawls the source, dequeuing at most `max_pages` URLs (`None` leaves
    /// the crawl unbounded, `Some(0)` fetches nothing and succeeds).
    #[instrument(skip(self), fields(source = %self.source_key), err)]
    pub async fn crawl(&self, max_pages: Option<usize>) -> Result<CrawlOutcome, PipelineError> {
        let mut outcome = CrawlOutcome::default();
        let mut frontier: VecDeque<Url> = VecDeque::new();
        let mut seen: HashSet<Url> = HashSet::new();

        for base in &self.source.base_urls {
            let mut url = Url::parse(base)
                .map_err(|err| PipelineError::Config(format!("base url '{base}': {err}")))?;
            url.set_fragment(None);
            if seen.insert(url.clone()) {
                frontier.push_back(url);
            }
        }

        let mut first_wave = true;
        while !frontier.is_empty() {
            let remaining = match max_pages {
                Some(limit) => limit.saturating_sub(outcome.attempted),
                None => usize::MAX,
            };
            if remaining == 0 {
                break;
            }

            if !first_wave {
                tokio::time::sleep(self.source.delay()).await;
            }
            first_wave = false;

            let wave_size = remaining.min(self.source.max_concurrent).min(frontier.len());
            let wave: Vec<Url> = frontier.drain(..wave_size).collect();
            outcome.attempted += wave.len();

            let fetched: Vec<(Url, Result<String, PipelineError>)> =
                stream::iter(wave.into_iter().map(|url| {
                    let client = self.client.clone();
                    async move {
                        let body = fetch_html(&client, &url).await;
                        (url, body)
                    }
                }))
                .buffered(self.source.max_concurrent)
                .collect()
                .await;

            for (url, body) in fetched {
                let html = match body {
                    Ok(html) => html,
                    Err(err) => {
                        outcome.failed += 1;
                        warn!(url = %url, error = %err, "page fetch failed, skipping");
                        continue;
                    }
                };

                let extraction = self.extract(&url, &html);
                for link in extraction.links {
                    if self.should_include(link.as_str()) && seen.insert(link.clone()) {
                        frontier.push_back(link);
                    }
                }

                let text_chars = char_len(&extraction.text);
                if text_chars <= MIN_PAGE_CHARS {
                    outcome.skipped_short += 1;
                    debug!(url = %url, chars = text_chars, "page too short, skipping");
                    continue;
                }

                outcome.pages.push(FetchedPage {
                    url: url.to_string(),
                    title: extraction.title,
                    text: extraction.text,
                    code_blocks: extraction.code_blocks,
                    source: self.source_key.clone(),
                    fetched_at: Utc::now(),
                });
            }
        }

        debug!(
            pages = outcome.pages.len(),
            attempted = outcome.attempted,
            failed = outcome.failed,
            skipped_short = outcome.skipped_short,
            "crawl finished"
        );
        Ok(outcome)
    }

    /// Exclude patterns reject first; discovery patterns must then admit.
    fn should_include(&self, url: &str) -> bool {
        if self
            .source
            .exclude_patterns
            .iter()
            .any(|pattern| url.contains(pattern.as_str()))
        {
            return false;
        }
        self.source
            .discovery_patterns
            .iter()
            .any(|pattern| url.contains(pattern.as_str()))
    }

    fn extract(&self, page_url: &Url, html: &str) -> PageExtraction {
        let document = Html::parse_document(html);

        let mut title = String::new();
        for selector in &self.title_selectors {
            if let Some(element) = document.select(selector).next() {
                let text = squash_whitespace(&element.text().collect::<Vec<_>>().join(" "));
                if !text.is_empty() {
                    title = text;
                    break;
                }
            }
        }
        if title.is_empty() {
            title = "Untitled Document".to_string();
        }

        // First selector yielding a usable container wins.
        let mut parts: Vec<String> = Vec::new();
        for selector in &self.content_selectors {
            for container in document.select(selector) {
                let text = self.structured_text(container, false);
                if char_len(&text) > MIN_BLOCK_CHARS {
                    parts.push(text);
                }
            }
            if !parts.is_empty() {
                break;
            }
        }
        if parts.is_empty() {
            if let Some(body) = document.select(&self.body_selector).next() {
                let text = self.structured_text(body, true);
                if !text.is_empty() {
                    parts.push(text);
                }
            }
        }
        let text = parts.join("\n\n");

        let mut code_blocks: Vec<String> = Vec::new();
        let mut seen_code: HashSet<String> = HashSet::new();
        for selector in &self.code_selectors {
            for element in document.select(selector) {
                let code = code_text(element);
                if char_len(&code) > MIN_CODE_CHARS && seen_code.insert(code.clone()) {
                    code_blocks.push(code);
                }
            }
        }

        let mut links: Vec<Url> = Vec::new();
        for element in document.select(&self.link_selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if href.starts_with('#') {
                continue;
            }
            if let Ok(mut url) = page_url.join(href) {
                url.set_fragment(None);
                if matches!(url.scheme(), "http" | "https") {
                    links.push(url);
                }
            }
        }

        PageExtraction {
            title,
            text,
            code_blocks,
            links,
        }
    }

    /// Extracts readable text from a container, one block element per line
    /// group. `prune_chrome` drops navigation/header/footer subtrees and is
    /// used for the whole-body fallback.
    fn structured_text(&self, container: ElementRef<'_>, prune_chrome: bool) -> String {
        let mut blocks: Vec<String> = Vec::new();
        for block in container.select(&self.block_selector) {
            if prune_chrome && has_chrome_ancestor(block) {
                continue;
            }
            // Nested block elements (li inside li, pre inside td) would
            // duplicate text; only emit leaf-most blocks.
            if block.select(&self.block_selector).next().is_some() {
                continue;
            }
            let text = if block.value().name() == "pre" {
                code_text(block)
            } else {
                squash_whitespace(&block.text().collect::<Vec<_>>().join(" "))
            };
            if !text.is_empty() {
                blocks.push(text);
            }
        }
        blocks.join("\n\n")
    }
}

struct PageExtraction {
    title: String,
    text: String,
    code_blocks: Vec<String>,
    links: Vec<Url>,
}

async fn fetch_html(client: &reqwest::Client, url: &Url) -> Result<String, PipelineError> {
    let response = client
        .get(url.clone())
        .send()
        .await?
        .error_for_status()?;
    Ok(response.text().await?)
}

fn compile_selector(raw: &str) -> Result<Selector, PipelineError> {
    Selector::parse(raw)
        .map_err(|err| PipelineError::Config(format!("invalid css selector '{raw}': {err}")))
}

fn compile_selectors(raw: &[String]) -> Result<Vec<Selector>, PipelineError> {
    raw.iter().map(|sel| compile_selector(sel)).collect()
}

/// The minimum-length gates are defined in characters, not bytes, so
/// non-ASCII documentation measures the same as ASCII.
fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Collapses all whitespace runs to single spaces. Used for titles and
/// prose blocks where source-HTML line wrapping is cosmetic.
fn squash_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Code keeps its internal newlines and indentation.
fn code_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join("").trim().to_string()
}

fn has_chrome_ancestor(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| CHROME_ELEMENTS.contains(&ancestor.value().name()))
}
