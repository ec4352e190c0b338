//! Source and classification configuration.
//!
//! A [`ScrapeConfig`] bundles two things:
//!
//! * `sources` — one [`SourceConfig`] per documentation site, keyed by a
//!   short source key (seed URLs, link filters, CSS selectors, politeness
//!   limits, and metadata stamped onto every chunk).
//! * `content_classification` — an **ordered** list of [`CategoryRule`]s.
//!   The order is the tie-break priority when two categories score the same
//!   number of indicator hits, so reordering the list reorders the
//!   priorities without touching code.
//!
//! Configs load from TOML or JSON (dispatched by file extension) or come
//! from [`ScrapeConfig::builtin`]. Lookup of an unknown source key is a
//! configuration error reported before any network traffic.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ContentCategory, PipelineError};

/// How a category's pages are split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Split before definition labels, numbered items, and heading lines.
    PreserveStructure,
    /// Split before step markers (`Step 3`, `2.`, `Part 1:`, `## ...`).
    SequentialSteps,
    /// Never split inside a code block; oversized blocks get their own chunk.
    PreserveCodeBlocks,
    /// Split on blank-line paragraph boundaries.
    #[default]
    TopicBased,
}

/// Classification and chunking parameters for one content category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: ContentCategory,
    /// Lowercase substrings counted against `"{title} {text} {url}"`.
    pub indicators: Vec<String>,
    #[serde(default)]
    pub strategy: ChunkStrategy,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

/// One documentation site to crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Human-readable name used in logs and reports.
    pub name: String,
    /// Crawl seeds. Every seed is fetched unless excluded.
    pub base_urls: Vec<String>,
    /// A discovered link is followed only when its URL contains one of
    /// these substrings.
    #[serde(default)]
    pub discovery_patterns: Vec<String>,
    /// Checked before discovery patterns; any hit rejects the URL.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// CSS selectors tried in order; the first non-empty match wins.
    #[serde(default = "default_title_selectors")]
    pub title_selectors: Vec<String>,
    #[serde(default = "default_content_selectors")]
    pub content_selectors: Vec<String>,
    #[serde(default = "default_code_selectors")]
    pub code_selectors: Vec<String>,
    /// Copied verbatim into the metadata of every chunk from this source.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Pause between request waves, in seconds.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,
    /// Upper bound on in-flight requests.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl SourceConfig {
    /// Politeness delay as a [`Duration`].
    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_seconds.max(0.0))
    }
}

/// Complete scraping + classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub sources: BTreeMap<String, SourceConfig>,
    pub content_classification: Vec<CategoryRule>,
}

impl ScrapeConfig {
    /// Loads a config from a TOML or JSON file, dispatched by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: ScrapeConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(|err| {
                PipelineError::Config(format!("failed to parse {}: {err}", path.display()))
            })?,
            Some("json") => serde_json::from_str(&raw).map_err(|err| {
                PipelineError::Config(format!("failed to parse {}: {err}", path.display()))
            })?,
            other => {
                return Err(PipelineError::Config(format!(
                    "unsupported config extension {:?} for {} (expected .toml or .json)",
                    other.unwrap_or(""),
                    path.display()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Looks up a source definition; unknown keys are a configuration error.
    pub fn source(&self, key: &str) -> Result<&SourceConfig, PipelineError> {
        self.sources.get(key).ok_or_else(|| {
            let known: Vec<&str> = self.sources.keys().map(String::as_str).collect();
            PipelineError::Config(format!(
                "unknown source '{key}' (known sources: {})",
                known.join(", ")
            ))
        })
    }

    /// The classification rule for a category, if one is configured.
    pub fn rule_for(&self, category: ContentCategory) -> Option<&CategoryRule> {
        self.content_classification
            .iter()
            .find(|rule| rule.category == category)
    }

    /// Structural checks applied to every loaded config. Fails fast with a
    /// descriptive message before any page is fetched.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (key, source) in &self.sources {
            if source.base_urls.is_empty() {
                return Err(PipelineError::Config(format!(
                    "source '{key}' has no base_urls"
                )));
            }
            for base in &source.base_urls {
                url::Url::parse(base).map_err(|err| {
                    PipelineError::Config(format!("source '{key}' base url '{base}': {err}"))
                })?;
            }
            if source.max_concurrent == 0 {
                return Err(PipelineError::Config(format!(
                    "source '{key}' max_concurrent must be at least 1"
                )));
            }
            if source.delay_seconds < 0.0 {
                return Err(PipelineError::Config(format!(
                    "source '{key}' delay_seconds must not be negative"
                )));
            }
        }
        for rule in &self.content_classification {
            if rule.chunk_size == 0 {
                return Err(PipelineError::Config(format!(
                    "category '{}' chunk_size must be positive",
                    rule.category
                )));
            }
            if rule.overlap >= rule.chunk_size {
                return Err(PipelineError::Config(format!(
                    "category '{}' overlap ({}) must be smaller than chunk_size ({})",
                    rule.category, rule.overlap, rule.chunk_size
                )));
            }
        }
        Ok(())
    }

    /// Built-in configuration for the Unity documentation sites.
    pub fn builtin() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(
            "unity_manual".to_string(),
            SourceConfig {
                name: "Unity Manual".to_string(),
                base_urls: vec!["https://docs.unity3d.com/Manual/index.html".to_string()],
                discovery_patterns: vec!["/Manual/".to_string()],
                exclude_patterns: vec![
                    "/ScriptReference/".to_string(),
                    "/Packages/".to_string(),
                    "Legacy".to_string(),
                    "Obsolete".to_string(),
                ],
                title_selectors: default_title_selectors(),
                content_selectors: vec![
                    "div.content-block".to_string(),
                    "main".to_string(),
                    "article".to_string(),
                    "div.content".to_string(),
                ],
                code_selectors: default_code_selectors(),
                metadata: base_metadata("unity_manual"),
                delay_seconds: default_delay_seconds(),
                max_concurrent: default_max_concurrent(),
            },
        );
        sources.insert(
            "unity_script_reference".to_string(),
            SourceConfig {
                name: "Unity Scripting Reference".to_string(),
                base_urls: vec!["https://docs.unity3d.com/ScriptReference/index.html".to_string()],
                discovery_patterns: vec!["/ScriptReference/".to_string()],
                exclude_patterns: vec![
                    "/Manual/".to_string(),
                    "-obsolete".to_string(),
                    "30_search".to_string(),
                ],
                title_selectors: default_title_selectors(),
                content_selectors: vec![
                    "div.content-block".to_string(),
                    "main".to_string(),
                    "div.content".to_string(),
                ],
                code_selectors: default_code_selectors(),
                metadata: base_metadata("unity_script_reference"),
                delay_seconds: default_delay_seconds(),
                max_concurrent: default_max_concurrent(),
            },
        );

        // List order doubles as the tie-break priority.
        let content_classification = vec![
            CategoryRule {
                category: ContentCategory::ApiReference,
                indicators: [
                    "scriptreference",
                    "script reference",
                    "api reference",
                    "declaration",
                    "parameters",
                    "returns:",
                    "public method",
                    "inherited members",
                ]
                .map(String::from)
                .to_vec(),
                strategy: ChunkStrategy::PreserveStructure,
                chunk_size: 800,
                overlap: 100,
            },
            CategoryRule {
                category: ContentCategory::Tutorial,
                indicators: [
                    "tutorial",
                    "walkthrough",
                    "step 1",
                    "step-by-step",
                    "lesson",
                    "getting started",
                    "follow along",
                ]
                .map(String::from)
                .to_vec(),
                strategy: ChunkStrategy::SequentialSteps,
                chunk_size: 1200,
                overlap: 200,
            },
            CategoryRule {
                category: ContentCategory::Guide,
                indicators: [
                    "manual",
                    "guide",
                    "overview",
                    "introduction",
                    "workflow",
                    "best practices",
                    "concepts",
                ]
                .map(String::from)
                .to_vec(),
                strategy: ChunkStrategy::TopicBased,
                chunk_size: 1000,
                overlap: 150,
            },
            CategoryRule {
                category: ContentCategory::CodeExample,
                indicators: [
                    "example",
                    "sample code",
                    "snippet",
                    "usage example",
                    "code sample",
                ]
                .map(String::from)
                .to_vec(),
                strategy: ChunkStrategy::PreserveCodeBlocks,
                chunk_size: 1500,
                overlap: 150,
            },
        ];

        ScrapeConfig {
            sources,
            content_classification,
        }
    }
}

fn base_metadata(source: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    map.insert("engine".to_string(), "unity".into());
    map.insert("source".to_string(), source.into());
    map
}

fn default_chunk_size() -> usize {
    1000
}

fn default_overlap() -> usize {
    150
}

fn default_title_selectors() -> Vec<String> {
    vec!["title".to_string(), "h1".to_string()]
}

fn default_content_selectors() -> Vec<String> {
    vec![
        "main".to_string(),
        "article".to_string(),
        "div.content".to_string(),
    ]
}

fn default_code_selectors() -> Vec<String> {
    vec!["pre".to_string(), "code".to_string()]
}

fn default_delay_seconds() -> f64 {
    0.5
}

fn default_max_concurrent() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_config_validates() {
        let config = ScrapeConfig::builtin();
        config.validate().expect("builtin config should be valid");
        assert!(config.sources.contains_key("unity_manual"));
        assert_eq!(
            config.content_classification[0].category,
            ContentCategory::ApiReference,
            "api_reference should have top tie-break priority"
        );
    }

    #[test]
    fn unknown_source_lists_known_keys() {
        let config = ScrapeConfig::builtin();
        let err = config.source("nonexistent").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown source 'nonexistent'"));
        assert!(message.contains("unity_manual"));
    }

    #[test]
    fn loads_toml_config() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"
[sources.docs]
name = "Docs"
base_urls = ["https://docs.example.com/index.html"]
discovery_patterns = ["/docs/"]

[[content_classification]]
category = "guide"
indicators = ["guide"]
chunk_size = 400
overlap = 50
"#
        )
        .unwrap();

        let config = ScrapeConfig::from_file(file.path()).unwrap();
        let source = config.source("docs").unwrap();
        assert_eq!(source.title_selectors, vec!["title", "h1"]);
        assert_eq!(source.max_concurrent, 3);
        let rule = config.rule_for(ContentCategory::Guide).unwrap();
        assert_eq!(rule.strategy, ChunkStrategy::TopicBased);
        assert_eq!(rule.chunk_size, 400);
    }

    #[test]
    fn rejects_unsupported_extension() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        write!(file, "sources: {{}}").unwrap();
        let err = ScrapeConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn rejects_overlap_larger_than_chunk_size() {
        let mut config = ScrapeConfig::builtin();
        config.content_classification[0].overlap = 2000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }
}
