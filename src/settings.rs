//! Runtime settings resolved once at startup and passed by reference.
//!
//! Nothing in the crate reads the environment after [`Settings::from_env`]
//! returns; components receive `&Settings` (or the specific fields they
//! need) explicitly.
//!
//! Recognized variables, all optional:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DOCSMITH_EMBED_API_KEY` (falls back to `OPENAI_API_KEY`) | unset |
//! | `DOCSMITH_EMBED_API_URL` | `https://api.openai.com/v1/embeddings` |
//! | `DOCSMITH_EMBED_MODEL` | `text-embedding-3-small` |
//! | `DOCSMITH_EMBED_DIMENSION` | `1536` |
//! | `DOCSMITH_INDEX_URL` | unset |
//! | `DOCSMITH_INDEX_API_KEY` | unset |
//! | `DOCSMITH_INDEX_NAME` | `docs-knowledge` |
//! | `DOCSMITH_NAMESPACE` | empty |
//! | `DOCSMITH_MAX_PAGES` | `50` |
//! | `DOCSMITH_REQUEST_TIMEOUT_SECS` | `30` |
//! | `DOCSMITH_USER_AGENT` | `docsmith-ingestor/<version>` |
//!
//! Unparsable numeric values fall back to the default and emit a warning
//! naming the variable, the rejected value, and the default applied.

use std::env;
use std::fmt;
use std::time::Duration;

use serde_json::json;

use crate::types::DEFAULT_DIMENSION;

const DEFAULT_EMBED_API_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_INDEX_NAME: &str = "docs-knowledge";
const DEFAULT_MAX_PAGES: usize = 50;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!("docsmith-ingestor/", env!("CARGO_PKG_VERSION"));

/// Placeholder value shipped in sample `.env` files; treated as unset.
const API_KEY_PLACEHOLDER: &str = "your_api_key_here";

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Key for the hosted embedding API. `None` selects the local fallback.
    pub embed_api_key: Option<String>,
    /// Embeddings endpoint; overridable so tests can point at a mock server.
    pub embed_api_url: String,
    pub embed_model: String,
    /// Target embedding width. Every produced vector has exactly this length.
    pub dimension: usize,
    /// Vector index data-plane base URL; required before any population run.
    pub index_url: Option<String>,
    pub index_api_key: Option<String>,
    pub index_name: String,
    /// Default namespace for upserts and queries; empty selects the
    /// index-level default namespace.
    pub namespace: String,
    /// Default crawl budget when a population request does not set one.
    pub max_pages: usize,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embed_api_key: None,
            embed_api_url: DEFAULT_EMBED_API_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            index_url: None,
            index_api_key: None,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            namespace: String::new(),
            max_pages: DEFAULT_MAX_PAGES,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Settings {
    /// Builds settings from the process environment, loading `.env` first.
    ///
    /// Never fails: missing variables take their documented defaults and
    /// malformed numeric values fall back with a warning.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Settings::default();
        Settings {
            embed_api_key: env_var("DOCSMITH_EMBED_API_KEY").or_else(|| env_var("OPENAI_API_KEY")),
            embed_api_url: env_var("DOCSMITH_EMBED_API_URL").unwrap_or(defaults.embed_api_url),
            embed_model: env_var("DOCSMITH_EMBED_MODEL").unwrap_or(defaults.embed_model),
            dimension: parse_or_default("DOCSMITH_EMBED_DIMENSION", defaults.dimension),
            index_url: env_var("DOCSMITH_INDEX_URL"),
            index_api_key: env_var("DOCSMITH_INDEX_API_KEY"),
            index_name: env_var("DOCSMITH_INDEX_NAME").unwrap_or(defaults.index_name),
            namespace: env_var("DOCSMITH_NAMESPACE").unwrap_or(defaults.namespace),
            max_pages: parse_or_default("DOCSMITH_MAX_PAGES", defaults.max_pages),
            request_timeout: Duration::from_secs(parse_or_default(
                "DOCSMITH_REQUEST_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )),
            user_agent: env_var("DOCSMITH_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    /// True when a usable embedding API key is configured.
    pub fn has_embed_api(&self) -> bool {
        self.embed_api_key
            .as_deref()
            .is_some_and(|key| !key.is_empty() && key != API_KEY_PLACEHOLDER)
    }

    /// Redacted view for logs and status output. Secrets appear as short
    /// previews, never in full.
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "embed_api": self.has_embed_api(),
            "embed_api_key": self.embed_api_key.as_deref().map(key_preview),
            "embed_model": self.embed_model,
            "dimension": self.dimension,
            "index_url": self.index_url,
            "index_api_key": self.index_api_key.as_deref().map(key_preview),
            "index_name": self.index_name,
            "namespace": self.namespace,
            "max_pages": self.max_pages,
            "request_timeout_secs": self.request_timeout.as_secs(),
        })
    }
}

/// Reads a variable, mapping unset and empty to `None`.
fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parses an env variable, falling back to `default` with a warning when the
/// value is present but malformed. The default stays visible at the call
/// site.
fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + fmt::Display,
{
    parse_value_or(key, env_var(key), default)
}

fn parse_value_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + fmt::Display,
{
    match raw {
        None => default,
        Some(value) => match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(
                    variable = key,
                    rejected = %value,
                    default = %default,
                    "could not parse environment variable, using default"
                );
                default
            }
        },
    }
}

fn key_preview(key: &str) -> String {
    let head: String = key.chars().take(8).collect();
    format!("{head}...")
}
