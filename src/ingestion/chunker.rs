//! Category-specific chunking with overlap.
//!
//! Every category maps to one of four strategies:
//!
//! * `preserve_structure` — split before definition labels (`word:`),
//!   numbered items, and single-word heading lines.
//! * `sequential_steps` — split before step markers (`Step 3`, `2.`,
//!   `Part 1:`, markdown headings); the overlap seed is doubled so a step
//!   keeps its lead-in.
//! * `preserve_code_blocks` — code blocks never split; an oversized block
//!   becomes its own chunk and code never receives an overlap seed.
//! * `topic_based` — split on blank-line paragraph boundaries.
//!
//! All strategies share the same accumulate loop: sections are appended
//! until the next one would push the chunk past `chunk_size` characters,
//! then the chunk is flushed and the next one is seeded with the tail of
//! the previous chunk. Chunking is pure; identical input always produces
//! identical chunks, and chunk ids are derived from content hashes so
//! re-ingesting unchanged pages overwrites rather than duplicates.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ingestion::classify::ContentClassifier;
use crate::ingestion::fetcher::FetchedPage;
use crate::sources::{ChunkStrategy, ScrapeConfig};
use crate::types::{ContentCategory, PipelineError};

/// Chunks shorter than this (after trimming) are dropped. Indices still
/// count the dropped positions so `chunk_index` gaps reveal the drops.
const MIN_CHUNK_CHARS: usize = 50;

/// Section boundaries for `preserve_structure`.
const STRUCTURE_BOUNDARY: &str = r"(?m)^(?:\w+:|\d+\.|\w+[ \t]*$)";
/// Section boundaries for `sequential_steps`.
const STEPS_BOUNDARY: &str = r"(?m)^(?:Step\s+\d+|\d+\.\s|\w+\s+\d+:|##?\s)";
/// Markers that flag a chunk as carrying code.
const CODE_MARKER: &str = r"```|`[^`]+`|\bclass\b|\bdef\b|\bfunction\b";

/// Navigation artifacts dropped when they make up a whole line.
const ARTIFACT_LINES: [&str; 9] = [
    "home",
    "navigation",
    "menu",
    "search",
    "login",
    "register",
    "table of contents",
    "skip to content",
    "skip to main content",
];

/// One chunk ready for embedding and upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocChunk {
    /// `"{content_hash}_{chunk_index}"`; stable across runs for unchanged
    /// content.
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Metadata stored alongside every chunk.
///
/// Deliberately carries no timestamp: re-chunking the same page must yield
/// byte-identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source key the page was crawled under.
    pub source: String,
    pub source_url: String,
    pub title: String,
    pub content_type: ContentCategory,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content_hash: String,
    pub chunk_chars: usize,
    pub has_code: bool,
    /// Source-level metadata copied onto every chunk.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Counters from chunking a batch of pages.
#[derive(Debug, Clone, Default)]
pub struct ChunkingOutcome {
    pub chunks: Vec<DocChunk>,
    pub pages: usize,
    /// Chunks dropped for being shorter than the minimum.
    pub skipped_short: usize,
}

#[derive(Debug, Clone, Copy)]
struct ChunkParams {
    strategy: ChunkStrategy,
    chunk_size: usize,
    overlap: usize,
}

const DEFAULT_PARAMS: ChunkParams = ChunkParams {
    strategy: ChunkStrategy::TopicBased,
    chunk_size: 1000,
    overlap: 150,
};

/// Classifier + chunker over one [`ScrapeConfig`].
pub struct DocumentChunker {
    classifier: ContentClassifier,
    params: HashMap<ContentCategory, ChunkParams>,
    source_metadata: HashMap<String, serde_json::Map<String, serde_json::Value>>,
    structure_boundary: Regex,
    steps_boundary: Regex,
    code_marker: Regex,
}

impl DocumentChunker {
    pub fn new(config: &ScrapeConfig) -> Result<Self, PipelineError> {
        let params = config
            .content_classification
            .iter()
            .map(|rule| {
                (
                    rule.category,
                    ChunkParams {
                        strategy: rule.strategy,
                        chunk_size: rule.chunk_size,
                        overlap: rule.overlap,
                    },
                )
            })
            .collect();
        let source_metadata = config
            .sources
            .iter()
            .map(|(key, source)| (key.clone(), source.metadata.clone()))
            .collect();

        Ok(Self {
            classifier: ContentClassifier::new(&config.content_classification),
            params,
            source_metadata,
            structure_boundary: compile(STRUCTURE_BOUNDARY)?,
            steps_boundary: compile(STEPS_BOUNDARY)?,
            code_marker: compile(CODE_MARKER)?,
        })
    }

    /// Classifies the page and chunks it with the category's strategy.
    pub fn chunk_page(&self, page: &FetchedPage) -> (ContentCategory, Vec<DocChunk>) {
        let category = self.classifier.classify_page(page);
        (category, self.chunk_as(page, category))
    }

    /// Chunks a page under an explicit category.
    pub fn chunk_as(&self, page: &FetchedPage, category: ContentCategory) -> Vec<DocChunk> {
        self.assemble(page, category).0
    }

    /// Classifies and chunks every page, collecting batch counters.
    pub fn process(&self, pages: &[FetchedPage]) -> ChunkingOutcome {
        let mut outcome = ChunkingOutcome::default();
        for page in pages {
            let category = self.classifier.classify_page(page);
            let (chunks, skipped) = self.assemble(page, category);
            tracing::debug!(
                url = %page.url,
                category = %category,
                chunks = chunks.len(),
                "page chunked"
            );
            outcome.chunks.extend(chunks);
            outcome.skipped_short += skipped;
            outcome.pages += 1;
        }
        outcome
    }

    fn assemble(&self, page: &FetchedPage, category: ContentCategory) -> (Vec<DocChunk>, usize) {
        let params = self
            .params
            .get(&category)
            .copied()
            .unwrap_or(DEFAULT_PARAMS);
        let content = clean_text(&page.text);

        let raw_chunks = match params.strategy {
            ChunkStrategy::PreserveStructure => {
                let sections = split_at_boundaries(&content, &self.structure_boundary);
                accumulate(&sections, params.chunk_size, params.overlap)
            }
            ChunkStrategy::SequentialSteps => {
                let sections = split_at_boundaries(&content, &self.steps_boundary);
                // Doubled overlap keeps the previous step's tail in view.
                accumulate(&sections, params.chunk_size, params.overlap * 2)
            }
            ChunkStrategy::PreserveCodeBlocks => {
                let cleaned_code: Vec<String> =
                    page.code_blocks.iter().map(|code| clean_text(code)).collect();
                chunk_with_code(&content, &cleaned_code, params.chunk_size, params.overlap)
            }
            ChunkStrategy::TopicBased => {
                let sections = paragraphs(&content);
                accumulate(&sections, params.chunk_size, params.overlap)
            }
        };

        let total = raw_chunks.len();
        let mut chunks = Vec::with_capacity(total);
        let mut skipped = 0usize;
        for (index, text) in raw_chunks.iter().enumerate() {
            let trimmed = text.trim();
            if char_len(trimmed) < MIN_CHUNK_CHARS {
                skipped += 1;
                continue;
            }
            let hash = content_hash(trimmed);
            chunks.push(DocChunk {
                id: format!("{hash}_{index}"),
                content: trimmed.to_string(),
                metadata: ChunkMetadata {
                    source: page.source.clone(),
                    source_url: page.url.clone(),
                    title: page.title.clone(),
                    content_type: category,
                    chunk_index: index,
                    total_chunks: total,
                    content_hash: hash,
                    chunk_chars: char_len(trimmed),
                    has_code: self.code_marker.is_match(trimmed),
                    extra: self
                        .source_metadata
                        .get(&page.source)
                        .cloned()
                        .unwrap_or_default(),
                },
            });
        }
        (chunks, skipped)
    }
}

fn compile(pattern: &str) -> Result<Regex, PipelineError> {
    Regex::new(pattern).map_err(|err| PipelineError::Chunking(format!("bad pattern: {err}")))
}

/// Normalizes text while keeping the line structure the strategies split on:
/// line ends are trimmed, whole-line navigation artifacts are dropped, and
/// runs of three or more newlines collapse to a blank line.
fn clean_text(raw: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;
    for line in raw.lines() {
        let line = line.trim_end();
        let lowered = line.trim_start().to_lowercase();
        if ARTIFACT_LINES.contains(&lowered.as_str()) {
            continue;
        }
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line);
    }
    // Drop leading/trailing blank lines.
    while out.first().is_some_and(|line| line.is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|line| line.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn paragraphs(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits at the start of every boundary match. The boundary patterns are
/// line-anchored, so every section starts on a line of its own.
fn split_at_boundaries(content: &str, boundary: &Regex) -> Vec<String> {
    let mut starts: Vec<usize> = boundary.find_iter(content).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    let mut sections = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(content.len());
        let section = content[start..end].trim();
        if !section.is_empty() {
            sections.push(section.to_string());
        }
    }
    sections
}

/// Shared accumulate loop: flush when the next section would overflow, and
/// seed the next chunk with the tail of the flushed one.
fn accumulate(sections: &[String], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for section in sections {
        if !current.is_empty() && char_len(&current) + char_len(section) > chunk_size {
            chunks.push(current.trim().to_string());
            let seed = overlap_seed(&current, overlap);
            current = if seed.is_empty() {
                section.clone()
            } else {
                format!("{seed}\n\n{section}")
            };
        } else if current.is_empty() {
            current = section.clone();
        } else {
            current.push_str("\n\n");
            current.push_str(section);
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Code-aware accumulation. Code sections stay atomic: an oversized code
/// block is emitted as its own chunk, and a chunk starting with code gets no
/// overlap seed. Prose between code blocks is paragraph-split and flows
/// through the normal overlap rules.
fn chunk_with_code(
    content: &str,
    code_blocks: &[String],
    chunk_size: usize,
    overlap: usize,
) -> Vec<String> {
    enum Section<'a> {
        Text(String),
        Code(&'a str),
    }

    let mut spans: Vec<(usize, usize)> = Vec::new();
    for code in code_blocks {
        if code.trim().is_empty() {
            continue;
        }
        if let Some(pos) = content.find(code.as_str()) {
            spans.push((pos, pos + code.len()));
        }
    }
    spans.sort_unstable();

    let mut sections: Vec<Section<'_>> = Vec::new();
    let mut cursor = 0usize;
    for (start, end) in spans {
        if start < cursor {
            // Overlapping span, usually a <code> nested in a matched <pre>.
            continue;
        }
        if start > cursor {
            for paragraph in paragraphs(&content[cursor..start]) {
                sections.push(Section::Text(paragraph));
            }
        }
        sections.push(Section::Code(content[start..end].trim()));
        cursor = end;
    }
    for paragraph in paragraphs(&content[cursor..]) {
        sections.push(Section::Text(paragraph));
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for section in &sections {
        match section {
            Section::Code(code) => {
                let code_len = char_len(code);
                if !current.is_empty() && char_len(&current) + code_len > chunk_size {
                    chunks.push(current.trim().to_string());
                    current = String::new();
                }
                if code_len > chunk_size {
                    if !current.is_empty() {
                        chunks.push(current.trim().to_string());
                        current = String::new();
                    }
                    chunks.push((*code).to_string());
                } else if current.is_empty() {
                    current = (*code).to_string();
                } else {
                    current.push_str("\n\n");
                    current.push_str(code);
                }
            }
            Section::Text(paragraph) => {
                if !current.is_empty() && char_len(&current) + char_len(paragraph) > chunk_size {
                    chunks.push(current.trim().to_string());
                    let seed = overlap_seed(&current, overlap);
                    current = if seed.is_empty() {
                        paragraph.clone()
                    } else {
                        format!("{seed}\n\n{paragraph}")
                    };
                } else if current.is_empty() {
                    current = paragraph.clone();
                } else {
                    current.push_str("\n\n");
                    current.push_str(paragraph);
                }
            }
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Tail of `text` used to seed the next chunk. When a sentence end falls in
/// the later half of the overlap window, the seed starts just after it so
/// chunks do not open mid-sentence. The window's final character is ignored
/// when looking for sentence ends; a chunk that ends exactly on a period
/// still seeds its last full sentence.
fn overlap_seed(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    if char_len(text) <= overlap {
        return text.to_string();
    }
    let tail = char_tail(text, overlap);
    let search_end = tail
        .char_indices()
        .next_back()
        .map_or(0, |(idx, _)| idx);
    if let Some(byte_pos) = tail[..search_end].rfind('.') {
        let char_pos = tail[..byte_pos].chars().count();
        if char_pos > overlap / 2 {
            return tail[byte_pos..]
                .trim_start_matches('.')
                .trim_start()
                .to_string();
        }
    }
    tail.to_string()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Last `n` characters of `text` (not bytes; slicing must not split a
/// multi-byte character).
fn char_tail(text: &str, n: usize) -> &str {
    let total = char_len(text);
    if total <= n {
        return text;
    }
    match text.char_indices().nth(total - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

fn content_hash(text: &str) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
