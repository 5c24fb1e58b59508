//! Per-source-type document chunker.
//!
//! Splits a [`RawDocument`] into [`Chunk`]s using the policy selected by its
//! [`SourceType`]. Word counts (whitespace-separated) stand in for tokens.
//!
//! | Policy | Sources | Strategy |
//! |--------|---------|----------|
//! | [`ChunkPolicy::Wiki`] | confluence | heading sections, oversized sections windowed (1000 / 100) |
//! | [`ChunkPolicy::Issue`] | jira | title + description, then comments (windowed 800 / 50) |
//! | [`ChunkPolicy::Code`] | bitbucket | definition boundaries packed into windows of ≤ 1500 |
//! | [`ChunkPolicy::Window`] | filesystem, generic | sliding window (1000 / 100) |
//!
//! # Guarantees
//!
//! - Output is deterministic for identical input.
//! - At least one chunk is returned (even for empty content).
//! - `chunk_index` is contiguous from 0 and `total_chunks` is back-filled
//!   on every chunk of the batch.
//! - No content is dropped: removing window overlaps and joining the chunks
//!   yields the original word sequence.
//!
//! # Example
//!
//! ```rust
//! use docmirror_core::chunk::{ChunkingConfig, ChunkingEngine};
//! use docmirror_core::models::{RawDocument, SourceType};
//!
//! let engine = ChunkingEngine::new(ChunkingConfig::default()).unwrap();
//! let doc = RawDocument::new("Runbook", "# Deploy\n\nRun the pipeline.");
//! let chunks = engine.chunk(&doc, "ext-1", SourceType::Confluence);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].total_chunks, 1);
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::ChunkConfigError;
use crate::models::{Chunk, ChunkType, Comment, RawDocument, SourceType};

/// A word window: at most `max_words` per chunk, consecutive chunks share
/// `overlap_words` words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub max_words: usize,
    pub overlap_words: usize,
}

impl WindowConfig {
    pub const fn new(max_words: usize, overlap_words: usize) -> Self {
        Self {
            max_words,
            overlap_words,
        }
    }

    fn validate(&self, policy: &'static str) -> Result<(), ChunkConfigError> {
        if self.max_words == 0 {
            return Err(ChunkConfigError::ZeroWindow { policy });
        }
        if self.overlap_words >= self.max_words {
            return Err(ChunkConfigError::OverlapTooLarge {
                policy,
                max: self.max_words,
                overlap: self.overlap_words,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub wiki: WindowConfig,
    pub issue: WindowConfig,
    pub code_max_words: usize,
    pub default: WindowConfig,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            wiki: WindowConfig::new(1000, 100),
            issue: WindowConfig::new(800, 50),
            code_max_words: 1500,
            default: WindowConfig::new(1000, 100),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ChunkConfigError> {
        self.wiki.validate("wiki")?;
        self.issue.validate("issue")?;
        self.default.validate("default")?;
        if self.code_max_words == 0 {
            return Err(ChunkConfigError::ZeroWindow { policy: "code" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    Wiki,
    Issue,
    Code,
    Window,
}

impl SourceType {
    pub fn chunk_policy(&self) -> ChunkPolicy {
        match self {
            SourceType::Confluence => ChunkPolicy::Wiki,
            SourceType::Jira => ChunkPolicy::Issue,
            SourceType::Bitbucket => ChunkPolicy::Code,
            SourceType::Filesystem | SourceType::Generic => ChunkPolicy::Window,
        }
    }
}

struct Piece {
    chunk_type: ChunkType,
    text: String,
    metadata: Map<String, Value>,
}

impl Piece {
    fn new(chunk_type: ChunkType, text: &str, metadata: &Map<String, Value>) -> Self {
        Self {
            chunk_type,
            text: text.trim().to_string(),
            metadata: metadata.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkingEngine {
    config: ChunkingConfig,
}

impl ChunkingEngine {
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split `doc` according to the policy of `source_type`.
    pub fn chunk(&self, doc: &RawDocument, external_id: &str, source_type: SourceType) -> Vec<Chunk> {
        let mut pieces = match source_type.chunk_policy() {
            ChunkPolicy::Wiki => self.wiki_pieces(doc),
            ChunkPolicy::Issue => self.issue_pieces(doc),
            ChunkPolicy::Code => self.code_pieces(doc),
            ChunkPolicy::Window => window_pieces(
                &doc.content,
                self.config.default,
                ChunkType::Default,
                &Map::new(),
            ),
        };

        if pieces.is_empty() {
            pieces.push(Piece::new(ChunkType::Default, &doc.content, &Map::new()));
        }

        let mut chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| {
                let mut metadata = piece.metadata;
                metadata.insert("source_type".to_string(), json!(source_type.as_str()));
                Chunk {
                    external_id: external_id.to_string(),
                    chunk_index: index,
                    total_chunks: 0,
                    chunk_type: piece.chunk_type,
                    text: piece.text,
                    metadata,
                }
            })
            .collect();

        let total = chunks.len();
        for chunk in &mut chunks {
            chunk.total_chunks = total;
        }
        chunks
    }

    fn wiki_pieces(&self, doc: &RawDocument) -> Vec<Piece> {
        let window = self.config.wiki;
        let content = doc.content.trim();
        if word_count(content) <= window.max_words {
            return vec![Piece::new(ChunkType::Section, content, &Map::new())];
        }

        let mut pieces = Vec::new();
        for section in split_sections(content) {
            let mut metadata = Map::new();
            if let Some(heading) = section.heading {
                metadata.insert("heading".to_string(), json!(heading));
            }
            if word_count(section.text) <= window.max_words {
                pieces.push(Piece::new(ChunkType::Section, section.text, &metadata));
            } else {
                pieces.extend(window_pieces(
                    section.text,
                    window,
                    ChunkType::SectionPart,
                    &metadata,
                ));
            }
        }
        pieces
    }

    fn issue_pieces(&self, doc: &RawDocument) -> Vec<Piece> {
        let window = self.config.issue;
        let mut pieces = Vec::new();

        let rendered: Vec<String> = doc.comments.iter().map(render_comment).collect();

        let body = match doc.description.as_deref() {
            Some(description) => description.to_string(),
            // Content may already carry the comments; they get their own chunk.
            None => doc
                .content
                .split("\n\n")
                .filter(|para| !rendered.iter().any(|r| r == para.trim()))
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        let main = format!("{}\n\n{}", doc.title, body);
        if !main.trim().is_empty() {
            pieces.push(Piece::new(ChunkType::Main, &main, &Map::new()));
        }

        if doc.comments.is_empty() {
            return pieces;
        }

        let mut authors: Vec<&str> = Vec::new();
        for comment in &doc.comments {
            let author = comment_author(comment);
            if !authors.contains(&author) {
                authors.push(author);
            }
        }
        let text = rendered.join("\n\n");

        let mut metadata = Map::new();
        metadata.insert("comment_authors".to_string(), json!(authors));
        metadata.insert("comment_count".to_string(), json!(doc.comments.len()));

        if word_count(&text) <= window.max_words {
            pieces.push(Piece::new(ChunkType::Comments, &text, &metadata));
        } else {
            pieces.extend(window_pieces(
                &text,
                window,
                ChunkType::CommentsPart,
                &metadata,
            ));
        }
        pieces
    }

    fn code_pieces(&self, doc: &RawDocument) -> Vec<Piece> {
        let max = self.config.code_max_words;
        let content = doc.content.as_str();

        let mut metadata = Map::new();
        if let Some(path) = &doc.file_path {
            metadata.insert("file_path".to_string(), json!(path));
        }
        if let Some(language) = &doc.language {
            metadata.insert("language".to_string(), json!(language));
        }

        if word_count(content) <= max {
            return vec![Piece::new(ChunkType::CodeBlock, content, &metadata)];
        }

        let mut pieces = Vec::new();
        let mut window_start = 0usize;
        let mut window_words = 0usize;

        for (seg_start, seg_end) in segment_bounds(content) {
            let seg_words = word_count(&content[seg_start..seg_end]);

            if window_words > 0 && window_words + seg_words > max {
                pieces.push(Piece::new(
                    ChunkType::CodeBlock,
                    &content[window_start..seg_start],
                    &metadata,
                ));
                window_start = seg_start;
                window_words = 0;
            }

            if seg_words > max {
                // A single definition larger than the limit: hard split, no overlap.
                for part in sliding_window(&content[window_start..seg_end], max, 0) {
                    pieces.push(Piece::new(ChunkType::CodeBlock, part, &metadata));
                }
                window_start = seg_end;
                continue;
            }

            window_words += seg_words;
        }

        let rest = &content[window_start..];
        if !rest.trim().is_empty() {
            pieces.push(Piece::new(ChunkType::CodeBlock, rest, &metadata));
        }
        pieces
    }
}

fn comment_author(comment: &Comment) -> &str {
    if comment.author.trim().is_empty() {
        "Unknown"
    } else {
        comment.author.as_str()
    }
}

fn render_comment(comment: &Comment) -> String {
    format!("Comment by {}: {}", comment_author(comment), comment.body)
}

fn window_pieces(
    text: &str,
    window: WindowConfig,
    chunk_type: ChunkType,
    metadata: &Map<String, Value>,
) -> Vec<Piece> {
    sliding_window(text, window.max_words, window.overlap_words)
        .into_iter()
        .map(|part| Piece::new(chunk_type, part, metadata))
        .collect()
}

/// Number of whitespace-separated words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Byte spans of every whitespace-separated word.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Split `text` into windows of at most `max_words` words where each window
/// starts `max_words - overlap_words` words after the previous one.
///
/// Windows are slices of the original text, so the whitespace inside a
/// window is preserved. The last window always ends at the last word; no
/// window consists solely of overlap.
pub fn sliding_window(text: &str, max_words: usize, overlap_words: usize) -> Vec<&str> {
    let spans = word_spans(text);
    if spans.is_empty() {
        return Vec::new();
    }
    let max_words = max_words.max(1);
    let step = max_words.saturating_sub(overlap_words).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max_words).min(spans.len());
        windows.push(&text[spans[start].0..spans[end - 1].1]);
        if end == spans.len() {
            break;
        }
        start += step;
    }
    windows
}

struct Section<'a> {
    heading: Option<String>,
    text: &'a str,
}

fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^(?:#{1,6}[ \t]+\S.*|[A-Z][^.!?\n]*:)[ \t]*$").expect("valid heading regex")
    })
}

fn code_boundary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:(?:(?:pub(?:\([^)\n]*\))?|export|async|public|private|protected|static|abstract|final)[ \t]+)*(?:def|function|func|fn|class|struct|enum|trait|impl|interface|module)\b|(?:public|private|protected)[ \t]+[A-Za-z_])",
        )
        .expect("valid code boundary regex")
    })
}

/// Split wiki content at heading lines. Text before the first heading is its
/// own section.
fn split_sections(content: &str) -> Vec<Section<'_>> {
    let headings: Vec<(usize, &str)> = heading_pattern()
        .find_iter(content)
        .map(|m| (m.start(), m.as_str()))
        .collect();

    let mut sections = Vec::new();
    let first_start = headings.first().map(|(s, _)| *s).unwrap_or(content.len());
    let preamble = content[..first_start].trim();
    if !preamble.is_empty() {
        sections.push(Section {
            heading: None,
            text: preamble,
        });
    }

    for (i, (start, line)) in headings.iter().enumerate() {
        let end = headings
            .get(i + 1)
            .map(|(next, _)| *next)
            .unwrap_or(content.len());
        let text = content[*start..end].trim();
        if text.is_empty() {
            continue;
        }
        let heading = line.trim().trim_start_matches('#').trim().trim_end_matches(':');
        sections.push(Section {
            heading: Some(heading.trim().to_string()),
            text,
        });
    }
    sections
}

/// Contiguous byte ranges of `content`, each starting at a definition
/// boundary (the first range may be a preamble).
fn segment_bounds(content: &str) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut prev = 0;
    for m in code_boundary_pattern().find_iter(content) {
        if m.start() > prev {
            bounds.push((prev, m.start()));
            prev = m.start();
        }
    }
    bounds.push((prev, content.len()));
    bounds
}
