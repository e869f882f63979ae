//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and three implementations:
//!
//! - [`ParagraphChunker`] - packs blank-line separated paragraphs into chunks with overlap
//! - [`HeadingChunker`] - starts a new chunk at every markdown heading, tracking chapter context
//! - [`SentenceChunker`] - packs sentences (ASCII and CJK punctuation) into chunks with overlap
//!
//! Sizes are measured in characters, not bytes.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::{Chunk, ChunkMetadata};

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\r?\n[ \t]*){2,}").expect("unreachable error: invalid paragraph pattern")
});

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(#{1,4})\s+(.+)$").expect("unreachable error: invalid heading pattern")
});

/// A strategy for splitting document text into chunks.
///
/// Implementations produce [`Chunk`]s in document order with ids of the form
/// `{document_id}_chunk_{index}` and no embedding. Empty or whitespace-only
/// text yields no chunks.
pub trait Chunker: Send + Sync {
    /// Split `text` belonging to `document_id` into chunks.
    fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk>;
}

/// Which [`Chunker`] to use for a document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// [`ParagraphChunker`].
    #[default]
    Paragraph,
    /// [`HeadingChunker`].
    Heading,
    /// [`SentenceChunker`].
    Sentence,
}

/// Options for [`chunk_text`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Nominal maximum chunk size in characters.
    pub chunk_size: usize,
    /// Characters of the previous chunk repeated at the start of the next one.
    pub chunk_overlap: usize,
    pub strategy: ChunkStrategy,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 200, strategy: ChunkStrategy::Paragraph }
    }
}

/// Split `text` with the chunker selected by `options.strategy`.
pub fn chunk_text(text: &str, document_id: &str, options: &ChunkOptions) -> Vec<Chunk> {
    match options.strategy {
        ChunkStrategy::Paragraph => {
            let chunker = ParagraphChunker::new(options.chunk_size, options.chunk_overlap);
            chunker.chunk(text, document_id)
        }
        ChunkStrategy::Heading => HeadingChunker::new().chunk(text, document_id),
        ChunkStrategy::Sentence => {
            let chunker = SentenceChunker::new(options.chunk_size, options.chunk_overlap);
            chunker.chunk(text, document_id)
        }
    }
}

/// Packs paragraphs (separated by blank lines) into chunks of roughly
/// `chunk_size` characters.
///
/// When the next paragraph would push a non-empty buffer past `chunk_size`,
/// the buffer is emitted and the next chunk starts with the trailing
/// `chunk_overlap` characters of the emitted one. A paragraph longer than
/// `chunk_size` is never split, so chunks may exceed the nominal size.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{Chunker, ParagraphChunker};
///
/// let chunker = ParagraphChunker::new(1000, 200);
/// let chunks = chunker.chunk(&text, "doc-1");
/// ```
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ParagraphChunker {
    /// Create a new `ParagraphChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - nominal maximum number of characters per chunk
    /// * `chunk_overlap` - number of characters carried into the next chunk
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap }
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let mut packer = OverlapPacker::new(self.chunk_size, self.chunk_overlap, "\n\n");
        for paragraph in PARAGRAPH_BREAK.split(text) {
            packer.push(paragraph.trim());
        }
        packer.into_chunks(document_id)
    }
}

/// Packs sentences into chunks with the same overlap rules as
/// [`ParagraphChunker`].
///
/// Sentences end at `。`, `！`, `？` unconditionally and at `.`, `!`, `?` when
/// followed by whitespace or end of text, so decimals and abbreviations like
/// `3.14` stay intact. Terminators are kept with their sentence; sentences in
/// a chunk are joined with a single space.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl SentenceChunker {
    /// Create a new `SentenceChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - nominal maximum number of characters per chunk
    /// * `chunk_overlap` - number of characters carried into the next chunk
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap }
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let mut packer = OverlapPacker::new(self.chunk_size, self.chunk_overlap, " ");
        for sentence in split_sentences(text) {
            packer.push(sentence);
        }
        packer.into_chunks(document_id)
    }
}

fn is_cjk_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?') || is_cjk_terminator(c)
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’' | '」' | '』' | '）')
}

/// Split text into trimmed, non-empty sentences with their terminators.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }

        // Absorb runs like "?!" or "..." and trailing closing quotes.
        let mut end = pos + c.len_utf8();
        let mut cjk = is_cjk_terminator(c);
        while let Some(&(next_pos, next)) = chars.peek() {
            if is_terminator(next) || is_closer(next) {
                cjk |= is_cjk_terminator(next);
                end = next_pos + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        let at_boundary = cjk || chars.peek().is_none_or(|(_, next)| next.is_whitespace());
        if at_boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Starts a new chunk at every markdown heading (`#` to `####`).
///
/// Level 1 headings set the chapter and clear section and subsection, level 2
/// set the section and clear the subsection, level 3 set the subsection.
/// When a heading arrives, the accumulated text is emitted with the context
/// that was in effect for it, then the buffer restarts with the heading line.
/// Chunk size is not enforced: each section stays whole.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadingChunker;

impl HeadingChunker {
    /// Create a new `HeadingChunker`.
    pub fn new() -> Self {
        Self
    }
}

/// Heading context in effect for the text being accumulated.
#[derive(Debug, Clone, Default)]
struct HeadingContext {
    chapter: Option<String>,
    section: Option<String>,
    subsection: Option<String>,
    level: Option<u8>,
}

impl HeadingContext {
    fn enter(&mut self, level: u8, title: &str) {
        let title = Some(title.to_string());
        match level {
            1 => {
                self.chapter = title;
                self.section = None;
                self.subsection = None;
            }
            2 => {
                self.section = title;
                self.subsection = None;
            }
            3 => self.subsection = title,
            _ => {}
        }
        self.level = Some(level);
    }

    fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            chapter: self.chapter.clone(),
            section: self.section.clone(),
            subsection: self.subsection.clone(),
            header_level: self.level,
            ..Default::default()
        }
    }
}

impl Chunker for HeadingChunker {
    fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut context = HeadingContext::default();
        let mut buffer = String::new();

        let mut flush = |buffer: &mut String, context: &HeadingContext| {
            let body = buffer.trim();
            if !body.is_empty() {
                let index = chunks.len();
                chunks.push(Chunk::new(document_id, body, context.metadata(), index));
            }
            buffer.clear();
        };

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(caps) = HEADING.captures(line) {
                flush(&mut buffer, &context);
                let level = caps[1].len() as u8;
                context.enter(level, caps[2].trim());
            }
            buffer.push_str(line);
            buffer.push('\n');
        }
        flush(&mut buffer, &context);

        chunks
    }
}

/// Accumulates trimmed segments into chunks, seeding each new chunk with the
/// tail of the previous one.
struct OverlapPacker {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: &'static str,
    buffer: String,
    buffer_chars: usize,
    overlap_chars: usize,
    emitted: Vec<(String, usize)>,
}

impl OverlapPacker {
    fn new(chunk_size: usize, chunk_overlap: usize, separator: &'static str) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separator,
            buffer: String::new(),
            buffer_chars: 0,
            overlap_chars: 0,
            emitted: Vec::new(),
        }
    }

    fn push(&mut self, segment: &str) {
        if segment.is_empty() {
            return;
        }
        let segment_chars = segment.chars().count();

        if self.buffer_chars > 0 && self.buffer_chars + segment_chars > self.chunk_size {
            let overlap = tail_chars(&self.buffer, self.chunk_overlap).trim_start().to_string();
            let finished = std::mem::take(&mut self.buffer);
            self.emitted.push((finished, self.overlap_chars));
            self.buffer_chars = 0;
            self.overlap_chars = 0;

            if !overlap.is_empty() {
                self.buffer.push_str(&overlap);
                self.buffer.push_str(self.separator);
                self.overlap_chars = overlap.chars().count() + self.separator.chars().count();
                self.buffer_chars = self.overlap_chars;
            }
        } else if self.buffer_chars > 0 {
            self.buffer.push_str(self.separator);
            self.buffer_chars += self.separator.chars().count();
        }

        self.buffer.push_str(segment);
        self.buffer_chars += segment_chars;
    }

    fn into_chunks(mut self, document_id: &str) -> Vec<Chunk> {
        if self.buffer_chars > 0 {
            let finished = std::mem::take(&mut self.buffer);
            self.emitted.push((finished, self.overlap_chars));
        }

        self.emitted
            .into_iter()
            .enumerate()
            .map(|(index, (content, overlap_chars))| {
                let metadata = ChunkMetadata { overlap_chars, ..Default::default() };
                Chunk::new(document_id, content, metadata, index)
            })
            .collect()
    }
}

/// The last `n` characters of `text`, or all of it when shorter.
fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let total = text.chars().count();
    if total <= n {
        return text;
    }
    match text.char_indices().nth(total - n) {
        Some((pos, _)) => &text[pos..],
        None => text,
    }
}
