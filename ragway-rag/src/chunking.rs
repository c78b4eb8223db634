//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and three implementations:
//!
//! - [`FixedSizeChunker`] - hard character windows with configurable overlap
//! - [`SentenceChunker`] - packs whole sentences up to the size limit
//! - [`RecursiveChunker`] - splits by paragraphs, lines, sentences, then words
//!
//! Sizes are measured in characters. Every strategy drops whitespace-only
//! pieces and numbers its output from zero without gaps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Chunk size used when the requested size is zero.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Overlap used by [`ChunkOptions::default`].
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const RECURSIVE_SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// How text is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed character windows.
    Fixed,
    /// Whole sentences packed up to the size limit.
    Sentence,
    /// Coarse-to-fine separator splitting.
    #[default]
    Recursive,
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fixed => "fixed",
            Self::Sentence => "sentence",
            Self::Recursive => "recursive",
        })
    }
}

impl FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "sentence" => Ok(Self::Sentence),
            "recursive" => Ok(Self::Recursive),
            other => Err(format!("unknown chunk strategy '{other}'")),
        }
    }
}

/// Parameters for [`chunk_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Target chunk size in characters.
    pub size: usize,
    /// Characters shared by consecutive fixed-size windows.
    pub overlap: usize,
    /// Splitting strategy.
    pub strategy: ChunkStrategy,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            strategy: ChunkStrategy::Recursive,
        }
    }
}

impl ChunkOptions {
    /// Options for `strategy` with the given size and overlap.
    pub fn new(size: usize, overlap: usize, strategy: ChunkStrategy) -> Self {
        Self { size, overlap, strategy }
    }
}

/// One piece of chunked text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// The chunk text.
    pub content: String,
    /// Zero-based position in the chunker's output.
    pub index: usize,
    /// Estimated token count of `content`.
    pub token_count: usize,
}

/// A strategy for splitting text into chunks.
pub trait Chunker: Send + Sync {
    /// Split `text` into ordered chunks. Empty or whitespace-only input
    /// yields no chunks.
    fn chunk(&self, text: &str) -> Vec<TextChunk>;
}

/// Splits text into fixed-size character windows.
///
/// Windows advance by `chunk_size - chunk_overlap`, or by the full
/// `chunk_size` when the overlap is not smaller than the size. The window
/// that reaches the end of the text is the last one.
///
/// # Example
///
/// ```rust
/// use ragway_rag::chunking::{Chunker, FixedSizeChunker};
///
/// let chunks = FixedSizeChunker::new(4, 0).chunk("abcdefghij");
/// let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
/// assert_eq!(texts, ["abcd", "efgh", "ij"]);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - maximum number of characters per chunk
    /// * `chunk_overlap` - number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: effective_size(chunk_size), chunk_overlap }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let step = if self.chunk_overlap >= self.chunk_size {
            self.chunk_size
        } else {
            self.chunk_size - self.chunk_overlap
        };

        let mut pieces = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            pieces.push(chars[start..end].iter().collect::<String>());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        number(pieces)
    }
}

/// Packs whole sentences into chunks of at most `chunk_size` characters.
///
/// Sentences end at `.`, `!` or `?` followed by whitespace. A single
/// sentence longer than the limit becomes its own chunk.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    chunk_size: usize,
}

impl SentenceChunker {
    /// Create a new `SentenceChunker`.
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: effective_size(chunk_size) }
    }
}

/// Split after sentence-ending punctuation that is followed by whitespace.
/// The whitespace stays with the following sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((next, following)) = chars.peek() {
                if following.is_whitespace() {
                    sentences.push(&text[start..*next]);
                    start = *next;
                }
            }
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for sentence in split_sentences(text) {
            let sentence_len = sentence.chars().count();
            if current_len > 0 && current_len + sentence_len > self.chunk_size {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push_str(sentence);
            current_len += sentence_len;
        }
        if !current.is_empty() {
            pieces.push(current);
        }

        number(pieces.into_iter().map(|p| p.trim().to_string()).collect())
    }
}

/// Splits text hierarchically: paragraphs, lines, sentences, then words.
///
/// Splits on the coarsest separator first and merges neighbouring segments
/// while they fit in `chunk_size`. Oversized pieces are split again with
/// the next separator. A piece that no separator can reduce (one very long
/// word) is returned whole.
///
/// # Example
///
/// ```rust
/// use ragway_rag::chunking::{Chunker, RecursiveChunker};
///
/// let chunks = RecursiveChunker::new(20).chunk("First paragraph.\n\nSecond paragraph.");
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[1].content, "Second paragraph.");
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: effective_size(chunk_size) }
    }
}

/// Split text by a separator, then merge segments into chunks that respect
/// `chunk_size`. If a merged chunk exceeds `chunk_size`, it is split further
/// using the next-level separator.
fn split_and_merge(text: &str, chunk_size: usize, separators: &[&str]) -> Vec<String> {
    if char_len(text) <= chunk_size {
        return vec![text.to_string()];
    }
    let Some((separator, remaining_separators)) = separators.split_first() else {
        return vec![text.to_string()];
    };

    let segments = split_keeping_separator(text, separator);
    if segments.len() <= 1 {
        return split_and_merge(text, chunk_size, remaining_separators);
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for segment in segments {
        let segment_len = char_len(segment);
        if current_len > 0 && current_len + segment_len > chunk_size {
            flush(&mut chunks, std::mem::take(&mut current), current_len, chunk_size, remaining_separators);
            current_len = 0;
        }
        current.push_str(segment);
        current_len += segment_len;
    }
    if current_len > 0 {
        flush(&mut chunks, current, current_len, chunk_size, remaining_separators);
    }

    chunks
}

fn flush(
    chunks: &mut Vec<String>,
    piece: String,
    piece_len: usize,
    chunk_size: usize,
    remaining_separators: &[&str],
) {
    if piece_len > chunk_size {
        chunks.extend(split_and_merge(&piece, chunk_size, remaining_separators));
    } else {
        chunks.push(piece);
    }
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let pieces = split_and_merge(text, self.chunk_size, &RECURSIVE_SEPARATORS);
        number(pieces.into_iter().map(|p| p.trim().to_string()).collect())
    }
}

/// Build the chunker described by `options`.
pub fn chunker_for(options: &ChunkOptions) -> Box<dyn Chunker> {
    match options.strategy {
        ChunkStrategy::Fixed => Box::new(FixedSizeChunker::new(options.size, options.overlap)),
        ChunkStrategy::Sentence => Box::new(SentenceChunker::new(options.size)),
        ChunkStrategy::Recursive => Box::new(RecursiveChunker::new(options.size)),
    }
}

/// Split `text` with the strategy and limits in `options`.
pub fn chunk_text(text: &str, options: &ChunkOptions) -> Vec<TextChunk> {
    chunker_for(options).chunk(text)
}

/// Rough token estimate: four tokens per three words, at least one.
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() * 4 / 3).max(1)
}

fn effective_size(size: usize) -> usize {
    if size == 0 { DEFAULT_CHUNK_SIZE } else { size }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Drop whitespace-only pieces and number the rest from zero.
fn number(pieces: Vec<String>) -> Vec<TextChunk> {
    pieces
        .into_iter()
        .filter(|piece| !piece.trim().is_empty())
        .enumerate()
        .map(|(index, content)| TextChunk { token_count: estimate_tokens(&content), content, index })
        .collect()
}
