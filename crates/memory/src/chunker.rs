//! Paragraph-first text chunker with character overlap.
//!
//! Lengths are counted in `char`s. Paragraphs (separated by blank lines) are
//! packed greedily; a paragraph that cannot fit on its own is broken into
//! sentences, and a sentence that still cannot fit is hard-cut.

use std::{mem, sync::LazyLock};

use {
    lore_common::types::Metadata,
    lore_config::RagConfig,
    regex::Regex,
    serde::{Deserialize, Serialize},
};

/// Joins paragraphs inside one chunk. Counted against `chunk_size`.
const PARAGRAPH_SEPARATOR: &str = "\n\n";
const PARAGRAPH_SEPARATOR_LEN: usize = 2;

#[allow(clippy::expect_used)]
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph break pattern is valid"));

/// A bounded slice of a source document, ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Metadata of the source document.
    pub metadata: Metadata,
    /// Position of the chunk within its document.
    pub index: usize,
    /// Leading characters carried over from the previous chunk, separator
    /// included. Zero for the first chunk and for sentence-level chunks.
    pub overlap: usize,
}

impl Chunk {
    /// The chunk text without the carried-over prefix.
    pub fn own_text(&self) -> &str {
        let (_, rest) = split_at_char(&self.text, self.overlap);
        rest
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

#[derive(Debug)]
struct Piece {
    text: String,
    overlap: usize,
}

impl Chunker {
    /// A `chunk_size` of zero is treated as one character.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split(&self, text: &str) -> Vec<Chunk> {
        self.split_with_metadata(text, &Metadata::new())
    }

    /// Split `text`, stamping every chunk with a copy of `metadata`.
    pub fn split_with_metadata(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut current_overlap = 0;

        for paragraph in paragraphs(text) {
            let para_len = char_len(paragraph);

            if para_len > self.chunk_size {
                if !current.is_empty() {
                    pieces.push(Piece {
                        text: mem::take(&mut current),
                        overlap: mem::take(&mut current_overlap),
                    });
                }
                pieces.extend(
                    self.split_long_paragraph(paragraph)
                        .into_iter()
                        .map(|text| Piece { text, overlap: 0 }),
                );
                continue;
            }

            if current.is_empty() {
                current.push_str(paragraph);
                current_overlap = 0;
                continue;
            }

            if char_len(&current) + PARAGRAPH_SEPARATOR_LEN + para_len <= self.chunk_size {
                current.push_str(PARAGRAPH_SEPARATOR);
                current.push_str(paragraph);
                continue;
            }

            let closed = mem::take(&mut current);
            let seed = self.overlap_seed(&closed, para_len);
            pieces.push(Piece {
                text: closed,
                overlap: current_overlap,
            });

            current_overlap = 0;
            if !seed.is_empty() {
                current_overlap = char_len(&seed) + PARAGRAPH_SEPARATOR_LEN;
                current.push_str(&seed);
                current.push_str(PARAGRAPH_SEPARATOR);
            }
            current.push_str(paragraph);
        }

        if !current.is_empty() {
            pieces.push(Piece {
                text: current,
                overlap: current_overlap,
            });
        }

        pieces
            .into_iter()
            .filter(|p| !p.text.trim().is_empty())
            .enumerate()
            .map(|(index, p)| Chunk {
                text: p.text,
                metadata: metadata.clone(),
                index,
                overlap: p.overlap,
            })
            .collect()
    }

    /// Tail of `closed` carried into the next chunk.
    ///
    /// Raw characters, not word aligned. Shortened so that the seed, the
    /// separator and the incoming paragraph still fit in one chunk.
    fn overlap_seed(&self, closed: &str, incoming_len: usize) -> String {
        let room = self
            .chunk_size
            .saturating_sub(incoming_len + PARAGRAPH_SEPARATOR_LEN);
        let n = self.chunk_overlap.min(room);
        if n == 0 {
            return String::new();
        }
        tail_chars(closed, n).trim_start().to_string()
    }

    fn split_long_paragraph(&self, paragraph: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = String::new();

        for sentence in sentences(paragraph) {
            let len = char_len(sentence);
            if !current.is_empty() {
                let sep = sentence_separator(&current);
                if char_len(&current) + sep.len() + len <= self.chunk_size {
                    current.push_str(sep);
                    current.push_str(sentence);
                    continue;
                }
                out.push(mem::take(&mut current));
            }

            let mut rest = sentence;
            while char_len(rest) > self.chunk_size {
                let (head, tail) = split_at_char(rest, self.chunk_size);
                if !head.trim().is_empty() {
                    out.push(head.to_string());
                }
                rest = tail;
            }
            current = rest.trim_start().to_string();
        }

        if !current.trim().is_empty() {
            out.push(current);
        }
        out
    }
}

fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Sentences with their terminator attached, trimmed, empty ones dropped.
///
/// ASCII `.`, `!` and `?` end a sentence only before whitespace or the end of
/// the text, so decimals and abbreviations inside words survive. CJK
/// terminators and newlines always end one.
fn sentences(paragraph: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let terminal = match c {
            '\n' | '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().is_none_or(|(_, next)| next.is_whitespace()),
            _ => false,
        };
        if terminal {
            let end = i + c.len_utf8();
            let sentence = paragraph[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

fn sentence_separator(previous: &str) -> &'static str {
    match previous.chars().last() {
        Some('。' | '！' | '？') => "",
        _ => " ",
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split after the first `n` chars.
fn split_at_char(s: &str, n: usize) -> (&str, &str) {
    let idx = s.char_indices().nth(n).map_or(s.len(), |(i, _)| i);
    s.split_at(idx)
}

/// The last `n` chars of `s` (all of it when shorter).
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}
