// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Text normalization and chunking for indexing
//!
//! Splits document text into overlapping windows of at most `chunk_size`
//! characters, breaking at paragraph, then sentence, then word boundaries
//! when one is available. All sizes and offsets are in `char`s, so non-ASCII
//! text never splits inside a code point.

use crate::rag::errors::RagError;

/// Chunk of text with its character offsets in the normalized document
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::Config(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split text into overlapping chunks
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < len {
            let window_end = (start + self.chunk_size).min(len);

            let chunk_end = if window_end < len {
                find_break_point(&chars[start..window_end])
                    .map(|offset| start + offset)
                    .unwrap_or(window_end)
            } else {
                window_end
            };

            if let Some(chunk) = trimmed_chunk(&chars, start, chunk_end) {
                chunks.push(chunk);
            }

            if chunk_end >= len {
                break;
            }

            start = self.next_start(&chars, start, chunk_end);
        }

        chunks
    }

    /// Start of the next window: `chunk_overlap` chars back from the end of
    /// the previous one, moved forward to a word start if possible
    fn next_start(&self, chars: &[char], start: usize, chunk_end: usize) -> usize {
        let step = chunk_end - start;
        if step <= self.chunk_overlap {
            return chunk_end;
        }

        let candidate = chunk_end - self.chunk_overlap;
        if candidate > 0 && !chars[candidate - 1].is_whitespace() {
            if let Some(ws) = chars[candidate..chunk_end]
                .iter()
                .position(|c| c.is_whitespace())
            {
                return candidate + ws + 1;
            }
        }
        candidate
    }
}

fn trimmed_chunk(chars: &[char], start: usize, end: usize) -> Option<TextChunk> {
    let slice = &chars[start..end];
    let lead = slice.iter().take_while(|c| c.is_whitespace()).count();
    if lead == slice.len() {
        return None;
    }
    let trail = slice.iter().rev().take_while(|c| c.is_whitespace()).count();

    Some(TextChunk {
        text: slice[lead..slice.len() - trail].iter().collect(),
        start: start + lead,
        end: end - trail,
    })
}

/// Last char index in `haystack` where `pattern` starts
fn rfind_chars(haystack: &[char], pattern: &[char]) -> Option<usize> {
    if pattern.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - pattern.len())
        .rev()
        .find(|&i| haystack[i..i + pattern.len()] == *pattern)
}

/// Find a break point in the window (prefer paragraph/sentence boundaries)
///
/// Returns the char offset just past the boundary.
fn find_break_point(window: &[char]) -> Option<usize> {
    let max_len = window.len();

    if let Some(pos) = rfind_chars(window, &['\n', '\n']) {
        if pos > max_len / 3 {
            return Some(pos + 2);
        }
    }

    const SENTENCE_ENDS: [[char; 2]; 6] = [
        ['.', ' '],
        ['!', ' '],
        ['?', ' '],
        ['.', '\n'],
        ['!', '\n'],
        ['?', '\n'],
    ];
    let best_sentence = SENTENCE_ENDS
        .iter()
        .filter_map(|p| rfind_chars(window, p))
        .max();
    if let Some(pos) = best_sentence {
        if pos > max_len / 3 {
            return Some(pos + 2);
        }
    }

    if let Some(pos) = window.iter().rposition(|&c| c == '\n') {
        if pos > max_len / 3 {
            return Some(pos + 1);
        }
    }

    for pattern in [[',', ' '], [';', ' ']] {
        if let Some(pos) = rfind_chars(window, &pattern) {
            if pos > max_len / 2 {
                return Some(pos + 2);
            }
        }
    }

    // Word boundary
    window
        .iter()
        .rposition(|&c| c == ' ')
        .filter(|&pos| pos > 0)
        .map(|pos| pos + 1)
}

/// Normalize extracted document text
///
/// Drops NUL and other control characters, collapses runs of spaces and
/// tabs, trims every line and keeps at most one blank line between
/// paragraphs.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_pending = false;

    for line in raw.split('\n') {
        let cleaned: String = line
            .chars()
            .map(|c| if c == '\t' { ' ' } else { c })
            .filter(|c| !c.is_control())
            .collect();
        let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

        if collapsed.is_empty() {
            blank_pending = !out.is_empty();
            continue;
        }

        if !out.is_empty() {
            out.push('\n');
            if blank_pending {
                out.push('\n');
            }
        }
        out.push_str(&collapsed);
        blank_pending = false;
    }

    out
}
