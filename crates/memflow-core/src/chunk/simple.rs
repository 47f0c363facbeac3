//! Size-bounded window chunker.
//!
//! # Algorithm
//!
//! 1. Skip leading whitespace and ignore trailing whitespace.
//! 2. Take a window of up to `max_chunk_size` characters from the cursor.
//! 3. If the window stops short of the end of the text, look for a split
//!    sequence inside it. Sequences are tried longest first (configured
//!    order breaks ties); the first one present cuts at its latest
//!    occurrence. The cut lands after the sequence's non-whitespace
//!    characters, so `". "` keeps the period and `"\n\n"` keeps nothing.
//! 4. With no split sequence in the window, cut at exactly
//!    `max_chunk_size`.
//! 5. Advance the cursor to `cut - text_overlap` so the next chunk repeats
//!    the previous chunk's trailing characters. Overlap is clamped to one
//!    less than the chunk length so the cursor always moves forward. With
//!    no overlap, whitespace at the new cursor is skipped.
//!
//! # Example
//!
//! ```rust
//! use memflow_core::chunk::simple::{split_text, SimpleChunkerOptions};
//!
//! let options = SimpleChunkerOptions {
//!     max_chunk_size: 10,
//!     text_overlap: 0,
//!     ..Default::default()
//! };
//! let parts = split_text("Hello. World. Foo.", &options);
//! assert_eq!(parts, vec!["Hello.", "World.", "Foo."]);
//! ```

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::models::Chunk;

use super::default_split_characters;

/// Options for the window chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleChunkerOptions {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_text_overlap")]
    pub text_overlap: usize,
    #[serde(default = "default_split_characters")]
    pub split_characters: Vec<String>,
}

fn default_max_chunk_size() -> usize {
    1000
}
fn default_text_overlap() -> usize {
    100
}

impl Default for SimpleChunkerOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            text_overlap: default_text_overlap(),
            split_characters: default_split_characters(),
        }
    }
}

/// A split sequence prepared for matching.
#[derive(Debug, Clone)]
pub(crate) struct Separator {
    chars: Vec<char>,
    /// Leading characters of the sequence that stay with the chunk.
    keep: usize,
}

/// Drop empty sequences and order the rest longest first.
pub(crate) fn prepare_separators(split_characters: &[String]) -> Vec<Separator> {
    let mut separators: Vec<Separator> = split_characters
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| Separator {
            chars: s.chars().collect(),
            keep: s.trim_end().chars().count(),
        })
        .collect();
    // stable: equal lengths keep their configured order
    separators.sort_by(|a, b| b.chars.len().cmp(&a.chars.len()));
    separators
}

/// Split `text` into chunk strings.
pub fn split_text(text: &str, options: &SimpleChunkerOptions) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let separators = prepare_separators(&options.split_characters);
    split_ranges(
        &chars,
        options.max_chunk_size,
        options.text_overlap,
        1,
        &separators,
    )
    .into_iter()
    .map(|r| chars[r].iter().collect())
    .collect()
}

/// Split `text` into numbered [`Chunk`]s. Empty text yields no chunks.
pub fn chunk_text(text: &str, options: &SimpleChunkerOptions) -> Vec<Chunk> {
    split_text(text, options)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| Chunk::new(piece, i, 0))
        .collect()
}

/// Core window loop shared with the structure-aware engine.
///
/// Returns char ranges into `chars`. Every range is at most `max_len`
/// long; every range but the last is at least `min_cut` long.
pub(crate) fn split_ranges(
    chars: &[char],
    max_len: usize,
    overlap: usize,
    min_cut: usize,
    separators: &[Separator],
) -> Vec<Range<usize>> {
    let max_len = max_len.max(1);
    let min_cut = min_cut.clamp(1, max_len);
    let end_of_text = chars
        .iter()
        .rposition(|c| !c.is_whitespace())
        .map_or(0, |i| i + 1);

    let mut ranges = Vec::new();
    let mut start = skip_whitespace(chars, 0, end_of_text);

    while start < end_of_text {
        let window_end = (start + max_len).min(end_of_text);
        let cut = if window_end == end_of_text {
            end_of_text
        } else {
            find_cut(chars, start, window_end, min_cut, separators).unwrap_or(window_end)
        };

        ranges.push(start..cut);
        if cut >= end_of_text {
            break;
        }

        let effective_overlap = overlap.min(cut - start - 1);
        start = cut - effective_overlap;
        if effective_overlap == 0 {
            start = skip_whitespace(chars, start, end_of_text);
        }
    }

    ranges
}

/// Latest separator cut inside `[start, window_end]`, honoring priority.
fn find_cut(
    chars: &[char],
    start: usize,
    window_end: usize,
    min_cut: usize,
    separators: &[Separator],
) -> Option<usize> {
    for sep in separators {
        let mut pos = window_end.saturating_sub(sep.keep);
        while pos >= start && pos + sep.keep >= start + min_cut {
            if chars[pos..].starts_with(&sep.chars) {
                return Some(pos + sep.keep);
            }
            if pos == 0 {
                break;
            }
            pos -= 1;
        }
    }
    None
}

fn skip_whitespace(chars: &[char], mut index: usize, end: usize) -> usize {
    while index < end && chars[index].is_whitespace() {
        index += 1;
    }
    index
}
