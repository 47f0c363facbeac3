//! Text chunking engines.
//!
//! Two engines turn extracted text into bounded [`Chunk`]s:
//!
//! - [`simple`]: a character window that prefers to end at configured
//!   split sequences and repeats a trailing overlap in the next chunk.
//! - [`semantic`]: a structure-aware engine that detects headings,
//!   groups text into sections, merges undersized sections forward and
//!   sub-splits oversized ones with the simple window rule.
//!
//! Sizes are counted in Unicode scalar values, never bytes, so chunk
//! boundaries always fall on character boundaries.
//!
//! Neither engine emits anything for empty text. Callers that must
//! produce at least one chunk per source use [`placeholder_chunk`].

pub mod semantic;
pub mod simple;

pub use semantic::SemanticChunkerOptions;
pub use simple::SimpleChunkerOptions;

use crate::models::Chunk;

/// Tag key set on chunks synthesized by [`placeholder_chunk`].
pub const FALLBACK_TAG: &str = "fallback";
/// Tag value set on chunks synthesized for sources without text.
pub const FALLBACK_EMPTY_TEXT: &str = "empty-text";

/// Default split sequences, in priority order.
pub const DEFAULT_SPLIT_CHARACTERS: [&str; 5] = ["\n\n", "\n", ". ", "! ", "? "];

pub fn default_split_characters() -> Vec<String> {
    DEFAULT_SPLIT_CHARACTERS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Synthesize the single chunk emitted for a source whose extracted text
/// is empty or missing.
///
/// This is a fallback, not validation: the pipeline keeps a traceable
/// record for every uploaded file even when extraction found no text.
/// The chunk is tagged `fallback = "empty-text"` so consumers can filter
/// it out.
pub fn placeholder_chunk(file_name: &str) -> Chunk {
    Chunk::new(format!("[no text extracted from {}]", file_name), 0, 0)
        .with_tag(FALLBACK_TAG, Some(FALLBACK_EMPTY_TEXT.to_string()))
}
