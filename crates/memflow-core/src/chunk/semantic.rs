//! Structure-aware chunker.
//!
//! Splits text along its headings so each chunk stays inside one part of
//! the document's outline whenever the size limits allow it.
//!
//! # Heading notations
//!
//! | Notation | Example | Level |
//! |----------|---------|-------|
//! | Hash | `## Install` | number of `#` (1..=6) |
//! | Underline | `Install` over `-------` | `=` → 1, `-` → 2 |
//! | Numbered | `2.1. Install` | number of numeric segments |
//!
//! A line matching several notations resolves hash first, then
//! underline, then numbered. Lines inside fenced code blocks are never
//! headings.
//!
//! # Algorithm
//!
//! 1. Scan lines and open a new section at every heading whose level is
//!    at most `title_level_threshold`. Deeper headings stay in the body.
//!    Section 0 is the implicit preamble before the first heading.
//! 2. Walk the sections, accumulating text. A group whose emitted size is
//!    below `min_chunk_size`, or that holds only a heading, absorbs the
//!    next section.
//! 3. A group larger than `max_chunk_size` is sub-split with the window
//!    rule from [`simple`](super::simple), overlap included. No piece but
//!    the last is shorter than `min_chunk_size`; an undersized last piece
//!    is carried into the next group.
//! 4. With `include_title_context`, every chunk starts with the heading
//!    path (`"Guide > Install\n\n"`), which counts toward
//!    `max_chunk_size`.

use serde::{Deserialize, Serialize};

use crate::models::Chunk;

use super::default_split_characters;
use super::simple::{prepare_separators, split_ranges, Separator};

/// Tag key carrying the title of the section a chunk starts in.
pub const SECTION_TAG: &str = "section";

const TITLE_PATH_SEPARATOR: &str = " > ";
const MAX_HASH_LEVEL: usize = 6;
const MAX_OUTLINE_SEGMENT_DIGITS: usize = 3;

/// Options for the structure-aware chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticChunkerOptions {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_title_level_threshold")]
    pub title_level_threshold: usize,
    #[serde(default = "default_include_title_context")]
    pub include_title_context: bool,
    #[serde(default = "default_text_overlap")]
    pub text_overlap: usize,
    /// Split sequences used when a section must be sub-split.
    #[serde(default = "default_split_characters")]
    pub split_characters: Vec<String>,
}

fn default_max_chunk_size() -> usize {
    1000
}
fn default_min_chunk_size() -> usize {
    200
}
fn default_title_level_threshold() -> usize {
    2
}
fn default_include_title_context() -> bool {
    true
}
fn default_text_overlap() -> usize {
    100
}

impl Default for SemanticChunkerOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            title_level_threshold: default_title_level_threshold(),
            include_title_context: default_include_title_context(),
            text_overlap: default_text_overlap(),
            split_characters: default_split_characters(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingStyle {
    Hash,
    Underline,
    Numbered,
}

/// A detected heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: usize,
    pub title: String,
    /// The heading's text line as written (underline excluded).
    pub line: String,
    pub style: HeadingStyle,
}

/// A run of text anchored at a boundary heading or at the document start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub number: usize,
    pub heading: Option<Heading>,
    /// Titles of the enclosing boundary headings, outermost first.
    pub path: Vec<String>,
    pub body: String,
}

impl Section {
    pub fn title(&self) -> Option<&str> {
        self.heading.as_ref().map(|h| h.title.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.heading.is_none() && self.body.is_empty()
    }

    /// Heading line followed by the body.
    pub fn full_text(&self) -> String {
        match &self.heading {
            Some(h) if self.body.is_empty() => h.line.clone(),
            Some(h) => format!("{}\n{}", h.line, self.body),
            None => self.body.clone(),
        }
    }
}

/// Classify `line` as a heading. Returns the heading and how many lines
/// it spans (2 for underlined headings).
pub fn detect_heading(line: &str, next: Option<&str>) -> Option<(Heading, usize)> {
    if let Some(h) = hash_heading(line) {
        return Some((h, 1));
    }
    if let Some(h) = underline_heading(line, next) {
        return Some((h, 2));
    }
    numbered_heading(line).map(|h| (h, 1))
}

fn hash_heading(line: &str) -> Option<Heading> {
    let trimmed = line.trim();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > MAX_HASH_LEVEL {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim_end();
    if title.is_empty() {
        return None;
    }
    Some(Heading {
        level,
        title: title.to_string(),
        line: trimmed.to_string(),
        style: HeadingStyle::Hash,
    })
}

fn underline_heading(line: &str, next: Option<&str>) -> Option<Heading> {
    let text = line.trim();
    if text.is_empty() || text.chars().all(|c| c == '=' || c == '-') {
        return None;
    }
    let underline = next?.trim();
    let marker = underline.chars().next()?;
    let level = match marker {
        '=' => 1,
        '-' => 2,
        _ => return None,
    };
    if !underline.chars().all(|c| c == marker)
        || underline.chars().count() < text.chars().count()
    {
        return None;
    }
    Some(Heading {
        level,
        title: text.to_string(),
        line: text.to_string(),
        style: HeadingStyle::Underline,
    })
}

fn numbered_heading(line: &str) -> Option<Heading> {
    let trimmed = line.trim();
    let (prefix, rest) = trimmed.split_once(char::is_whitespace)?;
    if !prefix.contains('.') {
        return None;
    }
    let outline = prefix.strip_suffix('.').unwrap_or(prefix);
    let segments: Vec<&str> = outline.split('.').collect();
    let valid = segments.iter().all(|s| {
        !s.is_empty() && s.len() <= MAX_OUTLINE_SEGMENT_DIGITS && s.chars().all(|c| c.is_ascii_digit())
    });
    let title = rest.trim();
    if !valid || title.is_empty() {
        return None;
    }
    Some(Heading {
        level: segments.len(),
        title: title.to_string(),
        line: trimmed.to_string(),
        style: HeadingStyle::Numbered,
    })
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// Split `text` into sections at headings of level ≤ `title_level_threshold`.
///
/// The first section is always the (possibly empty) preamble.
pub fn parse_sections(text: &str, title_level_threshold: usize) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections = vec![Section {
        number: 0,
        heading: None,
        path: Vec::new(),
        body: String::new(),
    }];
    let mut path_stack: Vec<(usize, String)> = Vec::new();
    let mut body: Vec<&str> = Vec::new();
    let mut in_fence = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some((heading, consumed)) = detect_heading(line, lines.get(i + 1).copied()) {
                if heading.level <= title_level_threshold {
                    finish_section(&mut sections, &body);
                    body.clear();
                    path_stack.retain(|(level, _)| *level < heading.level);
                    path_stack.push((heading.level, heading.title.clone()));
                    sections.push(Section {
                        number: sections.len(),
                        heading: Some(heading),
                        path: path_stack.iter().map(|(_, t)| t.clone()).collect(),
                        body: String::new(),
                    });
                } else {
                    body.extend_from_slice(&lines[i..i + consumed]);
                }
                i += consumed;
                continue;
            }
        }
        body.push(line);
        i += 1;
    }
    finish_section(&mut sections, &body);
    sections
}

fn finish_section(sections: &mut [Section], body: &[&str]) {
    if let Some(last) = sections.last_mut() {
        last.body = body.join("\n").trim().to_string();
    }
}

/// Accumulated text waiting to be emitted.
#[derive(Debug)]
struct Group {
    path: Vec<String>,
    section_number: usize,
    body: String,
}

impl Group {
    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.body.is_empty() {
            self.body.push_str("\n\n");
        }
        self.body.push_str(text);
    }
}

struct Emitter<'a> {
    options: &'a SemanticChunkerOptions,
    separators: Vec<Separator>,
    chunks: Vec<Chunk>,
}

impl Emitter<'_> {
    fn prefix(&self, path: &[String]) -> String {
        if !self.options.include_title_context || path.is_empty() {
            return String::new();
        }
        let prefix = format!("{}\n\n", path.join(TITLE_PATH_SEPARATOR));
        // a prefix that eats most of the window is dropped
        if prefix.chars().count() * 2 > self.options.max_chunk_size {
            return String::new();
        }
        prefix
    }

    fn emitted_len(&self, group: &Group) -> usize {
        let prefix = self.prefix(&group.path);
        if group.body.is_empty() {
            return prefix.trim_end().chars().count();
        }
        prefix.chars().count() + group.body.chars().count()
    }

    fn push(&mut self, text: String, group: &Group) {
        let chunk = Chunk::new(text, self.chunks.len(), group.section_number)
            .with_tag(SECTION_TAG, group.path.last().cloned());
        self.chunks.push(chunk);
    }

    /// Emit `group`. Returns an undersized tail to carry forward, unless
    /// `is_last`.
    fn flush(&mut self, group: Group, is_last: bool) -> Option<Group> {
        let max = self.options.max_chunk_size.max(1);
        let prefix = self.prefix(&group.path);
        let prefix_len = prefix.chars().count();

        if group.body.is_empty() {
            let title = prefix.trim_end();
            if !title.is_empty() {
                let text = title.to_string();
                self.push(text, &group);
            }
            return None;
        }

        let body: Vec<char> = group.body.chars().collect();
        if prefix_len + body.len() <= max {
            let text = format!("{}{}", prefix, group.body);
            self.push(text, &group);
            return None;
        }

        let window = max - prefix_len;
        let min_cut = self
            .options
            .min_chunk_size
            .saturating_sub(prefix_len)
            .clamp(1, window);
        let mut ranges = split_ranges(
            &body,
            window,
            self.options.text_overlap,
            min_cut,
            &self.separators,
        );

        let mut carry = None;
        if !is_last && ranges.len() > 1 {
            let tail_len = ranges.last().map_or(0, |r| r.len());
            if prefix_len + tail_len < self.options.min_chunk_size {
                if let Some(tail) = ranges.pop() {
                    carry = Some(Group {
                        path: group.path.clone(),
                        section_number: group.section_number,
                        body: body[tail].iter().collect(),
                    });
                }
            }
        }

        for range in ranges {
            let piece: String = body[range].iter().collect();
            self.push(format!("{}{}", prefix, piece), &group);
        }
        carry
    }
}

/// Split `text` into structure-aware [`Chunk`]s. Empty text yields no
/// chunks.
///
/// # Example
///
/// ```rust
/// use memflow_core::chunk::semantic::{chunk_text, SemanticChunkerOptions};
///
/// let options = SemanticChunkerOptions {
///     min_chunk_size: 0,
///     title_level_threshold: 1,
///     ..Default::default()
/// };
/// let chunks = chunk_text("# Guide\nRead me.\n# FAQ\nAsk me.", &options);
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].text, "Guide\n\nRead me.");
/// assert_eq!(chunks[1].text, "FAQ\n\nAsk me.");
/// ```
pub fn chunk_text(text: &str, options: &SemanticChunkerOptions) -> Vec<Chunk> {
    let sections = parse_sections(text, options.title_level_threshold);
    let last_non_empty = sections.iter().rposition(|s| !s.is_empty());

    let mut emitter = Emitter {
        options,
        separators: prepare_separators(&options.split_characters),
        chunks: Vec::new(),
    };
    let mut pending: Option<Group> = None;

    for (i, section) in sections.iter().enumerate() {
        if section.is_empty() {
            continue;
        }
        let is_last = Some(i) == last_non_empty;

        let group = match pending.take() {
            Some(mut group) => {
                group.append(&section.full_text());
                group
            }
            None => Group {
                path: section.path.clone(),
                section_number: section.number,
                body: if options.include_title_context {
                    section.body.clone()
                } else {
                    section.full_text()
                },
            },
        };

        // a bare heading always joins the section after it
        let undersized =
            group.body.is_empty() || emitter.emitted_len(&group) < options.min_chunk_size;
        if !is_last && undersized {
            pending = Some(group);
            continue;
        }
        pending = emitter.flush(group, is_last);
    }

    if let Some(group) = pending {
        emitter.flush(group, true);
    }
    emitter.chunks
}
