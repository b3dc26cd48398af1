//! Sentence segmentation for speech synthesis.
//!
//! [`Segmenter::segment`] turns arbitrary text into an ordered list of
//! [`Sentence`]s, each at most `max_len` characters.  Three tiers are applied
//! in order, each only to pieces the previous tier left too long:
//!
//! 1. Split after sentence-terminal marks (`。！？；!?;`, newline, and an
//!    ASCII `.` followed by whitespace or end of text).
//! 2. Split after clause marks (`，,、：:-—`).
//! 3. Bisect near the midpoint, preferring whitespace or punctuation within
//!    `search_radius` characters of it, until every piece fits.
//!
//! Every piece is trimmed; empty pieces are never emitted.  Concatenating the
//! output reproduces the non-whitespace content of the input in order.
//!
//! # Example
//!
//! ```rust
//! use voice_assistant::text::segment;
//!
//! let sentences = segment("你好！今天天气怎么样？", 20);
//! assert_eq!(sentences, ["你好！", "今天天气怎么样？"]);
//! ```

use std::fmt;

use crate::config::SegmenterConfig;

/// Sentence-terminal marks, full-width and ASCII.  ASCII `.` is handled
/// separately so decimals like `3.14` survive.
const TERMINAL_MARKS: &[char] = &['。', '！', '？', '；', '\n', '!', '?', ';'];

/// Clause-level marks used by the second tier.
const CLAUSE_MARKS: &[char] = &['，', ',', '、', '：', ':', '-', '—'];

/// Default bisection search radius, in characters.
pub const DEFAULT_SEARCH_RADIUS: usize = 20;

// ---------------------------------------------------------------------------
// Sentence
// ---------------------------------------------------------------------------

/// A trimmed, non-empty piece of text no longer than the segmenter's
/// `max_len`.  Only produced by [`Segmenter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sentence(String);

impl Sentence {
    fn new(text: &str) -> Self {
        Self(text.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters (not bytes).
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sentence {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Sentence {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Sentence {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

/// Stateless three-tier sentence splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmenter {
    max_len: usize,
    search_radius: usize,
}

impl Segmenter {
    /// Create a segmenter.  `max_len` is clamped to at least 1.
    pub fn new(max_len: usize, search_radius: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            search_radius,
        }
    }

    pub fn from_config(config: &SegmenterConfig) -> Self {
        Self::new(config.max_len, config.search_radius)
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Split `text` into sentences of at most `max_len` characters.
    pub fn segment(&self, text: &str) -> Vec<Sentence> {
        let mut out = Vec::new();

        for piece in split_after(text, |c, next| is_terminal(c, next, true)) {
            if self.fits(piece) {
                out.push(Sentence::new(piece));
                continue;
            }
            for clause in split_after(piece, |c, _| CLAUSE_MARKS.contains(&c)) {
                if self.fits(clause) {
                    out.push(Sentence::new(clause));
                } else {
                    self.bisect(clause, &mut out);
                }
            }
        }

        out
    }

    /// Byte offset just past the rightmost sentence-terminal mark in
    /// `buffer`, or `None` if there is none yet.
    ///
    /// Unlike [`segment`](Self::segment), an ASCII `.` at the very end of the
    /// buffer does not count: the next delta may turn it into a decimal
    /// point.
    pub fn commit_point(&self, buffer: &str) -> Option<usize> {
        let mut last = None;
        let mut chars = buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let next = chars.peek().map(|&(_, n)| n);
            if is_terminal(c, next, false) {
                last = Some(i + c.len_utf8());
            }
        }
        last
    }

    fn fits(&self, piece: &str) -> bool {
        piece.chars().count() <= self.max_len
    }

    /// Recursively halve `piece` until every part fits.
    fn bisect(&self, piece: &str, out: &mut Vec<Sentence>) {
        let chars: Vec<(usize, char)> = piece.char_indices().collect();
        let n = chars.len();
        if n <= self.max_len {
            out.push(Sentence::new(piece));
            return;
        }

        // n > max_len >= 1, so both halves below are non-empty.
        let mid = n / 2;
        let cut = (0..self.search_radius.min(mid))
            .flat_map(|offset| [mid + offset, mid - offset])
            .find(|&p| p > 0 && p + 1 < n && is_cut_char(chars[p].1))
            .map_or(mid, |p| p + 1);

        let (left, right) = piece.split_at(chars[cut].0);
        for half in [left.trim(), right.trim()] {
            if !half.is_empty() {
                self.bisect(half, out);
            }
        }
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::from_config(&SegmenterConfig::default())
    }
}

/// Segment `text` with the default bisection search radius.
pub fn segment(text: &str, max_len: usize) -> Vec<Sentence> {
    Segmenter::new(max_len, DEFAULT_SEARCH_RADIUS).segment(text)
}

// ---------------------------------------------------------------------------
// Character classes
// ---------------------------------------------------------------------------

fn is_terminal(c: char, next: Option<char>, end_closes: bool) -> bool {
    if c == '.' {
        return next.map_or(end_closes, char::is_whitespace);
    }
    TERMINAL_MARKS.contains(&c)
}

fn is_cut_char(c: char) -> bool {
    c.is_whitespace() || c == '.' || TERMINAL_MARKS.contains(&c) || CLAUSE_MARKS.contains(&c)
}

/// Split after every character accepted by `is_break`, keeping the mark on
/// the left piece.  Pieces are trimmed and empty ones dropped.
fn split_after<F>(text: &str, is_break: F) -> Vec<&str>
where
    F: Fn(char, Option<char>) -> bool,
{
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next = chars.peek().map(|&(_, n)| n);
        if is_break(c, next) {
            let end = i + c.len_utf8();
            pieces.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
