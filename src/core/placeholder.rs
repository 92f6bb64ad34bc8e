//! Placeholder tokens and the cache that resolves them.
//!
//! Structured content pulled out of message text is replaced by an opaque
//! token `PLACEHOLDER_PREFIX<uuid>PLACEHOLDER_SUFFIX`. The delimiters are
//! Unicode private-use characters, so no segmentation pattern (emoji
//! shortcodes, backticks, `$`, `<`) can ever match inside a token and
//! membership is a cheap prefix/suffix test.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use uuid::Uuid;

use crate::core::segmenter::chart::ParsedChart;

pub const PLACEHOLDER_PREFIX: &str = "\u{E000}PH";
pub const PLACEHOLDER_SUFFIX: &str = "\u{E001}";

const ID_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderEntry {
    LatexBlock(String),
    LatexInline(String),
    HtmlBlock(String),
    HtmlInline(String),
    NativeChart(ParsedChart),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    LatexBlock,
    LatexInline,
    HtmlBlock,
    HtmlInline,
    NativeChart,
}

impl PlaceholderEntry {
    pub fn kind(&self) -> PlaceholderKind {
        match self {
            PlaceholderEntry::LatexBlock(_) => PlaceholderKind::LatexBlock,
            PlaceholderEntry::LatexInline(_) => PlaceholderKind::LatexInline,
            PlaceholderEntry::HtmlBlock(_) => PlaceholderKind::HtmlBlock,
            PlaceholderEntry::HtmlInline(_) => PlaceholderKind::HtmlInline,
            PlaceholderEntry::NativeChart(_) => PlaceholderKind::NativeChart,
        }
    }

    /// Block entries are laid out on their own, separated by blank lines.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            PlaceholderEntry::LatexBlock(_)
                | PlaceholderEntry::HtmlBlock(_)
                | PlaceholderEntry::NativeChart(_)
        )
    }

    pub(crate) fn text_mut(&mut self) -> Option<&mut String> {
        match self {
            PlaceholderEntry::LatexBlock(text)
            | PlaceholderEntry::LatexInline(text)
            | PlaceholderEntry::HtmlBlock(text)
            | PlaceholderEntry::HtmlInline(text) => Some(text),
            PlaceholderEntry::NativeChart(_) => None,
        }
    }
}

impl PlaceholderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaceholderKind::LatexBlock => "latexBlock",
            PlaceholderKind::LatexInline => "latexInline",
            PlaceholderKind::HtmlBlock => "htmlBlock",
            PlaceholderKind::HtmlInline => "htmlInline",
            PlaceholderKind::NativeChart => "nativeChart",
        }
    }
}

/// Fresh token delimited by `prefix` and `suffix`.
pub(crate) fn token_with(prefix: &str, suffix: &str) -> String {
    format!("{prefix}{}{suffix}", Uuid::new_v4().simple())
}

pub fn new_token() -> String {
    token_with(PLACEHOLDER_PREFIX, PLACEHOLDER_SUFFIX)
}

/// True when `candidate` is exactly one well-formed placeholder token.
pub fn is_placeholder(candidate: &str) -> bool {
    candidate
        .strip_prefix(PLACEHOLDER_PREFIX)
        .and_then(|rest| rest.strip_suffix(PLACEHOLDER_SUFFIX))
        .is_some_and(|id| id.len() == ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Byte ranges of every token delimited by `prefix`/`suffix` in `text`.
pub(crate) fn find_delimited(text: &str, prefix: &str, suffix: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find(prefix) {
        let start = cursor + offset;
        let body_start = start + prefix.len();
        match text[body_start..].find(suffix) {
            Some(end_offset) => {
                let end = body_start + end_offset + suffix.len();
                ranges.push(start..end);
                cursor = end;
            }
            None => break,
        }
    }
    ranges
}

/// Byte ranges of every placeholder token in `text`.
pub fn find_placeholders(text: &str) -> Vec<Range<usize>> {
    find_delimited(text, PLACEHOLDER_PREFIX, PLACEHOLDER_SUFFIX)
}

pub type PlaceholderMap = HashMap<String, PlaceholderEntry>;

/// Entry counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub latex_block: usize,
    pub latex_inline: usize,
    pub html_block: usize,
    pub html_inline: usize,
    pub native_chart: usize,
}

impl CategoryCounts {
    pub fn total(&self) -> usize {
        self.latex_block + self.latex_inline + self.html_block + self.html_inline + self.native_chart
    }
}

/// Result of one segmentation pass, shared read-only with renderers.
///
/// The map is replaced wholesale on every pass; clones are cheap `Arc`
/// handles, so a reader holding an older cache keeps a consistent view
/// while the writer publishes a new one.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderCache {
    entries: Arc<PlaceholderMap>,
}

impl PlaceholderCache {
    pub fn new(entries: PlaceholderMap) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn lookup(&self, token: &str) -> Option<&PlaceholderEntry> {
        if !is_placeholder(token) {
            return None;
        }
        self.entries.get(token)
    }

    /// Publish a new pass, discarding every previous key.
    pub fn replace(&mut self, entries: PlaceholderMap) {
        self.entries = Arc::new(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PlaceholderEntry)> {
        self.entries.iter()
    }

    pub fn counts(&self) -> CategoryCounts {
        let mut counts = CategoryCounts::default();
        for entry in self.entries.values() {
            match entry.kind() {
                PlaceholderKind::LatexBlock => counts.latex_block += 1,
                PlaceholderKind::LatexInline => counts.latex_inline += 1,
                PlaceholderKind::HtmlBlock => counts.html_block += 1,
                PlaceholderKind::HtmlInline => counts.html_inline += 1,
                PlaceholderKind::NativeChart => counts.native_chart += 1,
            }
        }
        counts
    }

    /// A cache holding the entries of both `self` and `other`.
    pub fn union(&self, other: &PlaceholderCache) -> PlaceholderCache {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut merged = PlaceholderMap::with_capacity(self.len() + other.len());
        merged.extend(self.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(other.iter().map(|(k, v)| (k.clone(), v.clone())));
        PlaceholderCache::new(merged)
    }
}
