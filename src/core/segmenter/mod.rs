//! Structured-content segmentation.
//!
//! [`Segmenter::preprocess`] runs over the complete current text and returns
//! the text with structured regions replaced by placeholder tokens, plus a
//! fresh [`PlaceholderCache`] resolving them. Stages run in a fixed order:
//!
//! 1. emoji shortcodes
//! 2. diagram blocks (native chart, else HTML fallback)
//! 3. code protection (fenced blocks, inline spans)
//! 4. full HTML documents
//! 5. allow-listed HTML elements
//! 6. LaTeX (block, then inline)
//! 7. code restoration, in the text and inside cached entries
//!
//! A stage that cannot run leaves the text untouched for that stage only.

pub mod chart;
pub mod code;
pub mod edits;
pub mod emoji;
pub mod html;
pub mod latex;

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::core::placeholder::{
    find_placeholders, new_token, PlaceholderCache, PlaceholderEntry, PlaceholderMap,
};

use self::chart::{ParsedChart, DIAGRAM_TAGS};
use self::code::CodeMap;
use self::edits::{EditList, OverlappingEdit};
use self::emoji::EmojiTable;
use self::html::HtmlLevel;

/// Why a stage was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// The stage's pattern failed to compile when the segmenter was built.
    PatternUnavailable(&'static str),
    /// Two matches of one stage claimed overlapping text.
    Overlap(OverlappingEdit),
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::PatternUnavailable(stage) => {
                write!(f, "{stage} pattern unavailable")
            }
            SegmentError::Overlap(overlap) => write!(f, "{overlap}"),
        }
    }
}

impl std::error::Error for SegmentError {}

impl From<OverlappingEdit> for SegmentError {
    fn from(value: OverlappingEdit) -> Self {
        SegmentError::Overlap(value)
    }
}

/// Placeholder-substituted text and the cache resolving its tokens.
#[derive(Debug, Clone, Default)]
pub struct ProcessedContent {
    pub content: String,
    pub cache: PlaceholderCache,
}

impl ProcessedContent {
    /// Raw text with no structured content.
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            cache: PlaceholderCache::default(),
        }
    }

    /// Concatenate two independently segmented spans.
    pub fn join(&self, tail: &ProcessedContent) -> ProcessedContent {
        let mut content = String::with_capacity(self.content.len() + tail.content.len());
        content.push_str(&self.content);
        content.push_str(&tail.content);
        ProcessedContent {
            content,
            cache: self.cache.union(&tail.cache),
        }
    }
}

fn compile(stage: &'static str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            warn!(stage, error = %err, "segmentation pattern failed to compile");
            None
        }
    }
}

struct Patterns {
    shortcode: Option<Regex>,
    inline_code: Option<Regex>,
    html_document: Option<Regex>,
    latex_block: Option<Regex>,
}

impl Patterns {
    fn compile() -> Self {
        Self {
            shortcode: compile("emoji", emoji::SHORTCODE_PATTERN),
            inline_code: compile("inline code", code::INLINE_CODE_PATTERN),
            html_document: compile("html document", html::DOCUMENT_PATTERN),
            latex_block: compile("latex block", latex::BLOCK_PATTERN),
        }
    }
}

/// Entries and code masks collected during one pass.
#[derive(Default)]
struct Pass {
    entries: PlaceholderMap,
    codes: CodeMap,
}

/// Output of a stage that succeeded.
struct StageOutput {
    text: String,
    entries: Vec<(String, PlaceholderEntry)>,
}

impl StageOutput {
    fn text_only(text: String) -> Self {
        Self {
            text,
            entries: Vec::new(),
        }
    }
}

/// Block placeholders sit alone between blank lines.
fn isolate(token: &str) -> String {
    format!("\n\n{token}\n\n")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Multi-stage structured-content extractor.
///
/// Holds no per-pass state, so one instance can be shared (behind an `Arc`)
/// by every message that is streaming.
pub struct Segmenter {
    emoji: Arc<EmojiTable>,
    patterns: Patterns,
}

impl Segmenter {
    pub fn new(emoji: Arc<EmojiTable>) -> Self {
        Self {
            emoji,
            patterns: Patterns::compile(),
        }
    }

    /// Byte ranges of fenced blocks and inline code spans in `text`.
    pub fn code_ranges(&self, text: &str) -> Vec<Range<usize>> {
        code::code_ranges(text, self.patterns.inline_code.as_ref())
    }

    /// Segment the complete current `text`.
    pub fn preprocess(&self, text: &str) -> ProcessedContent {
        if text.is_empty() {
            return ProcessedContent::default();
        }

        let mut pass = Pass::default();
        let mut current = text.to_string();

        current = self.run_stage("emoji", current, &mut pass, |text| {
            let pattern = self
                .patterns
                .shortcode
                .as_ref()
                .ok_or(SegmentError::PatternUnavailable("emoji"))?;
            emoji::replace_shortcodes(text, &self.emoji, pattern).map(StageOutput::text_only)
        });

        current = self.run_stage("diagram", current, &mut pass, diagram_stage);

        match code::protect(&current, self.patterns.inline_code.as_ref()) {
            Ok((masked, codes)) => {
                current = masked;
                pass.codes = codes;
            }
            Err(err) => warn!(stage = "code", error = %err, "segmentation stage skipped"),
        }

        current = self.run_stage("html document", current, &mut pass, |text| {
            let pattern = self
                .patterns
                .html_document
                .as_ref()
                .ok_or(SegmentError::PatternUnavailable("html document"))?;
            html_document_stage(text, pattern)
        });

        current = self.run_stage("html snippet", current, &mut pass, html_snippet_stage);

        current = self.run_stage("latex block", current, &mut pass, |text| {
            let pattern = self
                .patterns
                .latex_block
                .as_ref()
                .ok_or(SegmentError::PatternUnavailable("latex block"))?;
            latex_block_stage(text, pattern)
        });

        current = self.run_stage("latex inline", current, &mut pass, latex_inline_stage);

        let Pass {
            mut entries,
            codes,
        } = pass;
        let content = code::restore(&current, &codes);
        for entry in entries.values_mut() {
            if let Some(text) = entry.text_mut() {
                *text = code::restore(text, &codes);
            }
        }

        debug!(
            input = text.len(),
            output = content.len(),
            entries = entries.len(),
            "segmented text"
        );

        ProcessedContent {
            content,
            cache: PlaceholderCache::new(entries),
        }
    }

    fn run_stage<F>(&self, name: &'static str, text: String, pass: &mut Pass, stage: F) -> String
    where
        F: FnOnce(&str) -> Result<StageOutput, SegmentError>,
    {
        match stage(&text) {
            Ok(output) => {
                pass.entries.extend(output.entries);
                output.text
            }
            Err(err) => {
                warn!(stage = name, error = %err, "segmentation stage skipped");
                text
            }
        }
    }

    /// Re-expand placeholder tokens into source form, for consumers that
    /// want plain markdown back.
    ///
    /// A token missing from `cache` (a renderer lagging behind a cache
    /// replacement) is left as the raw token text.
    pub fn expand(text: &str, cache: &PlaceholderCache) -> String {
        let mut edits = EditList::new();
        for range in find_placeholders(text) {
            let token = &text[range.clone()];
            let replacement = match cache.lookup(token) {
                Some(PlaceholderEntry::LatexBlock(body)) => format!("$$\n{body}\n$$"),
                Some(PlaceholderEntry::LatexInline(body)) => format!("${body}$"),
                Some(PlaceholderEntry::HtmlBlock(html))
                | Some(PlaceholderEntry::HtmlInline(html)) => html.clone(),
                Some(PlaceholderEntry::NativeChart(chart)) => chart.to_source(),
                None => {
                    debug!("placeholder missing from cache; leaving token in place");
                    continue;
                }
            };
            // Ranges from find_placeholders never overlap.
            let _ = edits.push(range, replacement);
        }
        edits.apply(text)
    }
}

fn diagram_stage(text: &str) -> Result<StageOutput, SegmentError> {
    let mut edits = EditList::new();
    let mut entries = Vec::new();

    for fence in code::find_fences(text) {
        if !fence.closed {
            continue;
        }
        let Some(tag) = fence.language() else {
            continue;
        };
        if !DIAGRAM_TAGS.contains(&tag.as_str()) {
            continue;
        }

        let body = &text[fence.body.clone()];
        let entry = match ParsedChart::parse(&tag, body) {
            Some(chart) => PlaceholderEntry::NativeChart(chart),
            None => {
                debug!(tag = %tag, "diagram did not parse as a chart; keeping it as html");
                PlaceholderEntry::HtmlBlock(format!(
                    "<pre class=\"{tag}\">{}</pre>",
                    escape_html(body.trim_end())
                ))
            }
        };

        let token = new_token();
        edits.push(fence.range.clone(), isolate(&token))?;
        entries.push((token, entry));
    }

    Ok(StageOutput {
        text: edits.apply(text),
        entries,
    })
}

fn html_document_stage(text: &str, pattern: &Regex) -> Result<StageOutput, SegmentError> {
    if !text.contains('<') {
        return Ok(StageOutput::text_only(text.to_string()));
    }

    let mut edits = EditList::new();
    let mut entries = Vec::new();
    for range in html::find_documents(text, pattern) {
        let token = new_token();
        entries.push((
            token.clone(),
            PlaceholderEntry::HtmlBlock(text[range.clone()].to_string()),
        ));
        edits.push(range, isolate(&token))?;
    }

    Ok(StageOutput {
        text: edits.apply(text),
        entries,
    })
}

fn html_snippet_stage(text: &str) -> Result<StageOutput, SegmentError> {
    if !text.contains('<') {
        return Ok(StageOutput::text_only(text.to_string()));
    }

    let mut edits = EditList::new();
    let mut entries = Vec::new();
    for snippet in html::find_snippets(text) {
        let token = new_token();
        let source = text[snippet.range.clone()].to_string();
        match snippet.level {
            HtmlLevel::Block => {
                edits.push(snippet.range, isolate(&token))?;
                entries.push((token, PlaceholderEntry::HtmlBlock(source)));
            }
            HtmlLevel::Inline => {
                edits.push(snippet.range, token.clone())?;
                entries.push((token, PlaceholderEntry::HtmlInline(source)));
            }
        }
    }

    Ok(StageOutput {
        text: edits.apply(text),
        entries,
    })
}

fn latex_block_stage(text: &str, pattern: &Regex) -> Result<StageOutput, SegmentError> {
    if !text.contains("$$") && !text.contains("\\[") {
        return Ok(StageOutput::text_only(text.to_string()));
    }

    let mut edits = EditList::new();
    let mut entries = Vec::new();
    for span in latex::find_blocks(text, pattern) {
        let token = new_token();
        edits.push(span.range, isolate(&token))?;
        entries.push((token, PlaceholderEntry::LatexBlock(span.body)));
    }

    Ok(StageOutput {
        text: edits.apply(text),
        entries,
    })
}

fn latex_inline_stage(text: &str) -> Result<StageOutput, SegmentError> {
    if !text.contains('$') && !text.contains("\\(") {
        return Ok(StageOutput::text_only(text.to_string()));
    }

    let mut edits = EditList::new();
    let mut entries = Vec::new();
    for span in latex::find_inline(text) {
        let token = new_token();
        edits.push(span.range, token.clone())?;
        entries.push((token, PlaceholderEntry::LatexInline(span.body)));
    }

    Ok(StageOutput {
        text: edits.apply(text),
        entries,
    })
}
