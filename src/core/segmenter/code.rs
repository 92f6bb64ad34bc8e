//! Fenced code block scanning and code protection.
//!
//! Code is masked with local tokens before the HTML and LaTeX stages run so
//! that `$$` or `<div>` inside code never become structured content. The
//! masks live in a transient map and are restored once extraction is done.

use std::collections::HashMap;
use std::ops::Range;

use regex::Regex;
use tracing::warn;

use super::edits::EditList;
use super::SegmentError;
use crate::core::placeholder::{find_delimited, token_with};

pub const CODE_PREFIX: &str = "\u{E002}CODE";
pub const CODE_SUFFIX: &str = "\u{E003}";

/// Double-backtick spans may contain single backticks; single spans may not.
pub(super) const INLINE_CODE_PATTERN: &str = r"``(?:[^`\n]|`[^`\n])+?``|`[^`\n]+`";

/// Code token to original source text.
pub(super) type CodeMap = HashMap<String, String>;

/// A fenced code block found in a text snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fence {
    /// Whole block, opening fence through closing fence (or end of text).
    pub range: Range<usize>,
    /// Info string after the opening fence, trimmed.
    pub info: String,
    /// Lines between the fences, including their final newline.
    pub body: Range<usize>,
    pub closed: bool,
}

impl Fence {
    /// First word of the info string, lowercased.
    pub fn language(&self) -> Option<String> {
        self.info
            .split_whitespace()
            .next()
            .map(str::to_ascii_lowercase)
    }
}

fn fence_marker(line: &str) -> Option<(char, usize, &str)> {
    let trimmed = line.trim_start_matches([' ', '\t']);
    let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let run = trimmed.chars().take_while(|c| *c == marker).count();
    if run < 3 {
        return None;
    }
    Some((marker, run, &trimmed[run..]))
}

/// Every fenced code block in `text`, in document order.
///
/// A fence opens with three or more backticks or tildes and closes with a
/// run of the same character at least as long, alone on its line. An
/// unclosed fence extends to the end of the text, which keeps a block still
/// being streamed protected.
pub fn find_fences(text: &str) -> Vec<Fence> {
    let mut fences = Vec::new();
    let mut open: Option<(usize, usize, char, usize, String)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);

        match &open {
            None => {
                if let Some((marker, run, info)) = fence_marker(content) {
                    if marker == '`' && info.contains('`') {
                        continue;
                    }
                    open = Some((line_start, offset, marker, run, info.trim().to_string()));
                }
            }
            Some((start, body_start, marker, run, _)) => {
                let closes = fence_marker(content).is_some_and(|(m, r, rest)| {
                    m == *marker && r >= *run && rest.trim().is_empty()
                });
                if closes {
                    let (start, body_start) = (*start, *body_start);
                    if let Some((_, _, _, _, info)) = open.take() {
                        fences.push(Fence {
                            range: start..line_start + content.len(),
                            info,
                            body: body_start..line_start,
                            closed: true,
                        });
                    }
                }
            }
        }
    }

    if let Some((start, body_start, _, _, info)) = open {
        let body_start = body_start.min(text.len());
        fences.push(Fence {
            range: start..text.len(),
            info,
            body: body_start..text.len(),
            closed: false,
        });
    }

    fences
}

/// True when the last fence in `text` is still open.
pub fn has_open_fence(text: &str) -> bool {
    (text.contains("```") || text.contains("~~~"))
        && find_fences(text).last().is_some_and(|fence| !fence.closed)
}

/// Byte ranges of fenced blocks and of inline code spans outside them, in
/// document order.
pub(super) fn code_ranges(text: &str, inline_pattern: Option<&Regex>) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = find_fences(text).into_iter().map(|f| f.range).collect();

    if let Some(pattern) = inline_pattern.filter(|_| text.contains('`')) {
        let fenced = ranges.len();
        for found in pattern.find_iter(text) {
            let span = found.range();
            let in_fence = ranges[..fenced]
                .iter()
                .any(|fence| fence.start < span.end && span.start < fence.end);
            if !in_fence {
                ranges.push(span);
            }
        }
    }

    ranges.sort_by_key(|range| range.start);
    ranges
}

/// Mask fenced blocks, then inline code spans, with code tokens.
///
/// Inline spans whose content starts or ends with `$` are left alone so the
/// LaTeX stage still sees them.
pub(super) fn protect(
    text: &str,
    inline_pattern: Option<&Regex>,
) -> Result<(String, CodeMap), SegmentError> {
    let mut codes = CodeMap::new();

    let mut edits = EditList::new();
    for fence in find_fences(text) {
        let token = token_with(CODE_PREFIX, CODE_SUFFIX);
        edits.push(fence.range.clone(), token.clone())?;
        codes.insert(token, text[fence.range].to_string());
    }
    let fenced = edits.apply(text);

    let Some(pattern) = inline_pattern else {
        warn!("inline code pattern unavailable; only fenced blocks are protected");
        return Ok((fenced, codes));
    };
    if !fenced.contains('`') {
        return Ok((fenced, codes));
    }

    let mut edits = EditList::new();
    for found in pattern.find_iter(&fenced) {
        let span = found.as_str();
        let inner = span.trim_matches('`').trim();
        if inner.is_empty() || inner.starts_with('$') || inner.ends_with('$') {
            continue;
        }
        let token = token_with(CODE_PREFIX, CODE_SUFFIX);
        edits.push(found.range(), token.clone())?;
        codes.insert(token, span.to_string());
    }

    Ok((edits.apply(&fenced), codes))
}

/// Put the original code back wherever a code token appears in `text`.
pub(super) fn restore(text: &str, codes: &CodeMap) -> String {
    if codes.is_empty() || !text.contains(CODE_PREFIX) {
        return text.to_string();
    }

    let mut edits = EditList::new();
    for range in find_delimited(text, CODE_PREFIX, CODE_SUFFIX) {
        if let Some(original) = codes.get(&text[range.clone()]) {
            // Ranges from find_delimited never overlap.
            let _ = edits.push(range, original.as_str());
        }
    }
    edits.apply(text)
}
