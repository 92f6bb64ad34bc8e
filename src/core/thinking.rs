//! Splitting a "thinking" prelude from the answer text.

use std::fmt;
use std::ops::Range;

/// One start/end delimiter pair, e.g. `<think>` / `</think>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPair {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPairError {
    Malformed { entry: String },
}

impl fmt::Display for TagPairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagPairError::Malformed { entry } => write!(
                f,
                "Invalid thinking tag pair '{entry}': expected a start and an end tag separated by whitespace"
            ),
        }
    }
}

impl std::error::Error for TagPairError {}

impl TagPair {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn defaults() -> Vec<TagPair> {
        vec![
            TagPair::new("<think>", "</think>"),
            TagPair::new("<thinking>", "</thinking>"),
        ]
    }

    /// Parse the settings format `"start end, start end"`.
    ///
    /// Blank entries are ignored; an entry that is not exactly two
    /// whitespace-separated tags is rejected.
    pub fn parse_list(value: &str) -> Result<Vec<TagPair>, TagPairError> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let mut parts = entry.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(start), Some(end), None) => Ok(TagPair::new(start, end)),
                    _ => Err(TagPairError::Malformed {
                        entry: entry.to_string(),
                    }),
                }
            })
            .collect()
    }

    /// Inverse of [`TagPair::parse_list`].
    pub fn format_list(pairs: &[TagPair]) -> String {
        pairs
            .iter()
            .map(|pair| format!("{} {}", pair.start, pair.end))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkingState {
    #[default]
    AwaitingStart,
    InThinking,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThinkingSegment {
    pub think_text: String,
    pub real_text: String,
    pub is_complete: bool,
    pub state: ThinkingState,
}

impl ThinkingSegment {
    /// True once a start tag (real or synthesized) has been seen.
    pub fn has_thinking(&self) -> bool {
        self.state != ThinkingState::AwaitingStart
    }
}

/// Length of the longest proper prefix of `tag` that `text` ends with.
fn partial_suffix_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .filter(|&len| tag.is_char_boundary(len))
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}

/// First occurrence of `tag` at or after `from` that does not start inside
/// a protected range.
fn find_tag(buffer: &str, tag: &str, from: usize, protected: &[Range<usize>]) -> Option<usize> {
    buffer
        .get(from..)?
        .match_indices(tag)
        .map(|(at, _)| from + at)
        .find(|at| !protected.iter().any(|range| range.contains(at)))
}

fn join_trimmed(before: &str, after: &str) -> String {
    let before = before.trim();
    let after = after.trim();
    match (before.is_empty(), after.is_empty()) {
        (true, _) => after.to_string(),
        (false, true) => before.to_string(),
        (false, false) => format!("{before}\n\n{after}"),
    }
}

/// Stateless splitter; every call recomputes from the full buffer.
#[derive(Debug, Clone)]
pub struct ThinkingExtractor {
    pairs: Vec<TagPair>,
}

impl Default for ThinkingExtractor {
    fn default() -> Self {
        Self::new(TagPair::defaults())
    }
}

impl ThinkingExtractor {
    /// An empty list falls back to the default pairs.
    pub fn new(pairs: Vec<TagPair>) -> Self {
        let pairs = if pairs.is_empty() {
            TagPair::defaults()
        } else {
            pairs
        };
        Self { pairs }
    }

    pub fn pairs(&self) -> &[TagPair] {
        &self.pairs
    }

    pub fn extract(&self, buffer: &str, stream_finished: bool) -> ThinkingSegment {
        self.extract_outside(buffer, stream_finished, &[])
    }

    /// Like [`ThinkingExtractor::extract`], but tags that start inside one
    /// of the `protected` byte ranges (code spans) are not tags.
    pub fn extract_outside(
        &self,
        buffer: &str,
        stream_finished: bool,
        protected: &[Range<usize>],
    ) -> ThinkingSegment {
        let matched = self.pairs.iter().find_map(|pair| {
            let start = find_tag(buffer, &pair.start, 0, protected);
            let end = find_tag(buffer, &pair.end, 0, protected);
            (start.is_some() || end.is_some()).then_some((pair, start))
        });

        match matched {
            Some((pair, start)) => self.split(pair, buffer, start, stream_finished, protected),
            None => self.without_tags(buffer, stream_finished),
        }
    }

    fn without_tags(&self, buffer: &str, stream_finished: bool) -> ThinkingSegment {
        let leading = buffer.trim_start();
        let maybe_opening = !stream_finished
            && !leading.is_empty()
            && self
                .pairs
                .iter()
                .any(|pair| pair.start.len() > leading.len() && pair.start.starts_with(leading));

        ThinkingSegment {
            think_text: String::new(),
            real_text: if maybe_opening {
                String::new()
            } else {
                buffer.trim().to_string()
            },
            is_complete: stream_finished,
            state: ThinkingState::AwaitingStart,
        }
    }

    fn split(
        &self,
        pair: &TagPair,
        buffer: &str,
        start: Option<usize>,
        stream_finished: bool,
        protected: &[Range<usize>],
    ) -> ThinkingSegment {
        let (before, body_start) = match start {
            Some(at) => (&buffer[..at], at + pair.start.len()),
            // End tag without a start: the stream began mid-thought.
            None => ("", 0),
        };
        let body = &buffer[body_start..];

        if let Some(end_at) = find_tag(buffer, &pair.end, body_start, protected) {
            return ThinkingSegment {
                think_text: buffer[body_start..end_at].trim().to_string(),
                real_text: join_trimmed(before, &buffer[end_at + pair.end.len()..]),
                is_complete: true,
                state: ThinkingState::Complete,
            };
        }

        let think = if stream_finished {
            body
        } else {
            &body[..body.len() - partial_suffix_len(body, &pair.end)]
        };

        ThinkingSegment {
            think_text: think.trim().to_string(),
            real_text: before.trim().to_string(),
            is_complete: stream_finished,
            state: if stream_finished {
                ThinkingState::Complete
            } else {
                ThinkingState::InThinking
            },
        }
    }
}
