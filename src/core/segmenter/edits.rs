//! Non-overlapping replacement lists over an immutable text snapshot.
//!
//! Stages find their matches against one snapshot, record `(range,
//! replacement)` edits here, and the list rebuilds the text in a single pass.
//! No offset is ever invalidated by an earlier replacement.

use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range<usize>,
    pub replacement: String,
}

/// Rejected edit overlapping one already recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlappingEdit {
    pub existing: Range<usize>,
    pub rejected: Range<usize>,
}

impl fmt::Display for OverlappingEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "edit {:?} overlaps recorded edit {:?}",
            self.rejected, self.existing
        )
    }
}

impl std::error::Error for OverlappingEdit {}

/// Edits sorted by start offset.
#[derive(Debug, Clone, Default)]
pub struct EditList {
    edits: Vec<Edit>,
}

impl EditList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn push(
        &mut self,
        range: Range<usize>,
        replacement: impl Into<String>,
    ) -> Result<(), OverlappingEdit> {
        let index = self
            .edits
            .partition_point(|edit| edit.range.start < range.start);

        let overlaps =
            |other: &Edit| other.range.start < range.end && range.start < other.range.end;
        for neighbour in [index.checked_sub(1), Some(index)].into_iter().flatten() {
            if let Some(existing) = self.edits.get(neighbour) {
                if overlaps(existing) || existing.range.start == range.start {
                    return Err(OverlappingEdit {
                        existing: existing.range.clone(),
                        rejected: range,
                    });
                }
            }
        }

        self.edits.insert(
            index,
            Edit {
                range,
                replacement: replacement.into(),
            },
        );
        Ok(())
    }

    /// Rebuild `text` with every edit applied.
    ///
    /// Ranges must lie on char boundaries of `text`; an edit that does not
    /// is skipped.
    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;

        for edit in &self.edits {
            let Range { start, end } = edit.range.clone();
            let in_bounds = start >= cursor
                && end <= text.len()
                && text.is_char_boundary(start)
                && text.is_char_boundary(end);
            if !in_bounds {
                continue;
            }
            out.push_str(&text[cursor..start]);
            out.push_str(&edit.replacement);
            cursor = end;
        }

        out.push_str(&text[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_apply_in_offset_order_regardless_of_push_order() {
        let mut edits = EditList::new();
        edits.push(10..15, "five").unwrap();
        edits.push(0..5, "zero").unwrap();
        assert_eq!(edits.apply("hello big world"), "zero big five");
    }

    #[test]
    fn overlapping_edits_are_rejected() {
        let mut edits = EditList::new();
        edits.push(2..6, "x").unwrap();
        let err = edits.push(4..8, "y").unwrap_err();
        assert_eq!(err.existing, 2..6);
        assert_eq!(err.rejected, 4..8);
        assert!(edits.push(0..3, "z").is_err());
        assert!(edits.push(6..8, "w").is_ok());
        assert_eq!(edits.len(), 2);
    }

    #[test]
    fn empty_list_returns_text_unchanged() {
        let edits = EditList::new();
        assert!(edits.is_empty());
        assert_eq!(edits.apply("unchanged"), "unchanged");
    }

    #[test]
    fn multibyte_text_keeps_untouched_regions() {
        let text = "💸 $x$ ok";
        let start = text.find('$').unwrap();
        let mut edits = EditList::new();
        edits.push(start..start + 3, "[m]").unwrap();
        assert_eq!(edits.apply(text), "💸 [m] ok");
    }
}
