//! HTML extraction: whole documents and allow-listed element snippets.

use std::ops::Range;

use regex::Regex;

pub(super) const DOCUMENT_PATTERN: &str =
    r"(?is)(?:<!doctype[^>]*>\s*)?<html\b[^>]*>.*?</html\s*>";

pub const BLOCK_TAGS: &[&str] = &["div", "table", "iframe", "video", "canvas", "details"];

pub const INLINE_TAGS: &[&str] = &[
    "span", "b", "strong", "i", "em", "u", "font", "mark", "sub", "sup", "p", "h2", "h3", "h4",
    "ul", "abbr", "cite", "dfn", "kbd", "a",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlLevel {
    Block,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlSnippet {
    pub range: Range<usize>,
    pub level: HtmlLevel,
}

fn classify(tag: &str) -> Option<HtmlLevel> {
    if BLOCK_TAGS.contains(&tag) {
        Some(HtmlLevel::Block)
    } else if INLINE_TAGS.contains(&tag) {
        Some(HtmlLevel::Inline)
    } else {
        None
    }
}

/// Full `<html>` documents, optionally preceded by a doctype.
pub(super) fn find_documents(text: &str, pattern: &Regex) -> Vec<Range<usize>> {
    pattern.find_iter(text).map(|m| m.range()).collect()
}

fn tag_name_at(lower: &str, at: usize) -> &str {
    let rest = &lower[at..];
    let len = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric())
        .count();
    &rest[..len]
}

/// Find the `>` closing the tag opened at `open`, skipping quoted attribute
/// values.
fn tag_end(text: &str, open: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (offset, byte) in text.as_bytes()[open..].iter().enumerate() {
        match (quote, *byte) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(*byte),
            (None, b'>') => return Some(open + offset),
            (None, _) => {}
        }
    }
    None
}

/// End (exclusive) of the element whose opening tag ends at `open_end`,
/// honouring nested elements of the same name.
fn matching_close(lower: &str, name: &str, open_end: usize) -> Option<usize> {
    let opener = format!("<{name}");
    let closer = format!("</{name}");
    let mut depth = 1usize;
    let mut cursor = open_end + 1;

    loop {
        let next_open = lower[cursor..].find(&opener).map(|at| cursor + at);
        let next_close = lower[cursor..].find(&closer).map(|at| cursor + at)?;

        match next_open {
            Some(at) if at < next_close => {
                let after = at + opener.len();
                if tag_name_at(lower, at + 1) == name {
                    let end = tag_end(lower, after)?;
                    if !lower[..end].ends_with('/') {
                        depth += 1;
                    }
                    cursor = end + 1;
                } else {
                    cursor = after;
                }
            }
            _ => {
                let after = next_close + closer.len();
                if tag_name_at(lower, next_close + 2) != name {
                    cursor = after;
                    continue;
                }
                let end = tag_end(lower, after)?;
                depth -= 1;
                cursor = end + 1;
                if depth == 0 {
                    return Some(cursor);
                }
            }
        }
    }
}

/// Allow-listed elements in `text`, outermost only, in document order.
///
/// Comments are skipped without extraction. Elements whose closing tag has
/// not arrived yet stay literal until it does; `<tag ... />` is complete on
/// its own.
pub fn find_snippets(text: &str) -> Vec<HtmlSnippet> {
    let lower = text.to_ascii_lowercase();
    let mut snippets = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = lower[cursor..].find('<') {
        let start = cursor + offset;

        if lower[start..].starts_with("<!--") {
            match lower[start + 4..].find("-->") {
                Some(end) => {
                    cursor = start + 4 + end + 3;
                    continue;
                }
                None => break,
            }
        }

        let name = tag_name_at(&lower, start + 1);
        let Some(level) = classify(name) else {
            cursor = start + 1;
            continue;
        };

        let Some(open_end) = tag_end(&lower, start + 1 + name.len()) else {
            break;
        };

        let end = if lower[..open_end].ends_with('/') {
            Some(open_end + 1)
        } else {
            matching_close(&lower, name, open_end)
        };

        match end {
            Some(end) => {
                snippets.push(HtmlSnippet {
                    range: start..end,
                    level,
                });
                cursor = end;
            }
            None => cursor = open_end + 1,
        }
    }

    snippets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(text: &'a str, snippets: &[HtmlSnippet]) -> Vec<(&'a str, HtmlLevel)> {
        snippets
            .iter()
            .map(|s| (&text[s.range.clone()], s.level))
            .collect()
    }

    #[test]
    fn block_and_inline_tags_are_classified() {
        let text = "a <div class=\"x\">box</div> b <strong>bold</strong> c <blink>no</blink>";
        let found = find_snippets(text);
        assert_eq!(
            texts(text, &found),
            vec![
                ("<div class=\"x\">box</div>", HtmlLevel::Block),
                ("<strong>bold</strong>", HtmlLevel::Inline),
            ]
        );
    }

    #[test]
    fn nested_same_name_elements_close_at_the_outer_tag() {
        let text = "<div><div>inner</div> tail</div> after";
        let found = find_snippets(text);
        assert_eq!(found.len(), 1);
        assert_eq!(&text[found[0].range.clone()], "<div><div>inner</div> tail</div>");
    }

    #[test]
    fn similar_tag_names_do_not_confuse_matching() {
        let text = "<a href=\"#\">x <abbr>y</abbr></a> <b>bold<br>line</b>";
        let found = find_snippets(text);
        assert_eq!(
            texts(text, &found),
            vec![
                ("<a href=\"#\">x <abbr>y</abbr></a>", HtmlLevel::Inline),
                ("<b>bold<br>line</b>", HtmlLevel::Inline),
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_unclosed_elements_stay_literal() {
        let text = "<!-- <div>hidden</div> --> <span>open";
        assert!(find_snippets(text).is_empty());
    }

    #[test]
    fn self_closing_and_quoted_gt_are_handled() {
        let text = "<iframe src=\"a>b\" /> and <span title='1 > 0'>ok</span>";
        let found = find_snippets(text);
        assert_eq!(found.len(), 2);
        assert_eq!(&text[found[0].range.clone()], "<iframe src=\"a>b\" />");
        assert_eq!(found[0].level, HtmlLevel::Block);
        assert_eq!(&text[found[1].range.clone()], "<span title='1 > 0'>ok</span>");
    }

    #[test]
    fn uppercase_tags_match() {
        let text = "<DIV>x</DIV>";
        assert_eq!(find_snippets(text).len(), 1);
    }

    #[test]
    fn documents_with_doctype_are_found() {
        let pattern = Regex::new(DOCUMENT_PATTERN).unwrap();
        let text = "see:\n<!DOCTYPE html>\n<html lang=\"en\"><body><div>x</div></body></HTML>\nok";
        let found = find_documents(text, &pattern);
        assert_eq!(found.len(), 1);
        assert!(text[found[0].clone()].starts_with("<!DOCTYPE html>"));
        assert!(text[found[0].clone()].ends_with("</HTML>"));
    }
}
