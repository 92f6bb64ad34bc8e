//! LaTeX math detection.
//!
//! Block math (`$$ ... $$`, `\[ ... \]`) must open at the start of a line,
//! possibly indented. Inline math is `$ ... $` on one line, where neither
//! delimiter touches another `$`, the content does not start or end with
//! whitespace, and the closing `$` is not followed by a digit (so
//! "costs $5 and $10" stays prose), or `\( ... \)` within one paragraph.

use std::ops::Range;

use regex::Regex;

pub(super) const BLOCK_PATTERN: &str =
    r"(?m)^[ \t]*(?:\$\$(?P<dollar>[\s\S]+?)\$\$|\\\[(?P<bracket>[\s\S]+?)\\\])";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathSpan {
    pub range: Range<usize>,
    pub body: String,
}

pub(super) fn find_blocks(text: &str, pattern: &Regex) -> Vec<MathSpan> {
    pattern
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let body = captures
                .name("dollar")
                .or_else(|| captures.name("bracket"))?
                .as_str()
                .trim();
            if body.is_empty() {
                return None;
            }
            let start = whole.start() + (whole.as_str().len() - whole.as_str().trim_start().len());
            Some(MathSpan {
                range: start..whole.end(),
                body: body.to_string(),
            })
        })
        .collect()
}

fn dollar_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut j = open + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\n' => return None,
            b'\\' => {
                j += 2;
                continue;
            }
            b'$' => {
                if bytes.get(j + 1) == Some(&b'$') {
                    j += 2;
                    continue;
                }
                let tight = !bytes[j - 1].is_ascii_whitespace();
                let digit_follows = bytes.get(j + 1).is_some_and(u8::is_ascii_digit);
                if tight && !digit_follows {
                    return Some(j);
                }
            }
            _ => {}
        }
        j += 1;
    }
    None
}

fn paren_close(text: &str, open: usize) -> Option<usize> {
    let rest = &text[open + 2..];
    let limit = rest.find("\n\n").unwrap_or(rest.len());
    rest[..limit].find("\\)").map(|at| open + 2 + at)
}

/// Inline math spans in `text`, in document order.
pub fn find_inline(text: &str) -> Vec<MathSpan> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1) == Some(&b'(') => {
                if let Some(close) = paren_close(text, i) {
                    let body = text[i + 2..close].trim();
                    if !body.is_empty() {
                        spans.push(MathSpan {
                            range: i..close + 2,
                            body: body.to_string(),
                        });
                        i = close + 2;
                        continue;
                    }
                }
                i += 2;
            }
            b'\\' => i += 2,
            b'$' => {
                let doubled = (i > 0 && bytes[i - 1] == b'$') || bytes.get(i + 1) == Some(&b'$');
                let opens = !doubled
                    && bytes
                        .get(i + 1)
                        .is_some_and(|next| !next.is_ascii_whitespace());
                if opens {
                    if let Some(close) = dollar_close(bytes, i) {
                        spans.push(MathSpan {
                            range: i..close + 1,
                            body: text[i + 1..close].to_string(),
                        });
                        i = close + 1;
                        continue;
                    }
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(text: &str) -> Vec<String> {
        let pattern = Regex::new(BLOCK_PATTERN).unwrap();
        find_blocks(text, &pattern)
            .into_iter()
            .map(|span| span.body)
            .collect()
    }

    fn inline(text: &str) -> Vec<String> {
        find_inline(text).into_iter().map(|span| span.body).collect()
    }

    #[test]
    fn block_math_at_line_start() {
        assert_eq!(
            blocks("Euler:\n$$\ne^{i\\pi} + 1 = 0\n$$\ndone"),
            vec!["e^{i\\pi} + 1 = 0"]
        );
        assert_eq!(blocks("  \\[ a^2 + b^2 \\]"), vec!["a^2 + b^2"]);
    }

    #[test]
    fn block_math_mid_line_is_not_a_block() {
        assert!(blocks("inline $$x$$ here").is_empty());
    }

    #[test]
    fn block_range_excludes_indentation() {
        let pattern = Regex::new(BLOCK_PATTERN).unwrap();
        let text = "   $$x$$";
        let found = find_blocks(text, &pattern);
        assert_eq!(&text[found[0].range.clone()], "$$x$$");
    }

    #[test]
    fn inline_dollar_math() {
        assert_eq!(inline("Cost is $x^2$."), vec!["x^2"]);
        assert_eq!(inline("$a$ and $b + c$"), vec!["a", "b + c"]);
    }

    #[test]
    fn currency_and_spacing_are_not_math() {
        assert!(inline("costs $5 and $10 today").is_empty());
        assert!(inline("a $ b $ c").is_empty());
        assert!(inline("escaped \\$x\\$ stays").is_empty());
        assert!(inline("no close $x\nhere$").is_empty());
    }

    #[test]
    fn double_dollars_never_open_inline_math() {
        assert!(inline("$$x$$").is_empty());
    }

    #[test]
    fn paren_math() {
        assert_eq!(inline("where \\(x_1\\) holds"), vec!["x_1"]);
        assert!(inline("open \\(x\n\nnever closed \\)").is_empty());
    }

    #[test]
    fn multibyte_text_around_math() {
        let text = "💸 $x$ ✓";
        let spans = find_inline(text);
        assert_eq!(&text[spans[0].range.clone()], "$x$");
    }
}
