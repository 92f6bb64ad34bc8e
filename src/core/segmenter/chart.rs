//! Diagram blocks that can be drawn as native charts.
//!
//! Two fence tags are recognized:
//!
//! - `mermaid` blocks holding a `pie` or `xychart-beta` diagram;
//! - `chart` blocks in a small key/value format:
//!
//! ```text
//! type: bar
//! title: Monthly sales
//! Jan: 10
//! Feb: 12.5 @ 2024
//! ```
//!
//! where `@ group` optionally names the series a point belongs to. Anything
//! else (other mermaid diagrams, malformed data) fails to parse and is kept
//! as HTML for a diagram renderer.

use std::fmt::Write as _;

pub const DIAGRAM_TAGS: &[&str] = &["mermaid", "chart"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
}

impl ChartKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bar" => Some(ChartKind::Bar),
            "line" => Some(ChartKind::Line),
            "pie" => Some(ChartKind::Pie),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChart {
    pub kind: ChartKind,
    pub title: Option<String>,
    pub data: Vec<ChartPoint>,
}

impl ParsedChart {
    /// Parse the body of a diagram fence tagged `tag`. Returns `None` unless
    /// at least one data point was found.
    pub fn parse(tag: &str, body: &str) -> Option<ParsedChart> {
        let chart = match tag.to_ascii_lowercase().as_str() {
            "mermaid" => parse_mermaid(body),
            "chart" => parse_key_value(body),
            _ => None,
        }?;
        if chart.data.is_empty() {
            return None;
        }
        Some(chart)
    }

    /// Render back to the `chart` fence format.
    pub fn to_source(&self) -> String {
        let mut out = String::from("```chart\n");
        let _ = writeln!(out, "type: {}", self.kind.as_str());
        if let Some(title) = &self.title {
            let _ = writeln!(out, "title: {title}");
        }
        for point in &self.data {
            match &point.group {
                Some(group) => {
                    let _ = writeln!(out, "{}: {} @ {}", point.label, point.value, group);
                }
                None => {
                    let _ = writeln!(out, "{}: {}", point.label, point.value);
                }
            }
        }
        out.push_str("```");
        out
    }
}

fn meaningful_lines(body: &str) -> impl Iterator<Item = &str> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("%%"))
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_mermaid(body: &str) -> Option<ParsedChart> {
    let mut lines = meaningful_lines(body);
    let header = lines.next()?;
    let keyword = header.split_whitespace().next()?;

    match keyword {
        "pie" => parse_mermaid_pie(header, lines),
        "xychart-beta" | "xychart" => parse_mermaid_xychart(lines),
        _ => None,
    }
}

fn parse_mermaid_pie<'a>(
    header: &str,
    lines: impl Iterator<Item = &'a str>,
) -> Option<ParsedChart> {
    let mut title = header
        .find("title")
        .map(|at| header[at + "title".len()..].trim().to_string())
        .filter(|t| !t.is_empty());
    let mut data = Vec::new();

    for line in lines {
        if let Some(rest) = line.strip_prefix("title") {
            title = Some(rest.trim().to_string());
            continue;
        }
        let (label, value) = line.rsplit_once(':')?;
        let value: f64 = value.trim().parse().ok()?;
        data.push(ChartPoint {
            label: unquote(label).to_string(),
            value,
            group: None,
        });
    }

    Some(ParsedChart {
        kind: ChartKind::Pie,
        title,
        data,
    })
}

fn parse_bracket_list(value: &str) -> Option<Vec<String>> {
    let inner = value.trim().strip_prefix('[')?.strip_suffix(']')?;
    Some(
        inner
            .split(',')
            .map(|item| unquote(item).to_string())
            .filter(|item| !item.is_empty())
            .collect(),
    )
}

fn parse_mermaid_xychart<'a>(lines: impl Iterator<Item = &'a str>) -> Option<ParsedChart> {
    let mut title = None;
    let mut labels: Vec<String> = Vec::new();
    let mut series: Vec<(ChartKind, Vec<f64>)> = Vec::new();

    for line in lines {
        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match keyword {
            "title" => title = Some(unquote(rest).to_string()),
            "x-axis" => {
                let list = rest.find('[').map(|at| &rest[at..]);
                if let Some(parsed) = list.and_then(parse_bracket_list) {
                    labels = parsed;
                }
            }
            "y-axis" => {}
            "bar" | "line" => {
                let kind = ChartKind::parse(keyword)?;
                let values = parse_bracket_list(rest)?
                    .iter()
                    .map(|v| v.parse::<f64>().ok())
                    .collect::<Option<Vec<_>>>()?;
                series.push((kind, values));
            }
            _ => return None,
        }
    }

    let kind = series.first().map(|(kind, _)| *kind)?;
    let grouped = series.len() > 1;
    let mut data = Vec::new();
    for (index, (series_kind, values)) in series.iter().enumerate() {
        for (position, value) in values.iter().enumerate() {
            data.push(ChartPoint {
                label: labels
                    .get(position)
                    .cloned()
                    .unwrap_or_else(|| (position + 1).to_string()),
                value: *value,
                group: grouped.then(|| format!("{} {}", series_kind.as_str(), index + 1)),
            });
        }
    }

    Some(ParsedChart { kind, title, data })
}

fn parse_key_value(body: &str) -> Option<ParsedChart> {
    let mut kind = ChartKind::Bar;
    let mut title = None;
    let mut data = Vec::new();

    for line in meaningful_lines(body) {
        let (key, value) = line.split_once(':')?;
        match key.trim().to_ascii_lowercase().as_str() {
            "type" => kind = ChartKind::parse(value)?,
            "title" => title = Some(value.trim().to_string()),
            _ => {
                let (value, group) = match value.split_once('@') {
                    Some((value, group)) => (value, Some(group.trim().to_string())),
                    None => (value, None),
                };
                data.push(ChartPoint {
                    label: unquote(key).to_string(),
                    value: value.trim().parse().ok()?,
                    group: group.filter(|g| !g.is_empty()),
                });
            }
        }
    }

    Some(ParsedChart { kind, title, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mermaid_pie_with_title_in_header() {
        let body = "pie showData title Pets\n    \"Dogs\" : 386\n    \"Cats\" : 85.5\n";
        let chart = ParsedChart::parse("mermaid", body).expect("pie chart");
        assert_eq!(chart.kind, ChartKind::Pie);
        assert_eq!(chart.title.as_deref(), Some("Pets"));
        assert_eq!(chart.data.len(), 2);
        assert_eq!(chart.data[1].label, "Cats");
        assert_eq!(chart.data[1].value, 85.5);
    }

    #[test]
    fn mermaid_xychart_with_two_series_is_grouped() {
        let body = "xychart-beta\n  title \"Revenue\"\n  x-axis [jan, feb]\n  y-axis \"USD\" 0 --> 100\n  bar [10, 20]\n  line [15, 25]\n";
        let chart = ParsedChart::parse("mermaid", body).expect("xy chart");
        assert_eq!(chart.kind, ChartKind::Bar);
        assert_eq!(chart.title.as_deref(), Some("Revenue"));
        assert_eq!(chart.data.len(), 4);
        assert_eq!(chart.data[0].label, "jan");
        assert_eq!(chart.data[0].group.as_deref(), Some("bar 1"));
        assert_eq!(chart.data[3].label, "feb");
        assert_eq!(chart.data[3].group.as_deref(), Some("line 2"));
    }

    #[test]
    fn key_value_chart_with_groups() {
        let body = "type: line\ntitle: Latency\nmon: 12 @ p50\nmon: 40 @ p99\ntue: 11\n";
        let chart = ParsedChart::parse("chart", body).expect("chart");
        assert_eq!(chart.kind, ChartKind::Line);
        assert_eq!(chart.data.len(), 3);
        assert_eq!(chart.data[1].group.as_deref(), Some("p99"));
        assert_eq!(chart.data[2].group, None);
    }

    #[test]
    fn unsupported_or_empty_diagrams_fail() {
        assert!(ParsedChart::parse("mermaid", "graph TD\n  A --> B\n").is_none());
        assert!(ParsedChart::parse("mermaid", "pie title Empty\n").is_none());
        assert!(ParsedChart::parse("chart", "type: bar\ntitle: nothing\n").is_none());
        assert!(ParsedChart::parse("chart", "type: donut\na: 1\n").is_none());
        assert!(ParsedChart::parse("chart", "a: lots\n").is_none());
    }

    #[test]
    fn to_source_parses_back_to_the_same_chart() {
        let body = "type: pie\ntitle: Share\nA: 1 @ x\nB: 2\n";
        let chart = ParsedChart::parse("chart", body).unwrap();
        let source = chart.to_source();
        let inner = source
            .strip_prefix("```chart\n")
            .and_then(|s| s.strip_suffix("```"))
            .unwrap();
        assert_eq!(ParsedChart::parse("chart", inner), Some(chart));
    }
}
