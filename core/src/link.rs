use std::fmt;
use std::io::Write;

use parking_lot::Mutex;
use thiserror::Error;

use crate::concordance::Concordance;
use crate::source::DocUri;

pub const COLUMNS: [&str; 10] = [
    "anchor_text",
    "source_hits",
    "target_hits",
    "source_title",
    "target_title",
    "source_context",
    "target_context",
    "source_uri",
    "target_uri",
    "target_fragment",
];

const MARKER: &str = "<<LNK>>";
const SNIPPET_SEP: &str = " | ";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },
    #[error("line is a header")]
    Header,
    #[error("bad count in column {column}: {value}")]
    Count { column: &'static str, value: String },
    #[error("bad document uri {0}")]
    Uri(String),
    #[error("snippet without marker: {0}")]
    Snippet(String),
}

/// Text immediately before and after one occurrence of an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextSnippet {
    pub pretext: String,
    pub posttext: String,
}

impl ContextSnippet {
    pub fn new(pretext: impl AsRef<str>, posttext: impl AsRef<str>) -> Self {
        Self { pretext: pretext.as_ref().trim().to_string(), posttext: posttext.as_ref().trim().to_string() }
    }

    /// Pretext right-aligned and posttext left-aligned to `width` columns around the anchor.
    pub fn pretty(&self, anchor: &str, width: usize) -> String {
        let pre = tail_chars(&self.pretext, width);
        let post: String = self.posttext.chars().take(width).collect();
        format!("{pre:>width$} [{anchor}] {post:<width$}")
    }
}

impl From<&Concordance> for ContextSnippet {
    fn from(c: &Concordance) -> Self { ContextSnippet::new(&c.leading, &c.trailing) }
}

impl fmt::Display for ContextSnippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {MARKER} {}", escape(&self.pretext), escape(&self.posttext))
    }
}

/// A hyperlink an author placed in prose, with context on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub anchor_text: String,
    pub source_hits: usize,
    pub target_hits: usize,
    pub source_title: String,
    pub target_title: String,
    pub source_context: Vec<ContextSnippet>,
    pub target_context: Vec<ContextSnippet>,
    pub source_uri: DocUri,
    pub target_uri: DocUri,
    /// Subsection id without the leading `#`; empty when the link has none.
    pub target_fragment: String,
}

impl Link {
    pub fn header() -> String { COLUMNS.join("\t") }

    pub fn to_line(&self) -> String {
        [
            escape(&self.anchor_text),
            self.source_hits.to_string(),
            self.target_hits.to_string(),
            escape(&self.source_title),
            escape(&self.target_title),
            join_snippets(&self.source_context),
            join_snippets(&self.target_context),
            escape(&self.source_uri.to_string()),
            escape(&self.target_uri.to_string()),
            escape(&self.target_fragment),
        ]
        .join("\t")
    }

    pub fn parse_line(line: &str) -> Result<Self, RecordError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < COLUMNS.len() {
            return Err(RecordError::ColumnCount { expected: COLUMNS.len(), found: cols.len() });
        }
        if cols[0] == COLUMNS[0] && cols[1] == COLUMNS[1] {
            return Err(RecordError::Header);
        }
        let count = |i: usize| {
            cols[i].parse::<usize>().map_err(|_| RecordError::Count { column: COLUMNS[i], value: cols[i].to_string() })
        };
        let uri = |i: usize| {
            let raw = unescape(cols[i]);
            raw.parse::<DocUri>().map_err(|_| RecordError::Uri(raw))
        };
        Ok(Link {
            anchor_text: unescape(cols[0]),
            source_hits: count(1)?,
            target_hits: count(2)?,
            source_title: unescape(cols[3]),
            target_title: unescape(cols[4]),
            source_context: split_snippets(cols[5])?,
            target_context: split_snippets(cols[6])?,
            source_uri: uri(7)?,
            target_uri: uri(8)?,
            target_fragment: unescape(cols[9]),
        })
    }

    /// One aligned line for reading a run by eye; not meant to be parsed back.
    pub fn to_pretty(&self, width: usize) -> String {
        let window = self
            .source_context
            .first()
            .map(|s| s.pretty(&self.anchor_text, width))
            .unwrap_or_else(|| format!("{:>width$} [{}]", "", self.anchor_text));
        format!("{window}  -> {}{}", self.target_uri, fragment_suffix(&self.target_fragment))
    }
}

fn fragment_suffix(fragment: &str) -> String {
    if fragment.is_empty() { String::new() } else { format!("#{fragment}") }
}

fn tail_chars(s: &str, n: usize) -> String {
    let len = s.chars().count();
    s.chars().skip(len.saturating_sub(n)).collect()
}

pub fn join_snippets(snippets: &[ContextSnippet]) -> String {
    snippets.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(SNIPPET_SEP)
}

fn split_snippets(field: &str) -> Result<Vec<ContextSnippet>, RecordError> {
    if field.is_empty() {
        return Ok(Vec::new());
    }
    split_unescaped(field, '|')
        .into_iter()
        .map(|raw| {
            let (pre, post) = raw.split_once(MARKER).ok_or_else(|| RecordError::Snippet(raw.to_string()))?;
            Ok(ContextSnippet::new(unescape(pre), unescape(post)))
        })
        .collect()
}

/// Split on `sep` unless it is preceded by a backslash escape.
fn split_unescaped(field: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, ch) in field.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            parts.push(&field[start..i]);
            start = i + ch.len_utf8();
        }
    }
    parts.push(&field[start..]);
    parts
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '|' => out.push_str("\\|"),
            _ => out.push(ch),
        }
    }
    // `<<LNK>>` cannot survive escaping above, so break it explicitly.
    out.replace(MARKER, "<\\<LNK>>")
}

pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Serializes rows from many workers onto one writer, a whole line at a time.
pub struct RecordSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> RecordSink<W> {
    pub fn new(out: W) -> Self { Self { out: Mutex::new(out) } }

    pub fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut out = self.out.lock();
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")
    }

    pub fn flush(&self) -> std::io::Result<()> { self.out.lock().flush() }

    pub fn into_inner(self) -> W { self.out.into_inner() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Link {
        Link {
            anchor_text: "widget".into(),
            source_hits: 3,
            target_hits: 4,
            source_title: "Doc A".into(),
            target_title: "Doc B".into(),
            source_context: vec![
                ContextSnippet::new("Use the", "to build things."),
                ContextSnippet::new("", "tail only"),
            ],
            target_context: vec![ContextSnippet::new("a | pipe and \\ slash", "tab\there <<LNK>> marker")],
            source_uri: "docs.tgz!/a/A.html".parse().unwrap(),
            target_uri: "docs.tgz!/a/B.html".parse().unwrap(),
            target_fragment: "section-2".into(),
        }
    }

    #[test]
    fn line_round_trip() {
        let link = sample();
        let line = link.to_line();
        assert_eq!(line.split('\t').count(), COLUMNS.len());
        assert_eq!(Link::parse_line(&line).unwrap(), link);
    }

    #[test]
    fn empty_contexts_round_trip() {
        let mut link = sample();
        link.source_context.clear();
        link.target_context.clear();
        link.target_fragment.clear();
        assert_eq!(Link::parse_line(&link.to_line()).unwrap(), link);
    }

    #[test]
    fn header_is_rejected() {
        assert!(matches!(Link::parse_line(&Link::header()), Err(RecordError::Header)));
    }

    #[test]
    fn short_line_is_rejected() {
        assert!(matches!(Link::parse_line("a\tb"), Err(RecordError::ColumnCount { found: 2, .. })));
    }

    #[test]
    fn bad_count_is_rejected() {
        let line = sample().to_line().replacen("\t3\t", "\tthree\t", 1);
        assert!(matches!(Link::parse_line(&line), Err(RecordError::Count { column: "source_hits", .. })));
    }

    #[test]
    fn pretty_aligns_around_anchor() {
        let s = ContextSnippet::new("abc", "xyz");
        assert_eq!(s.pretty("w", 5), "  abc [w] xyz  ");
    }

    #[test]
    fn sink_writes_whole_lines() {
        let sink = RecordSink::new(Vec::new());
        sink.write_line("one").unwrap();
        sink.write_line("two").unwrap();
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "one\ntwo\n");
    }
}
