//! RFC822-like record parsing for job unit files.
//!
//! A unit file is a sequence of records separated by blank lines. Each record
//! is a list of `key: value` fields; a line starting with a space continues
//! the value of the previous field and lines starting with `#` are comments.
//! A continuation line holding a lone `.` stands for an empty line, so that
//! multi-line values can contain paragraphs.

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a record was loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Origin {
    /// File the record was read from, if any.
    pub path: Option<PathBuf>,
    /// Line of the first field.
    pub line_start: usize,
    /// Last line belonging to the record.
    pub line_end: usize,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}", path.display())?,
            None => f.write_str("<string>")?,
        }
        if self.line_start == self.line_end {
            write!(f, ":{}", self.line_start)
        } else {
            write!(f, ":{}-{}", self.line_start, self.line_end)
        }
    }
}

/// A single record: ordered fields with normalized and raw values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rfc822Record {
    data: IndexMap<String, String>,
    raw_data: IndexMap<String, String>,
    origin: Origin,
}

impl Rfc822Record {
    /// Build a record from already normalized fields.
    pub fn from_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let data: IndexMap<String, String> = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            raw_data: data.clone(),
            data,
            origin: Origin::default(),
        }
    }

    /// Get the normalized value of a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Get the value of a field exactly as written (continuation markers
    /// removed, nothing else).
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.raw_data.get(key).map(String::as_str)
    }

    /// Normalized fields in the order they were written.
    #[must_use]
    pub const fn data(&self) -> &IndexMap<String, String> {
        &self.data
    }

    /// Where the record came from.
    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Normalize a raw field value.
///
/// Multi-line values lose their `.` paragraph markers and common indentation.
/// Every value is stripped of surrounding whitespace.
#[must_use]
pub fn normalize_value(raw: &str) -> String {
    if raw.matches('\n').count() > 1 {
        let mut joined = String::with_capacity(raw.len());
        for line in raw.split_inclusive('\n') {
            let (body, newline) = line
                .strip_suffix('\n')
                .map_or((line, ""), |body| (body, "\n"));
            if body.trim_start_matches([' ', '\t']) == "." {
                joined.push_str(&body[..body.len() - 1]);
            } else {
                joined.push_str(body);
            }
            joined.push_str(newline);
        }
        dedent(&joined).trim().to_string()
    } else {
        raw.trim().to_string()
    }
}

/// Remove the whitespace prefix shared by every non-blank line.
///
/// Whitespace-only lines are emptied and do not count towards the prefix.
fn dedent(text: &str) -> String {
    let mut margin: Option<&str> = None;
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        let indent = &line[..line.len() - line.trim_start().len()];
        margin = Some(match margin {
            None => indent,
            Some(current) => common_prefix(current, indent),
        });
    }
    let margin = margin.unwrap_or_default();

    text.split_inclusive('\n')
        .map(|line| {
            if line.trim().is_empty() {
                if line.ends_with('\n') { "\n" } else { "" }
            } else {
                line.strip_prefix(margin).unwrap_or(line)
            }
        })
        .collect()
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let len = a
        .char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((i, c), _)| i + c.len_utf8());
    &a[..len]
}

/// Parser state for the record being assembled.
struct RecordBuilder {
    record: Rfc822Record,
    key: Option<String>,
    value: String,
}

impl RecordBuilder {
    fn new() -> Self {
        Self {
            record: Rfc822Record::default(),
            key: None,
            value: String::new(),
        }
    }

    fn commit_field(&mut self) {
        if let Some(key) = self.key.take() {
            let raw = std::mem::take(&mut self.value);
            let normalized = normalize_value(&raw);
            debug!(key = %key, value = %normalized, "Committed key/value");
            self.record.raw_data.insert(key.clone(), raw);
            self.record.data.insert(key, normalized);
        }
    }

    fn finish(mut self, path: Option<&Path>) -> Option<Rfc822Record> {
        self.commit_field();
        if self.record.is_empty() {
            return None;
        }
        self.record.origin.path = path.map(Path::to_path_buf);
        Some(self.record)
    }
}

/// Parse every record in a piece of text.
///
/// # Errors
///
/// Returns [`Error::Rfc822Syntax`] for a duplicate key within one record, a
/// continuation line with no field to continue, or a non-empty line that is
/// neither a comment nor a field.
pub fn parse_records(text: &str) -> Result<Vec<Rfc822Record>> {
    parse(text, None)
}

/// Read and parse every record in a file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read and
/// [`Error::Rfc822Syntax`] (with the path attached) if it is malformed.
pub fn load_records(path: &Path) -> Result<Vec<Rfc822Record>> {
    let text =
        std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read job unit file"))?;
    parse(&text, Some(path)).map_err(|e| e.with_path(path))
}

fn parse(text: &str, path: Option<&Path>) -> Result<Vec<Rfc822Record>> {
    let mut records = Vec::new();
    let mut builder = RecordBuilder::new();

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let lineno = index + 1;
        if line.starts_with('#') {
            continue;
        }
        if line.trim().is_empty() {
            let finished = std::mem::replace(&mut builder, RecordBuilder::new());
            records.extend(finished.finish(path));
            continue;
        }
        if let Some(rest) = line.strip_prefix(' ') {
            if builder.key.is_none() {
                return Err(Error::syntax(lineno, "Unexpected multi-line value"));
            }
            builder.value.push_str(rest);
            builder.record.origin.line_end = lineno;
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(Error::syntax(
                lineno,
                format!("Unexpected non-empty line: {:?}", line.trim_end()),
            ));
        };

        if builder.record.origin.line_start == 0 {
            builder.record.origin.line_start = lineno;
        }
        builder.commit_field();
        let key = key.trim();
        if builder.record.data.contains_key(key) {
            return Err(Error::syntax(
                lineno,
                format!("Job has a duplicate key {key:?}"),
            ));
        }
        builder.key = Some(key.to_string());
        builder.value = if value.trim().is_empty() {
            String::new()
        } else {
            value.trim_start().to_string()
        };
        builder.record.origin.line_end = lineno;
    }
    records.extend(builder.finish(path));

    debug!(records = records.len(), "Parsed RFC822 records");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record() {
        let records = parse_records("id: a\nplugin: shell\n").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("id"), Some("a"));
        assert_eq!(records[0].get("plugin"), Some("shell"));
        assert_eq!(records[0].origin().line_start, 1);
        assert_eq!(records[0].origin().line_end, 2);
    }

    #[test]
    fn test_records_separated_by_blank_lines() {
        let text = "# leading comment\nid: a\n\n\n  \nid: b\n# inner comment\nplugin: manual\n";
        let records = parse_records(text).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.get("id").unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(records[1].get("plugin"), Some("manual"));
        assert_eq!(records[1].origin().line_start, 6);
    }

    #[test]
    fn test_empty_text() {
        assert!(parse_records("").unwrap().is_empty());
        assert!(parse_records("\n\n# only comments\n").unwrap().is_empty());
    }

    #[test]
    fn test_multi_line_value() {
        let text = "id: a\ncommand:\n  echo one\n  echo two\nplugin: shell\n";
        let records = parse_records(text).unwrap();
        assert_eq!(records[0].get("command"), Some("echo one\necho two"));
        assert_eq!(records[0].get_raw("command"), Some(" echo one\n echo two\n"));
    }

    #[test]
    fn test_dot_marks_empty_line() {
        let text = "description:\n first paragraph\n .\n second paragraph\n";
        let records = parse_records(text).unwrap();
        assert_eq!(
            records[0].get("description"),
            Some("first paragraph\n\nsecond paragraph")
        );
    }

    #[test]
    fn test_single_line_dot_is_kept() {
        let records = parse_records("summary: .\n").unwrap();
        assert_eq!(records[0].get("summary"), Some("."));
    }

    #[test]
    fn test_value_keeps_inner_colons() {
        let records = parse_records("requires: package.name == 'a:b'\n").unwrap();
        assert_eq!(records[0].get("requires"), Some("package.name == 'a:b'"));
    }

    #[test]
    fn test_duplicate_key_is_an_error() {
        let err = parse_records("id: a\nid: b\n").unwrap_err();
        match err {
            Error::Rfc822Syntax { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("duplicate key"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_continuation_without_key_is_an_error() {
        let err = parse_records(" orphan\n").unwrap_err();
        assert!(matches!(err, Error::Rfc822Syntax { line: 1, .. }));
    }

    #[test]
    fn test_garbage_line_is_an_error() {
        let err = parse_records("id: a\nnot a field\n").unwrap_err();
        assert!(matches!(err, Error::Rfc822Syntax { line: 2, .. }));
    }

    #[test]
    fn test_normalize_value() {
        assert_eq!(normalize_value("  value \n"), "value");
        assert_eq!(normalize_value("\n    a\n      b\n    c\n"), "a\n  b\nc");
        assert_eq!(normalize_value("a\n.\nb\n"), "a\n\nb");
    }

    #[test]
    fn test_origin_display() {
        let origin = Origin {
            path: Some(PathBuf::from("units/jobs.pxu")),
            line_start: 3,
            line_end: 7,
        };
        assert_eq!(origin.to_string(), "units/jobs.pxu:3-7");
        let origin = Origin {
            path: None,
            line_start: 1,
            line_end: 1,
        };
        assert_eq!(origin.to_string(), "<string>:1");
    }

    #[test]
    fn test_load_records_attaches_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pxu");
        std::fs::write(&path, "id: a\n junk\nnope\n").unwrap();
        let err = load_records(&path).unwrap_err();
        match err {
            Error::Rfc822Syntax { path: Some(p), line, .. } => {
                assert_eq!(p, path);
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
