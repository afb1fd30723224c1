// crates/scd-pipeline-core/src/runtime/source.rs
// ============================================================================
// Module: Record Sources
// Description: Built-in record sources over JSON-lines files and vectors.
// Purpose: Provide ordered, stable-iteration views of an acquired dataset.
// Dependencies: crate::interfaces, serde_json
// ============================================================================

//! ## Overview
//! [`JsonLinesSource`] reads the dataset file dropped by the acquisition job:
//! one JSON object per non-blank line, blank lines ignored, offsets counted
//! over non-blank lines. [`VecRecordSource`] holds rows in memory for tests
//! and demos. Lines that are not UTF-8, not JSON, or not JSON objects surface
//! as [`RawRow::Malformed`] rather than failing the read.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;

use crate::core::ConsumptionWindow;
use crate::core::RawRow;
use crate::interfaces::RecordSource;
use crate::interfaces::SourceError;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts a decoded JSON value into a raw row.
fn to_row(offset: u64, value: Value) -> RawRow {
    match value {
        Value::Object(fields) => RawRow::Parsed {
            offset,
            fields,
        },
        other => RawRow::Malformed {
            offset,
            reason: format!("expected a JSON object, found {}", json_kind(&other)),
        },
    }
}

/// Returns the JSON type name of a value.
const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// SECTION: Vector Source
// ============================================================================

/// In-memory record source.
#[derive(Debug, Clone, Default)]
pub struct VecRecordSource {
    /// Rows in source order.
    rows: Vec<Value>,
}

impl VecRecordSource {
    /// Creates a source over the given rows.
    #[must_use]
    pub const fn new(rows: Vec<Value>) -> Self {
        Self {
            rows,
        }
    }
}

impl RecordSource for VecRecordSource {
    fn total(&self) -> Result<u64, SourceError> {
        u64::try_from(self.rows.len()).map_err(|err| SourceError::Invalid(err.to_string()))
    }

    fn read_window(&self, window: ConsumptionWindow) -> Result<Vec<RawRow>, SourceError> {
        let start = usize::try_from(window.offset)
            .map_err(|err| SourceError::Invalid(err.to_string()))?;
        let count =
            usize::try_from(window.count).map_err(|err| SourceError::Invalid(err.to_string()))?;
        Ok(self
            .rows
            .iter()
            .skip(start)
            .take(count)
            .zip(window.offset..)
            .map(|(value, offset)| to_row(offset, value.clone()))
            .collect())
    }
}

// ============================================================================
// SECTION: JSON Lines Source
// ============================================================================

/// Record source over a JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    /// Dataset file path.
    path: PathBuf,
}

impl JsonLinesSource {
    /// Creates a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    /// Returns the dataset file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the dataset and yields its non-blank lines in order as raw bytes.
    ///
    /// Lines are not decoded here so one undecodable line cannot fail the
    /// whole stream; decoding happens per row in [`RecordSource::read_window`].
    fn lines(&self) -> Result<impl Iterator<Item = Result<Vec<u8>, SourceError>>, SourceError> {
        let file = File::open(&self.path).map_err(|err| {
            SourceError::Io(format!("failed to open {}: {err}", self.path.display()))
        })?;
        let mut reader = BufReader::new(file);
        let lines = std::iter::from_fn(move || {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => None,
                Ok(_) => Some(Ok(line)),
                Err(err) => Some(Err(SourceError::Io(err.to_string()))),
            }
        });
        Ok(lines.filter(|line| line.as_ref().map_or(true, |bytes| !is_blank(bytes))))
    }
}

/// Returns true when a raw line holds only ASCII whitespace.
fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

impl RecordSource for JsonLinesSource {
    fn total(&self) -> Result<u64, SourceError> {
        let mut total = 0_u64;
        for line in self.lines()? {
            line?;
            total += 1;
        }
        Ok(total)
    }

    fn read_window(&self, window: ConsumptionWindow) -> Result<Vec<RawRow>, SourceError> {
        let mut rows = Vec::new();
        for (offset, line) in (0_u64..).zip(self.lines()?) {
            if offset >= window.end() {
                break;
            }
            let line = line?;
            if offset < window.offset {
                continue;
            }
            let Ok(text) = String::from_utf8(line) else {
                rows.push(RawRow::Malformed {
                    offset,
                    reason: "invalid UTF-8".to_string(),
                });
                continue;
            };
            let row = match serde_json::from_str::<Value>(&text) {
                Ok(value) => to_row(offset, value),
                Err(err) => RawRow::Malformed {
                    offset,
                    reason: format!("invalid JSON: {err}"),
                },
            };
            rows.push(row);
        }
        Ok(rows)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

    use std::io::Write;

    use serde_json::json;

    use super::*;

    #[test]
    fn vec_source_reads_windows_with_absolute_offsets() {
        let source = VecRecordSource::new(vec![json!({"id": 1}), json!(2), json!({"id": 3})]);
        assert_eq!(source.total().unwrap(), 3);
        let rows = source
            .read_window(ConsumptionWindow {
                offset: 1,
                count: 5,
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(matches!(rows[0], RawRow::Malformed { offset: 1, .. }));
        assert_eq!(rows[1].offset(), 2);
    }

    #[test]
    fn json_lines_source_skips_blank_lines_and_flags_bad_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"id\": \"a\"}}").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, "{{\"id\": \"c\"}}").unwrap();
        let source = JsonLinesSource::new(file.path());
        assert_eq!(source.total().unwrap(), 3);
        let rows = source
            .read_window(ConsumptionWindow {
                offset: 1,
                count: 2,
            })
            .unwrap();
        assert!(matches!(rows[0], RawRow::Malformed { offset: 1, .. }));
        assert!(matches!(rows[1], RawRow::Parsed { offset: 2, .. }));
    }

    #[test]
    fn undecodable_line_is_a_malformed_row() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"id\":\"a\"}\n{\"id\":\"\xff\xfe\"}\n{\"id\":\"c\"}\n").unwrap();
        let source = JsonLinesSource::new(file.path());
        assert_eq!(source.total().unwrap(), 3);
        let rows = source
            .read_window(ConsumptionWindow {
                offset: 0,
                count: 10,
            })
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(matches!(rows[0], RawRow::Parsed { offset: 0, .. }));
        assert!(
            matches!(&rows[1], RawRow::Malformed { offset: 1, reason } if reason == "invalid UTF-8")
        );
        assert!(matches!(rows[2], RawRow::Parsed { offset: 2, .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let source = JsonLinesSource::new("/nonexistent/scd-pipeline/data.jsonl");
        assert!(matches!(source.total(), Err(SourceError::Io(_))));
    }
}
