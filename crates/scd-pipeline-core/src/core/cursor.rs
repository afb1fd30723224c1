// crates/scd-pipeline-core/src/core/cursor.rs
// ============================================================================
// Module: Ingestion Cursor
// Description: Persisted per-stream progress and consumption window planning.
// Purpose: Gate which slice of a source each invocation may see.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Each stream owns one [`IngestionCursor`] row. [`plan_window`] is a pure
//! function of the committed cursor, the source total, the mode, and the
//! chunk size; it returns the window to consume and the cursor to commit
//! alongside that window's writes. Nothing here touches storage.
//!
//! ## Invariants
//! - `consumed <= available` once `available` is known.
//! - Chunked planning never decreases `consumed`.
//! - Full planning resets `consumed` to zero and advances it to the total.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::StreamId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Ingestion mode for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionMode {
    /// Consume every record, resetting the cursor first.
    Full,
    /// Consume at most one chunk past the cursor.
    Chunked,
}

impl IngestionMode {
    /// Returns the stable mode label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Chunked => "chunked",
        }
    }

    /// Parses a mode label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "full" => Some(Self::Full),
            "chunked" => Some(Self::Chunked),
            _ => None,
        }
    }
}

/// Persisted ingestion progress for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionCursor {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Total records available, known after the first advance.
    pub available: Option<u64>,
    /// Records consumed so far.
    pub consumed: u64,
    /// Chunk size of the last chunked advance.
    pub chunk_size: Option<u64>,
    /// Mode of the last advance.
    pub mode: Option<IngestionMode>,
    /// Timestamp of the last committed advance.
    pub updated_at: Option<Timestamp>,
}

impl IngestionCursor {
    /// Creates the cursor of a stream that was never advanced.
    #[must_use]
    pub const fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            available: None,
            consumed: 0,
            chunk_size: None,
            mode: None,
            updated_at: None,
        }
    }

    /// Returns the read-only progress view of the cursor.
    #[must_use]
    pub fn progress(&self) -> ProgressReport {
        ProgressReport {
            stream_id: self.stream_id.clone(),
            mode: self.mode,
            consumed: self.consumed,
            available: self.available,
            percent_complete: percent_complete(self.consumed, self.available),
        }
    }
}

/// Half-open slice `[offset, offset + count)` of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionWindow {
    /// First source offset in the window.
    pub offset: u64,
    /// Number of records in the window.
    pub count: u64,
}

impl ConsumptionWindow {
    /// Returns true when the window contains no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the exclusive end offset.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset.saturating_add(self.count)
    }
}

/// Planned window plus the cursor to commit with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPlan {
    /// Window to consume.
    pub window: ConsumptionWindow,
    /// Cursor state after the window commits.
    pub cursor: IngestionCursor,
}

/// Read-only progress view served to monitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Mode of the last advance; null before the first advance.
    pub mode: Option<IngestionMode>,
    /// Records consumed.
    pub consumed: u64,
    /// Records available; null before the first advance.
    pub available: Option<u64>,
    /// Completion percentage rounded to two decimals.
    pub percent_complete: f64,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Window planning errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// Chunked mode without a positive chunk size.
    #[error("invalid chunk size for stream {stream_id}: {reason}")]
    InvalidChunkSize {
        /// Stream identifier.
        stream_id: String,
        /// Failure reason.
        reason: String,
    },
    /// Source reports fewer records than already consumed.
    #[error("source for stream {stream_id} shrank: consumed {consumed}, available {available}")]
    SourceShrank {
        /// Stream identifier.
        stream_id: String,
        /// Records already consumed.
        consumed: u64,
        /// Records now reported by the source.
        available: u64,
    },
}

// ============================================================================
// SECTION: Planning
// ============================================================================

/// Plans the next consumption window for a stream.
///
/// # Errors
///
/// Returns [`CursorError::InvalidChunkSize`] when chunked mode lacks a
/// positive chunk size and [`CursorError::SourceShrank`] when a chunked run
/// finds the source total below the committed cursor. Full mode rescans from
/// offset zero and accepts any total.
pub fn plan_window(
    cursor: &IngestionCursor,
    source_total: u64,
    mode: IngestionMode,
    chunk_size: Option<u64>,
    as_of: Timestamp,
) -> Result<WindowPlan, CursorError> {
    let (window, chunk_size) = match mode {
        IngestionMode::Full => (
            ConsumptionWindow {
                offset: 0,
                count: source_total,
            },
            cursor.chunk_size,
        ),
        IngestionMode::Chunked => {
            let chunk = match chunk_size {
                Some(0) => {
                    return Err(CursorError::InvalidChunkSize {
                        stream_id: cursor.stream_id.to_string(),
                        reason: "chunk size must be greater than zero".to_string(),
                    });
                }
                Some(chunk) => chunk,
                None => {
                    return Err(CursorError::InvalidChunkSize {
                        stream_id: cursor.stream_id.to_string(),
                        reason: "chunked mode requires a chunk size".to_string(),
                    });
                }
            };
            let Some(remaining) = source_total.checked_sub(cursor.consumed) else {
                return Err(CursorError::SourceShrank {
                    stream_id: cursor.stream_id.to_string(),
                    consumed: cursor.consumed,
                    available: source_total,
                });
            };
            (
                ConsumptionWindow {
                    offset: cursor.consumed,
                    count: remaining.min(chunk),
                },
                Some(chunk),
            )
        }
    };
    Ok(WindowPlan {
        window,
        cursor: IngestionCursor {
            stream_id: cursor.stream_id.clone(),
            available: Some(source_total),
            consumed: window.end(),
            chunk_size,
            mode: Some(mode),
            updated_at: Some(as_of),
        },
    })
}

/// Computes the completion percentage rounded to two decimals.
#[allow(clippy::cast_precision_loss, reason = "Progress percentages tolerate f64 rounding.")]
fn percent_complete(consumed: u64, available: Option<u64>) -> f64 {
    match available {
        None => 0.0,
        Some(0) => 100.0,
        Some(total) => {
            let ratio = consumed.min(total) as f64 / total as f64;
            (ratio * 10_000.0).round() / 100.0
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        reason = "Test-only assertions."
    )]

    use super::*;

    fn advance(cursor: &IngestionCursor, total: u64, chunk: u64) -> WindowPlan {
        plan_window(
            cursor,
            total,
            IngestionMode::Chunked,
            Some(chunk),
            Timestamp::from_unix_millis(1),
        )
        .unwrap()
    }

    #[test]
    fn chunked_windows_walk_to_an_empty_terminal_window() {
        let mut cursor = IngestionCursor::new(StreamId::new("accidents"));
        let mut counts = Vec::new();
        for _ in 0..4 {
            let plan = advance(&cursor, 10_000, 4_000);
            counts.push(plan.window.count);
            cursor = plan.cursor;
        }
        assert_eq!(counts, vec![4_000, 4_000, 2_000, 0]);
        assert_eq!(cursor.consumed, 10_000);
        assert_eq!(cursor.progress().percent_complete, 100.0);
    }

    #[test]
    fn full_mode_resets_and_covers_everything() {
        let mut cursor = IngestionCursor::new(StreamId::new("accidents"));
        cursor = advance(&cursor, 100, 30).cursor;
        let plan =
            plan_window(&cursor, 120, IngestionMode::Full, None, Timestamp::from_unix_millis(2))
                .unwrap();
        assert_eq!(
            plan.window,
            ConsumptionWindow {
                offset: 0,
                count: 120
            }
        );
        assert_eq!(plan.cursor.consumed, 120);
        assert_eq!(plan.cursor.mode, Some(IngestionMode::Full));
    }

    #[test]
    fn zero_and_missing_chunk_sizes_are_rejected() {
        let cursor = IngestionCursor::new(StreamId::new("accidents"));
        for chunk in [None, Some(0)] {
            let err = plan_window(
                &cursor,
                10,
                IngestionMode::Chunked,
                chunk,
                Timestamp::from_unix_millis(1),
            )
            .unwrap_err();
            assert!(matches!(err, CursorError::InvalidChunkSize { .. }));
        }
    }

    #[test]
    fn shrinking_source_is_detected() {
        let cursor = advance(&IngestionCursor::new(StreamId::new("s")), 50, 40).cursor;
        let err = plan_window(
            &cursor,
            10,
            IngestionMode::Chunked,
            Some(5),
            Timestamp::from_unix_millis(3),
        )
        .unwrap_err();
        assert!(matches!(err, CursorError::SourceShrank { consumed: 40, .. }));
    }

    #[test]
    fn full_mode_rescans_a_shrunken_source() {
        let cursor = advance(&IngestionCursor::new(StreamId::new("s")), 5, 5).cursor;
        let plan =
            plan_window(&cursor, 3, IngestionMode::Full, None, Timestamp::from_unix_millis(4))
                .unwrap();
        assert_eq!(
            plan.window,
            ConsumptionWindow {
                offset: 0,
                count: 3,
            }
        );
        assert_eq!(plan.cursor.consumed, 3);
        assert_eq!(plan.cursor.available, Some(3));
        assert_eq!(plan.cursor.progress().percent_complete, 100.0);
    }

    #[test]
    fn progress_before_first_advance_is_zero() {
        let progress = IngestionCursor::new(StreamId::new("s")).progress();
        assert_eq!(progress.percent_complete, 0.0);
        assert_eq!(progress.available, None);
        assert_eq!(progress.mode, None);
    }

    #[test]
    fn progress_of_an_empty_source_is_complete() {
        let cursor = advance(&IngestionCursor::new(StreamId::new("s")), 0, 10).cursor;
        assert_eq!(cursor.progress().percent_complete, 100.0);
    }
}
