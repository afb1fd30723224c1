// crates/scd-pipeline-core/src/interfaces/mod.rs
// ============================================================================
// Module: Pipeline Interfaces
// Description: Backend-agnostic traits for record sources and stores.
// Purpose: Define the contract between the pipeline runtime and its collaborators.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The runtime talks to two collaborators. A [`RecordSource`] is the ordered,
//! stable-iteration view of the acquired dataset. A [`PipelineStore`] holds
//! the raw landing table, per-stream cursors, historized versions, and the
//! writer lease. Every store write that changes pipeline state is a single
//! all-or-nothing call so a failed step leaves the pre-step committed state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::BatchId;
use crate::core::ConsumptionWindow;
use crate::core::HistorizedRecord;
use crate::core::IngestionCursor;
use crate::core::NaturalKey;
use crate::core::RawRow;
use crate::core::SourceRecord;
use crate::core::SplitAssignment;
use crate::core::SplitLabel;
use crate::core::StreamId;
use crate::core::Timestamp;
use crate::core::Transition;

// ============================================================================
// SECTION: Record Source
// ============================================================================

/// Record source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Source could not be read.
    #[error("record source io error: {0}")]
    Io(String),
    /// Source returned data inconsistent with its own contract.
    #[error("record source invalid: {0}")]
    Invalid(String),
}

/// Ordered, stable-iteration source of raw rows.
pub trait RecordSource {
    /// Returns the number of records currently available.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the source cannot be read.
    fn total(&self) -> Result<u64, SourceError>;

    /// Reads the rows inside `window`, in source order.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the source cannot be read.
    fn read_window(&self, window: ConsumptionWindow) -> Result<Vec<RawRow>, SourceError>;
}

// ============================================================================
// SECTION: Pipeline Store
// ============================================================================

/// Pipeline store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("pipeline store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("pipeline store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("pipeline store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("pipeline store invalid data: {0}")]
    Invalid(String),
    /// Store engine reported an error.
    #[error("pipeline store error: {0}")]
    Store(String),
    /// A guarded write found state other than expected; nothing committed.
    #[error("pipeline store conflict: {0}")]
    Conflict(String),
    /// Another writer holds the stream lease.
    #[error("stream {stream_id} is leased by {holder} until {expires_at}")]
    LeaseHeld {
        /// Stream identifier.
        stream_id: String,
        /// Current lease holder.
        holder: String,
        /// Lease expiry.
        expires_at: Timestamp,
    },
}

impl StoreError {
    /// Returns true when retrying the whole step is safe and may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Store(_))
    }
}

/// Exclusive per-stream writer lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Leased stream.
    pub stream_id: StreamId,
    /// Holder label (process or host identity).
    pub holder: String,
    /// Acquisition time.
    pub acquired_at: Timestamp,
    /// Expiry after which another writer may take the lease.
    pub expires_at: Timestamp,
}

/// All writes produced by one pipeline step, committed atomically.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkCommit {
    /// Cursor to upsert; `None` for replays that do not move the cursor.
    pub cursor: Option<IngestionCursor>,
    /// Raw rows to land; re-landing an identical row is a no-op.
    pub raw: Vec<SourceRecord>,
    /// Transitions to apply in order.
    pub transitions: Vec<Transition>,
}

/// Persistent store for cursors, raw rows, versions, and leases.
///
/// # Invariants
/// - [`PipelineStore::commit_chunk`] and [`PipelineStore::commit_splits`] are
///   all-or-nothing.
/// - Closing a version requires it to still be current and open; otherwise
///   the commit fails with [`StoreError::Conflict`].
/// - Split labels are only written where the label is null and the version
///   is current.
/// - Commits present the writer's [`Lease`] and fail with
///   [`StoreError::Conflict`] when the stored lease for the stream is no
///   longer that exact lease; the check runs inside the commit transaction.
/// - Reads observe the last committed state and never wait on the lease.
pub trait PipelineStore {
    /// Acquires the writer lease for a stream.
    ///
    /// `now` is wall-clock time; an existing lease is taken over only when
    /// its expiry is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseHeld`] when an unexpired lease exists.
    fn acquire_lease(
        &self,
        stream_id: &StreamId,
        holder: &str,
        now: Timestamp,
        ttl_ms: u64,
    ) -> Result<Lease, StoreError>;

    /// Releases a lease previously returned by [`PipelineStore::acquire_lease`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the release cannot be persisted.
    fn release_lease(&self, lease: &Lease) -> Result<(), StoreError>;

    /// Loads the committed cursor of a stream.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load_cursor(&self, stream_id: &StreamId) -> Result<Option<IngestionCursor>, StoreError>;

    /// Loads every current version for the given natural keys.
    ///
    /// More than one row per key signals corruption and is returned as-is so
    /// the caller can report it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn current_versions(
        &self,
        stream_id: &StreamId,
        keys: &[NaturalKey],
    ) -> Result<Vec<HistorizedRecord>, StoreError>;

    /// Commits raw rows, transitions, and the cursor of the leased stream in
    /// one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when `lease` is no longer held, or
    /// [`StoreError`] when any write fails; nothing is committed.
    fn commit_chunk(&self, lease: &Lease, commit: &ChunkCommit) -> Result<(), StoreError>;

    /// Loads the landed raw rows of one batch in source order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn raw_batch(
        &self,
        stream_id: &StreamId,
        batch_id: &BatchId,
    ) -> Result<Vec<SourceRecord>, StoreError>;

    /// Loads current versions with a null split label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn eligible_for_split(&self, stream_id: &StreamId)
    -> Result<Vec<HistorizedRecord>, StoreError>;

    /// Writes split labels in one transaction and returns the number written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when `lease` is no longer held or any
    /// target already carries a label or is no longer current; nothing is
    /// committed.
    fn commit_splits(
        &self,
        lease: &Lease,
        assignments: &[SplitAssignment],
    ) -> Result<usize, StoreError>;

    /// Loads every version of one entity ordered by effective-from.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn history(
        &self,
        stream_id: &StreamId,
        natural_key: &NaturalKey,
    ) -> Result<Vec<HistorizedRecord>, StoreError>;

    /// Loads current versions carrying the given split label.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn records_by_split(
        &self,
        stream_id: &StreamId,
        split: SplitLabel,
    ) -> Result<Vec<HistorizedRecord>, StoreError>;
}
