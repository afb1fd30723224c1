// crates/scd-pipeline-core/src/runtime/store.rs
// ============================================================================
// Module: In-Memory Pipeline Store
// Description: Simple in-memory pipeline store for tests and examples.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides an in-memory implementation of [`PipelineStore`] for
//! tests and local demos, plus [`SharedPipelineStore`], a clonable wrapper
//! over any store trait object. Commits stage changes on a copy of the state
//! and swap it in only when every guard passes, so a failed commit leaves the
//! previous state untouched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::BatchId;
use crate::core::HistorizedRecord;
use crate::core::IngestionCursor;
use crate::core::NaturalKey;
use crate::core::SourceRecord;
use crate::core::SplitAssignment;
use crate::core::SplitLabel;
use crate::core::StreamId;
use crate::core::Timestamp;
use crate::core::Transition;
use crate::interfaces::ChunkCommit;
use crate::interfaces::Lease;
use crate::interfaces::PipelineStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Raw row key: stream, batch, source offset.
type RawKey = (String, String, u64);

/// Complete in-memory store state.
#[derive(Debug, Default, Clone)]
struct MemoryState {
    /// Leases keyed by stream id.
    leases: BTreeMap<String, Lease>,
    /// Cursors keyed by stream id.
    cursors: BTreeMap<String, IngestionCursor>,
    /// Landed raw rows in (stream, batch, offset) order.
    raw: BTreeMap<RawKey, SourceRecord>,
    /// Historized versions in insertion order.
    versions: Vec<HistorizedRecord>,
}

/// In-memory pipeline store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPipelineStore {
    /// Store state protected by a mutex.
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryPipelineStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Locks the store state.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Store("pipeline store mutex poisoned".to_string()))
    }
}

impl PipelineStore for InMemoryPipelineStore {
    fn acquire_lease(
        &self,
        stream_id: &StreamId,
        holder: &str,
        now: Timestamp,
        ttl_ms: u64,
    ) -> Result<Lease, StoreError> {
        let mut guard = self.lock()?;
        if let Some(existing) = guard.leases.get(stream_id.as_str())
            && existing.expires_at > now
        {
            return Err(StoreError::LeaseHeld {
                stream_id: stream_id.to_string(),
                holder: existing.holder.clone(),
                expires_at: existing.expires_at,
            });
        }
        let lease = Lease {
            stream_id: stream_id.clone(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now.saturating_add_millis(i64::try_from(ttl_ms).unwrap_or(i64::MAX)),
        };
        guard.leases.insert(stream_id.to_string(), lease.clone());
        drop(guard);
        Ok(lease)
    }

    fn release_lease(&self, lease: &Lease) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.leases.get(lease.stream_id.as_str()) == Some(lease) {
            guard.leases.remove(lease.stream_id.as_str());
        }
        drop(guard);
        Ok(())
    }

    fn load_cursor(&self, stream_id: &StreamId) -> Result<Option<IngestionCursor>, StoreError> {
        Ok(self.lock()?.cursors.get(stream_id.as_str()).cloned())
    }

    fn current_versions(
        &self,
        stream_id: &StreamId,
        keys: &[NaturalKey],
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        let wanted: BTreeSet<&NaturalKey> = keys.iter().collect();
        let guard = self.lock()?;
        Ok(guard
            .versions
            .iter()
            .filter(|version| {
                version.stream_id == *stream_id
                    && version.is_current
                    && wanted.contains(&version.natural_key)
            })
            .cloned()
            .collect())
    }

    fn commit_chunk(&self, lease: &Lease, commit: &ChunkCommit) -> Result<(), StoreError> {
        let stream_id = &lease.stream_id;
        let mut guard = self.lock()?;
        ensure_lease_held(&guard, lease)?;
        let mut staged = guard.clone();
        for record in &commit.raw {
            let key = (
                record.stream_id.to_string(),
                record.batch_id.to_string(),
                record.source_offset,
            );
            staged.raw.entry(key).or_insert_with(|| record.clone());
        }
        for transition in &commit.transitions {
            apply_transition(&mut staged.versions, stream_id, transition)?;
        }
        if let Some(cursor) = &commit.cursor {
            staged.cursors.insert(stream_id.to_string(), cursor.clone());
        }
        *guard = staged;
        drop(guard);
        Ok(())
    }

    fn raw_batch(
        &self,
        stream_id: &StreamId,
        batch_id: &BatchId,
    ) -> Result<Vec<SourceRecord>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .raw
            .values()
            .filter(|record| record.stream_id == *stream_id && record.batch_id == *batch_id)
            .cloned()
            .collect())
    }

    fn eligible_for_split(
        &self,
        stream_id: &StreamId,
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        let guard = self.lock()?;
        let mut eligible: Vec<HistorizedRecord> = guard
            .versions
            .iter()
            .filter(|version| {
                version.stream_id == *stream_id && version.is_current && version.split.is_none()
            })
            .cloned()
            .collect();
        drop(guard);
        eligible.sort_by(|left, right| left.natural_key.cmp(&right.natural_key));
        Ok(eligible)
    }

    fn commit_splits(
        &self,
        lease: &Lease,
        assignments: &[SplitAssignment],
    ) -> Result<usize, StoreError> {
        let stream_id = &lease.stream_id;
        let mut guard = self.lock()?;
        ensure_lease_held(&guard, lease)?;
        let mut staged = guard.versions.clone();
        for assignment in assignments {
            let target = staged
                .iter_mut()
                .find(|version| {
                    version.stream_id == *stream_id
                        && version.version_id == assignment.version_id
                        && version.is_current
                        && version.split.is_none()
                })
                .ok_or_else(|| {
                    StoreError::Conflict(format!(
                        "version {} is no longer current or already labeled",
                        assignment.version_id
                    ))
                })?;
            target.split = Some(assignment.split);
        }
        guard.versions = staged;
        drop(guard);
        Ok(assignments.len())
    }

    fn history(
        &self,
        stream_id: &StreamId,
        natural_key: &NaturalKey,
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        let guard = self.lock()?;
        let mut versions: Vec<HistorizedRecord> = guard
            .versions
            .iter()
            .filter(|version| {
                version.stream_id == *stream_id && version.natural_key == *natural_key
            })
            .cloned()
            .collect();
        drop(guard);
        versions.sort_by_key(|version| version.effective_from);
        Ok(versions)
    }

    fn records_by_split(
        &self,
        stream_id: &StreamId,
        split: SplitLabel,
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        let guard = self.lock()?;
        let mut records: Vec<HistorizedRecord> = guard
            .versions
            .iter()
            .filter(|version| {
                version.stream_id == *stream_id
                    && version.is_current
                    && version.split == Some(split)
            })
            .cloned()
            .collect();
        drop(guard);
        records.sort_by(|left, right| left.natural_key.cmp(&right.natural_key));
        Ok(records)
    }
}

/// Fails with a conflict unless `lease` is the stream's stored lease.
fn ensure_lease_held(state: &MemoryState, lease: &Lease) -> Result<(), StoreError> {
    if state.leases.get(lease.stream_id.as_str()) == Some(lease) {
        return Ok(());
    }
    Err(StoreError::Conflict(format!(
        "lease for stream {} is no longer held by {}",
        lease.stream_id, lease.holder
    )))
}

/// Applies one transition to staged versions, enforcing the close guard.
fn apply_transition(
    versions: &mut Vec<HistorizedRecord>,
    stream_id: &StreamId,
    transition: &Transition,
) -> Result<(), StoreError> {
    if let Some(closed) = transition.closed() {
        let target = versions
            .iter_mut()
            .find(|version| {
                version.stream_id == *stream_id
                    && version.version_id == closed.version_id
                    && version.is_open()
            })
            .ok_or_else(|| {
                StoreError::Conflict(format!(
                    "version {} of {} is no longer current",
                    closed.version_id, closed.natural_key
                ))
            })?;
        target.effective_to = closed.effective_to;
        target.is_current = false;
    }
    let opened = transition.opened();
    if versions.iter().any(|version| version.version_id == opened.version_id) {
        return Err(StoreError::Conflict(format!("version {} already exists", opened.version_id)));
    }
    if versions.iter().any(|version| {
        version.stream_id == *stream_id
            && version.natural_key == opened.natural_key
            && version.is_current
    }) {
        return Err(StoreError::Conflict(format!(
            "{} already has a current version",
            opened.natural_key
        )));
    }
    versions.push(opened.clone());
    Ok(())
}

// ============================================================================
// SECTION: Shared Store Wrapper
// ============================================================================

/// Shared pipeline store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedPipelineStore {
    /// Inner store implementation.
    inner: Arc<dyn PipelineStore + Send + Sync>,
}

impl SharedPipelineStore {
    /// Wraps a pipeline store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl PipelineStore + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn PipelineStore + Send + Sync>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl PipelineStore for SharedPipelineStore {
    fn acquire_lease(
        &self,
        stream_id: &StreamId,
        holder: &str,
        now: Timestamp,
        ttl_ms: u64,
    ) -> Result<Lease, StoreError> {
        self.inner.acquire_lease(stream_id, holder, now, ttl_ms)
    }

    fn release_lease(&self, lease: &Lease) -> Result<(), StoreError> {
        self.inner.release_lease(lease)
    }

    fn load_cursor(&self, stream_id: &StreamId) -> Result<Option<IngestionCursor>, StoreError> {
        self.inner.load_cursor(stream_id)
    }

    fn current_versions(
        &self,
        stream_id: &StreamId,
        keys: &[NaturalKey],
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        self.inner.current_versions(stream_id, keys)
    }

    fn commit_chunk(&self, lease: &Lease, commit: &ChunkCommit) -> Result<(), StoreError> {
        self.inner.commit_chunk(lease, commit)
    }

    fn raw_batch(
        &self,
        stream_id: &StreamId,
        batch_id: &BatchId,
    ) -> Result<Vec<SourceRecord>, StoreError> {
        self.inner.raw_batch(stream_id, batch_id)
    }

    fn eligible_for_split(
        &self,
        stream_id: &StreamId,
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        self.inner.eligible_for_split(stream_id)
    }

    fn commit_splits(
        &self,
        lease: &Lease,
        assignments: &[SplitAssignment],
    ) -> Result<usize, StoreError> {
        self.inner.commit_splits(lease, assignments)
    }

    fn history(
        &self,
        stream_id: &StreamId,
        natural_key: &NaturalKey,
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        self.inner.history(stream_id, natural_key)
    }

    fn records_by_split(
        &self,
        stream_id: &StreamId,
        split: SplitLabel,
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        self.inner.records_by_split(stream_id, split)
    }
}
