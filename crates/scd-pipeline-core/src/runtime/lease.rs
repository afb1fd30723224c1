// crates/scd-pipeline-core/src/runtime/lease.rs
// ============================================================================
// Module: Stream Lease Guard
// Description: RAII holder of a per-stream writer lease and its clock.
// Purpose: Release the lease on every exit path of a pipeline step.
// Dependencies: crate::interfaces, std::time
// ============================================================================

//! ## Overview
//! [`LeaseGuard`] acquires the writer lease on construction and releases it
//! when dropped. Release failures on drop are ignored; the lease expiry
//! bounds how long a stale lease can block other writers.
//!
//! Lease times come from a [`LeaseClock`], never from a step's `as_of`.
//! `as_of` is a logical time that callers may backfill or replay, so it
//! cannot decide whether another writer's lease has expired.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::core::StreamId;
use crate::core::Timestamp;
use crate::interfaces::Lease;
use crate::interfaces::PipelineStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Wall-clock source for lease acquisition and expiry.
pub trait LeaseClock: Send + Sync {
    /// Returns the current wall-clock time.
    fn now(&self) -> Timestamp;
}

/// Lease clock backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLeaseClock;

impl LeaseClock for SystemLeaseClock {
    fn now(&self) -> Timestamp {
        let ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Timestamp::from_unix_millis(i64::try_from(ms).unwrap_or(i64::MAX))
    }
}

// ============================================================================
// SECTION: Lease Guard
// ============================================================================

/// Writer lease that is released when the guard goes out of scope.
pub struct LeaseGuard<'a, S: PipelineStore + ?Sized> {
    /// Store that issued the lease.
    store: &'a S,
    /// Held lease.
    lease: Lease,
}

impl<'a, S: PipelineStore + ?Sized> LeaseGuard<'a, S> {
    /// Acquires the writer lease for `stream_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseHeld`] when another holder owns the lease.
    pub fn acquire(
        store: &'a S,
        stream_id: &StreamId,
        holder: &str,
        now: Timestamp,
        ttl_ms: u64,
    ) -> Result<Self, StoreError> {
        let lease = store.acquire_lease(stream_id, holder, now, ttl_ms)?;
        Ok(Self {
            store,
            lease,
        })
    }

    /// Returns the held lease; commits present it to prove ownership.
    #[must_use]
    pub const fn lease(&self) -> &Lease {
        &self.lease
    }
}

impl<S: PipelineStore + ?Sized> Drop for LeaseGuard<'_, S> {
    fn drop(&mut self) {
        let _ = self.store.release_lease(&self.lease);
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

    use super::*;
    use crate::interfaces::ChunkCommit;
    use crate::runtime::store::InMemoryPipelineStore;

    #[test]
    fn guard_commits_with_its_lease_and_releases_on_drop() {
        let store = InMemoryPipelineStore::new();
        let stream = StreamId::new("s");
        let now = SystemLeaseClock.now();
        {
            let guard = LeaseGuard::acquire(&store, &stream, "a", now, 1_000).unwrap();
            assert_eq!(guard.lease().holder, "a");
            assert_eq!(guard.lease().acquired_at, now);
            store.commit_chunk(guard.lease(), &ChunkCommit::default()).unwrap();
            assert!(store.acquire_lease(&stream, "b", now, 1_000).is_err());
        }
        assert!(store.acquire_lease(&stream, "b", now, 1_000).is_ok());
    }

    #[test]
    fn system_clock_reads_wall_time() {
        assert!(SystemLeaseClock.now().as_unix_millis() > 1_600_000_000_000);
    }
}
