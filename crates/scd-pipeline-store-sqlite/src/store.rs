// crates/scd-pipeline-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Pipeline Store
// Description: Durable PipelineStore backed by SQLite WAL.
// Purpose: Persist raw rows, cursors, versions, splits, and leases atomically.
// Dependencies: scd-pipeline-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`PipelineStore`] using `SQLite`. Writes go
//! through one mutex-guarded connection in immediate transactions: a chunk's
//! raw rows, version transitions, and cursor update commit together or not at
//! all. The lease ownership check and the close and split overwrite guards
//! run inside the same transaction. Reads rotate over a pool of read-only connections so progress
//! and training queries observe the last committed state without waiting on
//! the writer lease. Database contents are untrusted and decoded fail closed.

// ============================================================================//
// SECTION: Imports
// ============================================================================//

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Params;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use scd_pipeline_core::BatchId;
use scd_pipeline_core::ChunkCommit;
use scd_pipeline_core::HistorizedRecord;
use scd_pipeline_core::IngestionCursor;
use scd_pipeline_core::IngestionMode;
use scd_pipeline_core::Lease;
use scd_pipeline_core::NaturalKey;
use scd_pipeline_core::PipelineStore;
use scd_pipeline_core::SourceRecord;
use scd_pipeline_core::SplitAssignment;
use scd_pipeline_core::SplitLabel;
use scd_pipeline_core::StoreError;
use scd_pipeline_core::StreamId;
use scd_pipeline_core::Timestamp;
use scd_pipeline_core::Transition;
use scd_pipeline_core::VersionId;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================//
// SECTION: Constants
// ============================================================================//

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of read connections.
const DEFAULT_READ_POOL_SIZE: usize = 2;
/// Maximum number of read connections.
pub const MAX_READ_POOL_SIZE: usize = 16;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Column list shared by every historized version query.
const VERSION_COLUMNS: &str = "version_id, stream_id, natural_key, attributes_json, extras_json, \
                               attributes_hash, effective_from, effective_to, is_current, \
                               split_label, batch_id, source_offset";

// ============================================================================//
// SECTION: Config
// ============================================================================//

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended; readers never block the writer).
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` pipeline store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of read-only connections used by queries.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

impl SqliteStoreConfig {
    /// Builds a configuration with default tuning for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: DEFAULT_READ_POOL_SIZE,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default read pool size.
const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

// ============================================================================//
// SECTION: Errors
// ============================================================================//

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Guarded write found unexpected state; the transaction was rolled back.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// Another writer holds the stream lease.
    #[error("sqlite store lease held on {stream_id} by {holder}")]
    LeaseHeld {
        /// Stream identifier.
        stream_id: String,
        /// Current lease holder.
        holder: String,
        /// Lease expiry.
        expires_at: Timestamp,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::LeaseHeld {
                stream_id,
                holder,
                expires_at,
            } => Self::LeaseHeld {
                stream_id,
                holder,
                expires_at,
            },
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

// ============================================================================//
// SECTION: Store
// ============================================================================//

/// `SQLite`-backed pipeline store with WAL support.
#[derive(Clone)]
pub struct SqlitePipelineStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Writer connection guarded by a mutex.
    writer: Arc<Mutex<Connection>>,
    /// Read-only connections.
    readers: Arc<Vec<Mutex<Connection>>>,
    /// Round-robin index into `readers`.
    next_reader: Arc<AtomicUsize>,
}

impl SqlitePipelineStore {
    /// Opens an `SQLite`-backed pipeline store, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the configuration is invalid or the
    /// database cannot be opened or initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if config.read_pool_size == 0 || config.read_pool_size > MAX_READ_POOL_SIZE {
            return Err(SqliteStoreError::Invalid(format!(
                "read_pool_size must be between 1 and {MAX_READ_POOL_SIZE}"
            )));
        }
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut writer = open_writer(&config)?;
        initialize_schema(&mut writer)?;
        let readers = (0 .. config.read_pool_size)
            .map(|_| open_reader(&config).map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(readers),
            next_reader: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Runs `work` inside an immediate write transaction.
    fn write<T>(
        &self,
        work: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = work(&tx)?;
        tx.commit()?;
        drop(guard);
        Ok(value)
    }

    /// Runs `work` inside a read transaction on the next pooled reader.
    fn read<T>(
        &self,
        work: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let reader = self
            .readers
            .get(index)
            .ok_or_else(|| SqliteStoreError::Db("read pool is empty".to_string()))?;
        let mut guard =
            reader.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
        let tx = guard.transaction()?;
        let value = work(&tx)?;
        tx.commit()?;
        drop(guard);
        Ok(value)
    }
}

impl PipelineStore for SqlitePipelineStore {
    fn acquire_lease(
        &self,
        stream_id: &StreamId,
        holder: &str,
        now: Timestamp,
        ttl_ms: u64,
    ) -> Result<Lease, StoreError> {
        self.write(|tx| acquire_lease(tx, stream_id, holder, now, ttl_ms))
            .map_err(StoreError::from)
    }

    fn release_lease(&self, lease: &Lease) -> Result<(), StoreError> {
        self.write(|tx| {
            tx.execute(
                "DELETE FROM stream_leases WHERE stream_id = ?1 AND holder = ?2 AND acquired_at \
                 = ?3 AND expires_at = ?4",
                params![
                    lease.stream_id.as_str(),
                    lease.holder,
                    lease.acquired_at.as_unix_millis(),
                    lease.expires_at.as_unix_millis()
                ],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn load_cursor(&self, stream_id: &StreamId) -> Result<Option<IngestionCursor>, StoreError> {
        self.read(|tx| load_cursor(tx, stream_id)).map_err(StoreError::from)
    }

    fn current_versions(
        &self,
        stream_id: &StreamId,
        keys: &[NaturalKey],
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        self.read(|tx| {
            let sql = format!(
                "SELECT {VERSION_COLUMNS} FROM historized_records WHERE stream_id = ?1 AND \
                 natural_key = ?2 AND is_current = 1 ORDER BY rowid"
            );
            let mut versions = Vec::new();
            for key in keys {
                let params = params![stream_id.as_str(), key.as_str()];
                versions.extend(query_versions(tx, &sql, params)?);
            }
            Ok(versions)
        })
        .map_err(StoreError::from)
    }

    fn commit_chunk(&self, lease: &Lease, commit: &ChunkCommit) -> Result<(), StoreError> {
        let stream_id = &lease.stream_id;
        self.write(|tx| {
            ensure_lease_held(tx, lease)?;
            for record in &commit.raw {
                insert_raw(tx, record)?;
            }
            for transition in &commit.transitions {
                apply_transition(tx, stream_id, transition)?;
            }
            if let Some(cursor) = &commit.cursor {
                save_cursor(tx, stream_id, cursor)?;
            }
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn raw_batch(
        &self,
        stream_id: &StreamId,
        batch_id: &BatchId,
    ) -> Result<Vec<SourceRecord>, StoreError> {
        self.read(|tx| load_raw_batch(tx, stream_id, batch_id)).map_err(StoreError::from)
    }

    fn eligible_for_split(
        &self,
        stream_id: &StreamId,
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        self.read(|tx| {
            let sql = format!(
                "SELECT {VERSION_COLUMNS} FROM historized_records WHERE stream_id = ?1 AND \
                 is_current = 1 AND split_label IS NULL ORDER BY natural_key"
            );
            query_versions(tx, &sql, params![stream_id.as_str()])
        })
        .map_err(StoreError::from)
    }

    fn commit_splits(
        &self,
        lease: &Lease,
        assignments: &[SplitAssignment],
    ) -> Result<usize, StoreError> {
        let stream_id = &lease.stream_id;
        self.write(|tx| {
            ensure_lease_held(tx, lease)?;
            for assignment in assignments {
                let changed = tx.execute(
                    "UPDATE historized_records SET split_label = ?1 WHERE stream_id = ?2 AND \
                     version_id = ?3 AND is_current = 1 AND split_label IS NULL",
                    params![
                        assignment.split.as_str(),
                        stream_id.as_str(),
                        assignment.version_id.as_str()
                    ],
                )?;
                if changed != 1 {
                    return Err(SqliteStoreError::Conflict(format!(
                        "version {} is no longer current or already labeled",
                        assignment.version_id
                    )));
                }
            }
            Ok(assignments.len())
        })
        .map_err(StoreError::from)
    }

    fn history(
        &self,
        stream_id: &StreamId,
        natural_key: &NaturalKey,
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        self.read(|tx| {
            let sql = format!(
                "SELECT {VERSION_COLUMNS} FROM historized_records WHERE stream_id = ?1 AND \
                 natural_key = ?2 ORDER BY effective_from, rowid"
            );
            query_versions(tx, &sql, params![stream_id.as_str(), natural_key.as_str()])
        })
        .map_err(StoreError::from)
    }

    fn records_by_split(
        &self,
        stream_id: &StreamId,
        split: SplitLabel,
    ) -> Result<Vec<HistorizedRecord>, StoreError> {
        self.read(|tx| {
            let sql = format!(
                "SELECT {VERSION_COLUMNS} FROM historized_records WHERE stream_id = ?1 AND \
                 is_current = 1 AND split_label = ?2 ORDER BY natural_key"
            );
            query_versions(tx, &sql, params![stream_id.as_str(), split.as_str()])
        })
        .map_err(StoreError::from)
    }
}

// ============================================================================//
// SECTION: Leases and Cursors
// ============================================================================//

/// Takes the stream lease unless an unexpired lease exists.
fn acquire_lease(
    tx: &Transaction<'_>,
    stream_id: &StreamId,
    holder: &str,
    now: Timestamp,
    ttl_ms: u64,
) -> Result<Lease, SqliteStoreError> {
    let existing: Option<(String, i64)> = tx
        .query_row(
            "SELECT holder, expires_at FROM stream_leases WHERE stream_id = ?1",
            params![stream_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    if let Some((current_holder, expires_at)) = existing
        && expires_at > now.as_unix_millis()
    {
        return Err(SqliteStoreError::LeaseHeld {
            stream_id: stream_id.to_string(),
            holder: current_holder,
            expires_at: Timestamp::from_unix_millis(expires_at),
        });
    }
    let lease = Lease {
        stream_id: stream_id.clone(),
        holder: holder.to_string(),
        acquired_at: now,
        expires_at: now.saturating_add_millis(i64::try_from(ttl_ms).unwrap_or(i64::MAX)),
    };
    tx.execute(
        "INSERT INTO stream_leases (stream_id, holder, acquired_at, expires_at) VALUES (?1, ?2, \
         ?3, ?4) ON CONFLICT(stream_id) DO UPDATE SET holder = excluded.holder, acquired_at = \
         excluded.acquired_at, expires_at = excluded.expires_at",
        params![
            stream_id.as_str(),
            lease.holder,
            lease.acquired_at.as_unix_millis(),
            lease.expires_at.as_unix_millis()
        ],
    )?;
    Ok(lease)
}

/// Fails with a conflict unless `lease` is still the stream's stored lease.
fn ensure_lease_held(tx: &Transaction<'_>, lease: &Lease) -> Result<(), SqliteStoreError> {
    let held: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM stream_leases WHERE stream_id = ?1 AND holder = ?2 AND acquired_at = \
             ?3 AND expires_at = ?4",
            params![
                lease.stream_id.as_str(),
                lease.holder,
                lease.acquired_at.as_unix_millis(),
                lease.expires_at.as_unix_millis()
            ],
            |row| row.get(0),
        )
        .optional()?;
    if held.is_none() {
        return Err(SqliteStoreError::Conflict(format!(
            "lease for stream {} is no longer held by {}",
            lease.stream_id, lease.holder
        )));
    }
    Ok(())
}

/// Loads the committed cursor for a stream.
fn load_cursor(
    tx: &Transaction<'_>,
    stream_id: &StreamId,
) -> Result<Option<IngestionCursor>, SqliteStoreError> {
    type CursorRow = (Option<i64>, i64, Option<i64>, Option<String>, Option<i64>);
    let row: Option<CursorRow> = tx
        .query_row(
            "SELECT available, consumed, chunk_size, mode, updated_at FROM ingestion_cursors \
             WHERE stream_id = ?1",
            params![stream_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;
    let Some((available, consumed, chunk_size, mode, updated_at)) = row else {
        return Ok(None);
    };
    let mode = mode
        .map(|label| {
            IngestionMode::parse(&label).ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("unknown ingestion mode {label} for {stream_id}"))
            })
        })
        .transpose()?;
    Ok(Some(IngestionCursor {
        stream_id: stream_id.clone(),
        available: available.map(|value| from_sql_int(value, "available")).transpose()?,
        consumed: from_sql_int(consumed, "consumed")?,
        chunk_size: chunk_size.map(|value| from_sql_int(value, "chunk_size")).transpose()?,
        mode,
        updated_at: updated_at.map(Timestamp::from_unix_millis),
    }))
}

/// Upserts the cursor row for a stream.
fn save_cursor(
    tx: &Transaction<'_>,
    stream_id: &StreamId,
    cursor: &IngestionCursor,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT INTO ingestion_cursors (stream_id, available, consumed, chunk_size, mode, \
         updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT(stream_id) DO UPDATE SET \
         available = excluded.available, consumed = excluded.consumed, chunk_size = \
         excluded.chunk_size, mode = excluded.mode, updated_at = excluded.updated_at",
        params![
            stream_id.as_str(),
            cursor.available.map(|value| to_sql_int(value, "available")).transpose()?,
            to_sql_int(cursor.consumed, "consumed")?,
            cursor.chunk_size.map(|value| to_sql_int(value, "chunk_size")).transpose()?,
            cursor.mode.map(IngestionMode::as_str),
            cursor.updated_at.map(Timestamp::as_unix_millis)
        ],
    )?;
    Ok(())
}

// ============================================================================//
// SECTION: Raw Rows
// ============================================================================//

/// Lands one raw row; re-landing an existing row is ignored.
fn insert_raw(tx: &Transaction<'_>, record: &SourceRecord) -> Result<(), SqliteStoreError> {
    let fields = serde_json::to_string(&record.fields)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    tx.execute(
        "INSERT OR IGNORE INTO raw_records (stream_id, batch_id, source_offset, natural_key, \
         fields_json, ingested_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.stream_id.as_str(),
            record.batch_id.as_str(),
            to_sql_int(record.source_offset, "source_offset")?,
            record.natural_key.as_str(),
            fields,
            record.ingested_at.as_unix_millis()
        ],
    )?;
    Ok(())
}

/// Loads a landed batch in source order.
fn load_raw_batch(
    tx: &Transaction<'_>,
    stream_id: &StreamId,
    batch_id: &BatchId,
) -> Result<Vec<SourceRecord>, SqliteStoreError> {
    let mut statement = tx.prepare(
        "SELECT source_offset, natural_key, fields_json, ingested_at FROM raw_records WHERE \
         stream_id = ?1 AND batch_id = ?2 ORDER BY source_offset",
    )?;
    let rows = statement
        .query_map(params![stream_id.as_str(), batch_id.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(offset, natural_key, fields, ingested_at)| {
            Ok(SourceRecord {
                stream_id: stream_id.clone(),
                batch_id: batch_id.clone(),
                source_offset: from_sql_int(offset, "source_offset")?,
                natural_key: NaturalKey::new(natural_key),
                fields: serde_json::from_str(&fields)
                    .map_err(|err| SqliteStoreError::Corrupt(format!("raw fields: {err}")))?,
                ingested_at: Timestamp::from_unix_millis(ingested_at),
            })
        })
        .collect()
}

// ============================================================================//
// SECTION: Historized Versions
// ============================================================================//

/// Undecoded historized version row.
struct VersionRow {
    /// Version identifier.
    version_id: String,
    /// Stream identifier.
    stream_id: String,
    /// Natural key.
    natural_key: String,
    /// Tracked attributes as JSON.
    attributes_json: String,
    /// Pass-through extras as JSON.
    extras_json: Option<String>,
    /// Attribute fingerprint.
    attributes_hash: String,
    /// Effective-from millis.
    effective_from: i64,
    /// Effective-to millis.
    effective_to: Option<i64>,
    /// Current flag.
    is_current: bool,
    /// Split label.
    split_label: Option<String>,
    /// Source batch identifier.
    batch_id: String,
    /// Source offset.
    source_offset: i64,
}

impl VersionRow {
    /// Reads the [`VERSION_COLUMNS`] projection.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            version_id: row.get(0)?,
            stream_id: row.get(1)?,
            natural_key: row.get(2)?,
            attributes_json: row.get(3)?,
            extras_json: row.get(4)?,
            attributes_hash: row.get(5)?,
            effective_from: row.get(6)?,
            effective_to: row.get(7)?,
            is_current: row.get(8)?,
            split_label: row.get(9)?,
            batch_id: row.get(10)?,
            source_offset: row.get(11)?,
        })
    }

    /// Decodes the row into a historized record.
    fn into_record(self) -> Result<HistorizedRecord, SqliteStoreError> {
        let corrupt = |what: &str, detail: String| {
            SqliteStoreError::Corrupt(format!("{what} of version {}: {detail}", self.version_id))
        };
        let attributes = serde_json::from_str(&self.attributes_json)
            .map_err(|err| corrupt("attributes", err.to_string()))?;
        let extras = self
            .extras_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| corrupt("extras", err.to_string()))?;
        let split = self
            .split_label
            .as_deref()
            .map(|label| {
                SplitLabel::parse(label).ok_or_else(|| corrupt("split label", label.to_string()))
            })
            .transpose()?;
        let source_offset = from_sql_int(self.source_offset, "source_offset")?;
        Ok(HistorizedRecord {
            version_id: VersionId::new(self.version_id),
            stream_id: StreamId::new(self.stream_id),
            natural_key: NaturalKey::new(self.natural_key),
            attributes,
            extras,
            attributes_hash: self.attributes_hash,
            effective_from: Timestamp::from_unix_millis(self.effective_from),
            effective_to: self.effective_to.map(Timestamp::from_unix_millis),
            is_current: self.is_current,
            split,
            batch_id: BatchId::new(self.batch_id),
            source_offset,
        })
    }
}

/// Runs a version query and decodes every row.
fn query_versions(
    tx: &Transaction<'_>,
    sql: &str,
    params: impl Params,
) -> Result<Vec<HistorizedRecord>, SqliteStoreError> {
    let mut statement = tx.prepare(sql)?;
    let rows = statement.query_map(params, VersionRow::from_row)?.collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(VersionRow::into_record).collect()
}

/// Applies one transition, enforcing the close guard and single-current rule.
fn apply_transition(
    tx: &Transaction<'_>,
    stream_id: &StreamId,
    transition: &Transition,
) -> Result<(), SqliteStoreError> {
    if let Some(closed) = transition.closed() {
        let effective_to = closed.effective_to.ok_or_else(|| {
            SqliteStoreError::Invalid(format!("closed version {} has no end", closed.version_id))
        })?;
        let changed = tx.execute(
            "UPDATE historized_records SET effective_to = ?1, is_current = 0 WHERE stream_id = \
             ?2 AND version_id = ?3 AND is_current = 1 AND effective_to IS NULL",
            params![
                effective_to.as_unix_millis(),
                stream_id.as_str(),
                closed.version_id.as_str()
            ],
        )?;
        if changed != 1 {
            return Err(SqliteStoreError::Conflict(format!(
                "version {} of {} is no longer current",
                closed.version_id, closed.natural_key
            )));
        }
    }
    let opened = transition.opened();
    let exists: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM historized_records WHERE version_id = ?1)",
        params![opened.version_id.as_str()],
        |row| row.get(0),
    )?;
    if exists {
        return Err(SqliteStoreError::Conflict(format!(
            "version {} already exists",
            opened.version_id
        )));
    }
    let has_current: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM historized_records WHERE stream_id = ?1 AND natural_key = \
         ?2 AND is_current = 1)",
        params![stream_id.as_str(), opened.natural_key.as_str()],
        |row| row.get(0),
    )?;
    if has_current {
        return Err(SqliteStoreError::Conflict(format!(
            "{} already has a current version",
            opened.natural_key
        )));
    }
    insert_version(tx, opened)
}

/// Inserts one historized version.
fn insert_version(
    tx: &Transaction<'_>,
    version: &HistorizedRecord,
) -> Result<(), SqliteStoreError> {
    let attributes = serde_json::to_string(&version.attributes)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let extras = version
        .extras
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    tx.execute(
        "INSERT INTO historized_records (version_id, stream_id, natural_key, attributes_json, \
         extras_json, attributes_hash, effective_from, effective_to, is_current, split_label, \
         batch_id, source_offset) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            version.version_id.as_str(),
            version.stream_id.as_str(),
            version.natural_key.as_str(),
            attributes,
            extras,
            version.attributes_hash,
            version.effective_from.as_unix_millis(),
            version.effective_to.map(Timestamp::as_unix_millis),
            version.is_current,
            version.split.map(SplitLabel::as_str),
            version.batch_id.as_str(),
            to_sql_int(version.source_offset, "source_offset")?
        ],
    )?;
    Ok(())
}

// ============================================================================//
// SECTION: Helpers
// ============================================================================//

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.is_empty() {
        return Err(SqliteStoreError::Invalid("store path is empty".to_string()));
    }
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens the writer connection with durability pragmas.
fn open_writer(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    connection.execute_batch(&format!(
        "PRAGMA journal_mode = {}; PRAGMA synchronous = {};",
        config.journal_mode.pragma_value(),
        config.sync_mode.pragma_value()
    ))?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    Ok(connection)
}

/// Opens one read-only connection.
fn open_reader(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    Ok(connection)
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS raw_records (
                    stream_id TEXT NOT NULL,
                    batch_id TEXT NOT NULL,
                    source_offset INTEGER NOT NULL,
                    natural_key TEXT NOT NULL,
                    fields_json TEXT NOT NULL,
                    ingested_at INTEGER NOT NULL,
                    PRIMARY KEY (stream_id, batch_id, source_offset)
                );
                CREATE TABLE IF NOT EXISTS ingestion_cursors (
                    stream_id TEXT PRIMARY KEY,
                    available INTEGER,
                    consumed INTEGER NOT NULL,
                    chunk_size INTEGER,
                    mode TEXT,
                    updated_at INTEGER
                );
                CREATE TABLE IF NOT EXISTS historized_records (
                    version_id TEXT PRIMARY KEY,
                    stream_id TEXT NOT NULL,
                    natural_key TEXT NOT NULL,
                    attributes_json TEXT NOT NULL,
                    extras_json TEXT,
                    attributes_hash TEXT NOT NULL,
                    effective_from INTEGER NOT NULL,
                    effective_to INTEGER,
                    is_current INTEGER NOT NULL,
                    split_label TEXT,
                    batch_id TEXT NOT NULL,
                    source_offset INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_historized_records_key
                    ON historized_records (stream_id, natural_key);
                CREATE INDEX IF NOT EXISTS idx_historized_records_split
                    ON historized_records (stream_id, is_current, split_label);
                CREATE TABLE IF NOT EXISTS stream_leases (
                    stream_id TEXT PRIMARY KEY,
                    holder TEXT NOT NULL,
                    acquired_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL
                );",
            )?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}

/// Converts an unsigned counter into an `SQLite` integer.
fn to_sql_int(value: u64, what: &str) -> Result<i64, SqliteStoreError> {
    i64::try_from(value)
        .map_err(|_| SqliteStoreError::Invalid(format!("{what} exceeds sqlite integer range")))
}

/// Converts a stored integer back into an unsigned counter.
fn from_sql_int(value: i64, what: &str) -> Result<u64, SqliteStoreError> {
    u64::try_from(value).map_err(|_| SqliteStoreError::Corrupt(format!("negative {what}: {value}")))
}
