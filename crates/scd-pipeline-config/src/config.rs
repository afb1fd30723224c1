// crates/scd-pipeline-config/src/config.rs
// ============================================================================
// Module: SCD Pipeline Configuration
// Description: Configuration loading and validation for the SCD pipeline.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: scd-pipeline-core, scd-pipeline-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed: a config that validates can
//! be turned into store settings, stream definitions, and split requests
//! without further checks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use scd_pipeline_core::JsonLinesSource;
use scd_pipeline_core::PipelineSettings;
use scd_pipeline_core::RecordSchema;
use scd_pipeline_core::SplitRatios;
use scd_pipeline_core::StreamDefinition;
use scd_pipeline_core::StreamId;
use scd_pipeline_store_sqlite::MAX_READ_POOL_SIZE;
use scd_pipeline_store_sqlite::SqliteStoreConfig;
use scd_pipeline_store_sqlite::SqliteStoreMode;
use scd_pipeline_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "scd-pipeline.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "SCD_PIPELINE_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of configured streams.
pub const MAX_STREAMS: usize = 256;
/// Maximum length of a stream identifier.
pub const MAX_STREAM_ID_LENGTH: usize = 128;
/// Maximum number of server API keys.
pub const MAX_API_KEYS: usize = 64;
/// Maximum length of a server API key.
pub const MAX_API_KEY_LENGTH: usize = 256;
/// Minimum length of a server API key.
pub const MIN_API_KEY_LENGTH: usize = 16;
/// Default lease TTL in milliseconds.
const DEFAULT_LEASE_TTL_MS: u64 = 300_000;
/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of `SQLite` read connections.
const DEFAULT_READ_POOL_SIZE: usize = 2;
/// Default split seed.
const DEFAULT_SPLIT_SEED: u64 = 42;
/// Default server bind address.
const DEFAULT_BIND: &str = "127.0.0.1:8080";

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// SCD pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScdPipelineConfig {
    /// Store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Configured source streams.
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
    /// Default split assignment parameters.
    #[serde(default)]
    pub splits: SplitsConfig,
    /// Read-only HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Audit logging configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl ScdPipelineConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// Resolution order: explicit `path`, then [`CONFIG_ENV_VAR`], then
    /// `scd-pipeline.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| {
            ConfigError::Io(format!("failed to read {}: {err}", resolved.display()))
        })?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        if self.streams.is_empty() {
            return Err(ConfigError::Invalid("at least one stream must be configured".to_string()));
        }
        if self.streams.len() > MAX_STREAMS {
            return Err(ConfigError::Invalid("too many streams".to_string()));
        }
        let mut seen = BTreeSet::new();
        for stream in &self.streams {
            stream.validate()?;
            if !seen.insert(stream.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate stream id: {}", stream.id)));
            }
        }
        self.splits.validate(&self.streams)?;
        self.server.validate()?;
        self.audit.validate()?;
        Ok(())
    }

    /// Returns the configured stream with the given identifier.
    #[must_use]
    pub fn stream(&self, stream_id: &str) -> Option<&StreamConfig> {
        self.streams.iter().find(|stream| stream.id == stream_id)
    }

    /// Returns pipeline settings derived from the store section.
    #[must_use]
    pub const fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            lease_ttl_ms: self.store.lease_ttl_ms,
        }
    }

    /// Builds stream definitions backed by JSON-lines sources.
    #[must_use]
    pub fn stream_definitions(&self) -> Vec<StreamDefinition> {
        self.streams.iter().map(StreamConfig::definition).collect()
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Pipeline store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store (state is lost on exit).
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// Pipeline store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of `SQLite` read connections.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
    /// Writer lease time-to-live in milliseconds.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: default_read_pool_size(),
            lease_ttl_ms: default_lease_ttl_ms(),
        }
    }
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_ttl_ms == 0 {
            return Err(ConfigError::Invalid(
                "store lease_ttl_ms must be greater than zero".to_string(),
            ));
        }
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory store must not set path".to_string()));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_path_string("store.path", &path.to_string_lossy())?;
                if self.read_pool_size == 0 || self.read_pool_size > MAX_READ_POOL_SIZE {
                    return Err(ConfigError::Invalid(format!(
                        "store read_pool_size must be between 1 and {MAX_READ_POOL_SIZE}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Returns `SQLite` store settings when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        match (self.store_type, &self.path) {
            (StoreType::Sqlite, Some(path)) => Some(SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
                read_pool_size: self.read_pool_size,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Streams
// ============================================================================

/// One configured source stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Stream identifier.
    pub id: String,
    /// Source location.
    pub source: SourceConfig,
    /// Chunk size used when a chunked run does not specify one.
    #[serde(default)]
    pub default_chunk_size: Option<u64>,
    /// Record schema.
    pub schema: RecordSchema,
}

impl StreamConfig {
    /// Validates one stream entry.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_stream_id(&self.id)?;
        validate_path_string(&format!("streams.{}.source.path", self.id), &self.source.path)?;
        if self.default_chunk_size == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "streams.{}.default_chunk_size must be greater than zero",
                self.id
            )));
        }
        self.schema
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("streams.{}.schema: {err}", self.id)))
    }

    /// Builds the core stream definition.
    #[must_use]
    pub fn definition(&self) -> StreamDefinition {
        StreamDefinition {
            stream_id: StreamId::new(self.id.clone()),
            schema: self.schema.clone(),
            source: Arc::new(JsonLinesSource::new(self.source.path.trim())),
            default_chunk_size: self.default_chunk_size,
        }
    }
}

/// JSON-lines source location for a stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Path to the JSON-lines dataset file.
    pub path: String,
}

// ============================================================================
// SECTION: Splits
// ============================================================================

/// Default split assignment parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitsConfig {
    /// Training share.
    #[serde(default = "default_train_ratio")]
    pub train: f64,
    /// Validation share.
    #[serde(default = "default_holdout_ratio")]
    pub validation: f64,
    /// Test share.
    #[serde(default = "default_holdout_ratio")]
    pub test: f64,
    /// Ordering seed.
    #[serde(default = "default_split_seed")]
    pub seed: u64,
    /// Optional stratification field (must be declared by every stream).
    #[serde(default)]
    pub stratify_by: Option<String>,
}

impl Default for SplitsConfig {
    fn default() -> Self {
        Self {
            train: default_train_ratio(),
            validation: default_holdout_ratio(),
            test: default_holdout_ratio(),
            seed: default_split_seed(),
            stratify_by: None,
        }
    }
}

impl SplitsConfig {
    /// Returns the configured ratio triple.
    #[must_use]
    pub const fn ratios(&self) -> SplitRatios {
        SplitRatios::new(self.train, self.validation, self.test)
    }

    /// Validates ratios and the stratification field.
    fn validate(&self, streams: &[StreamConfig]) -> Result<(), ConfigError> {
        self.ratios().validate().map_err(|err| ConfigError::Invalid(format!("splits: {err}")))?;
        if let Some(field) = &self.stratify_by {
            if field.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "splits.stratify_by must be non-empty".to_string(),
                ));
            }
            if let Some(stream) = streams.iter().find(|stream| stream.schema.field(field).is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "splits.stratify_by field {field} is not declared by stream {}",
                    stream.id
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Inbound auth modes for the read-only HTTP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerAuthMode {
    /// Loopback peers only, no credentials.
    #[default]
    LocalOnly,
    /// API key via `x-api-key` or `Authorization: Bearer`.
    ApiKey,
}

/// Server authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerAuthConfig {
    /// Auth mode.
    #[serde(default)]
    pub mode: ServerAuthMode,
    /// Accepted API keys (required for `api_key` mode).
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl ServerAuthConfig {
    /// Validates auth configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_keys.len() > MAX_API_KEYS {
            return Err(ConfigError::Invalid("too many api keys".to_string()));
        }
        for key in &self.api_keys {
            if key.trim() != key || key.len() < MIN_API_KEY_LENGTH {
                return Err(ConfigError::Invalid(format!(
                    "api keys must be at least {MIN_API_KEY_LENGTH} characters without \
                     surrounding whitespace"
                )));
            }
            if key.len() > MAX_API_KEY_LENGTH {
                return Err(ConfigError::Invalid("api key too long".to_string()));
            }
        }
        match self.mode {
            ServerAuthMode::LocalOnly if !self.api_keys.is_empty() => Err(ConfigError::Invalid(
                "local_only auth must not configure api keys".to_string(),
            )),
            ServerAuthMode::ApiKey if self.api_keys.is_empty() => {
                Err(ConfigError::Invalid("api_key auth requires at least one key".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Read-only HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: ServerAuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            auth: ServerAuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }
        self.auth.validate()?;
        let addr = self.bind_addr()?;
        if !addr.ip().is_loopback() && self.auth.mode == ServerAuthMode::LocalOnly {
            return Err(ConfigError::Invalid(
                "non-loopback bind disallowed without api_key auth".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses the bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid("invalid bind address".to_string()))
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkType {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Discard audit events.
    None,
}

/// Audit logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Sink type.
    #[serde(default)]
    pub sink: AuditSinkType,
    /// Audit log path (file sink only).
    #[serde(default)]
    pub path: Option<String>,
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkType::File, Some(path)) => validate_path_string("audit.path", path),
            (AuditSinkType::File, None) => {
                Err(ConfigError::Invalid("file audit sink requires path".to_string()))
            }
            (_, Some(_)) => {
                Err(ConfigError::Invalid("audit.path is only valid for the file sink".to_string()))
            }
            (_, None) => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a stream identifier (used verbatim in URL paths).
fn validate_stream_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() || id.len() > MAX_STREAM_ID_LENGTH {
        return Err(ConfigError::Invalid(format!(
            "stream id must be 1..={MAX_STREAM_ID_LENGTH} characters"
        )));
    }
    if !id.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')) {
        return Err(ConfigError::Invalid(format!(
            "stream id {id} may only contain ascii letters, digits, '_', '-', '.'"
        )));
    }
    Ok(())
}

/// Default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Default number of `SQLite` read connections.
const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

/// Default writer lease TTL.
const fn default_lease_ttl_ms() -> u64 {
    DEFAULT_LEASE_TTL_MS
}

/// Default training share.
const fn default_train_ratio() -> f64 {
    0.6
}

/// Default validation and test share.
const fn default_holdout_ratio() -> f64 {
    0.2
}

/// Default split seed.
const fn default_split_seed() -> u64 {
    DEFAULT_SPLIT_SEED
}

/// Default server bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Default maximum request body size.
const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

// ============================================================================
// SECTION: Tests
// ============================================================================
