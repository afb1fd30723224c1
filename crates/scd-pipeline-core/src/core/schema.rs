// crates/scd-pipeline-core/src/core/schema.rs
// ============================================================================
// Module: Record Schema
// Description: Versioned, typed field lists and record normalization.
// Purpose: Turn raw source maps into typed attributes at the historization boundary.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`RecordSchema`] declares the tracked fields of a stream, their kinds,
//! which of them form the natural key, and what happens to undeclared fields.
//! Normalization is the single place where the attribute equality policy is
//! enforced:
//!
//! - text is trimmed; an empty string after trimming is null
//! - integers accept JSON integers and numeric strings
//! - floats must be finite; `-0.0` folds to `0.0`; numeric strings accepted
//! - booleans accept JSON booleans and `true`/`false` strings (any case)
//! - a missing optional field is null
//!
//! ## Invariants
//! - Natural key fields are declared and required.
//! - Under [`UnknownFieldPolicy::Reject`] an undeclared field fails the record.
//! - Under [`UnknownFieldPolicy::PassThrough`] undeclared fields are carried as
//!   an opaque blob and never participate in change detection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::canonical_json_string;
use crate::core::identifiers::NaturalKey;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum number of declared fields per schema.
pub const MAX_SCHEMA_FIELDS: usize = 512;
/// Maximum length of a field name.
pub const MAX_FIELD_NAME_LENGTH: usize = 128;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Declared kind of a tracked field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// UTF-8 text.
    Text,
    /// Signed 64-bit integer.
    Integer,
    /// Finite 64-bit float.
    Float,
    /// Boolean.
    Boolean,
}

impl FieldKind {
    /// Returns the stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name as it appears in source records.
    pub name: String,
    /// Declared kind.
    pub kind: FieldKind,
    /// Whether a null or missing value fails validation.
    #[serde(default)]
    pub required: bool,
}

/// Policy for fields present in a record but absent from the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFieldPolicy {
    /// Undeclared fields fail the record.
    #[default]
    Reject,
    /// Undeclared fields are kept verbatim as an opaque blob.
    PassThrough,
}

/// Versioned schema for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Schema version label.
    #[serde(default = "default_schema_version")]
    pub version: u32,
    /// Ordered natural key field names.
    pub natural_key: Vec<String>,
    /// Declared tracked fields.
    pub fields: Vec<FieldSpec>,
    /// Policy for undeclared fields.
    #[serde(default)]
    pub unknown_fields: UnknownFieldPolicy,
}

/// Returns the default schema version.
const fn default_schema_version() -> u32 {
    1
}

/// Normalized value of one tracked field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Absent, null, or blank value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Finite float value.
    Float(f64),
    /// Trimmed, non-empty text value.
    Text(String),
}

impl FieldValue {
    /// Returns true when the value is null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Normalized tracked attributes keyed by field name.
pub type Attributes = BTreeMap<String, FieldValue>;

/// A source record validated and normalized against its stream schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Natural key derived from the key fields.
    pub natural_key: NaturalKey,
    /// Tracked attributes (every declared field present; absent values null).
    pub attributes: Attributes,
    /// Undeclared fields kept under the pass-through policy.
    pub extras: Option<Map<String, Value>>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Schema definition and record validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The schema definition itself is invalid.
    #[error("invalid record schema: {0}")]
    Definition(String),
    /// A required field is null or missing.
    #[error("missing required field: {0}")]
    MissingField(String),
    /// A field value does not match its declared kind.
    #[error("invalid value for field {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Failure reason.
        reason: String,
    },
    /// An undeclared field was present under the reject policy.
    #[error("undeclared field: {0}")]
    UnknownField(String),
    /// The natural key could not be encoded.
    #[error("natural key encoding failed: {0}")]
    KeyEncoding(String),
}

impl SchemaError {
    /// Returns the offending field name when the error is field-scoped.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField(field) | Self::UnknownField(field) => Some(field),
            Self::InvalidValue {
                field, ..
            } => Some(field),
            Self::Definition(_) | Self::KeyEncoding(_) => None,
        }
    }
}

// ============================================================================
// SECTION: Schema Operations
// ============================================================================

impl RecordSchema {
    /// Validates the schema definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Definition`] when fields are missing, duplicated,
    /// or the natural key references undeclared or optional fields.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::Definition("schema must declare fields".to_string()));
        }
        if self.fields.len() > MAX_SCHEMA_FIELDS {
            return Err(SchemaError::Definition(format!(
                "schema declares more than {MAX_SCHEMA_FIELDS} fields"
            )));
        }
        let mut names = BTreeSet::new();
        for field in &self.fields {
            let name = field.name.trim();
            if name.is_empty() || name != field.name {
                return Err(SchemaError::Definition(
                    "field names must be non-empty without surrounding whitespace".to_string(),
                ));
            }
            if name.len() > MAX_FIELD_NAME_LENGTH {
                return Err(SchemaError::Definition(format!("field name too long: {name}")));
            }
            if !names.insert(name) {
                return Err(SchemaError::Definition(format!("duplicate field: {name}")));
            }
        }
        if self.natural_key.is_empty() {
            return Err(SchemaError::Definition("natural_key must not be empty".to_string()));
        }
        let mut key_names = BTreeSet::new();
        for key in &self.natural_key {
            let Some(field) = self.field(key) else {
                return Err(SchemaError::Definition(format!(
                    "natural_key field is not declared: {key}"
                )));
            };
            if !field.required {
                return Err(SchemaError::Definition(format!(
                    "natural_key field must be required: {key}"
                )));
            }
            if !key_names.insert(key.as_str()) {
                return Err(SchemaError::Definition(format!(
                    "natural_key lists field twice: {key}"
                )));
            }
        }
        Ok(())
    }

    /// Returns the declared field with the given name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Builds the natural key for a raw source map.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when a key field is missing, null, or invalid.
    pub fn natural_key_of(&self, raw: &Map<String, Value>) -> Result<NaturalKey, SchemaError> {
        let mut values = Vec::with_capacity(self.natural_key.len());
        for key in &self.natural_key {
            let field = self.field(key).ok_or_else(|| {
                SchemaError::Definition(format!("natural_key field is not declared: {key}"))
            })?;
            let value = normalize_value(field, raw.get(key))?;
            if value.is_null() {
                return Err(SchemaError::MissingField(key.clone()));
            }
            values.push(value);
        }
        encode_key(&values)
    }

    /// Validates and normalizes a raw source map.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the record violates the schema.
    pub fn normalize(&self, raw: &Map<String, Value>) -> Result<NormalizedRecord, SchemaError> {
        let mut extras = Map::new();
        for (name, value) in raw {
            if self.field(name).is_some() {
                continue;
            }
            match self.unknown_fields {
                UnknownFieldPolicy::Reject => {
                    return Err(SchemaError::UnknownField(name.clone()));
                }
                UnknownFieldPolicy::PassThrough => {
                    extras.insert(name.clone(), value.clone());
                }
            }
        }
        let mut attributes = Attributes::new();
        for field in &self.fields {
            let value = normalize_value(field, raw.get(&field.name))?;
            if field.required && value.is_null() {
                return Err(SchemaError::MissingField(field.name.clone()));
            }
            attributes.insert(field.name.clone(), value);
        }
        let key_values: Vec<FieldValue> = self
            .natural_key
            .iter()
            .map(|key| attributes.get(key).cloned().unwrap_or(FieldValue::Null))
            .collect();
        let natural_key = encode_key(&key_values)?;
        Ok(NormalizedRecord {
            natural_key,
            attributes,
            extras: if extras.is_empty() { None } else { Some(extras) },
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Encodes natural key values as a canonical JSON array.
fn encode_key(values: &[FieldValue]) -> Result<NaturalKey, SchemaError> {
    canonical_json_string(values)
        .map(NaturalKey::new)
        .map_err(|err| SchemaError::KeyEncoding(err.to_string()))
}

/// Normalizes one raw value against its declared field.
fn normalize_value(field: &FieldSpec, raw: Option<&Value>) -> Result<FieldValue, SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidValue {
        field: field.name.clone(),
        reason: reason.to_string(),
    };
    let Some(raw) = raw else {
        return Ok(FieldValue::Null);
    };
    match (field.kind, raw) {
        (_, Value::Null) => Ok(FieldValue::Null),
        (FieldKind::Text, Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Ok(FieldValue::Null)
            } else {
                Ok(FieldValue::Text(trimmed.to_string()))
            }
        }
        (FieldKind::Text, Value::Number(number)) => Ok(FieldValue::Text(number.to_string())),
        (FieldKind::Text, Value::Bool(flag)) => Ok(FieldValue::Text(flag.to_string())),
        (FieldKind::Integer, Value::Number(number)) => number
            .as_i64()
            .map(FieldValue::Integer)
            .ok_or_else(|| invalid("expected an integer within the i64 range")),
        (FieldKind::Integer, Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(FieldValue::Null);
            }
            trimmed
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| invalid("expected an integer string"))
        }
        (FieldKind::Float, Value::Number(number)) => {
            let value = number.as_f64().ok_or_else(|| invalid("expected a float"))?;
            finite_float(value).ok_or_else(|| invalid("float must be finite"))
        }
        (FieldKind::Float, Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(FieldValue::Null);
            }
            let value = trimmed.parse::<f64>().map_err(|_| invalid("expected a float string"))?;
            finite_float(value).ok_or_else(|| invalid("float must be finite"))
        }
        (FieldKind::Boolean, Value::Bool(flag)) => Ok(FieldValue::Boolean(*flag)),
        (FieldKind::Boolean, Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Ok(FieldValue::Null)
            } else if trimmed.eq_ignore_ascii_case("true") {
                Ok(FieldValue::Boolean(true))
            } else if trimmed.eq_ignore_ascii_case("false") {
                Ok(FieldValue::Boolean(false))
            } else {
                Err(invalid("expected true or false"))
            }
        }
        (kind, _) => Err(invalid(&format!("expected {}", kind.as_str()))),
    }
}

/// Returns a normalized float value, rejecting NaN and infinities.
fn finite_float(value: f64) -> Option<FieldValue> {
    if !value.is_finite() {
        return None;
    }
    // Adding positive zero folds -0.0 into 0.0.
    Some(FieldValue::Float(value + 0.0))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        reason = "Test-only assertions."
    )]

    use serde_json::json;

    use super::*;

    fn schema(policy: UnknownFieldPolicy) -> RecordSchema {
        RecordSchema {
            version: 1,
            natural_key: vec!["id".to_string()],
            fields: vec![
                FieldSpec {
                    name: "id".to_string(),
                    kind: FieldKind::Text,
                    required: true,
                },
                FieldSpec {
                    name: "severity".to_string(),
                    kind: FieldKind::Text,
                    required: false,
                },
                FieldSpec {
                    name: "lat".to_string(),
                    kind: FieldKind::Float,
                    required: false,
                },
            ],
            unknown_fields: policy,
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn normalize_trims_text_and_folds_negative_zero() {
        let record = schema(UnknownFieldPolicy::Reject)
            .normalize(&object(json!({"id": " 42 ", "severity": "  ", "lat": -0.0})))
            .unwrap();
        assert_eq!(record.natural_key.as_str(), r#"["42"]"#);
        assert_eq!(record.attributes["severity"], FieldValue::Null);
        let FieldValue::Float(lat) = record.attributes["lat"] else {
            panic!("expected float");
        };
        assert!(lat.is_sign_positive());
    }

    #[test]
    fn numeric_ids_and_string_ids_share_a_key() {
        let schema = schema(UnknownFieldPolicy::Reject);
        let from_number = schema.natural_key_of(&object(json!({"id": 42}))).unwrap();
        let from_text = schema.natural_key_of(&object(json!({"id": "42"}))).unwrap();
        assert_eq!(from_number, from_text);
    }

    #[test]
    fn reject_policy_fails_on_undeclared_field() {
        let err = schema(UnknownFieldPolicy::Reject)
            .normalize(&object(json!({"id": "1", "weather": "rain"})))
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownField("weather".to_string()));
    }

    #[test]
    fn pass_through_policy_keeps_extras() {
        let record = schema(UnknownFieldPolicy::PassThrough)
            .normalize(&object(json!({"id": "1", "weather": "rain"})))
            .unwrap();
        assert_eq!(record.extras.unwrap()["weather"], json!("rain"));
        assert!(!record.attributes.contains_key("weather"));
    }

    #[test]
    fn missing_key_is_reported_by_field() {
        let err = schema(UnknownFieldPolicy::Reject)
            .normalize(&object(json!({"severity": "minor"})))
            .unwrap_err();
        assert_eq!(err.field(), Some("id"));
    }

    #[test]
    fn non_finite_float_strings_are_rejected() {
        let err = schema(UnknownFieldPolicy::Reject)
            .normalize(&object(json!({"id": "1", "lat": "NaN"})))
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { .. }));
    }

    #[test]
    fn optional_natural_key_field_is_a_definition_error() {
        let mut schema = schema(UnknownFieldPolicy::Reject);
        schema.natural_key = vec!["severity".to_string()];
        assert!(matches!(schema.validate(), Err(SchemaError::Definition(_))));
    }
}
