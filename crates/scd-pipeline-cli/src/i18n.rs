// crates/scd-pipeline-cli/src/i18n.rs
// ============================================================================
// Module: CLI Message Catalog
// Description: Message catalog and placeholder substitution for the CLI.
// Purpose: Keep every user-facing string in one place.
// Dependencies: Standard library collections.
// ============================================================================

//! ## Overview
//! All human-readable CLI output is routed through the [`t!`](crate::t)
//! macro. JSON reports on stdout and failure reports on stderr are not
//! translated; only prose is.
//!
//! ## Invariants
//! - The catalog is initialized once and read-only thereafter.
//! - Missing keys fall back to the key itself.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A formatted message argument captured by the [`macro@crate::t`] macro.
#[derive(Clone)]
pub struct MessageArg {
    /// Placeholder name used in message templates (e.g., `"path"`).
    pub key: &'static str,
    /// Formatted value substituted for this placeholder.
    pub value: String,
}

impl MessageArg {
    /// Constructs a new [`MessageArg`] from a key and value.
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// English catalog entries.
const CATALOG_ITEMS: &[(&str, &str)] = &[
    ("main.version", "scd-pipeline {version}"),
    ("output.stream.stdout", "stdout"),
    ("output.stream.stderr", "stderr"),
    ("output.stream.unknown", "output"),
    ("output.write_failed", "Failed to write to {stream}: {error}"),
    ("output.serialize_failed", "Failed to serialize output: {error}"),
    ("config.load_failed", "Failed to load config: {error}"),
    ("config.validate.ok", "Config valid."),
    ("pipeline.init_failed", "Failed to initialize pipeline: {error}"),
    ("time.system_failed", "Failed to read system time: {error}"),
    ("time.overflow", "System time does not fit in unix milliseconds."),
    ("time.negative", "{flag} must be a non-negative unix timestamp in milliseconds."),
    ("history.key.invalid", "Invalid --key {key}: {error}"),
    ("history.key.not_object", "--key must be a JSON object of natural key fields."),
    (
        "serve.warn.loopback_only",
        "Note: the server is bound to loopback. Use --allow-non-loopback or {env}=1 with api_key \
         auth to expose it.",
    ),
    ("serve.bind.parse_failed", "Invalid bind address {bind}: {error}"),
    (
        "serve.bind.non_loopback_opt_in",
        "Refusing to bind to non-loopback address {bind}. Set --allow-non-loopback or {env}=1 to \
         opt in.",
    ),
    (
        "serve.bind.non_loopback_auth_required",
        "Refusing to bind to {bind}: server.auth.mode must be api_key for non-loopback.",
    ),
    (
        "serve.bind.allow_env_invalid",
        "Invalid value for {env}: {value}. Expected true/false/1/0/yes/no/on/off.",
    ),
    (
        "serve.warn.network.header",
        "SECURITY WARNING: the progress server is exposed on the network.",
    ),
    ("serve.warn.network.bind", "Bind: {bind}"),
    ("serve.warn.network.auth", "Auth mode: {mode}"),
    ("serve.warn.network.audit", "Audit logging: {status}"),
    (
        "serve.warn.network.footer",
        "Verify firewall rules and API key distribution; this exposure is intentional.",
    ),
    ("serve.warn.network.enabled", "enabled"),
    ("serve.warn.network.disabled", "disabled"),
    ("serve.init_failed", "Failed to initialize server: {error}"),
    ("serve.failed", "Server failed: {error}"),
];

// ============================================================================
// SECTION: Translation
// ============================================================================

/// Translates `key` using the English catalog while substituting `args`.
#[must_use]
pub fn translate(key: &str, args: Vec<MessageArg>) -> String {
    let template = catalog().get(key).copied().unwrap_or(key);
    let mut result = template.to_string();
    for arg in args {
        let placeholder = format!("{{{}}}", arg.key);
        result = result.replace(&placeholder, &arg.value);
    }
    result
}

/// Returns the static English catalog.
fn catalog() -> &'static HashMap<&'static str, &'static str> {
    static CATALOG: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();

    CATALOG.get_or_init(|| CATALOG_ITEMS.iter().copied().collect())
}

// ============================================================================
// SECTION: Macro
// ============================================================================

/// Formats a catalog message from a key and named arguments.
///
/// Named arguments are substituted into `{placeholder}` positions.
#[macro_export]
macro_rules! t {
    ($key:literal $(, $name:ident = $value:expr )* $(,)?) => {{
        let args = ::std::vec![
            $(
                $crate::i18n::MessageArg::new(stringify!($name), $value.to_string()),
            )*
        ];
        $crate::i18n::translate($key, args)
    }};
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::CATALOG_ITEMS;
    use super::MessageArg;
    use super::translate;

    #[test]
    fn placeholders_are_substituted() {
        let message = translate("config.load_failed", vec![MessageArg::new("error", "boom")]);
        assert_eq!(message, "Failed to load config: boom");
    }

    #[test]
    fn unknown_keys_fall_back_to_the_key() {
        assert_eq!(translate("no.such.key", Vec::new()), "no.such.key");
    }

    #[test]
    fn catalog_keys_are_unique() {
        let mut keys: Vec<&str> = CATALOG_ITEMS.iter().map(|(key, _)| *key).collect();
        keys.sort_unstable();
        let total = keys.len();
        keys.dedup();
        assert_eq!(keys.len(), total);
    }
}
