// crates/scd-pipeline-cli/src/serve_policy.rs
// ============================================================================
// Module: Serve Policy
// Description: Network exposure policy checks for the progress server launcher.
// Purpose: Enforce loopback-by-default binds with explicit opt-in.
// Dependencies: scd-pipeline-config, std
// ============================================================================

//! ## Overview
//! Binding the progress server to a non-loopback address requires both an
//! explicit opt-in (flag or environment) and `api_key` auth. The policy is
//! fail-closed and runs before the store is opened.

use std::env;
use std::fmt;
use std::net::SocketAddr;

use scd_pipeline_config::AuditSinkType;
use scd_pipeline_config::ScdPipelineConfig;
use scd_pipeline_config::ServerAuthMode;

use crate::t;

/// Environment variable enabling non-loopback server binds.
pub const ALLOW_NON_LOOPBACK_ENV: &str = "SCD_PIPELINE_ALLOW_NON_LOOPBACK";

/// Bind outcome metadata for serve warnings.
#[derive(Debug, Clone)]
pub struct BindOutcome {
    /// Parsed bind address.
    pub bind_addr: SocketAddr,
    /// True when the server is bound to a non-loopback address.
    pub network_exposed: bool,
    /// Effective auth mode.
    pub auth_mode: ServerAuthMode,
    /// Whether audit logging is enabled.
    pub audit_enabled: bool,
}

/// Serve policy failures for bind safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServePolicyError {
    /// Environment variable was set to an invalid value.
    InvalidEnv {
        /// Raw environment value.
        value: String,
    },
    /// Bind string failed to parse.
    InvalidBind {
        /// Raw bind value.
        bind: String,
        /// Parse error message.
        error: String,
    },
    /// Non-loopback binding requires explicit opt-in.
    NonLoopbackOptInRequired {
        /// Bind address.
        bind: String,
    },
    /// Non-loopback binding requires API key auth.
    NonLoopbackAuthRequired {
        /// Bind address.
        bind: String,
    },
}

impl fmt::Display for ServePolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::InvalidEnv {
                value,
            } => t!("serve.bind.allow_env_invalid", env = ALLOW_NON_LOOPBACK_ENV, value = value),
            Self::InvalidBind {
                bind,
                error,
            } => t!("serve.bind.parse_failed", bind = bind, error = error),
            Self::NonLoopbackOptInRequired {
                bind,
            } => t!("serve.bind.non_loopback_opt_in", bind = bind, env = ALLOW_NON_LOOPBACK_ENV),
            Self::NonLoopbackAuthRequired {
                bind,
            } => t!("serve.bind.non_loopback_auth_required", bind = bind),
        };
        write!(f, "{message}")
    }
}

/// Resolves the non-loopback opt-in from the CLI flag and environment.
///
/// # Errors
/// Returns [`ServePolicyError::InvalidEnv`] when the environment value is invalid.
pub fn resolve_allow_non_loopback(flag: bool) -> Result<bool, ServePolicyError> {
    if flag {
        return Ok(true);
    }
    let Some(value) = env::var_os(ALLOW_NON_LOOPBACK_ENV) else {
        return Ok(false);
    };
    let value = value.to_string_lossy().to_string();
    parse_allow_non_loopback_value(&value)
}

/// Enforces loopback-by-default binding for the progress server.
///
/// # Errors
/// Returns [`ServePolicyError`] when configuration violates exposure rules.
pub fn enforce_local_only(
    config: &ScdPipelineConfig,
    allow_non_loopback: bool,
) -> Result<BindOutcome, ServePolicyError> {
    let auth_mode = config.server.auth.mode;
    let audit_enabled = config.audit.sink != AuditSinkType::None;
    let bind = config.server.bind.trim();
    let addr: SocketAddr = bind.parse().map_err(|err: std::net::AddrParseError| {
        ServePolicyError::InvalidBind {
            bind: bind.to_string(),
            error: err.to_string(),
        }
    })?;
    let network_exposed = !addr.ip().is_loopback();
    if network_exposed {
        if !allow_non_loopback {
            return Err(ServePolicyError::NonLoopbackOptInRequired {
                bind: bind.to_string(),
            });
        }
        if auth_mode == ServerAuthMode::LocalOnly {
            return Err(ServePolicyError::NonLoopbackAuthRequired {
                bind: bind.to_string(),
            });
        }
    }
    Ok(BindOutcome {
        bind_addr: addr,
        network_exposed,
        auth_mode,
        audit_enabled,
    })
}

/// Parses a bool-ish string (true/false/1/0/yes/no/on/off).
fn parse_boolish(value: &str) -> Option<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parses an env value for allow-non-loopback.
fn parse_allow_non_loopback_value(value: &str) -> Result<bool, ServePolicyError> {
    parse_boolish(value).ok_or_else(|| ServePolicyError::InvalidEnv {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::expect_used,
        reason = "Test helpers use expect/expect_err for concise failure messages."
    )]

    use scd_pipeline_config::ScdPipelineConfig;
    use scd_pipeline_config::ServerAuthMode;

    use super::ServePolicyError;
    use super::enforce_local_only;
    use super::parse_allow_non_loopback_value;

    const STREAMS: &str = r#"
[[streams]]
id = "accidents"

[streams.source]
path = "accidents.jsonl"

[streams.schema]
natural_key = ["id"]
fields = [{ name = "id", kind = "text", required = true }]
"#;

    fn config(server: &str) -> ScdPipelineConfig {
        ScdPipelineConfig::from_toml_str(&format!("{STREAMS}\n{server}")).expect("config")
    }

    const EXPOSED_API_KEY: &str = r#"
[server]
bind = "0.0.0.0:8080"

[server.auth]
mode = "api_key"
api_keys = ["monitor-key-0123456789"]
"#;

    #[test]
    fn loopback_bind_needs_no_opt_in() {
        let outcome = enforce_local_only(&config(""), false).expect("loopback");
        assert!(!outcome.network_exposed);
        assert_eq!(outcome.auth_mode, ServerAuthMode::LocalOnly);
        assert!(outcome.audit_enabled);
    }

    #[test]
    fn non_loopback_requires_opt_in() {
        let err = enforce_local_only(&config(EXPOSED_API_KEY), false).expect_err("opt-in");
        assert!(matches!(err, ServePolicyError::NonLoopbackOptInRequired { .. }));
    }

    #[test]
    fn non_loopback_requires_api_key_auth() {
        let mut config = config(EXPOSED_API_KEY);
        config.server.auth.mode = ServerAuthMode::LocalOnly;
        let err = enforce_local_only(&config, true).expect_err("auth");
        assert!(matches!(err, ServePolicyError::NonLoopbackAuthRequired { .. }));
    }

    #[test]
    fn non_loopback_allows_api_key_with_opt_in() {
        let outcome = enforce_local_only(&config(EXPOSED_API_KEY), true).expect("exposed");
        assert!(outcome.network_exposed);
    }

    #[test]
    fn parse_allow_non_loopback_accepts_true() {
        assert!(parse_allow_non_loopback_value("true").expect("parse env"));
        assert!(!parse_allow_non_loopback_value(" off ").expect("parse env"));
    }

    #[test]
    fn parse_allow_non_loopback_rejects_invalid() {
        let err = parse_allow_non_loopback_value("maybe").expect_err("expected invalid env");
        assert!(matches!(err, ServePolicyError::InvalidEnv { .. }));
    }
}
