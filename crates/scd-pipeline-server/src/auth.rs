// crates/scd-pipeline-server/src/auth.rs
// ============================================================================
// Module: Server Authentication
// Description: API key and loopback enforcement for read-only endpoints.
// Purpose: Provide strict, fail-closed auth decisions for HTTP requests.
// Dependencies: scd-pipeline-config, scd-pipeline-core, subtle, thiserror
// ============================================================================

//! ## Overview
//! Every request is authorized before the pipeline store is touched. In
//! `local_only` mode only loopback peers are admitted; in `api_key` mode the
//! caller presents a configured key through `x-api-key` or
//! `Authorization: Bearer`. Keys are compared in constant time and only their
//! SHA-256 fingerprint ever reaches the audit log.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;

use scd_pipeline_config::ServerAuthConfig;
use scd_pipeline_config::ServerAuthMode;
use scd_pipeline_core::HashAlgorithm;
use scd_pipeline_core::core::hashing::hash_bytes;
use subtle::ConstantTimeEq;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted size of a credential header.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

/// Header carrying a raw API key.
pub const API_KEY_HEADER: &str = "x-api-key";

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Per-request context used for auth decisions.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Peer IP address when available.
    pub peer_ip: Option<IpAddr>,
    /// `x-api-key` header value.
    pub api_key_header: Option<String>,
    /// `Authorization` header value.
    pub auth_header: Option<String>,
}

impl RequestContext {
    /// Builds a request context from transport metadata.
    #[must_use]
    pub const fn http(
        peer_ip: Option<IpAddr>,
        api_key_header: Option<String>,
        auth_header: Option<String>,
    ) -> Self {
        Self {
            peer_ip,
            api_key_header,
            auth_header,
        }
    }

    /// Returns true when the peer address is loopback.
    #[must_use]
    pub fn peer_is_loopback(&self) -> bool {
        self.peer_ip.is_some_and(|ip| ip.is_loopback())
    }
}

// ============================================================================
// SECTION: Auth Context
// ============================================================================

/// Authentication method used for the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Loopback access without credentials.
    Local,
    /// Configured API key.
    ApiKey,
}

impl AuthMethod {
    /// Returns the stable audit label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::ApiKey => "api_key",
        }
    }
}

/// Authenticated caller context.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Authentication method.
    pub method: AuthMethod,
    /// Key fingerprint for API key auth (sha256).
    pub key_fingerprint: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or invalid credentials.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Caller is not admitted from its network location.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Request authorizer derived from server auth configuration.
pub struct ApiKeyAuthz {
    /// Configured auth mode.
    mode: ServerAuthMode,
    /// Accepted API keys.
    keys: Vec<String>,
}

impl ApiKeyAuthz {
    /// Builds the authorizer from server auth configuration.
    #[must_use]
    pub fn from_config(config: &ServerAuthConfig) -> Self {
        Self {
            mode: config.mode,
            keys: config.api_keys.clone(),
        }
    }

    /// Returns the configured auth mode.
    #[must_use]
    pub const fn mode(&self) -> ServerAuthMode {
        self.mode
    }

    /// Authorizes one request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the caller is not admitted.
    pub fn authorize(&self, ctx: &RequestContext) -> Result<AuthContext, AuthError> {
        match self.mode {
            ServerAuthMode::LocalOnly => authorize_local_only(ctx),
            ServerAuthMode::ApiKey => self.authorize_api_key(ctx),
        }
    }

    /// Checks the presented key against every configured key.
    fn authorize_api_key(&self, ctx: &RequestContext) -> Result<AuthContext, AuthError> {
        let presented = presented_key(ctx)?;
        let matched = self.keys.iter().fold(false, |found, key| {
            found | constant_time_eq(key.as_bytes(), presented.as_bytes())
        });
        if !matched {
            return Err(AuthError::Unauthenticated("invalid api key".to_string()));
        }
        let digest = hash_bytes(HashAlgorithm::Sha256, presented.as_bytes());
        Ok(AuthContext {
            method: AuthMethod::ApiKey,
            key_fingerprint: Some(digest.value),
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Admits loopback peers only.
fn authorize_local_only(ctx: &RequestContext) -> Result<AuthContext, AuthError> {
    if ctx.peer_is_loopback() {
        Ok(AuthContext {
            method: AuthMethod::Local,
            key_fingerprint: None,
        })
    } else {
        Err(AuthError::Unauthorized("local-only mode requires loopback access".to_string()))
    }
}

/// Extracts the presented key, preferring `x-api-key`.
fn presented_key(ctx: &RequestContext) -> Result<String, AuthError> {
    if let Some(header) = ctx.api_key_header.as_deref() {
        if header.len() > MAX_AUTH_HEADER_BYTES {
            return Err(AuthError::Unauthenticated("api key header too large".to_string()));
        }
        let key = header.trim();
        if key.is_empty() {
            return Err(AuthError::Unauthenticated("empty api key".to_string()));
        }
        return Ok(key.to_string());
    }
    parse_bearer_token(ctx.auth_header.as_deref())
}

/// Parses an `Authorization: Bearer <key>` header.
fn parse_bearer_token(auth_header: Option<&str>) -> Result<String, AuthError> {
    let header =
        auth_header.ok_or_else(|| AuthError::Unauthenticated("missing api key".to_string()))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthError::Unauthenticated("authorization header too large".to_string()));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::Unauthenticated("invalid authorization header".to_string()));
    }
    Ok(token.to_string())
}

/// Compares two byte slices in constant time.
fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.ct_eq(right).into()
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
        clippy::use_debug,
        reason = "Test-only auth assertions."
    )]

    use std::net::IpAddr;
    use std::net::Ipv4Addr;

    use scd_pipeline_config::ServerAuthConfig;
    use scd_pipeline_config::ServerAuthMode;

    use super::ApiKeyAuthz;
    use super::AuthError;
    use super::AuthMethod;
    use super::RequestContext;

    const KEY: &str = "0123456789abcdef-key";

    fn api_key_authz() -> ApiKeyAuthz {
        ApiKeyAuthz::from_config(&ServerAuthConfig {
            mode: ServerAuthMode::ApiKey,
            api_keys: vec![KEY.to_string()],
        })
    }

    fn remote() -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    }

    #[test]
    fn local_only_admits_loopback_and_rejects_remote_peers() {
        let authz = ApiKeyAuthz::from_config(&ServerAuthConfig::default());
        let local = RequestContext::http(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), None, None);
        assert_eq!(authz.authorize(&local).unwrap().method, AuthMethod::Local);

        let far = RequestContext::http(remote(), Some(KEY.to_string()), None);
        assert!(matches!(authz.authorize(&far), Err(AuthError::Unauthorized(_))));
        let unknown = authz.authorize(&RequestContext::default());
        assert!(matches!(unknown, Err(AuthError::Unauthorized(_))));
    }

    #[test]
    fn api_key_header_and_bearer_are_both_accepted() {
        let authz = api_key_authz();
        let header = RequestContext::http(remote(), Some(KEY.to_string()), None);
        let bearer = RequestContext::http(remote(), None, Some(format!("bearer {KEY}")));
        let by_header = authz.authorize(&header).unwrap();
        let by_bearer = authz.authorize(&bearer).unwrap();
        assert_eq!(by_header.method, AuthMethod::ApiKey);
        assert_eq!(by_header.key_fingerprint, by_bearer.key_fingerprint);
        assert_ne!(by_header.key_fingerprint.as_deref(), Some(KEY));
    }

    #[test]
    fn wrong_missing_or_malformed_keys_are_rejected() {
        let authz = api_key_authz();
        let cases = [
            RequestContext::http(remote(), None, None),
            RequestContext::http(remote(), Some("0123456789abcdef-kez".to_string()), None),
            RequestContext::http(remote(), Some("   ".to_string()), None),
            RequestContext::http(remote(), None, Some(format!("Basic {KEY}"))),
            RequestContext::http(remote(), None, Some("Bearer".to_string())),
            RequestContext::http(remote(), Some("k".repeat(9 * 1024)), None),
        ];
        for ctx in cases {
            assert!(matches!(authz.authorize(&ctx), Err(AuthError::Unauthenticated(_))));
        }
    }

    #[test]
    fn api_key_mode_does_not_trust_loopback_alone() {
        let authz = api_key_authz();
        let local = RequestContext::http(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), None, None);
        assert!(authz.authorize(&local).is_err());
    }
}
