// crates/scd-pipeline-server/src/audit.rs
// ============================================================================
// Module: Server Audit Logging
// Description: Structured audit events for read-only HTTP requests.
// Purpose: Record auth decisions and outcomes without logging record payloads.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Each request produces one `progress_request` event carrying the route,
//! stream, peer, auth decision, and response status. API keys appear only as
//! fingerprints and record payloads are never logged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::auth::AuthContext;
use crate::auth::AuthError;
use crate::auth::RequestContext;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Read-only endpoint being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// `GET /v1/streams/{stream_id}/progress`.
    Progress,
    /// `GET /v1/streams/{stream_id}/records`.
    Records,
}

/// Request audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Endpoint served.
    pub route: Route,
    /// Requested stream identifier.
    pub stream_id: String,
    /// Peer IP address when available.
    pub peer_ip: Option<String>,
    /// Auth decision (`allow` or `deny`).
    pub decision: &'static str,
    /// Auth method label for allowed requests.
    pub auth_method: Option<&'static str>,
    /// API key fingerprint (sha256) for allowed requests.
    pub key_fingerprint: Option<String>,
    /// HTTP status returned.
    pub status: u16,
    /// Failure reason when the request did not succeed.
    pub reason: Option<String>,
}

impl RequestAuditEvent {
    /// Builds an event for an admitted request.
    #[must_use]
    pub fn allowed(
        route: Route,
        stream_id: &str,
        ctx: &RequestContext,
        auth: &AuthContext,
        status: u16,
        reason: Option<String>,
    ) -> Self {
        Self {
            event: "progress_request",
            timestamp_ms: now_millis(),
            route,
            stream_id: stream_id.to_string(),
            peer_ip: ctx.peer_ip.map(|ip| ip.to_string()),
            decision: "allow",
            auth_method: Some(auth.method.label()),
            key_fingerprint: auth.key_fingerprint.clone(),
            status,
            reason,
        }
    }

    /// Builds an event for a rejected request.
    #[must_use]
    pub fn denied(
        route: Route,
        stream_id: &str,
        ctx: &RequestContext,
        error: &AuthError,
        status: u16,
    ) -> Self {
        Self {
            event: "progress_request",
            timestamp_ms: now_millis(),
            route,
            stream_id: stream_id.to_string(),
            peer_ip: ctx.peer_ip.map(|ip| ip.to_string()),
            decision: "deny",
            auth_method: None,
            key_fingerprint: None,
            status,
            reason: Some(error.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for request events.
pub trait RequestAuditSink: Send + Sync {
    /// Records a request event.
    fn record(&self, event: &RequestAuditEvent);
}

/// Request audit sink that logs JSON lines to stderr.
pub struct StderrRequestAuditSink;

impl RequestAuditSink for StderrRequestAuditSink {
    fn record(&self, event: &RequestAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Request audit sink that appends JSON lines to a file.
pub struct FileRequestAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<File>,
}

impl FileRequestAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl RequestAuditSink for FileRequestAuditSink {
    fn record(&self, event: &RequestAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op request audit sink.
pub struct NoopRequestAuditSink;

impl RequestAuditSink for NoopRequestAuditSink {
    fn record(&self, _event: &RequestAuditEvent) {}
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Wall-clock milliseconds since the Unix epoch.
fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |duration| duration.as_millis())
}
