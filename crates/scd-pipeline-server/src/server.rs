// crates/scd-pipeline-server/src/server.rs
// ============================================================================
// Module: Read-Only HTTP Server
// Description: Progress and training-consumer endpoints over the pipeline store.
// Purpose: Serve committed pipeline state without ever taking a writer lease.
// Dependencies: axum, tokio, scd-pipeline-config, scd-pipeline-core
// ============================================================================

//! ## Overview
//! Two endpoints are served:
//!
//! - `GET /v1/streams/{stream_id}/progress` returns the committed
//!   [`ProgressReport`] of a stream.
//! - `GET /v1/streams/{stream_id}/records?split=train` returns current
//!   versions carrying the requested split label.
//!
//! Both are authorized before the store is read, answered from read
//! connections only, and audited with one `progress_request` event. Failures
//! are returned as the same [`FailureReport`] JSON the CLI prints.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::CONTENT_LENGTH;
use axum::http::header::WWW_AUTHENTICATE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use scd_pipeline_config::ScdPipelineConfig;
use scd_pipeline_config::ServerAuthMode;
use scd_pipeline_core::ErrorKind;
use scd_pipeline_core::FailureReport;
use scd_pipeline_core::HistorizedRecord;
use scd_pipeline_core::Pipeline;
use scd_pipeline_core::PipelineError;
use scd_pipeline_core::PipelineStep;
use scd_pipeline_core::ProgressReport;
use scd_pipeline_core::SharedPipelineStore;
use scd_pipeline_core::SplitLabel;
use scd_pipeline_core::StreamId;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::audit::RequestAuditEvent;
use crate::audit::RequestAuditSink;
use crate::audit::Route;
use crate::auth::API_KEY_HEADER;
use crate::auth::ApiKeyAuthz;
use crate::auth::AuthContext;
use crate::auth::AuthError;
use crate::auth::RequestContext;
use crate::bootstrap::build_pipeline;
use crate::bootstrap::build_request_audit_sink;

// ============================================================================
// SECTION: Server
// ============================================================================

/// Read-only HTTP server over a configured pipeline.
pub struct PipelineServer {
    /// Configured bind address.
    bind: SocketAddr,
    /// Shared request state.
    state: Arc<ServerState>,
}

impl PipelineServer {
    /// Builds a server from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when configuration is invalid or the pipeline
    /// cannot be initialized.
    pub fn from_config(config: ScdPipelineConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let bind = config.server.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let pipeline = build_pipeline(&config).map_err(|err| ServerError::Init(err.to_string()))?;
        let audit = build_request_audit_sink(&config.audit)
            .map_err(|err| ServerError::Init(err.to_string()))?;
        Ok(Self::from_parts(
            bind,
            pipeline,
            ApiKeyAuthz::from_config(&config.server.auth),
            audit,
            config.server.max_body_bytes,
        ))
    }

    /// Builds a server from already wired parts.
    #[must_use]
    pub fn from_parts(
        bind: SocketAddr,
        pipeline: Pipeline<SharedPipelineStore>,
        authz: ApiKeyAuthz,
        audit: Arc<dyn RequestAuditSink>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            bind,
            state: Arc::new(ServerState {
                pipeline,
                authz,
                audit,
                max_body_bytes,
            }),
        }
    }

    /// Returns the configured bind address.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        self.bind
    }

    /// Returns the HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    /// Binds the configured address and serves until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|_| ServerError::Transport("http bind failed".to_string()))?;
        self.serve_on(listener).await
    }

    /// Serves on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when serving fails.
    pub async fn serve_on(self, listener: TcpListener) -> Result<(), ServerError> {
        emit_local_only_warning(self.state.authz.mode());
        let app = self.router();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|_| ServerError::Transport("http server failed".to_string()))
    }
}

/// Shared state handed to every request handler.
struct ServerState {
    /// Pipeline used for read queries only.
    pipeline: Pipeline<SharedPipelineStore>,
    /// Request authorizer.
    authz: ApiKeyAuthz,
    /// Request audit sink.
    audit: Arc<dyn RequestAuditSink>,
    /// Maximum accepted request body size.
    max_body_bytes: usize,
}

// ============================================================================
// SECTION: Responses
// ============================================================================

/// Query parameters for the records endpoint.
#[derive(Debug, Default, Deserialize)]
struct RecordsQuery {
    /// Requested split label.
    split: Option<String>,
}

/// Records endpoint response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordsResponse {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Requested split label.
    pub split: SplitLabel,
    /// Number of records returned.
    pub count: usize,
    /// Current, labeled versions ordered by natural key.
    pub records: Vec<HistorizedRecord>,
}

/// Error body returned for rejected requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthErrorBody {
    /// Rejection reason.
    pub error: String,
}

// ============================================================================
// SECTION: Routing
// ============================================================================

/// Builds the router over shared state.
fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/v1/streams/{stream_id}/progress", get(handle_progress))
        .route("/v1/streams/{stream_id}/records", get(handle_records))
        .with_state(state)
}

/// Serves `GET /v1/streams/{stream_id}/progress`.
async fn handle_progress(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(stream_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = http_request_context(peer, &headers);
    let auth = match admit(&state, Route::Progress, &stream_id, &ctx, &headers) {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    let stream = StreamId::new(stream_id.as_str());
    let result: Result<ProgressReport, PipelineError> =
        tokio::task::block_in_place(|| state.pipeline.progress(&stream));
    finish(&state, Route::Progress, &stream_id, &ctx, &auth, PipelineStep::Progress, result)
}

/// Serves `GET /v1/streams/{stream_id}/records?split=<label>`.
async fn handle_records(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(stream_id): Path<String>,
    Query(query): Query<RecordsQuery>,
    headers: HeaderMap,
) -> Response {
    let ctx = http_request_context(peer, &headers);
    let auth = match admit(&state, Route::Records, &stream_id, &ctx, &headers) {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    let stream = StreamId::new(stream_id.as_str());
    let result = parse_split(&stream_id, query.split.as_deref()).and_then(|split| {
        let records =
            tokio::task::block_in_place(|| state.pipeline.records_by_split(&stream, split))?;
        Ok(RecordsResponse {
            stream_id: stream.clone(),
            split,
            count: records.len(),
            records,
        })
    });
    finish(&state, Route::Records, &stream_id, &ctx, &auth, PipelineStep::Query, result)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Authorizes a request and enforces the body limit.
fn admit(
    state: &ServerState,
    route: Route,
    stream_id: &str,
    ctx: &RequestContext,
    headers: &HeaderMap,
) -> Result<AuthContext, Response> {
    let auth = state.authz.authorize(ctx).map_err(|err| {
        let status = auth_status(&err);
        let event = RequestAuditEvent::denied(route, stream_id, ctx, &err, status.as_u16());
        state.audit.record(&event);
        auth_error_response(status, &err)
    })?;
    if declared_body_len(headers).is_some_and(|len| len > state.max_body_bytes) {
        let status = StatusCode::PAYLOAD_TOO_LARGE;
        let reason = "request body too large".to_string();
        state.audit.record(&RequestAuditEvent::allowed(
            route,
            stream_id,
            ctx,
            &auth,
            status.as_u16(),
            Some(reason.clone()),
        ));
        return Err((
            status,
            Json(AuthErrorBody {
                error: reason,
            }),
        )
            .into_response());
    }
    Ok(auth)
}

/// Converts a step result into a response and records the audit event.
fn finish<T: Serialize>(
    state: &ServerState,
    route: Route,
    stream_id: &str,
    ctx: &RequestContext,
    auth: &AuthContext,
    step: PipelineStep,
    result: Result<T, PipelineError>,
) -> Response {
    match result {
        Ok(body) => {
            let status = StatusCode::OK;
            state.audit.record(&RequestAuditEvent::allowed(
                route,
                stream_id,
                ctx,
                auth,
                status.as_u16(),
                None,
            ));
            (status, Json(body)).into_response()
        }
        Err(err) => {
            let status = pipeline_status(&err);
            let report: FailureReport = err.report(step);
            state.audit.record(&RequestAuditEvent::allowed(
                route,
                stream_id,
                ctx,
                auth,
                status.as_u16(),
                Some(report.message.clone()),
            ));
            (status, Json(report)).into_response()
        }
    }
}

/// Parses the `split` query parameter.
fn parse_split(stream_id: &str, raw: Option<&str>) -> Result<SplitLabel, PipelineError> {
    let invalid = |message: String| PipelineError::Configuration {
        stream_id: Some(stream_id.to_string()),
        message,
    };
    let raw = raw.ok_or_else(|| invalid("split query parameter is required".to_string()))?;
    SplitLabel::parse(raw.trim()).ok_or_else(|| invalid(format!("unknown split label: {raw}")))
}

/// Maps a pipeline failure to an HTTP status.
const fn pipeline_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::UnknownStream(_) => StatusCode::NOT_FOUND,
        _ => match err.kind() {
            ErrorKind::Configuration | ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::TransientIo => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Consistency => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

/// Maps an auth failure to an HTTP status.
const fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        AuthError::Unauthorized(_) => StatusCode::FORBIDDEN,
    }
}

/// Builds the response for a rejected request.
fn auth_error_response(status: StatusCode, err: &AuthError) -> Response {
    let body = Json(AuthErrorBody {
        error: err.to_string(),
    });
    if status == StatusCode::UNAUTHORIZED {
        (status, [(WWW_AUTHENTICATE, "Bearer")], body).into_response()
    } else {
        (status, body).into_response()
    }
}

/// Builds the auth context from transport metadata.
fn http_request_context(peer: SocketAddr, headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| {
        headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
    };
    RequestContext::http(Some(peer.ip()), header(API_KEY_HEADER), header(AUTHORIZATION.as_str()))
}

/// Returns the declared request body length, if any.
fn declared_body_len(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Warns when the server runs without API key auth.
fn emit_local_only_warning(mode: ServerAuthMode) {
    if mode == ServerAuthMode::LocalOnly {
        let _ = writeln!(
            io::stderr(),
            "scd-pipeline-server: WARNING: serving in local-only mode; configure \
             server.auth.mode = \"api_key\" to admit remote monitors"
        );
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server initialization and transport errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}
