//! HTTP and WebSocket surface of the gateway.

use crate::auth::{AuthUser, TokenVerifier};
use crate::config::ServerConfig;
use crate::identity::IdentityResolver;
use crate::session::{Launcher, Registry, SessionService};
use crate::transport::websocket;
use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{OnFailedUpgrade, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use slurmgate_core::{
    AllocRequest, CreateSessionResponse, ErrorBody, GateError, GateResult, SessionSummary,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    pub verifier: Arc<TokenVerifier>,
    pub max_frame_size: usize,
}

impl AppState {
    /// Wire up the service stack from configuration.
    pub fn from_config(
        config: &ServerConfig,
        secret: Vec<u8>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        let registry = Arc::new(Registry::new(config.grace_period));
        let service = SessionService::new(
            registry,
            Launcher::new(config.launch.clone()),
            resolver,
            config.relay_buffer_size,
        );
        Self {
            service: Arc::new(service),
            verifier: Arc::new(TokenVerifier::new(secret, config.token_ttl)),
            max_frame_size: config.max_frame_size,
        }
    }
}

/// Error response: status from the error kind, `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError(pub GateError);

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GateError::Token(_) => StatusCode::UNAUTHORIZED,
            GateError::Forbidden(_) => StatusCode::FORBIDDEN,
            GateError::NotFound(_) => StatusCode::NOT_FOUND,
            GateError::TerminalClosed(_) => StatusCode::GONE,
            GateError::IdentityNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GateError::InvalidRequest(_) | GateError::ConnectionUpgrade(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/v1/salloc/interactive",
            post(create_session).get(list_sessions),
        )
        .route(
            "/api/v1/salloc/interactive/{session_id}",
            delete(close_session),
        )
        .route(
            "/api/v1/salloc/interactive/{session_id}/attach",
            get(attach_session),
        )
        .route("/api/v1/shell", get(login_shell))
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> GateResult<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP listener started");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GateError::Transport(format!("HTTP server error: {e}")))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_session(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let request: AllocRequest = if body.iter().all(u8::is_ascii_whitespace) {
        AllocRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(GateError::from)?
    };
    let session_id = state
        .service
        .create_allocation(&principal, &request)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateSessionResponse { session_id }),
    ))
}

async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Json<Vec<SessionSummary>> {
    Json(state.service.list(&principal).await)
}

async fn close_session(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.close(&session_id, &principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn attach_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let principal = state
        .verifier
        .verify_request(&headers, query.token.as_deref())?;
    let session = state
        .service
        .authorize_attach(&session_id, &principal)
        .await?;
    let ws = ws.map_err(upgrade_error)?;

    let service = state.service.clone();
    Ok(configure(ws, state.max_frame_size).on_upgrade(move |socket| async move {
        let (sink, source) = websocket::split(socket);
        service.attach(session, source, sink).await;
    }))
}

async fn login_shell(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let principal = state
        .verifier
        .verify_request(&headers, query.token.as_deref())?;
    let identity = state.service.resolve(&principal)?;
    let ws = ws.map_err(upgrade_error)?;

    let service = state.service.clone();
    Ok(configure(ws, state.max_frame_size).on_upgrade(move |socket| async move {
        let (mut sink, source) = websocket::split(socket);
        match service.open_login_shell(&identity) {
            Ok(launched) => {
                service.run_login_shell(launched, source, sink).await;
            }
            Err(e) => {
                warn!(user = %identity.username, error = %e, "login shell launch failed");
                sink.send_error(&format!("Error: {e}")).await;
            }
        }
    }))
}

fn configure(ws: WebSocketUpgrade, max_frame_size: usize) -> WebSocketUpgrade<impl OnFailedUpgrade> {
    ws.max_message_size(max_frame_size)
        .max_frame_size(max_frame_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
}

fn upgrade_error(rejection: WebSocketUpgradeRejection) -> ApiError {
    ApiError(GateError::ConnectionUpgrade(rejection.body_text()))
}
