//! HTTP request handlers
//!
//! QR login endpoints under `/authentication/qr`, plus server info.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use image::ImageFormat;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use sudosos_auth::{QrStatus, SessionId};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use crate::broadcast::AppState;
use crate::error::ApiError;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // QR login API
        .route("/authentication/qr/generate", post(generate_handler))
        .route("/authentication/qr/:id/status", get(status_handler))
        .route("/authentication/qr/:id/cancel", post(cancel_handler))
        .route("/authentication/qr/:id/confirm", post(confirm_handler))
        .route("/authentication/qr/:id/image", get(qr_image_handler))
        // Push channel for the generating device
        .route("/ws/qr/:id", get(crate::websocket::qr_ws_handler))
        // Server info
        .route("/api/info", get(server_info_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Extract a bearer token from the Authorization header
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Unparseable IDs can never name a session, so they are reported as unknown
fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw).map_err(|_| ApiError::NotFound("QR session not found".to_string()))
}

// ============================================================================
// QR Login Handlers
// ============================================================================

/// Response for a freshly generated session
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub session_id: String,
    /// URL to encode in the QR code
    pub qr_code_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Start a new QR session
async fn generate_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let session = state.qr.generate().await?;
    Ok(Json(GenerateResponse {
        session_id: session.session_id.to_string(),
        qr_code_url: session.confirm_url(state.config.public_base()),
        expires_at: session.expires_at,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: QrStatus,
}

/// Poll a session's status, expiring it if its deadline passed
async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let session = state
        .qr
        .fetch(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("QR session not found".to_string()))?;
    Ok(Json(StatusResponse {
        status: session.status,
    }))
}

/// Cancel a pending session; unknown sessions are ignored
async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let Ok(id) = SessionId::parse(&id) else {
        return Ok(StatusCode::NO_CONTENT);
    };
    if let Some(session) = state.qr.cancel(&id).await? {
        debug!("Cancel request left QR session {} {}", id, session.status);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub message: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Confirm a session as the authenticated caller
async fn confirm_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;
    let user = state
        .authenticate(token)
        .await
        .ok_or_else(|| ApiError::Unauthorized("Invalid token".to_string()))?;

    let id = parse_session_id(&id)?;
    let confirmation = state.qr.confirm(&id, &user).await?;
    info!("User {} logged in via QR session {}", user.name, id);

    Ok(Json(ConfirmResponse {
        message: "QR code confirmed successfully".to_string(),
        token: confirmation.credential.token,
        expires_at: confirmation.credential.expires_at,
    }))
}

/// Query parameters for QR code images
#[derive(Debug, Deserialize)]
pub struct QrQuery {
    /// QR code size in pixels (default 200)
    #[serde(default = "default_qr_size")]
    size: u32,
}

fn default_qr_size() -> u32 {
    200
}

/// Render a pending session's confirmation URL as a PNG QR code
async fn qr_image_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<QrQuery>,
) -> Result<Response, ApiError> {
    let id = parse_session_id(&id)?;
    let session = state
        .qr
        .fetch(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("QR session not found".to_string()))?;
    if session.status != QrStatus::Pending {
        return Err(ApiError::Gone(format!("QR session is {}", session.status)));
    }

    let png = render_qr_png(
        &session.confirm_url(state.config.public_base()),
        query.size.clamp(64, 1024),
    )?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "image/png")], png).into_response())
}

fn render_qr_png(data: &str, size: u32) -> Result<Vec<u8>, ApiError> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| ApiError::Internal(e.to_string()))?;
    let image = code.render::<image::Luma<u8>>().build();
    let resized =
        image::imageops::resize(&image, size, size, image::imageops::FilterType::Nearest);

    let mut buffer = Cursor::new(Vec::new());
    resized
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(buffer.into_inner())
}

// ============================================================================
// Server Info
// ============================================================================

/// Server information response
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub session_ttl_secs: i64,
    pub token_ttl_secs: i64,
    pub public_url: String,
    /// Certificate fingerprint when serving TLS
    pub cert_fingerprint: Option<String>,
}

async fn server_info_handler(State(state): State<Arc<AppState>>) -> Json<ServerInfo> {
    Json(ServerInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_ttl_secs: state.config.session_ttl_secs,
        token_ttl_secs: state.config.token_ttl_secs,
        public_url: state.config.public_base().to_string(),
        cert_fingerprint: state.cert_fingerprint.clone(),
    })
}
