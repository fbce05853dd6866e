//! Axum Handlers for the voice routes
//!
//! Both routes proxy the upstream provider so that its key never leaves the
//! server. They use `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{ErrorResponse, TtsPayload, VoiceTokenResponse},
    state::AppState,
    upstream::UpstreamError,
};

const ANONYMOUS_USER: &str = "anonymous";

pub enum ApiError {
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadGateway(error) => {
                warn!(%error, "Upstream provider rejected the request");
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { error })).into_response()
            }
            ApiError::Internal(error) => {
                error!(%error, "Internal Server Error");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error })).into_response()
            }
        }
    }
}

/// Issue a conversation token for the realtime voice client.
#[utoipa::path(
    post,
    path = "/api/voice/token",
    responses(
        (status = 200, description = "Token issued", body = VoiceTokenResponse),
        (status = 500, description = "Upstream token exchange failed", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = Option<String>, Header, description = "The ID of the signed-in user, if any")
    )
)]
pub async fn create_voice_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<VoiceTokenResponse>, ApiError> {
    let agent_id = state.config.agent_id.clone();
    let token = state
        .provider
        .conversation_token(&agent_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to generate voice token: {}", e)))?;

    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string();
    info!(%agent_id, %user_id, "Voice token issued");

    Ok(Json(VoiceTokenResponse {
        token: token.token,
        conversation_id: token.conversation_id.unwrap_or_default(),
        agent_id,
        user_id,
    }))
}

/// Synthesize speech for the fallback voice transport.
#[utoipa::path(
    post,
    path = "/api/voice/tts",
    request_body = TtsPayload,
    responses(
        (status = 200, description = "MP3 audio", content_type = "audio/mpeg", body = Vec<u8>),
        (status = 500, description = "No voice configured or request error", body = ErrorResponse),
        (status = 502, description = "Upstream synthesis failed", body = ErrorResponse)
    )
)]
pub async fn synthesize_speech(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TtsPayload>,
) -> Result<Response, ApiError> {
    let voice_id = payload
        .voice_id
        .filter(|v| !v.is_empty())
        .or_else(|| state.config.voice_id.clone())
        .ok_or_else(|| ApiError::Internal("Missing ELEVENLABS_VOICE_ID".to_string()))?;

    let audio: Body = state
        .provider
        .synthesize(&voice_id, &payload.text)
        .await
        .map_err(|e| match e {
            UpstreamError::Status { .. } => ApiError::BadGateway(format!("TTS failed: {}", e)),
            other => ApiError::Internal(other.to_string()),
        })?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        audio,
    )
        .into_response())
}
