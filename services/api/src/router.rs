//! Axum Router Configuration
//!
//! This module defines the HTTP routing for the voice backend and its
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, TtsPayload, VoiceTokenResponse},
    state::AppState,
};

use axum::{Router, routing::post};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::create_voice_token, handlers::synthesize_speech),
    components(schemas(VoiceTokenResponse, TtsPayload, ErrorResponse)),
    tags(
        (name = "Matchday Voice API", description = "Token exchange and speech synthesis for the dashboard voice assistant")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/api/voice/token", post(handlers::create_voice_token))
        .route("/api/voice/tts", post(handlers::synthesize_speech))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_voice_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/voice/token"));
        assert!(doc.paths.paths.contains_key("/api/voice/tts"));
    }
}
