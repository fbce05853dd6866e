//! Request and response bodies of the voice routes, documented with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A short-lived conversation credential for the voice client.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceTokenResponse {
    pub token: String,
    pub conversation_id: String,
    pub agent_id: String,
    pub user_id: String,
}

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TtsPayload {
    pub text: String,
    /// Overrides the configured default voice.
    #[serde(default)]
    pub voice_id: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
