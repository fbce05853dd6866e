//! Client for the upstream conversational-AI and text-to-speech provider.
//!
//! The provider key lives only here; clients receive short-lived conversation
//! tokens and synthesized audio, never the key itself.

use async_trait::async_trait;
use axum::body::Body;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

const API_KEY_HEADER: &str = "xi-api-key";
pub const OUTPUT_FORMAT: &str = "mp3_44100_128";

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{status} {body}")]
    Status { status: u16, body: String },
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

/// A conversation token as issued by the provider.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConversationToken {
    pub token: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    async fn conversation_token(&self, agent_id: &str) -> Result<ConversationToken, UpstreamError>;

    /// Starts synthesis and returns the audio body as it streams in.
    async fn synthesize(&self, voice_id: &str, text: &str) -> Result<Body, UpstreamError>;
}

pub struct ElevenLabsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ElevenLabsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "upstream error".to_string());
    Err(UpstreamError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl VoiceProvider for ElevenLabsClient {
    #[instrument(skip(self))]
    async fn conversation_token(&self, agent_id: &str) -> Result<ConversationToken, UpstreamError> {
        let mut url = self.url(&["v1", "convai", "conversation", "token"])?;
        url.query_pairs_mut().append_pair("agent_id", agent_id);

        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let token = check(response).await?.json::<ConversationToken>().await?;
        debug!("Conversation token issued");
        Ok(token)
    }

    #[instrument(skip(self, text), fields(chars = text.len()))]
    async fn synthesize(&self, voice_id: &str, text: &str) -> Result<Body, UpstreamError> {
        let mut url = self.url(&["v1", "text-to-speech", voice_id])?;
        url.query_pairs_mut()
            .append_pair("output_format", OUTPUT_FORMAT);

        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&json!({ "text": text }))
            .send()
            .await?;
        let response = check(response).await?;
        Ok(Body::from_stream(response.bytes_stream()))
    }
}
