//! Request/response speech synthesis through the backend.

use crate::{
    audio::{AudioClip, AudioFormat},
    config::VoiceConfig,
    error::SpeechError,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const TTS_PATH: &str = "/api/voice/tts";

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

/// Synthesized audio exactly as the backend returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedSpeech {
    pub content_type: Option<String>,
    pub audio: Bytes,
}

impl SynthesizedSpeech {
    /// Anything not declared as WAV is treated as MP3.
    pub fn format(&self) -> AudioFormat {
        match self.content_type.as_deref() {
            Some(ct) if ct.contains("wav") => AudioFormat::Wav,
            _ => AudioFormat::Mp3,
        }
    }

    pub fn into_clip(self) -> AudioClip {
        AudioClip::new(self.format(), self.audio)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: SpeechRequest) -> Result<SynthesizedSpeech, SpeechError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct HttpSpeechClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSpeechClient {
    pub fn new(config: &VoiceConfig) -> Self {
        Self::with_client(reqwest::Client::new(), &config.api_base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), TTS_PATH),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechClient {
    #[instrument(skip_all, fields(chars = request.text.len()))]
    async fn synthesize(&self, request: SpeechRequest) -> Result<SynthesizedSpeech, SpeechError> {
        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            // The backend answers failures with `{ "error": "..." }`.
            let message = serde_json::from_str::<ErrorBody>(&raw)
                .map(|body| body.error)
                .unwrap_or(raw);
            return Err(SpeechError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let audio = response.bytes().await?;
        debug!(bytes = audio.len(), ?content_type, "Speech synthesized");

        Ok(SynthesizedSpeech {
            content_type,
            audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::post};
    use serde_json::{Value, json};

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_request_omits_missing_voice() {
        let body = serde_json::to_value(SpeechRequest {
            text: "hi".to_string(),
            voice_id: None,
        })
        .unwrap();
        assert_eq!(body, json!({"text": "hi"}));

        let body = serde_json::to_value(SpeechRequest {
            text: "hi".to_string(),
            voice_id: Some("v1".to_string()),
        })
        .unwrap();
        assert_eq!(body, json!({"text": "hi", "voiceId": "v1"}));
    }

    #[test]
    fn test_format_from_content_type() {
        let speech = |ct: Option<&str>| SynthesizedSpeech {
            content_type: ct.map(str::to_string),
            audio: Bytes::new(),
        };
        assert_eq!(speech(Some("audio/mpeg")).format(), AudioFormat::Mp3);
        assert_eq!(speech(Some("audio/wav")).format(), AudioFormat::Wav);
        assert_eq!(speech(None).format(), AudioFormat::Mp3);
    }

    #[tokio::test]
    async fn test_synthesize_returns_audio_bytes() {
        let app = Router::new().route(
            TTS_PATH,
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["text"], "Hello");
                assert_eq!(body["voiceId"], "voice-9");
                ([("content-type", "audio/mpeg")], vec![0x49u8, 0x44, 0x33])
            }),
        );
        let client = HttpSpeechClient::with_client(reqwest::Client::new(), &spawn(app).await);

        let speech = client
            .synthesize(SpeechRequest {
                text: "Hello".to_string(),
                voice_id: Some("voice-9".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(speech.content_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(speech.audio.as_ref(), b"ID3");
    }

    #[tokio::test]
    async fn test_synthesize_surfaces_error_message() {
        let app = Router::new().route(
            TTS_PATH,
            post(|| async {
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({"error": "TTS failed: 401 Unauthorized"})),
                )
                    .into_response()
            }),
        );
        let client = HttpSpeechClient::with_client(reqwest::Client::new(), &spawn(app).await);

        match client
            .synthesize(SpeechRequest {
                text: "Hello".to_string(),
                voice_id: None,
            })
            .await
        {
            Err(SpeechError::Rejected { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "TTS failed: 401 Unauthorized");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
