//! Error types for each seam of the voice client.

/// Failures of the server-mediated token exchange.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Token exchange rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Failures of the request/response speech synthesis.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("Speech request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Speech synthesis rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Speech playback failed: {0}")]
    Playback(#[from] PlaybackError),
}

/// Failures acquiring the local microphone.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Microphone permission denied")]
    PermissionDenied,
    #[error("No capture device available: {0}")]
    Unavailable(String),
    #[error("Capture device error: {0}")]
    Device(String),
}

/// Failures of the peer media connection.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Peer connection setup failed: {0}")]
    Setup(String),
    #[error("Session description rejected: {0}")]
    Description(String),
    #[error("ICE candidate rejected: {0}")]
    Candidate(String),
    #[error("Peer connection is closed")]
    Closed,
}

/// Failures of the signaling channel.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),
    #[error("Signaling handshake failed: {0}")]
    Handshake(String),
    #[error("Signaling send failed: {0}")]
    Send(String),
    #[error("Signaling channel is closed")]
    Closed,
}

/// Failures rendering audio. These never change the session state.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Audio could not be decoded as {format}: {reason}")]
    Decode { format: &'static str, reason: String },
    #[error("Playback was rejected: {0}")]
    Rejected(String),
    #[error("Audio output unavailable: {0}")]
    Unavailable(String),
}

/// Malformed or unexpected signaling payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message of type '{kind}' is malformed: {reason}")]
    Malformed { kind: String, reason: String },
    #[error("Audio payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Errors surfaced to the caller of `connect()`.
///
/// Only setup failures are reported this way; anything that happens after the
/// signaling channel opens is reflected in the connection state instead.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Speech(#[from] SpeechError),
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("Connection attempt was superseded by a disconnect")]
    Superseded,
}
