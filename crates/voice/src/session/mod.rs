//! The transport-agnostic voice session and its two implementations.

mod fallback;
mod realtime;

pub use fallback::FallbackSession;
pub use realtime::RealtimeSession;

use crate::{
    config::{TransportMode, VoiceConfig},
    error::{MediaError, VoiceError},
    media::MediaDeps,
    signaling::SignalingConnector,
    sink::AudioOutput,
    speech::SpeechSynthesizer,
    token::TokenProvider,
};
use async_trait::async_trait;
use matchday_core::{Bus, ConnectionState, Intent};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// A voice conversation with the remote agent.
///
/// `connect` reports only setup failures. Everything after that is reflected
/// in the [`ConnectionState`] observed through `subscribe`/`transitions`.
#[async_trait]
pub trait SpeechSession: Send + Sync {
    async fn connect(&self) -> Result<(), VoiceError>;
    /// Releases every resource and returns to the initial state. Safe to call
    /// at any time, any number of times.
    async fn disconnect(&self);
    fn start_listening(&self);
    fn stop_listening(&self);
    fn state(&self) -> ConnectionState;
    fn subscribe(&self) -> watch::Receiver<ConnectionState>;
    fn transitions(&self) -> broadcast::Receiver<ConnectionState>;
    /// Speaks `text` where the transport supports it; a no-op otherwise.
    async fn speak(&self, text: &str) -> Result<(), VoiceError>;
}

/// Everything a session may need from the outside world.
#[derive(Clone)]
pub struct SessionDeps {
    pub tokens: Arc<dyn TokenProvider>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub signaling: Arc<dyn SignalingConnector>,
    pub output: Arc<dyn AudioOutput>,
    /// `None` when the host has no microphone or peer connection backend.
    pub media: Option<MediaDeps>,
}

/// Builds the session selected by `config.transport`.
pub fn build_session(
    config: VoiceConfig,
    deps: SessionDeps,
    intents: Bus<Intent>,
) -> Result<Arc<dyn SpeechSession>, VoiceError> {
    let config = Arc::new(config);
    match config.transport {
        TransportMode::Realtime => {
            let media = deps.media.ok_or_else(|| {
                MediaError::Setup("no capture or peer connection backend available".to_string())
            })?;
            Ok(Arc::new(RealtimeSession::new(
                config,
                deps.tokens,
                media,
                deps.signaling,
                deps.output,
                intents,
            )))
        }
        TransportMode::Fallback => Ok(Arc::new(FallbackSession::new(
            config,
            deps.speech,
            deps.output,
        ))),
    }
}
