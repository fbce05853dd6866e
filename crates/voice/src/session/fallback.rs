//! Request/response fallback: no microphone and no remote agent, only
//! synthesized speech played through the local sink.

use super::SpeechSession;
use crate::{
    config::VoiceConfig,
    error::{SpeechError, VoiceError},
    sink::{AudioOutput, AudioSink},
    speech::{SpeechRequest, SpeechSynthesizer},
};
use async_trait::async_trait;
use matchday_core::{ConnectionState, SessionStatus, StateStore};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};

pub struct FallbackSession {
    config: Arc<VoiceConfig>,
    speaker: Arc<Speaker>,
    state: StateStore,
    greeting: Mutex<Option<JoinHandle<()>>>,
}

struct Speaker {
    speech: Arc<dyn SpeechSynthesizer>,
    sink: AudioSink,
    voice_id: Option<String>,
}

impl Speaker {
    async fn say(&self, text: &str) -> Result<(), SpeechError> {
        let speech = self
            .speech
            .synthesize(SpeechRequest {
                text: text.to_string(),
                voice_id: self.voice_id.clone(),
            })
            .await?;
        self.sink.play_clip(speech.into_clip()).await?;
        Ok(())
    }
}

impl FallbackSession {
    pub fn new(
        config: Arc<VoiceConfig>,
        speech: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        let state = StateStore::new();
        let speaker = Speaker {
            speech,
            sink: AudioSink::new(output, state.clone()),
            voice_id: config.voice_id.clone(),
        };
        Self {
            config,
            speaker: Arc::new(speaker),
            state,
            greeting: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SpeechSession for FallbackSession {
    /// Always succeeds. The greeting is spoken in the background and its
    /// failure only shows up in the logs.
    #[instrument(name = "voice_connect", skip_all)]
    async fn connect(&self) -> Result<(), VoiceError> {
        self.state.update(|s| s.status = SessionStatus::Connected);
        info!("Fallback voice session connected");

        let speaker = self.speaker.clone();
        let greeting = self.config.greeting.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = speaker.say(&greeting).await {
                warn!(error = %e, "Greeting could not be spoken");
            }
        });
        if let Some(previous) = self.greeting.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(task) = self.greeting.lock().await.take() {
            task.abort();
        }
        self.speaker.sink.stop();
        self.state.reset();
        info!("Fallback voice session disconnected");
    }

    /// No microphone exists on this transport, so listening never starts.
    fn start_listening(&self) {
        debug!("Fallback transport has no microphone; ignoring start_listening");
    }

    fn stop_listening(&self) {
        self.state.update(|s| s.is_listening = false);
    }

    fn state(&self) -> ConnectionState {
        self.state.current()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.state.transitions()
    }

    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        self.speaker.say(text).await.map_err(VoiceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::AudioFormat,
        config::DEFAULT_GREETING,
        error::PlaybackError,
        speech::{MockSpeechSynthesizer, SynthesizedSpeech},
        testing::{FakeOutput, eventually, test_config},
    };
    use bytes::Bytes;

    fn mp3() -> SynthesizedSpeech {
        SynthesizedSpeech {
            content_type: Some("audio/mpeg".to_string()),
            audio: Bytes::from_static(b"ID3"),
        }
    }

    fn session(speech: MockSpeechSynthesizer, output: Arc<FakeOutput>) -> FallbackSession {
        let config = VoiceConfig {
            voice_id: Some("voice-9".to_string()),
            ..test_config()
        };
        FallbackSession::new(Arc::new(config), Arc::new(speech), output)
    }

    #[tokio::test]
    async fn test_connect_succeeds_when_speech_fails() {
        let mut speech = MockSpeechSynthesizer::new();
        speech.expect_synthesize().returning(|_| {
            Err(SpeechError::Rejected {
                status: 502,
                message: "TTS failed".to_string(),
            })
        });
        let output = Arc::new(FakeOutput::accepting_all());
        let session = session(speech, output.clone());

        session.connect().await.unwrap();
        tokio::task::yield_now().await;

        let state = session.state();
        assert_eq!(state.status, SessionStatus::Connected);
        assert!(!state.is_speaking);
        assert!(output.clips().is_empty());
    }

    #[tokio::test]
    async fn test_connect_speaks_greeting() {
        let mut speech = MockSpeechSynthesizer::new();
        speech
            .expect_synthesize()
            .withf(|request| {
                request.text == DEFAULT_GREETING && request.voice_id.as_deref() == Some("voice-9")
            })
            .times(1)
            .returning(|_| Ok(mp3()));
        let output = Arc::new(FakeOutput::accepting_all());
        let session = session(speech, output.clone());

        session.connect().await.unwrap();

        let played = output.clone();
        eventually(|| played.clips().len() == 1).await;
        assert_eq!(output.clips()[0].format, AudioFormat::Mp3);
        assert!(session.state().is_speaking);

        output.finish_all();
        let mut watcher = session.subscribe();
        watcher.wait_for(|s| !s.is_speaking).await.unwrap();
        assert_eq!(session.state().status, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_speak_reports_playback_failure() {
        let mut speech = MockSpeechSynthesizer::new();
        speech.expect_synthesize().returning(|_| Ok(mp3()));
        let session = session(speech, Arc::new(FakeOutput::refusing()));

        let result = session.speak("Arsenal are top of the table").await;

        assert!(matches!(
            result,
            Err(VoiceError::Speech(SpeechError::Playback(
                PlaybackError::Rejected(_)
            )))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_resets_state() {
        let mut speech = MockSpeechSynthesizer::new();
        speech.expect_synthesize().returning(|_| Ok(mp3()));
        let output = Arc::new(FakeOutput::accepting_all());
        let session = session(speech, output.clone());

        session.connect().await.unwrap();
        session.start_listening();
        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(session.state(), ConnectionState::initial());
        assert!(output.stopped());
    }

    #[tokio::test]
    async fn test_start_listening_never_reports_listening() {
        let mut speech = MockSpeechSynthesizer::new();
        speech.expect_synthesize().returning(|_| Ok(mp3()));
        let session = session(speech, Arc::new(FakeOutput::accepting_all()));

        session.start_listening();
        assert!(!session.state().is_listening);

        session.connect().await.unwrap();
        session.start_listening();
        let state = session.state();
        assert_eq!(state.status, SessionStatus::Connected);
        assert!(!state.is_listening);
    }
}
