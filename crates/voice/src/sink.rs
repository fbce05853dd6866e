//! Plays remote agent audio and mirrors playback into `is_speaking`.
//!
//! Playback failures never change the session status. They are logged and
//! the session carries on.

use crate::{
    audio::{
        AudioClip, AudioFormat, MESSAGE_AUDIO_CHANNELS, MESSAGE_AUDIO_SAMPLE_RATE, RemoteAudio,
        wrap_pcm16_wav,
    },
    error::PlaybackError,
};
use async_trait::async_trait;
use bytes::Bytes;
use matchday_core::StateStore;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Handle to a started playback. `finished` resolves (or its sender is
/// dropped) when the audio has ended.
#[derive(Debug)]
pub struct PlaybackHandle {
    pub finished: oneshot::Receiver<()>,
}

/// The platform audio output.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Attaches a live remote track to the output.
    async fn play_stream(&self, stream: RemoteAudio) -> Result<PlaybackHandle, PlaybackError>;
    /// Decodes and plays a complete clip.
    async fn play_clip(&self, clip: AudioClip) -> Result<PlaybackHandle, PlaybackError>;
    /// Silences whatever is playing.
    fn stop(&self);
}

pub struct AudioSink {
    output: Arc<dyn AudioOutput>,
    state: StateStore,
    current: Arc<AtomicU64>,
}

impl AudioSink {
    pub fn new(output: Arc<dyn AudioOutput>, state: StateStore) -> Self {
        Self {
            output,
            state,
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn play_stream(&self, stream: RemoteAudio) {
        let id = self.begin();
        debug!(track_id = %stream.track_id, "Attaching remote audio track");
        match self.output.play_stream(stream).await {
            Ok(handle) => self.track(id, handle),
            Err(e) => warn!(error = %e, "Remote audio playback failed"),
        }
    }

    pub async fn play_clip(&self, clip: AudioClip) -> Result<(), PlaybackError> {
        let id = self.begin();
        let handle = self.output.play_clip(clip).await?;
        self.track(id, handle);
        Ok(())
    }

    /// Plays one message-framed chunk.
    ///
    /// The chunk is tried as MP3 first. If it does not decode, it is taken to
    /// be raw 16 kHz mono PCM16 and played again inside a WAV header.
    pub async fn play_encoded(&self, bytes: Bytes) -> Result<(), PlaybackError> {
        match self.play_clip(AudioClip::new(AudioFormat::Mp3, bytes.clone())).await {
            Err(PlaybackError::Decode { reason, .. }) => {
                debug!(%reason, "Chunk is not MP3, retrying as PCM16");
                let wav = wrap_pcm16_wav(&bytes, MESSAGE_AUDIO_SAMPLE_RATE, MESSAGE_AUDIO_CHANNELS);
                self.play_clip(AudioClip::new(AudioFormat::Wav, wav)).await
            }
            other => other,
        }
    }

    /// Silences the output. A playback that ends later no longer touches the
    /// speaking flag.
    pub fn stop(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
        self.output.stop();
    }

    fn begin(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn track(&self, id: u64, handle: PlaybackHandle) {
        let current = self.current.clone();
        self.state.update(|s| {
            if current.load(Ordering::SeqCst) == id {
                s.is_speaking = true;
            }
        });

        let state = self.state.clone();
        tokio::spawn(async move {
            let _ = handle.finished.await;
            state.update(|s| {
                if current.load(Ordering::SeqCst) == id {
                    s.is_speaking = false;
                }
            });
        });
    }
}
