use async_trait::async_trait;
use matchday_voice::{
    AudioOutput,
    audio::{AudioClip, RemoteAudio},
    error::PlaybackError,
    sink::PlaybackHandle,
};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Output for hosts built without speakers: remote audio is consumed and
/// clips are reported, nothing is rendered.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

#[async_trait]
impl AudioOutput for SilentOutput {
    async fn play_stream(&self, mut stream: RemoteAudio) -> Result<PlaybackHandle, PlaybackError> {
        let (done, finished) = oneshot::channel();
        tokio::spawn(async move {
            let mut samples = 0usize;
            while let Some(frame) = stream.frames.recv().await {
                samples += frame.len();
            }
            debug!(track_id = %stream.track_id, samples, "Remote track ended");
            let _ = done.send(());
        });
        Ok(PlaybackHandle { finished })
    }

    async fn play_clip(&self, clip: AudioClip) -> Result<PlaybackHandle, PlaybackError> {
        info!(format = clip.format.name(), bytes = clip.bytes.len(), "Agent audio received");
        let (done, finished) = oneshot::channel();
        let _ = done.send(());
        Ok(PlaybackHandle { finished })
    }

    fn stop(&self) {}
}
