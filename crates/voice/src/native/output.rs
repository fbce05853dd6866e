use crate::{
    audio::{AudioClip, AudioFormat, RemoteAudio},
    error::PlaybackError,
    sink::{AudioOutput, PlaybackHandle},
};
use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, buffer::SamplesBuffer};
use std::{
    io::Cursor,
    sync::{Arc, mpsc as std_mpsc},
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Reply = oneshot::Sender<Result<PlaybackHandle, PlaybackError>>;

enum Command {
    Clip(AudioClip, Reply),
    Stream(RemoteAudio, Reply),
    Stop,
}

/// Speaker output through rodio.
///
/// The output stream is not `Send`; it is owned by a dedicated thread that
/// serves play and stop requests.
pub struct RodioOutput {
    commands: std_mpsc::Sender<Command>,
}

impl RodioOutput {
    pub fn new() -> Result<Self, PlaybackError> {
        let (commands, requests) = std_mpsc::channel();
        std::thread::Builder::new()
            .name("voice-output".to_string())
            .spawn(move || serve(requests))
            .map_err(|e| PlaybackError::Unavailable(e.to_string()))?;
        Ok(Self { commands })
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> Command,
    ) -> Result<PlaybackHandle, PlaybackError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| PlaybackError::Unavailable("audio output thread stopped".to_string()))?;
        response
            .await
            .map_err(|_| PlaybackError::Unavailable("audio output thread stopped".to_string()))?
    }
}

#[async_trait]
impl AudioOutput for RodioOutput {
    async fn play_stream(&self, stream: RemoteAudio) -> Result<PlaybackHandle, PlaybackError> {
        self.request(|reply| Command::Stream(stream, reply)).await
    }

    async fn play_clip(&self, clip: AudioClip) -> Result<PlaybackHandle, PlaybackError> {
        self.request(|reply| Command::Clip(clip, reply)).await
    }

    fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }
}

fn serve(requests: std_mpsc::Receiver<Command>) {
    let output = OutputStream::try_default();
    let handle = match &output {
        Ok((_, handle)) => Some(handle.clone()),
        Err(e) => {
            warn!(error = %e, "No audio output device; playback disabled");
            None
        }
    };
    let mut active: Vec<Arc<Sink>> = Vec::new();

    while let Ok(command) = requests.recv() {
        active.retain(|sink| !sink.empty());
        match command {
            Command::Clip(clip, reply) => {
                let result = play_clip(handle.as_ref(), clip).map(|(sink, playback)| {
                    active.push(sink);
                    playback
                });
                let _ = reply.send(result);
            }
            Command::Stream(stream, reply) => {
                let result = play_stream(handle.as_ref(), stream).map(|(sink, playback)| {
                    active.push(sink);
                    playback
                });
                let _ = reply.send(result);
            }
            Command::Stop => {
                for sink in active.drain(..) {
                    sink.stop();
                }
            }
        }
    }
}

fn new_sink(handle: Option<&OutputStreamHandle>) -> Result<Arc<Sink>, PlaybackError> {
    let handle =
        handle.ok_or_else(|| PlaybackError::Unavailable("no output device".to_string()))?;
    Sink::try_new(handle)
        .map(Arc::new)
        .map_err(|e| PlaybackError::Unavailable(e.to_string()))
}

fn play_clip(
    handle: Option<&OutputStreamHandle>,
    clip: AudioClip,
) -> Result<(Arc<Sink>, PlaybackHandle), PlaybackError> {
    let format = clip.format;
    let cursor = Cursor::new(clip.bytes);
    let source = match format {
        AudioFormat::Mp3 => Decoder::new_mp3(cursor),
        AudioFormat::Wav => Decoder::new_wav(cursor),
    }
    .map_err(|e| PlaybackError::Decode {
        format: format.name(),
        reason: e.to_string(),
    })?;

    let sink = new_sink(handle)?;
    sink.append(source);

    let (done, finished) = oneshot::channel();
    let watched = sink.clone();
    std::thread::spawn(move || {
        watched.sleep_until_end();
        let _ = done.send(());
    });
    Ok((sink, PlaybackHandle { finished }))
}

fn play_stream(
    handle: Option<&OutputStreamHandle>,
    stream: RemoteAudio,
) -> Result<(Arc<Sink>, PlaybackHandle), PlaybackError> {
    let sink = new_sink(handle)?;
    let feeder = sink.clone();
    let RemoteAudio {
        track_id,
        sample_rate,
        mut frames,
    } = stream;

    let (done, finished) = oneshot::channel();
    std::thread::Builder::new()
        .name("voice-remote-track".to_string())
        .spawn(move || {
            while let Some(frame) = frames.blocking_recv() {
                feeder.append(SamplesBuffer::new(1, sample_rate, frame));
            }
            feeder.sleep_until_end();
            debug!(%track_id, "Remote track playback ended");
            let _ = done.send(());
        })
        .map_err(|e| PlaybackError::Unavailable(e.to_string()))?;
    Ok((sink, PlaybackHandle { finished }))
}
