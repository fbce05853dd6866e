use crate::{
    error::CaptureError,
    media::{CaptureConstraints, CaptureDevice, CaptureStream, LocalTrack},
};
use async_trait::async_trait;
use cpal::{
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info};

const FRAME_BUFFER: usize = 64;
const TRACK_ID: &str = "microphone";

/// The host's default input device.
///
/// cpal streams are not `Send`, so each open stream lives on its own thread
/// until it is stopped.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCaptureDevice;

#[async_trait]
impl CaptureDevice for CpalCaptureDevice {
    async fn open(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        // cpal has no echo cancellation or gain control; the request is noted only.
        debug!(?constraints, "Opening default input device");

        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_frames = frames.clone();
        std::thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || match start_input(thread_frames) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    // Runs until stop() or the stream handle is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    info!("Microphone capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| CaptureError::Device("capture thread exited".to_string()))??;
        info!(sample_rate, "Microphone capture started");

        Ok(Box::new(CpalCaptureStream {
            track: LocalTrack {
                id: TRACK_ID.to_string(),
                sample_rate,
                frames,
            },
            stop: Mutex::new(Some(stop_tx)),
        }))
    }
}

struct CpalCaptureStream {
    track: LocalTrack,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl CaptureStream for CpalCaptureStream {
    fn tracks(&self) -> Vec<LocalTrack> {
        vec![self.track.clone()]
    }

    fn stop(&self) {
        if let Ok(mut stop) = self.stop.lock() {
            if let Some(stop) = stop.take() {
                let _ = stop.send(());
            }
        }
    }
}

fn start_input(frames: broadcast::Sender<Arc<[f32]>>) -> Result<(Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::Unavailable("No input device available".to_string()))?;
    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Device(format!("Failed to get input config: {}", e)))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, frames)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, frames)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, frames)?,
        other => {
            return Err(CaptureError::Unavailable(format!(
                "Unsupported sample format {:?}",
                other
            )));
        }
    };
    stream
        .play()
        .map_err(|e| CaptureError::Device(format!("Failed to start input stream: {}", e)))?;
    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    frames: broadcast::Sender<Arc<[f32]>>,
) -> Result<Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Average all channels to create mono
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| {
                        frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
                    })
                    .collect();
                let _ = frames.send(mono.into());
            },
            |err| error!("Audio input stream error: {}", err),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::Unavailable("Input device disappeared".to_string())
            }
            other => CaptureError::Device(format!("Failed to build input stream: {}", other)),
        })
}
