//! Seams to the platform's microphone and peer media connection.
//!
//! The session client only talks to these traits. Native implementations live
//! in [`crate::native`] behind the `audio-io` and `webrtc` features.

use crate::{
    audio::RemoteAudio,
    config::IceServer,
    error::{CaptureError, MediaError},
    protocol::IceCandidate,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Audio processing requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// One local audio track. Frames are mono f32 samples at `sample_rate`.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    pub id: String,
    pub sample_rate: u32,
    pub frames: broadcast::Sender<Arc<[f32]>>,
}

impl LocalTrack {
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[f32]>> {
        self.frames.subscribe()
    }
}

/// An open microphone stream.
pub trait CaptureStream: Send + Sync {
    fn tracks(&self) -> Vec<LocalTrack>;
    /// Stops every track. Calling it again is a no-op.
    fn stop(&self);
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferOptions {
    pub receive_audio: bool,
    pub receive_video: bool,
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            receive_audio: true,
            receive_video: false,
        }
    }
}

/// Aggregate state of the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// States after which the media path is gone.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

/// Callbacks from the peer connection, delivered in order on one channel.
#[derive(Debug)]
pub enum MediaEvent {
    RemoteTrack(RemoteAudio),
    StateChanged(PeerState),
    LocalCandidate(IceCandidate),
}

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
}

#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), MediaError>;
    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, description: SessionDescription)
    -> Result<(), MediaError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;
    async fn close(&self) -> Result<(), MediaError>;
}

/// Creates peer connections whose callbacks are forwarded to `events`.
#[async_trait]
pub trait MediaConnector: Send + Sync {
    async fn connect(
        &self,
        config: PeerConfig,
        events: MediaEventSender,
    ) -> Result<Arc<dyn MediaConnection>, MediaError>;
}

/// The platform pieces a realtime session needs besides the network.
#[derive(Clone)]
pub struct MediaDeps {
    pub capture: Arc<dyn CaptureDevice>,
    pub connector: Arc<dyn MediaConnector>,
}
