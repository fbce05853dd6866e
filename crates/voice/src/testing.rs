//! In-memory stand-ins for the platform seams, shared by the unit tests.

use crate::{
    audio::{AudioClip, AudioFormat, RemoteAudio},
    config::{IceServer, VoiceConfig},
    error::{CaptureError, MediaError, PlaybackError, SignalingError},
    media::{
        CaptureConstraints, CaptureDevice, CaptureStream, LocalTrack, MediaConnection,
        MediaConnector, MediaEventSender, OfferOptions, PeerConfig, SessionDescription,
    },
    protocol::IceCandidate,
    signaling::{
        SignalingChannel, SignalingConnector, SignalingEvent, SignalingParams, SignalingSender,
    },
    sink::{AudioOutput, PlaybackHandle},
    token::TokenGrant,
};
use async_trait::async_trait;
use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::{broadcast, mpsc, oneshot};

pub const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 0\r\n";
pub const ANSWER_SDP: &str = "v=0\r\no=- 2 1 IN IP4 0.0.0.0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 0\r\n";

pub fn test_config() -> VoiceConfig {
    VoiceConfig {
        ice_servers: vec![IceServer::stun(vec!["stun:stun.test:3478".to_string()])],
        setup_timeout: Duration::from_secs(2),
        keepalive_interval: None,
        ..VoiceConfig::default()
    }
}

pub fn grant() -> TokenGrant {
    TokenGrant {
        token: "conv-token".to_string(),
        conversation_id: "conv-1".to_string(),
        agent_id: "agent-1".to_string(),
        user_id: None,
    }
}

pub fn candidate(n: usize) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{} 1 UDP 2122260223 10.0.0.{} 5000 typ host", n, n),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

// Capture

pub struct FakeCapture {
    deny: bool,
    pub opened: AtomicUsize,
    pub constraints: Mutex<Option<CaptureConstraints>>,
    pub stopped: Arc<AtomicBool>,
}

impl FakeCapture {
    pub fn granting() -> Self {
        Self {
            deny: false,
            opened: AtomicUsize::new(0),
            constraints: Mutex::new(None),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::granting()
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct FakeCaptureStream {
    track: LocalTrack,
    stopped: Arc<AtomicBool>,
}

impl CaptureStream for FakeCaptureStream {
    fn tracks(&self) -> Vec<LocalTrack> {
        vec![self.track.clone()]
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    async fn open(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.constraints.lock().unwrap() = Some(constraints);
        if self.deny {
            return Err(CaptureError::PermissionDenied);
        }
        let (frames, _) = broadcast::channel(4);
        Ok(Box::new(FakeCaptureStream {
            track: LocalTrack {
                id: "mic-0".to_string(),
                sample_rate: 48_000,
                frames,
            },
            stopped: self.stopped.clone(),
        }))
    }
}

// Media

#[derive(Default)]
pub struct FakePeer {
    pub tracks: Mutex<Vec<String>>,
    pub offers: Mutex<Vec<OfferOptions>>,
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Vec<SessionDescription>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicBool,
}

impl FakePeer {
    pub fn remote_count(&self) -> usize {
        self.remote.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaConnection for FakePeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), MediaError> {
        self.tracks.lock().unwrap().push(track.id.clone());
        Ok(())
    }

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, MediaError> {
        self.offers.lock().unwrap().push(options);
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        *self.local.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.remote.lock().unwrap().push(description);
        Ok(())
    }

    /// Like a real peer, refuses candidates before the remote description.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        if self.remote.lock().unwrap().is_empty() {
            return Err(MediaError::Candidate(
                "remote description not set".to_string(),
            ));
        }
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub peer: Arc<FakePeer>,
    pub config: Mutex<Option<PeerConfig>>,
    events: Mutex<Option<MediaEventSender>>,
}

impl FakeMedia {
    /// The callback channel of the most recent peer.
    pub fn events(&self) -> MediaEventSender {
        self.events
            .lock()
            .unwrap()
            .clone()
            .expect("no peer connection was created")
    }
}

#[async_trait]
impl MediaConnector for FakeMedia {
    async fn connect(
        &self,
        config: PeerConfig,
        events: MediaEventSender,
    ) -> Result<Arc<dyn MediaConnection>, MediaError> {
        *self.config.lock().unwrap() = Some(config);
        *self.events.lock().unwrap() = Some(events);
        Ok(self.peer.clone())
    }
}

// Signaling

#[derive(Default)]
pub struct FakeSignalingSender {
    pub sent: Mutex<Vec<String>>,
    pub pings: AtomicUsize,
    pub closed: AtomicBool,
}

impl FakeSignalingSender {
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingSender for FakeSignalingSender {
    async fn send(&self, text: String) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn ping(&self) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), SignalingError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

#[derive(Default)]
pub struct FakeSignaling {
    refuse: bool,
    pub opened: AtomicUsize,
    pub params: Mutex<Option<SignalingParams>>,
    pub sender: Arc<FakeSignalingSender>,
    inbound: Mutex<Option<mpsc::Sender<SignalingEvent>>>,
}

impl FakeSignaling {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Delivers an event as if it came from the remote end.
    pub async fn deliver(&self, event: SignalingEvent) {
        let inbound = self
            .inbound
            .lock()
            .unwrap()
            .clone()
            .expect("signaling channel was not opened");
        inbound.send(event).await.expect("session stopped reading");
    }

    pub async fn deliver_json(&self, message: serde_json::Value) {
        self.deliver(SignalingEvent::Message(message.to_string()))
            .await;
    }
}

#[async_trait]
impl SignalingConnector for FakeSignaling {
    async fn open(&self, params: &SignalingParams) -> Result<SignalingChannel, SignalingError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.params.lock().unwrap() = Some(params.clone());
        if self.refuse {
            return Err(SignalingError::Handshake("connection refused".to_string()));
        }
        self.sender.closed.store(false, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        *self.inbound.lock().unwrap() = Some(tx);
        Ok(SignalingChannel {
            sender: self.sender.clone(),
            events: rx,
        })
    }
}

// Output

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    AcceptAll,
    RejectMp3,
    Refuse,
}

pub struct FakeOutput {
    mode: OutputMode,
    clips: Mutex<Vec<AudioClip>>,
    attempts: AtomicUsize,
    streams: AtomicUsize,
    pending: Mutex<Vec<oneshot::Sender<()>>>,
    stopped: AtomicBool,
}

impl FakeOutput {
    fn with_mode(mode: OutputMode) -> Self {
        Self {
            mode,
            clips: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            streams: AtomicUsize::new(0),
            pending: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn accepting_all() -> Self {
        Self::with_mode(OutputMode::AcceptAll)
    }

    /// Decodes nothing as MP3, like a chunk of raw PCM would fail to.
    pub fn rejecting_mp3() -> Self {
        Self::with_mode(OutputMode::RejectMp3)
    }

    /// Refuses all playback, like a blocked autoplay.
    pub fn refusing() -> Self {
        Self::with_mode(OutputMode::Refuse)
    }

    pub fn clips(&self) -> Vec<AudioClip> {
        self.clips.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Ends every playback started so far.
    pub fn finish_all(&self) {
        for done in self.pending.lock().unwrap().drain(..) {
            let _ = done.send(());
        }
    }

    fn started(&self) -> PlaybackHandle {
        let (done, finished) = oneshot::channel();
        self.pending.lock().unwrap().push(done);
        PlaybackHandle { finished }
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn play_stream(&self, _stream: RemoteAudio) -> Result<PlaybackHandle, PlaybackError> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        Ok(self.started())
    }

    async fn play_clip(&self, clip: AudioClip) -> Result<PlaybackHandle, PlaybackError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match (self.mode, clip.format) {
            (OutputMode::Refuse, _) => {
                return Err(PlaybackError::Rejected("autoplay blocked".to_string()));
            }
            (OutputMode::RejectMp3, AudioFormat::Mp3) => {
                return Err(PlaybackError::Decode {
                    format: "mp3",
                    reason: "no frame sync".to_string(),
                });
            }
            _ => {}
        }
        self.clips.lock().unwrap().push(clip);
        Ok(self.started())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
