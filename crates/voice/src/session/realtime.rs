//! Realtime transport: microphone and agent audio over a peer connection,
//! negotiated through the signaling channel.
//!
//! `connect` walks the setup steps in order (token, microphone, peer,
//! signaling, offer) and fails fast on the first error. Once the offer is out,
//! a single driver task owns the session: it applies signaling messages and
//! peer callbacks in arrival order, so no two handlers ever interleave.

use super::SpeechSession;
use crate::{
    audio::decode_base64_audio,
    config::VoiceConfig,
    error::{SignalingError, VoiceError},
    media::{
        CaptureConstraints, CaptureStream, MediaConnection, MediaDeps, MediaEvent, OfferOptions,
        PeerConfig, PeerState, SessionDescription,
    },
    protocol::{IceCandidate, InboundMessage, OutboundMessage},
    signaling::{SignalingConnector, SignalingEvent, SignalingParams, SignalingSender},
    sink::{AudioOutput, AudioSink},
    token::{TokenGrant, TokenProvider},
};
use async_trait::async_trait;
use matchday_core::{
    Bus, ConnectionState, Intent, KeywordIntentExtractor, SessionStatus, StateStore,
};
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

/// Everything a live session holds, tagged with the connect attempt that
/// acquired it.
#[derive(Default)]
struct SessionResources {
    generation: u64,
    capture: Option<Box<dyn CaptureStream>>,
    peer: Option<Arc<dyn MediaConnection>>,
    signaling: Option<Arc<dyn SignalingSender>>,
    keepalive: Option<JoinHandle<()>>,
    driver: Option<JoinHandle<()>>,
}

impl SessionResources {
    /// Closes every held resource. A failing step does not stop the others.
    async fn release(self, abort_driver: bool) {
        if abort_driver {
            if let Some(driver) = &self.driver {
                driver.abort();
            }
        }
        if let Some(keepalive) = &self.keepalive {
            keepalive.abort();
        }
        if let Some(signaling) = &self.signaling {
            if let Err(e) = signaling.close().await {
                warn!(error = %e, "Failed to close signaling channel");
            }
        }
        if let Some(peer) = &self.peer {
            if let Err(e) = peer.close().await {
                warn!(error = %e, "Failed to close peer connection");
            }
        }
        if let Some(capture) = &self.capture {
            capture.stop();
        }
    }
}

struct Shared {
    state: StateStore,
    sink: AudioSink,
    intents: Bus<Intent>,
    /// Bumped by every connect and disconnect. Work belonging to an older
    /// value is stale and must not touch the state.
    generation: AtomicU64,
    resources: Mutex<SessionResources>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Applies `change` only while `generation` is the live attempt. The check
    /// runs under the state lock, so it cannot race a reset.
    fn update_if_current(&self, generation: u64, change: impl FnOnce(&mut ConnectionState)) {
        self.state.update(|state| {
            if self.is_current(generation) {
                change(state);
            }
        });
    }

    /// Resets the state to `status` while `generation` is the live attempt.
    fn reset_if_current(&self, generation: u64, status: SessionStatus) {
        self.update_if_current(generation, |s| *s = ConnectionState::with_status(status));
    }

    /// Whether the live attempt currently holds an open microphone. A held
    /// lock means a connect or disconnect is mid-step, which counts as no.
    fn is_capturing(&self) -> bool {
        self.resources
            .try_lock()
            .map(|r| r.capture.is_some() && self.is_current(r.generation))
            .unwrap_or(false)
    }

    /// Replaces the held resources with an empty set owned by `generation`.
    async fn install(&self, generation: u64) -> SessionResources {
        let mut resources = self.resources.lock().await;
        std::mem::replace(
            &mut *resources,
            SessionResources {
                generation,
                ..SessionResources::default()
            },
        )
    }

    /// Takes the held resources, or only those of `generation` when given.
    async fn take(&self, generation: Option<u64>) -> Option<SessionResources> {
        let mut resources = self.resources.lock().await;
        match generation {
            Some(generation) if resources.generation != generation => None,
            _ => Some(std::mem::take(&mut *resources)),
        }
    }

    /// Stores `item` for `generation`. Hands it back if that attempt is gone.
    async fn hold<T>(
        &self,
        generation: u64,
        item: T,
        slot: impl FnOnce(&mut SessionResources) -> &mut Option<T>,
    ) -> Result<(), T> {
        let mut resources = self.resources.lock().await;
        if resources.generation != generation || !self.is_current(generation) {
            return Err(item);
        }
        *slot(&mut resources) = Some(item);
        Ok(())
    }
}

async fn bounded<T, E>(
    limit: Duration,
    step: &'static str,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, VoiceError>
where
    VoiceError: From<E>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(VoiceError::from),
        Err(_) => Err(VoiceError::Timeout(step)),
    }
}

fn spawn_keepalive(sender: Arc<dyn SignalingSender>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = sender.ping().await {
                debug!(error = %e, "Keep-alive stopped");
                break;
            }
        }
    })
}

/// A realtime voice session over a peer connection.
pub struct RealtimeSession {
    config: Arc<VoiceConfig>,
    tokens: Arc<dyn TokenProvider>,
    media: MediaDeps,
    signaling: Arc<dyn SignalingConnector>,
    shared: Arc<Shared>,
}

impl RealtimeSession {
    pub fn new(
        config: Arc<VoiceConfig>,
        tokens: Arc<dyn TokenProvider>,
        media: MediaDeps,
        signaling: Arc<dyn SignalingConnector>,
        output: Arc<dyn AudioOutput>,
        intents: Bus<Intent>,
    ) -> Self {
        let state = StateStore::new();
        Self {
            config,
            tokens,
            media,
            signaling,
            shared: Arc::new(Shared {
                sink: AudioSink::new(output, state.clone()),
                state,
                intents,
                generation: AtomicU64::new(0),
                resources: Mutex::new(SessionResources::default()),
            }),
        }
    }

    fn ensure_current(&self, generation: u64) -> Result<(), VoiceError> {
        if self.shared.is_current(generation) {
            Ok(())
        } else {
            Err(VoiceError::Superseded)
        }
    }

    async fn establish(&self, generation: u64) -> Result<(), VoiceError> {
        let limit = self.config.setup_timeout;

        let grant = bounded(limit, "token exchange", self.tokens.fetch_token()).await?;
        self.ensure_current(generation)?;
        info!(
            agent_id = %grant.agent_id,
            conversation_id = %grant.conversation_id,
            "Conversation token received"
        );

        // Microphone before signaling: a denied permission must fail the
        // attempt without ever opening the channel.
        let capture = bounded(
            limit,
            "microphone",
            self.media.capture.open(CaptureConstraints::default()),
        )
        .await?;
        let tracks = capture.tracks();
        if let Err(capture) = self
            .shared
            .hold(generation, capture, |r| &mut r.capture)
            .await
        {
            capture.stop();
            return Err(VoiceError::Superseded);
        }
        self.shared
            .update_if_current(generation, |s| s.is_listening = true);

        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let peer_config = PeerConfig {
            ice_servers: self.config.ice_servers.clone(),
        };
        let peer = bounded(
            limit,
            "peer connection",
            self.media.connector.connect(peer_config, media_tx),
        )
        .await?;
        if let Err(peer) = self
            .shared
            .hold(generation, peer.clone(), |r| &mut r.peer)
            .await
        {
            let _ = peer.close().await;
            return Err(VoiceError::Superseded);
        }
        for track in &tracks {
            peer.add_track(track).await?;
        }

        let params = SignalingParams {
            url: self.config.signaling_url.clone(),
            token: grant.token.clone(),
            agent_id: grant.agent_id.clone(),
        };
        let channel = bounded(limit, "signaling channel", self.signaling.open(&params)).await?;
        let sender = channel.sender;
        if let Err(sender) = self
            .shared
            .hold(generation, sender.clone(), |r| &mut r.signaling)
            .await
        {
            let _ = sender.close().await;
            return Err(VoiceError::Superseded);
        }

        // The channel is open: report the session optimistically. Peer
        // callbacks reconcile it later.
        let (agent_id, conversation_id) = (grant.agent_id.clone(), grant.conversation_id.clone());
        self.shared.update_if_current(generation, |s| {
            s.status = SessionStatus::Connected;
            s.set_session(agent_id, conversation_id);
        });
        send_offer(peer.as_ref(), sender.as_ref()).await?;

        if let Some(period) = self.config.keepalive_interval {
            let keepalive = spawn_keepalive(sender.clone(), period);
            if let Err(keepalive) = self
                .shared
                .hold(generation, keepalive, |r| &mut r.keepalive)
                .await
            {
                keepalive.abort();
                return Err(VoiceError::Superseded);
            }
        }

        let driver = Driver {
            generation,
            shared: self.shared.clone(),
            grant,
            peer,
            signaling: sender,
            answer_applied: false,
            pending_candidates: Vec::new(),
            structured_intents: false,
            extractor: KeywordIntentExtractor,
        };
        let events = channel.events;
        let (start_tx, start_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(
            async move {
                if start_rx.await.is_ok() {
                    driver.run(events, media_rx).await;
                }
            }
            .instrument(info_span!("voice_session", generation)),
        );
        if let Err(handle) = self
            .shared
            .hold(generation, handle, |r| &mut r.driver)
            .await
        {
            handle.abort();
            return Err(VoiceError::Superseded);
        }
        let _ = start_tx.send(());
        Ok(())
    }
}

async fn send_offer(
    peer: &dyn MediaConnection,
    signaling: &dyn SignalingSender,
) -> Result<(), VoiceError> {
    let offer = peer.create_offer(OfferOptions::default()).await?;
    peer.set_local_description(offer.clone()).await?;
    let message = OutboundMessage::Offer { sdp: offer.sdp }
        .to_json()
        .map_err(|e| SignalingError::Send(e.to_string()))?;
    signaling.send(message).await?;
    debug!("Session offer sent");
    Ok(())
}

#[async_trait]
impl SpeechSession for RealtimeSession {
    #[instrument(name = "voice_connect", skip_all)]
    async fn connect(&self) -> Result<(), VoiceError> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.install(generation).await.release(true).await;
        self.shared.reset_if_current(generation, SessionStatus::Connecting);
        info!(generation, "Connecting realtime voice session");

        match self.establish(generation).await {
            Ok(()) => {
                info!("Realtime voice session established");
                Ok(())
            }
            Err(VoiceError::Superseded) => {
                info!("Connection attempt superseded by a disconnect");
                Err(VoiceError::Superseded)
            }
            Err(e) => {
                error!(error = %e, "Failed to establish realtime voice session");
                if let Some(resources) = self.shared.take(Some(generation)).await {
                    resources.release(true).await;
                }
                self.shared.reset_if_current(generation, SessionStatus::Error);
                Err(e)
            }
        }
    }

    #[instrument(name = "voice_disconnect", skip_all)]
    async fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(resources) = self.shared.take(None).await {
            resources.release(true).await;
        }
        self.shared.sink.stop();
        self.shared.state.reset();
        info!("Realtime voice session disconnected");
    }

    fn start_listening(&self) {
        if !self.shared.is_capturing() {
            debug!("No microphone is open; ignoring start_listening");
            return;
        }
        self.shared.state.update(|s| s.is_listening = true);
    }

    fn stop_listening(&self) {
        self.shared.state.update(|s| s.is_listening = false);
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.current()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.state.transitions()
    }

    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        debug!(chars = text.len(), "Realtime sessions speak through the agent; ignoring");
        Ok(())
    }
}

/// Owns a connected session until it ends.
struct Driver {
    generation: u64,
    shared: Arc<Shared>,
    grant: TokenGrant,
    peer: Arc<dyn MediaConnection>,
    signaling: Arc<dyn SignalingSender>,
    answer_applied: bool,
    /// Remote candidates that arrived before the answer.
    pending_candidates: Vec<IceCandidate>,
    /// Set once the agent sends structured intents; keyword matching on free
    /// text stops from then on.
    structured_intents: bool,
    extractor: KeywordIntentExtractor,
}

impl Driver {
    async fn run(
        mut self,
        mut signaling: mpsc::Receiver<SignalingEvent>,
        mut media: mpsc::UnboundedReceiver<MediaEvent>,
    ) {
        loop {
            let outcome = tokio::select! {
                event = signaling.recv() => self.on_signaling(event).await,
                Some(event) = media.recv() => self.on_media(event).await,
            };
            if let Some(status) = outcome {
                self.shutdown(status).await;
                break;
            }
        }
    }

    /// Returns the final status when the session has ended.
    async fn on_signaling(&mut self, event: Option<SignalingEvent>) -> Option<SessionStatus> {
        match event {
            Some(SignalingEvent::Message(text)) => {
                self.on_message(&text).await;
                None
            }
            Some(SignalingEvent::Error(reason)) => {
                error!(%reason, "Signaling channel failed");
                Some(SessionStatus::Error)
            }
            Some(SignalingEvent::Closed { code, reason }) => {
                info!(?code, %reason, "Signaling channel closed");
                Some(SessionStatus::Disconnected)
            }
            None => {
                info!("Signaling channel ended");
                Some(SessionStatus::Disconnected)
            }
        }
    }

    async fn on_message(&mut self, raw: &str) {
        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring signaling message");
                return;
            }
        };

        match message {
            InboundMessage::Answer { sdp } => self.apply_answer(sdp).await,
            InboundMessage::IceCandidate(candidate) => self.apply_candidate(candidate).await,
            InboundMessage::AudioStart => self.set_speaking(true),
            InboundMessage::AudioEnd => self.set_speaking(false),
            InboundMessage::Audio { data } => match decode_base64_audio(&data) {
                Ok(bytes) => {
                    if let Err(e) = self.shared.sink.play_encoded(bytes).await {
                        warn!(error = %e, "Audio chunk playback failed");
                    }
                }
                Err(e) => warn!(error = %e, "Dropping audio chunk"),
            },
            InboundMessage::Intent(intent) => {
                self.structured_intents = true;
                self.publish(intent);
            }
            InboundMessage::Text(text) => {
                debug!(%text, "Agent text");
                if !self.structured_intents {
                    if let Some(intent) = self.extractor.extract(&text) {
                        self.publish(intent);
                    }
                }
            }
            InboundMessage::Unknown(kind) => debug!(?kind, "Ignoring unhandled message type"),
        }
    }

    async fn apply_answer(&mut self, sdp: String) {
        if self.answer_applied {
            warn!("Ignoring duplicate session answer");
            return;
        }
        if let Err(e) = self
            .peer
            .set_remote_description(SessionDescription::answer(sdp))
            .await
        {
            error!(error = %e, "Failed to apply session answer");
            return;
        }
        self.answer_applied = true;
        debug!(
            buffered = self.pending_candidates.len(),
            "Session answer applied"
        );
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.add_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        if self.answer_applied {
            self.add_candidate(candidate).await;
        } else {
            self.pending_candidates.push(candidate);
        }
    }

    async fn add_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.peer.add_ice_candidate(candidate).await {
            warn!(error = %e, "Remote ICE candidate rejected");
        }
    }

    fn set_speaking(&self, speaking: bool) {
        self.shared
            .update_if_current(self.generation, |s| s.is_speaking = speaking);
    }

    fn publish(&self, intent: Intent) {
        debug!(?intent, "Publishing intent");
        self.shared.intents.publish(intent);
    }

    async fn on_media(&mut self, event: MediaEvent) -> Option<SessionStatus> {
        match event {
            MediaEvent::RemoteTrack(audio) => {
                info!(track_id = %audio.track_id, "Remote audio track received");
                self.shared.sink.play_stream(audio).await;
                None
            }
            MediaEvent::StateChanged(peer_state) => {
                debug!(?peer_state, "Peer connection state changed");
                if peer_state == PeerState::Connected {
                    let grant = &self.grant;
                    self.shared.update_if_current(self.generation, |s| {
                        s.status = SessionStatus::Connected;
                        s.set_session(grant.agent_id.clone(), grant.conversation_id.clone());
                    });
                    None
                } else if peer_state.is_terminal() {
                    warn!(?peer_state, "Peer connection lost");
                    Some(SessionStatus::Disconnected)
                } else {
                    None
                }
            }
            MediaEvent::LocalCandidate(candidate) => {
                if !self.signaling.is_open() {
                    debug!("Dropping local ICE candidate; signaling is closed");
                    return None;
                }
                match (OutboundMessage::IceCandidate { candidate }).to_json() {
                    Ok(message) => {
                        if let Err(e) = self.signaling.send(message).await {
                            warn!(error = %e, "Failed to send local ICE candidate");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode local ICE candidate"),
                }
                None
            }
        }
    }

    async fn shutdown(&self, status: SessionStatus) {
        let Some(resources) = self.shared.take(Some(self.generation)).await else {
            return;
        };
        resources.release(false).await;
        self.shared.sink.stop();
        self.shared.reset_if_current(self.generation, status);
    }
}
