//! Peer connection on webrtc-rs, exchanging G.711 µ-law audio.

use super::resample::StreamResampler;
use crate::{
    audio::{PCMU_SAMPLE_RATE, RemoteAudio, convert_f32_to_i16, mulaw_decode, mulaw_encode},
    error::MediaError,
    media::{
        LocalTrack, MediaConnection, MediaConnector, MediaEvent, MediaEventSender, OfferOptions,
        PeerConfig, PeerState, SdpType, SessionDescription,
    },
    protocol::IceCandidate,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use webrtc::{
    api::{
        APIBuilder, interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_PCMU, MediaEngine},
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    media::Sample,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
    rtp_transceiver::{
        RTCRtpTransceiverInit,
        rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType},
        rtp_transceiver_direction::RTCRtpTransceiverDirection,
    },
    track::{
        track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
        track_remote::TrackRemote,
    },
};

/// 20 ms of PCMU per packet.
const PACKET_DURATION: Duration = Duration::from_millis(20);
const PACKET_SAMPLES: usize = (PCMU_SAMPLE_RATE as usize) / 50;
const REMOTE_FRAME_BUFFER: usize = 64;
const STREAM_ID: &str = "matchday-voice";

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: PCMU_SAMPLE_RATE,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

fn peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

fn setup_error(e: webrtc::Error) -> MediaError {
    MediaError::Setup(e.to_string())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RtcMediaConnector;

#[async_trait]
impl MediaConnector for RtcMediaConnector {
    async fn connect(
        &self,
        config: PeerConfig,
        events: MediaEventSender,
    ) -> Result<Arc<dyn MediaConnection>, MediaError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: pcmu_capability(),
                    payload_type: 0,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(setup_error)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(setup_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .into_iter()
                .map(|server| RTCIceServer {
                    urls: server.urls,
                    username: server.username.unwrap_or_default(),
                    credential: server.credential.unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(setup_error)?,
        );

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(%state, "Peer connection state");
            let _ = state_events.send(MediaEvent::StateChanged(peer_state(state)));
            Box::pin(async {})
        }));

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_events.send(MediaEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize local candidate"),
                }
            }
            Box::pin(async {})
        }));

        let track_events = events;
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let (frames_tx, frames) = mpsc::channel(REMOTE_FRAME_BUFFER);
            let track_id = track.id();
            info!(%track_id, "Remote track started");
            tokio::spawn(read_remote_track(track, frames_tx));
            let _ = track_events.send(MediaEvent::RemoteTrack(RemoteAudio {
                track_id,
                sample_rate: PCMU_SAMPLE_RATE,
                frames,
            }));
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcConnection {
            pc,
            has_sender: AtomicBool::new(false),
            pumps: Mutex::new(Vec::new()),
        }))
    }
}

/// Decodes incoming PCMU packets until the track ends or the player goes away.
async fn read_remote_track(track: Arc<TrackRemote>, frames: mpsc::Sender<Vec<f32>>) {
    while let Ok((packet, _)) = track.read_rtp().await {
        let frame: Vec<f32> = packet
            .payload
            .iter()
            .map(|&byte| f32::from(mulaw_decode(byte)) / 32768.0)
            .collect();
        if frames.send(frame).await.is_err() {
            break;
        }
    }
    debug!("Remote track reader finished");
}

struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
    has_sender: AtomicBool,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

/// Resamples captured frames to 8 kHz and writes them as 20 ms PCMU samples.
async fn pump_local_track(
    mut frames: broadcast::Receiver<Arc<[f32]>>,
    sample_rate: u32,
    track: Arc<TrackLocalStaticSample>,
) {
    let mut resampler = match StreamResampler::new(sample_rate, PCMU_SAMPLE_RATE, 480) {
        Ok(resampler) => resampler,
        Err(e) => {
            warn!(error = %e, sample_rate, "Cannot resample microphone audio");
            return;
        }
    };
    let mut pending: Vec<f32> = Vec::new();

    loop {
        let frame = match frames.recv().await {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Microphone frames dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        pending.extend(resampler.push(&frame));

        while pending.len() >= PACKET_SAMPLES {
            let packet: Vec<f32> = pending.drain(..PACKET_SAMPLES).collect();
            let data: Vec<u8> = convert_f32_to_i16(&packet)
                .into_iter()
                .map(mulaw_encode)
                .collect();
            let sample = Sample {
                data: Bytes::from(data),
                duration: PACKET_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!(error = %e, "Local track write failed; stopping");
                return;
            }
        }
    }
}

#[async_trait]
impl MediaConnection for RtcConnection {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), MediaError> {
        let local = Arc::new(TrackLocalStaticSample::new(
            pcmu_capability(),
            track.id.clone(),
            STREAM_ID.to_owned(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(setup_error)?;
        self.has_sender.store(true, Ordering::SeqCst);

        let rtcp = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        let pump = tokio::spawn(pump_local_track(
            track.subscribe(),
            track.sample_rate,
            local,
        ));
        self.pumps.lock().await.extend([rtcp, pump]);
        Ok(())
    }

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, MediaError> {
        if options.receive_audio && !self.has_sender.load(Ordering::SeqCst) {
            self.pc
                .add_transceiver_from_kind(
                    RTPCodecType::Audio,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(setup_error)?;
        }
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| MediaError::Description(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let description = to_rtc(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| MediaError::Description(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let description = to_rtc(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| MediaError::Description(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| MediaError::Candidate(e.to_string()))
    }

    async fn close(&self) -> Result<(), MediaError> {
        for pump in self.pumps.lock().await.drain(..) {
            pump.abort();
        }
        self.pc
            .close()
            .await
            .map_err(|e| MediaError::Setup(e.to_string()))
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    let converted = match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    converted.map_err(|e| MediaError::Description(e.to_string()))
}
