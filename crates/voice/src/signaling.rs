//! The WebSocket signaling channel to the conversational agent.

use crate::error::SignalingError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    net::TcpStream,
    sync::{Mutex, mpsc},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

/// Where and as whom to open the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingParams {
    pub url: String,
    pub token: String,
    pub agent_id: String,
}

impl SignalingParams {
    /// The endpoint with the credential and agent id in the query string.
    pub fn endpoint(&self) -> Result<reqwest::Url, SignalingError> {
        let mut url = reqwest::Url::parse(&self.url)
            .map_err(|e| SignalingError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        url.query_pairs_mut()
            .append_pair("token", &self.token)
            .append_pair("agent_id", &self.agent_id);
        Ok(url)
    }
}

/// What the channel reports after it has opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

/// The write half of an open channel.
#[async_trait]
pub trait SignalingSender: Send + Sync {
    async fn send(&self, text: String) -> Result<(), SignalingError>;
    async fn ping(&self) -> Result<(), SignalingError>;
    async fn close(&self) -> Result<(), SignalingError>;
    fn is_open(&self) -> bool;
}

/// An open channel: the sender plus the ordered stream of events.
pub struct SignalingChannel {
    pub sender: Arc<dyn SignalingSender>,
    pub events: mpsc::Receiver<SignalingEvent>,
}

/// Opens signaling channels. Resolves once the channel is open.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn open(&self, params: &SignalingParams) -> Result<SignalingChannel, SignalingError>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Signaling over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsSignalingConnector;

#[async_trait]
impl SignalingConnector for WsSignalingConnector {
    async fn open(&self, params: &SignalingParams) -> Result<SignalingChannel, SignalingError> {
        let url = params.endpoint()?;
        debug!(host = url.host_str().unwrap_or_default(), "Opening signaling channel");

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::Handshake(e.to_string()))?;
        info!("Signaling channel open");

        let (sink, mut stream) = ws_stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let reader_open = open.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let event = match frame {
                    Ok(WsMessage::Text(text)) => SignalingEvent::Message(text.as_str().to_owned()),
                    Ok(WsMessage::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => SignalingEvent::Message(text),
                        Err(_) => {
                            debug!(len = data.len(), "Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.as_str().to_owned()))
                            .unwrap_or((None, String::new()));
                        let _ = events_tx.send(SignalingEvent::Closed { code, reason }).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        reader_open.store(false, Ordering::SeqCst);
                        warn!(error = %e, "Signaling channel error");
                        let _ = events_tx.send(SignalingEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                if events_tx.send(event).await.is_err() {
                    debug!("Signaling events receiver dropped; stopping reader");
                    return;
                }
            }
            reader_open.store(false, Ordering::SeqCst);
        });

        Ok(SignalingChannel {
            sender: Arc::new(WsSignalingSender {
                sink: Mutex::new(sink),
                open,
            }),
            events: events_rx,
        })
    }
}

struct WsSignalingSender {
    sink: Mutex<WsSink>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl SignalingSender for WsSignalingSender {
    async fn send(&self, text: String) -> Result<(), SignalingError> {
        if !self.is_open() {
            return Err(SignalingError::Closed);
        }
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| SignalingError::Send(e.to_string()))
    }

    async fn ping(&self) -> Result<(), SignalingError> {
        if !self.is_open() {
            return Err(SignalingError::Closed);
        }
        self.sink
            .lock()
            .await
            .send(WsMessage::Ping(Default::default()))
            .await
            .map_err(|e| SignalingError::Send(e.to_string()))
    }

    async fn close(&self) -> Result<(), SignalingError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(WsMessage::Close(None)).await {
            debug!(error = %e, "Close frame not delivered");
        }
        sink.close()
            .await
            .map_err(|e| SignalingError::Send(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
