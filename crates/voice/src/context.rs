//! The application-facing session context.
//!
//! Owns one [`SpeechSession`], exposes its state and operations, and routes
//! the agent's intents: navigation goes to the host's [`Navigator`], filter and
//! select intents are re-published as [`AppEvent`]s for whichever view is
//! listening.

use crate::{
    config::VoiceConfig,
    error::VoiceError,
    session::{SessionDeps, SpeechSession, build_session},
};
use matchday_core::{AppEvent, Bus, ConnectionState, Intent, Navigator};
use std::sync::Arc;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Maps intents to navigation or application events.
pub struct IntentRouter {
    navigator: Arc<dyn Navigator>,
    events: Bus<AppEvent>,
}

impl IntentRouter {
    pub fn new(navigator: Arc<dyn Navigator>, events: Bus<AppEvent>) -> Self {
        Self { navigator, events }
    }

    pub fn route(&self, intent: Intent) {
        match intent {
            Intent::Navigate { target } => {
                info!(%target, path = target.path(), "Navigating");
                self.navigator.navigate(target);
            }
            Intent::Filter { params } => {
                let delivered = self.events.publish(AppEvent::Filter(params));
                debug!(delivered, "Filter event published");
            }
            Intent::Select { params } => {
                let delivered = self.events.publish(AppEvent::Select(params));
                debug!(delivered, "Select event published");
            }
        }
    }
}

pub struct SessionContext {
    session: Arc<dyn SpeechSession>,
    events: Bus<AppEvent>,
    router: JoinHandle<()>,
    disconnected: bool,
}

impl SessionContext {
    /// Wraps `session` and starts routing whatever it publishes on `intents`.
    pub fn new(
        session: Arc<dyn SpeechSession>,
        intents: &Bus<Intent>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let events = Bus::new();
        let router = IntentRouter::new(navigator, events.clone());
        let mut incoming = intents.subscribe();

        let router = tokio::spawn(async move {
            loop {
                match incoming.recv().await {
                    Ok(intent) => router.route(intent),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Intent router fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            session,
            events,
            router,
            disconnected: false,
        }
    }

    /// Builds the session selected by `config` and wraps it.
    pub fn from_config(
        config: VoiceConfig,
        deps: SessionDeps,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, VoiceError> {
        let intents = Bus::new();
        let session = build_session(config, deps, intents.clone())?;
        Ok(Self::new(session, &intents, navigator))
    }

    pub async fn connect(&self) -> Result<(), VoiceError> {
        self.session.connect().await
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    pub fn start_listening(&self) {
        self.session.start_listening();
    }

    pub fn stop_listening(&self) {
        self.session.stop_listening();
    }

    pub fn is_connected(&self) -> bool {
        self.session.state().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.subscribe()
    }

    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.session.transitions()
    }

    /// Application events re-published from filter and select intents.
    pub fn subscribe_events(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    pub async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        self.session.speak(text).await
    }

    /// Disconnects the session and stops routing intents.
    pub async fn shutdown(mut self) {
        self.session.disconnect().await;
        self.disconnected = true;
        self.router.abort();
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.router.abort();
        if self.disconnected {
            return;
        }
        // Dropping the owner releases the microphone and transport as well.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let session = self.session.clone();
                handle.spawn(async move { session.disconnect().await });
            }
            Err(_) => warn!("Session context dropped outside a runtime; session left connected"),
        }
    }
}
