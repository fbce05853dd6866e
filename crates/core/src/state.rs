//! Connection state of a voice session and the store that owns it.

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tokio::sync::{broadcast, watch};

/// Buffered transitions per subscriber before it starts lagging.
const TRANSITION_BUFFER: usize = 64;

/// Lifecycle of a voice session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of a voice session as seen by the UI.
///
/// Values are never edited in place by observers: every change goes through
/// [`StateStore::update`], which swaps in a complete new value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: SessionStatus,
    /// Assigned by the token exchange, together with `conversation_id`.
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Local microphone capture is active.
    pub is_listening: bool,
    /// Remote or synthesized audio is currently rendering.
    pub is_speaking: bool,
}

impl ConnectionState {
    /// The shape a session starts in and returns to on disconnect.
    pub fn initial() -> Self {
        Self::default()
    }

    /// The initial shape with `status` set, used when a session ends.
    pub fn with_status(status: SessionStatus) -> Self {
        Self {
            status,
            ..Self::initial()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }

    /// Sets both session identifiers at once.
    pub fn set_session(&mut self, agent_id: impl Into<String>, conversation_id: impl Into<String>) {
        self.agent_id = Some(agent_id.into());
        self.conversation_id = Some(conversation_id.into());
    }
}

/// Owner of the current [`ConnectionState`].
///
/// Cloning the store yields another handle onto the same state. Readers can
/// either watch the latest value or subscribe to every transition in the
/// order it was applied.
#[derive(Clone)]
pub struct StateStore {
    latest: Arc<watch::Sender<ConnectionState>>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(ConnectionState::initial());
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            latest: Arc::new(latest),
            transitions,
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.latest.borrow().clone()
    }

    /// Watches the most recent state; intermediate values may be skipped.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.latest.subscribe()
    }

    /// Receives every replaced state, in order.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Applies `change` to a copy of the current state and swaps it in.
    ///
    /// Transition subscribers are notified while the write lock is held, so
    /// the order they observe matches the order updates were applied. An
    /// update that leaves the state unchanged is not published.
    pub fn update<F>(&self, change: F) -> ConnectionState
    where
        F: FnOnce(&mut ConnectionState),
    {
        let transitions = &self.transitions;
        let mut applied = None;
        self.latest.send_if_modified(|stored| {
            let mut next = stored.clone();
            change(&mut next);
            if next == *stored {
                applied = Some(next);
                return false;
            }
            *stored = next.clone();
            let _ = transitions.send(next.clone());
            applied = Some(next);
            true
        });
        applied.unwrap_or_else(|| self.current())
    }

    /// Returns the state to [`ConnectionState::initial`].
    pub fn reset(&self) -> ConnectionState {
        self.update(|state| *state = ConnectionState::initial())
    }
}
