//! Typed publish/subscribe between the voice session and the application.

use crate::intent::{IntentParams, NavTarget};
use tokio::sync::broadcast;
use tracing::trace;

const BUS_CAPACITY: usize = 32;

/// Application events re-broadcast from agent intents for UI fragments.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Filter(IntentParams),
    Select(IntentParams),
}

/// Performs a full navigation to one of the application's destinations.
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: NavTarget);
}

/// A fire-and-forget broadcast bus.
///
/// Every subscriber gets its own copy of each message. There is no
/// acknowledgement and no ordering guarantee across subscribers; a subscriber
/// that falls too far behind skips the oldest messages.
#[derive(Debug, Clone)]
pub struct Bus<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Bus<T> {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes `message`, returning how many subscribers will see it.
    pub fn publish(&self, message: T) -> usize {
        match self.tx.send(message) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("Bus message published with no subscribers.");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
