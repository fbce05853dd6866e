//! Shared Application State

use crate::{config::Config, upstream::VoiceProvider};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn VoiceProvider>,
    pub config: Arc<Config>,
}
