//! Matchday voice domain.
//!
//! Transport-agnostic pieces shared by the voice client and its hosts: the
//! observable connection state, the intent model produced by the remote agent,
//! and the typed bus used to fan intents out to the rest of the application.

pub mod events;
pub mod intent;
pub mod state;

pub use events::{AppEvent, Bus, Navigator};
pub use intent::{Intent, IntentParams, KeywordIntentExtractor, NavTarget};
pub use state::{ConnectionState, SessionStatus, StateStore};
