//! Matchday voice transport client.
//!
//! Connects the dashboard to a remote conversational agent, either over a
//! realtime peer-to-peer audio session negotiated through a signaling channel
//! or through the request/response speech fallback. Hosts own a
//! [`SessionContext`], which drives one [`SpeechSession`] and routes the
//! agent's intents back into the application.

pub mod audio;
pub mod config;
pub mod context;
pub mod error;
pub mod media;
pub mod native;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod sink;
pub mod speech;
pub mod token;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, IceServer, TransportMode, VoiceConfig};
pub use context::{IntentRouter, SessionContext};
pub use error::VoiceError;
pub use session::{SessionDeps, SpeechSession, build_session};
pub use signaling::WsSignalingConnector;
pub use sink::{AudioOutput, AudioSink};
pub use speech::HttpSpeechClient;
pub use token::{HttpTokenClient, TokenGrant};
