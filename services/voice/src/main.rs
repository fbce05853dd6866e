//! Headless voice assistant host.
//!
//! Owns one `SessionContext`, connects it, logs every state transition and
//! routed intent, and disconnects on Ctrl+C.

#[cfg(not(feature = "audio-io"))]
mod output;

use anyhow::Context;
use clap::Parser;
use matchday_core::{NavTarget, Navigator, SessionStatus};
use matchday_voice::{
    AudioOutput, HttpSpeechClient, HttpTokenClient, SessionContext, SessionDeps, TransportMode,
    VoiceConfig, WsSignalingConnector, media::MediaDeps,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Talk to the Matchday voice agent from a terminal")]
struct Args {
    /// Overrides VOICE_TRANSPORT (`webrtc` or `rest`).
    #[arg(long)]
    transport: Option<TransportMode>,

    /// Text to speak once connected (fallback transport only).
    #[arg(long)]
    say: Option<String>,

    /// Start with the microphone muted.
    #[arg(long)]
    muted: bool,
}

/// Stands in for the dashboard shell: navigation requests are logged.
struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn navigate(&self, target: NavTarget) {
        info!(path = target.path(), "Agent requested navigation");
    }
}

fn audio_output() -> anyhow::Result<Arc<dyn AudioOutput>> {
    #[cfg(feature = "audio-io")]
    {
        let output = matchday_voice::native::RodioOutput::new()
            .context("Failed to start audio output")?;
        Ok(Arc::new(output))
    }
    #[cfg(not(feature = "audio-io"))]
    {
        warn!("Built without audio-io; agent audio will not be rendered");
        Ok(Arc::new(output::SilentOutput))
    }
}

fn media_deps() -> Option<MediaDeps> {
    #[cfg(all(feature = "webrtc", feature = "audio-io"))]
    {
        Some(matchday_voice::native::media_deps())
    }
    #[cfg(not(all(feature = "webrtc", feature = "audio-io")))]
    {
        None
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let args = Args::parse();
    let mut config = VoiceConfig::from_env().context("Failed to load voice configuration")?;
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    info!(
        transport = ?config.transport,
        api = %config.api_base_url,
        "Voice configuration loaded"
    );

    let deps = SessionDeps {
        tokens: Arc::new(HttpTokenClient::new(&config)),
        speech: Arc::new(HttpSpeechClient::new(&config)),
        signaling: Arc::new(WsSignalingConnector),
        output: audio_output()?,
        media: media_deps(),
    };
    let context = SessionContext::from_config(config, deps, Arc::new(LoggingNavigator))
        .context("Failed to build voice session")?;

    let mut transitions = context.transitions();
    let mut events = context.subscribe_events();

    if let Err(e) = context.connect().await {
        context.shutdown().await;
        return Err(e).context("Failed to connect voice session");
    }
    if args.muted {
        context.stop_listening();
    }
    if let Some(text) = args.say.as_deref() {
        if let Err(e) = context.speak(text).await {
            warn!(error = %e, "Could not speak the requested text");
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received shutdown signal. Disconnecting...");
                break;
            }
            transition = transitions.recv() => match transition {
                Ok(state) => {
                    info!(
                        status = ?state.status,
                        agent_id = ?state.agent_id,
                        listening = state.is_listening,
                        speaking = state.is_speaking,
                        "Voice state changed"
                    );
                    if matches!(state.status, SessionStatus::Disconnected | SessionStatus::Error) {
                        warn!(status = ?state.status, "Voice session ended");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed state transitions"),
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => info!(?event, "Application event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed application events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    context.shutdown().await;
    info!("Voice session closed.");
    Ok(())
}
