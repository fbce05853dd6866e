use std::{str::FromStr, time::Duration};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_SIGNALING_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";
pub const DEFAULT_STUN_URLS: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_TURN_URLS: &str =
    "turn:openrelay.metered.ca:80,turn:openrelay.metered.ca:443,turns:openrelay.metered.ca:443";
pub const DEFAULT_TURN_USERNAME: &str = "openrelayproject";
pub const DEFAULT_TURN_CREDENTIAL: &str = "openrelayproject";
pub const DEFAULT_GREETING: &str = "Hello. I'm ready. Ask about squad, fixtures, or tables.";
pub const DEFAULT_SETUP_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_KEEPALIVE_SECS: u64 = 20;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Selects which `SpeechSession` implementation a client is built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Bidirectional audio over a negotiated peer connection.
    #[default]
    Realtime,
    /// Request/response speech synthesis only.
    Fallback,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "webrtc" | "realtime" => Ok(TransportMode::Realtime),
            "rest" | "fallback" => Ok(TransportMode::Fallback),
            other => Err(format!("'{}' is not a known transport (rest, webrtc)", other)),
        }
    }
}

/// One STUN or TURN resolver handed to the peer connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: None,
            credential: None,
        }
    }
}

/// Everything a voice client needs to reach the backend, the signaling
/// endpoint and the network resolvers.
#[derive(Clone, Debug)]
pub struct VoiceConfig {
    pub transport: TransportMode,
    pub api_base_url: String,
    /// Bearer credential for the trusted backend.
    pub api_token: Option<String>,
    pub signaling_url: String,
    /// STUN resolvers first, then the relay.
    pub ice_servers: Vec<IceServer>,
    pub voice_id: Option<String>,
    pub greeting: String,
    /// Upper bound for each awaited setup step of `connect()`.
    pub setup_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::Realtime,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: vec![
                IceServer::stun(split_list(DEFAULT_STUN_URLS)),
                IceServer {
                    urls: split_list(DEFAULT_TURN_URLS),
                    username: Some(DEFAULT_TURN_USERNAME.to_string()),
                    credential: Some(DEFAULT_TURN_CREDENTIAL.to_string()),
                },
            ],
            voice_id: None,
            greeting: DEFAULT_GREETING.to_string(),
            setup_timeout: Duration::from_secs(DEFAULT_SETUP_TIMEOUT_SECS),
            keepalive_interval: Some(Duration::from_secs(DEFAULT_KEEPALIVE_SECS)),
        }
    }
}

impl VoiceConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let transport_str = var_or("VOICE_TRANSPORT", "webrtc");
        let transport = transport_str
            .parse::<TransportMode>()
            .map_err(|e| ConfigError::InvalidValue("VOICE_TRANSPORT".to_string(), e))?;

        let api_base_url = var_or("VOICE_API_BASE_URL", DEFAULT_API_BASE_URL);
        check_url("VOICE_API_BASE_URL", &api_base_url, &["http", "https"])?;

        let signaling_url = var_or("VOICE_SIGNALING_URL", DEFAULT_SIGNALING_URL);
        check_url("VOICE_SIGNALING_URL", &signaling_url, &["ws", "wss"])?;

        let stun_urls = split_list(&var_or("VOICE_STUN_URLS", DEFAULT_STUN_URLS));
        if stun_urls.is_empty() {
            return Err(ConfigError::InvalidValue(
                "VOICE_STUN_URLS".to_string(),
                "at least one STUN resolver is required".to_string(),
            ));
        }

        let mut ice_servers = vec![IceServer::stun(stun_urls)];
        let turn_urls = split_list(&var_or("VOICE_TURN_URLS", DEFAULT_TURN_URLS));
        if !turn_urls.is_empty() {
            ice_servers.push(IceServer {
                urls: turn_urls,
                username: Some(var_or("VOICE_TURN_USERNAME", DEFAULT_TURN_USERNAME)),
                credential: Some(var_or("VOICE_TURN_CREDENTIAL", DEFAULT_TURN_CREDENTIAL)),
            });
        }

        let setup_secs = parse_secs("VOICE_SETUP_TIMEOUT_SECS", DEFAULT_SETUP_TIMEOUT_SECS)?;
        if setup_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "VOICE_SETUP_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let keepalive_secs = parse_secs("VOICE_KEEPALIVE_SECS", DEFAULT_KEEPALIVE_SECS)?;

        Ok(Self {
            transport,
            api_base_url,
            api_token: std::env::var("VOICE_API_TOKEN").ok().filter(|v| !v.is_empty()),
            signaling_url,
            ice_servers,
            voice_id: std::env::var("VOICE_VOICE_ID").ok().filter(|v| !v.is_empty()),
            greeting: var_or("VOICE_GREETING", DEFAULT_GREETING),
            setup_timeout: Duration::from_secs(setup_secs),
            keepalive_interval: (keepalive_secs > 0).then(|| Duration::from_secs(keepalive_secs)),
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_secs(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a whole number of seconds", raw),
            )
        }),
        Err(_) => Ok(default),
    }
}

fn check_url(name: &str, raw: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("scheme must be one of {:?}", schemes),
        ));
    }
    Ok(())
}
