//! Intents the remote agent can ask the application to carry out.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Opaque parameters attached to filter/select intents.
pub type IntentParams = serde_json::Map<String, serde_json::Value>;

/// The fixed set of destinations a navigate intent can reach.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NavTarget {
    Squad,
    Fixtures,
    Tables,
}

impl NavTarget {
    pub const ALL: [NavTarget; 3] = [NavTarget::Squad, NavTarget::Fixtures, NavTarget::Tables];

    pub fn as_str(&self) -> &'static str {
        match self {
            NavTarget::Squad => "squad",
            NavTarget::Fixtures => "fixtures",
            NavTarget::Tables => "tables",
        }
    }

    /// Application route for this destination.
    pub fn path(&self) -> &'static str {
        match self {
            NavTarget::Squad => "/squad",
            NavTarget::Fixtures => "/fixtures",
            NavTarget::Tables => "/tables",
        }
    }
}

impl fmt::Display for NavTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown navigation target: {0}")]
pub struct UnknownTarget(pub String);

impl FromStr for NavTarget {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NavTarget::ALL
            .into_iter()
            .find(|target| target.as_str() == s)
            .ok_or_else(|| UnknownTarget(s.to_string()))
    }
}

/// A request from the agent, consumed once by the intent router.
///
/// On the wire this is `{ "action": "navigate" | "filter" | "select", "target"?, "params"? }`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Intent {
    Navigate {
        target: NavTarget,
    },
    Filter {
        #[serde(default)]
        params: IntentParams,
    },
    Select {
        #[serde(default)]
        params: IntentParams,
    },
}

impl Intent {
    pub fn navigate(target: NavTarget) -> Self {
        Intent::Navigate { target }
    }
}

/// Best-effort intent extraction from free agent text.
///
/// Matches a small fixed keyword set, case-sensitively, in priority order.
/// Only used until the agent sends a structured `intent` message.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntentExtractor;

impl KeywordIntentExtractor {
    const KEYWORDS: [(&'static str, NavTarget); 3] = [
        ("squad", NavTarget::Squad),
        ("fixtures", NavTarget::Fixtures),
        ("tables", NavTarget::Tables),
    ];

    pub fn extract(&self, text: &str) -> Option<Intent> {
        Self::KEYWORDS
            .iter()
            .find(|(keyword, _)| text.contains(keyword))
            .map(|(_, target)| Intent::navigate(*target))
    }
}
