//! Exchanges the trusted backend's credential for a short-lived conversation
//! token. The upstream provider key never reaches this client.

use crate::{config::VoiceConfig, error::TokenError};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

pub const TOKEN_PATH: &str = "/api/voice/token";

/// A conversation credential issued by the backend.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub token: String,
    pub conversation_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<TokenGrant, TokenError>;
}

/// Fetches tokens from the backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTokenClient {
    http: reqwest::Client,
    endpoint: String,
    bearer: Option<String>,
}

impl HttpTokenClient {
    pub fn new(config: &VoiceConfig) -> Self {
        Self::with_client(
            reqwest::Client::new(),
            &config.api_base_url,
            config.api_token.clone(),
        )
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, bearer: Option<String>) -> Self {
        Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), TOKEN_PATH),
            bearer,
        }
    }
}

#[async_trait]
impl TokenProvider for HttpTokenClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch_token(&self) -> Result<TokenGrant, TokenError> {
        let mut request = self.http.post(&self.endpoint);
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let grant = response.json::<TokenGrant>().await?;
        debug!(agent_id = %grant.agent_id, "Token exchange succeeded");
        Ok(grant)
    }
}
