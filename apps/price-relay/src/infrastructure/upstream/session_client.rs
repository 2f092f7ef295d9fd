//! Upstream REST Session Client
//!
//! `reqwest` adapter for the [`SessionProvider`] port: login, instrument
//! search and client sentiment.
//!
//! # Endpoints
//!
//! - `POST {api}/session` with the API key header; tokens come back in the
//!   `CST` and `X-SECURITY-TOKEN` response headers
//! - `GET {api}/markets?searchTerm=<term>`
//! - `GET {api}/clientsentiment/{epic}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use super::messages::{MarketSearchResponse, MarketSummary, SentimentResponse, SessionRequest};
use crate::application::ports::SessionProvider;
use crate::domain::quote::Sentiment;
use crate::domain::session::{AuthError, ResolutionError, SessionError, SessionTokens};
use crate::infrastructure::config::{Credentials, UpstreamSettings};

/// API key request header.
pub const API_KEY_HEADER: &str = "X-CAP-API-KEY";

/// Client session token header.
pub const CST_HEADER: &str = "CST";

/// Account security token header.
pub const SECURITY_TOKEN_HEADER: &str = "X-SECURITY-TOKEN";

/// Configuration for the REST session client.
#[derive(Debug, Clone)]
pub struct SessionClientConfig {
    /// REST base URL without trailing slash.
    pub api_url: String,
    /// Account credentials.
    pub credentials: Credentials,
    /// Accept markets whose epic starts with this prefix regardless of streaming flag.
    pub epic_prefix: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl SessionClientConfig {
    /// Build from upstream settings.
    #[must_use]
    pub fn from_settings(settings: &UpstreamSettings, credentials: Credentials) -> Self {
        Self {
            api_url: settings.api_url.clone(),
            credentials,
            epic_prefix: settings.epic_prefix.clone(),
            timeout: settings.request_timeout,
        }
    }
}

/// REST client for the upstream session API.
#[derive(Debug, Clone)]
pub struct RestSessionClient {
    client: Client,
    config: SessionClientConfig,
}

impl RestSessionClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transport` if the HTTP client cannot be built.
    pub fn new(config: SessionClientConfig) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url)
    }

    fn authorized(&self, request: RequestBuilder, tokens: &SessionTokens) -> RequestBuilder {
        request
            .header(API_KEY_HEADER, self.config.credentials.api_key())
            .header(CST_HEADER, tokens.cst())
            .header(SECURITY_TOKEN_HEADER, tokens.security_token())
    }

    /// Whether a search result qualifies as the streamed instrument.
    fn is_eligible(&self, market: &MarketSummary) -> bool {
        match &self.config.epic_prefix {
            Some(prefix) => market.epic.starts_with(prefix.as_str()),
            None => market.streaming_prices_available,
        }
    }

    async fn search(
        &self,
        tokens: &SessionTokens,
        term: &str,
    ) -> Result<MarketSearchResponse, String> {
        let request = self
            .client
            .get(self.url("/markets"))
            .query(&[("searchTerm", term)]);
        let response = self
            .authorized(request, tokens)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        read_json(response).await
    }
}

#[async_trait]
impl SessionProvider for RestSessionClient {
    async fn acquire(&self) -> Result<SessionTokens, AuthError> {
        let body = SessionRequest {
            identifier: self.config.credentials.identifier(),
            password: self.config.credentials.password(),
            encrypted_password: false,
        };

        let response = self
            .client
            .post(self.url("/session"))
            .header(API_KEY_HEADER, self.config.credentials.api_key())
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let headers = response.headers();
        let cst = header_value(headers, CST_HEADER).ok_or(AuthError::MissingToken("CST"))?;
        let security_token = header_value(headers, SECURITY_TOKEN_HEADER)
            .ok_or(AuthError::MissingToken("X-SECURITY-TOKEN"))?;

        tracing::debug!("Upstream session acquired");
        SessionTokens::new(cst, security_token)
    }

    async fn resolve_instrument(
        &self,
        tokens: &SessionTokens,
        terms: &[String],
    ) -> Result<String, ResolutionError> {
        let mut last_error = None;

        for term in terms {
            match self.search(tokens, term).await {
                Ok(response) => {
                    if let Some(market) = response.markets.iter().find(|m| self.is_eligible(m)) {
                        tracing::info!(
                            term = %term,
                            epic = %market.epic,
                            name = market.instrument_name.as_deref().unwrap_or_default(),
                            "Instrument resolved"
                        );
                        return Ok(market.epic.clone());
                    }
                    tracing::debug!(
                        term = %term,
                        candidates = response.markets.len(),
                        "No eligible instrument for search term"
                    );
                }
                Err(e) => {
                    tracing::warn!(term = %term, error = %e, "Instrument search failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map_or_else(
            || ResolutionError::NotFound {
                terms: terms.to_vec(),
            },
            ResolutionError::Request,
        ))
    }

    async fn fetch_sentiment(
        &self,
        tokens: &SessionTokens,
        epic: &str,
    ) -> Result<Sentiment, SessionError> {
        let request = self.client.get(self.url(&format!("/clientsentiment/{epic}")));
        let response = self
            .authorized(request, tokens)
            .send()
            .await
            .map_err(|e| SessionError::Request(e.to_string()))?;

        let sentiment: SentimentResponse = read_json(response).await.map_err(SessionError::Request)?;
        Ok(sentiment.into())
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, String> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("HTTP {}: {body}", status.as_u16()));
    }
    response.json::<T>().await.map_err(|e| e.to_string())
}
