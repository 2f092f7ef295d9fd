//! Upstream Session Types
//!
//! Authentication context required to open the upstream streaming channel,
//! the connector's lifecycle states, and the errors raised while acquiring
//! or resolving a session.
//!
//! # Invariant
//!
//! A [`SessionState`] can only be built from non-empty tokens and a
//! non-empty instrument identifier, so a connector holding one never opens
//! a stream with missing credentials.

use chrono::{DateTime, Utc};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while authenticating with the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The upstream rejected the credentials or the request.
    #[error("authentication rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code returned by the upstream.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// A required session token was absent or empty.
    #[error("missing session token: {0}")]
    MissingToken(&'static str),

    /// The request could not be completed.
    #[error("authentication request failed: {0}")]
    Transport(String),
}

/// Errors raised while resolving the instrument identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No search term produced an eligible instrument.
    #[error("no streaming-eligible instrument found for search terms {terms:?}")]
    NotFound {
        /// Search terms that were tried, in order.
        terms: Vec<String>,
    },

    /// The instrument identifier was empty.
    #[error("instrument identifier cannot be empty")]
    EmptyIdentifier,

    /// A search request failed.
    #[error("instrument search failed: {0}")]
    Request(String),
}

/// Any failure while establishing or using an upstream session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Instrument resolution failed.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// An authenticated request failed.
    #[error("upstream request failed: {0}")]
    Request(String),
}

// =============================================================================
// Session Tokens
// =============================================================================

/// The two opaque tokens returned by upstream authentication.
///
/// The `Debug` implementation redacts both values for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    cst: String,
    security_token: String,
}

impl SessionTokens {
    /// Create a token pair.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingToken` if either token is empty.
    pub fn new(cst: impl Into<String>, security_token: impl Into<String>) -> Result<Self, AuthError> {
        let cst = cst.into();
        let security_token = security_token.into();

        if cst.is_empty() {
            return Err(AuthError::MissingToken("CST"));
        }
        if security_token.is_empty() {
            return Err(AuthError::MissingToken("X-SECURITY-TOKEN"));
        }

        Ok(Self {
            cst,
            security_token,
        })
    }

    /// Client session token.
    #[must_use]
    pub fn cst(&self) -> &str {
        &self.cst
    }

    /// Account security token.
    #[must_use]
    pub fn security_token(&self) -> &str {
        &self.security_token
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("cst", &"[REDACTED]")
            .field("security_token", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Complete upstream auth context: tokens plus the resolved instrument.
///
/// Replaced wholesale on every refresh; never merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    tokens: SessionTokens,
    epic: String,
    acquired_at: DateTime<Utc>,
}

impl SessionState {
    /// Create a session state.
    ///
    /// # Errors
    ///
    /// Returns `ResolutionError::EmptyIdentifier` if `epic` is empty.
    pub fn new(tokens: SessionTokens, epic: impl Into<String>) -> Result<Self, ResolutionError> {
        let epic = epic.into();
        if epic.trim().is_empty() {
            return Err(ResolutionError::EmptyIdentifier);
        }

        Ok(Self {
            tokens,
            epic,
            acquired_at: Utc::now(),
        })
    }

    /// Session tokens.
    #[must_use]
    pub const fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    /// Resolved instrument identifier.
    #[must_use]
    pub fn epic(&self) -> &str {
        &self.epic
    }

    /// When the tokens were acquired.
    #[must_use]
    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Build the replacement state after a token refresh, keeping the instrument.
    #[must_use]
    pub fn refreshed(&self, tokens: SessionTokens) -> Self {
        Self {
            tokens,
            epic: self.epic.clone(),
            acquired_at: Utc::now(),
        }
    }
}

// =============================================================================
// Connector State
// =============================================================================

/// Lifecycle of the upstream connection.
///
/// `Disconnected → Connecting → Subscribed → Disconnected → Reconnecting → Connecting`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,
    /// Opening the transport and sending the subscription.
    Connecting,
    /// Subscription sent and stream open.
    Subscribed,
    /// Waiting out the reconnect delay.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether quotes can currently flow.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Subscribed)
    }
}
