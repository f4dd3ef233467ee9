use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("proxy_auth_required")]
pub struct ProxyAuthRequiredError;

/// Errors that end a device authorization attempt. These are the only errors
/// the crate hands back to the initiating caller.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Device authorization request failed: {0}")]
    RequestFailed(String),

    #[error("No Copilot token received for {} minutes.", .0.as_secs() / 60)]
    Timeout(Duration),

    #[error("Device authorization cancelled")]
    Cancelled,

    #[error("Failed to persist credential: {0}")]
    PersistFailed(String),
}

impl AuthError {
    pub(crate) fn request(stage: &str, err: impl std::fmt::Display) -> Self {
        AuthError::RequestFailed(format!("{stage}: {err}"))
    }
}

/// A failed exchange of the long-lived credential for a session token.
/// The refresh loop logs it and tries again on the next tick.
#[derive(Debug, Error)]
pub enum TokenExchangeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest_middleware::Error),

    #[error("Token request failed: HTTP {status} - {body}")]
    Status { status: StatusCode, body: String },

    #[error("Malformed token response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    ProxyAuthRequired(#[from] ProxyAuthRequiredError),
}

impl From<reqwest::Error> for TokenExchangeError {
    fn from(err: reqwest::Error) -> Self {
        TokenExchangeError::Http(reqwest_middleware::Error::Reqwest(err))
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Not authenticated: no Copilot session token available")]
    NotAuthenticated,

    #[error("Session token exchange failed: {0}")]
    TokenExchange(#[from] TokenExchangeError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest_middleware::Error),

    #[error("Completion request failed: HTTP {status} - {body}")]
    Status { status: StatusCode, body: String },

    #[error("Stream error: {0}")]
    Stream(#[from] reqwest::Error),

    #[error(transparent)]
    ProxyAuthRequired(#[from] ProxyAuthRequiredError),
}

#[derive(Debug, Error)]
#[error("Malformed stream line {line:?}: {source}")]
pub struct MalformedStreamLine {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}
