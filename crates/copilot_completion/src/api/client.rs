use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, error, info};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;

use crate::auth::SessionTokenRefresher;
use crate::error::{CompletionError, ProxyAuthRequiredError};

use super::stream_parser::StreamParser;

const COMPLETIONS_PATH: &str = "/v1/engines/copilot-codex/completions";

pub const DEFAULT_MAX_TOKENS: u32 = 100;
pub const DEFAULT_TEMPERATURE: f32 = 0.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prefix: String,
    pub suffix: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prefix: impl Into<String>) -> Self {
        CompletionRequest {
            prefix: prefix.into(),
            suffix: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    prompt: &'a str,
    suffix: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: u32,
    n: u32,
    stop: [&'a str; 1],
    nwo: &'a str,
    stream: bool,
    extra: CompletionExtra<'a>,
}

#[derive(Debug, Serialize)]
struct CompletionExtra<'a> {
    language: &'a str,
}

impl<'a> From<&'a CompletionRequest> for CompletionBody<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        CompletionBody {
            prompt: &request.prefix,
            suffix: &request.suffix,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: 1,
            n: 1,
            stop: ["\n"],
            nwo: "github/copilot.vim",
            stream: true,
            extra: CompletionExtra {
                language: "markdown",
            },
        }
    }
}

/// Sends completion requests to the Copilot proxy with the refresher's
/// current session token.
#[derive(Clone)]
pub struct CompletionClient {
    client: Arc<ClientWithMiddleware>,
    completions_base_url: String,
    tokens: SessionTokenRefresher,
}

impl CompletionClient {
    pub fn new(
        client: Arc<ClientWithMiddleware>,
        completions_base_url: impl Into<String>,
        tokens: SessionTokenRefresher,
    ) -> Self {
        CompletionClient {
            client,
            completions_base_url: completions_base_url.into(),
            tokens,
        }
    }

    /// Fail-soft completion: any failure is logged and yields `""`.
    pub async fn complete(&self, request: &CompletionRequest) -> String {
        match self.try_complete(request).await {
            Ok(completion) => completion,
            Err(e) => {
                error!("Error fetching completions: {e}");
                String::new()
            }
        }
    }

    pub async fn try_complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let token = match self.tokens.current_token().await {
            Some(token) => token,
            None => {
                info!("No session token yet, waiting for the first exchange");
                self.tokens
                    .ensure_token()
                    .await?
                    .ok_or(CompletionError::NotAuthenticated)?
            }
        };

        let url = format!(
            "{}{}",
            self.completions_base_url.trim_end_matches('/'),
            COMPLETIONS_PATH
        );
        debug!(
            "Requesting completion: {} prefix chars, max_tokens={}",
            request.prefix.len(),
            request.max_tokens
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token.value))
            .header("Content-Type", "application/json")
            .json(&CompletionBody::from(request))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(ProxyAuthRequiredError.into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status { status, body });
        }

        let mut parser = StreamParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            parser.push(&chunk?);
        }
        Ok(parser.finish())
    }
}
