use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;

use crate::error::{ProxyAuthRequiredError, TokenExchangeError};
use crate::settings::{Credential, CredentialStore};
use crate::utils::http_utils::editor_headers;

pub const REFRESH_TOKEN_MINUTES: u64 = 10;

/// Short-lived Copilot token used as bearer credential on completion calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub value: String,
    pub obtained_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        SessionToken {
            value: value.into(),
            obtained_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CopilotTokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<u64>,
    #[serde(default)]
    refresh_in: Option<u64>,
}

/// Exchanges the long-lived credential for a session token.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, credential: &Credential) -> Result<SessionToken, TokenExchangeError>;
}

#[derive(Debug, Clone)]
pub struct GithubTokenExchanger {
    client: Arc<ClientWithMiddleware>,
    api_base_url: String,
}

impl GithubTokenExchanger {
    pub fn new(client: Arc<ClientWithMiddleware>, api_base_url: impl Into<String>) -> Self {
        GithubTokenExchanger {
            client,
            api_base_url: api_base_url.into(),
        }
    }
}

#[async_trait]
impl TokenExchanger for GithubTokenExchanger {
    async fn exchange(&self, credential: &Credential) -> Result<SessionToken, TokenExchangeError> {
        let url = format!(
            "{}/copilot_internal/v2/token",
            self.api_base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(url)
            .headers(editor_headers())
            .header("authorization", format!("token {}", credential.api_key))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(ProxyAuthRequiredError.into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenExchangeError::Status { status, body });
        }

        let body = response.bytes().await?;
        let parsed = serde_json::from_slice::<CopilotTokenResponse>(&body)?;
        debug!(
            "Copilot token received (expires_at={:?}, refresh_in={:?})",
            parsed.expires_at, parsed.refresh_in
        );
        Ok(SessionToken::new(parsed.token))
    }
}

/// Generation counter shared by everything that may spawn a refresh loop for
/// the same logical session. Claiming a new id invalidates all older ones.
#[derive(Debug, Clone, Default)]
pub struct RefreshGeneration(Arc<AtomicU64>);

impl RefreshGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Keeps a session token fresh in the background.
///
/// Only the loop holding the most recently claimed instance id may write the
/// token; older loops notice on their next tick and exit.
#[derive(Clone)]
pub struct SessionTokenRefresher {
    exchanger: Arc<dyn TokenExchanger>,
    credentials: Arc<dyn CredentialStore>,
    token: Arc<RwLock<Option<SessionToken>>>,
    generation: RefreshGeneration,
    refresh_interval: Duration,
    /// Instance id of the last loop spawned by this refresher, 0 if none.
    started: Arc<AtomicU64>,
    /// Flips to `true` once that loop has finished its first attempt.
    first_attempt: Arc<watch::Sender<bool>>,
}

impl SessionTokenRefresher {
    pub fn new(exchanger: Arc<dyn TokenExchanger>, credentials: Arc<dyn CredentialStore>) -> Self {
        SessionTokenRefresher {
            exchanger,
            credentials,
            token: Arc::new(RwLock::new(None)),
            generation: RefreshGeneration::new(),
            refresh_interval: Duration::from_secs(REFRESH_TOKEN_MINUTES * 60),
            started: Arc::new(AtomicU64::new(0)),
            first_attempt: Arc::new(watch::channel(false).0),
        }
    }

    pub fn with_generation(mut self, generation: RefreshGeneration) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// Spawns the refresh loop and returns its instance id. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> u64 {
        let instance = self.generation.claim();
        self.started.store(instance, Ordering::SeqCst);
        self.first_attempt.send_replace(false);
        let this = self.clone();
        tokio::spawn(async move { this.run(instance).await });
        info!("Session token refresher #{instance} started");
        instance
    }

    pub fn is_current_instance(&self, instance: u64) -> bool {
        self.generation.current() == instance
    }

    /// Invalidates every running loop without starting a new one.
    pub fn stop(&self) {
        let retired = self.generation.claim();
        debug!("Session token refreshers before #{retired} retired");
    }

    pub async fn current_token(&self) -> Option<SessionToken> {
        self.token.read().await.clone()
    }

    /// One exchange on behalf of the current generation.
    pub async fn refresh_now(&self) -> Result<Option<SessionToken>, TokenExchangeError> {
        let instance = self.generation.current();
        self.refresh(instance).await?;
        Ok(self.current_token().await)
    }

    /// Cached token, or the outcome of the running loop's first attempt, or
    /// one exchange when no loop of this refresher is running.
    pub async fn ensure_token(&self) -> Result<Option<SessionToken>, TokenExchangeError> {
        if let Some(token) = self.current_token().await {
            return Ok(Some(token));
        }

        // Instance ids start at 1; 0 means this refresher never spawned a loop.
        let started = self.started.load(Ordering::SeqCst);
        if started != 0 && self.is_current_instance(started) {
            let mut first_attempt = self.first_attempt.subscribe();
            while !*first_attempt.borrow_and_update() {
                if first_attempt.changed().await.is_err() {
                    break;
                }
            }
            if let Some(token) = self.current_token().await {
                return Ok(Some(token));
            }
        }

        self.refresh_now().await
    }

    async fn run(self, instance: u64) {
        while self.is_current_instance(instance) {
            if let Err(e) = self.refresh(instance).await {
                warn!("Session token refresh #{instance} failed: {e}");
            }
            if self.is_current_instance(instance) {
                self.first_attempt.send_replace(true);
            }
            sleep(self.refresh_interval).await;
        }
        debug!("Session token refresher #{instance} superseded, exiting");
    }

    /// Returns whether the token was written.
    async fn refresh(&self, instance: u64) -> Result<bool, TokenExchangeError> {
        let credential = self.credentials.read_credential();
        let next = if credential.is_empty() {
            None
        } else {
            Some(self.exchanger.exchange(&credential).await?)
        };

        let mut guard = self.token.write().await;
        if !self.is_current_instance(instance) {
            return Ok(false);
        }
        *guard = next;
        Ok(true)
    }
}
