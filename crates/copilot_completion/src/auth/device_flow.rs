use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, ProxyAuthRequiredError};
use crate::settings::Credential;
use crate::utils::http_utils::{login_headers, GITHUB_CLIENT_ID};

/// Fixed cadence between access token polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

/// State of one login attempt. Dropped when the attempt ends.
#[derive(Debug, Clone)]
pub struct DeviceAuthSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub started_at: Instant,
}

impl DeviceAuthSession {
    fn start(response: DeviceCodeResponse) -> Self {
        DeviceAuthSession {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_uri: response.verification_uri,
            started_at: Instant::now(),
        }
    }
}

/// UI side of the device flow.
pub trait AuthPresenter: Send + Sync {
    fn display_device_code(&self, verification_uri: &str, user_code: &str);

    fn notify_timeout(&self);
}

/// Prints the verification instructions to stdout and the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessPresenter;

impl AuthPresenter for HeadlessPresenter {
    fn display_device_code(&self, verification_uri: &str, user_code: &str) {
        let message = format!(
            "GitHub Device Authorization (headless)\nVerification URL: {verification_uri}\nUser Code: {user_code}\n"
        );
        println!("{message}");
        info!("{message}");
    }

    fn notify_timeout(&self) {
        let message = AuthError::Timeout(AUTH_TIMEOUT).to_string();
        println!("{message}");
        warn!("{message}");
    }
}

/// The two GitHub login endpoints the device flow talks to.
#[async_trait]
pub trait DeviceAuthApi: Send + Sync {
    async fn request_device_code(&self) -> Result<DeviceCodeResponse, AuthError>;

    /// `Ok(None)` while the user has not authorized yet.
    async fn poll_access_token(&self, device_code: &str) -> Result<Option<String>, AuthError>;
}

#[derive(Debug, Clone)]
pub struct GithubDeviceAuthApi {
    client: Arc<ClientWithMiddleware>,
    login_base_url: String,
    client_id: String,
}

impl GithubDeviceAuthApi {
    pub fn new(client: Arc<ClientWithMiddleware>, login_base_url: impl Into<String>) -> Self {
        GithubDeviceAuthApi {
            client,
            login_base_url: login_base_url.into(),
            client_id: GITHUB_CLIENT_ID.to_string(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    async fn post_login<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        stage: &str,
    ) -> Result<T, AuthError> {
        let url = format!("{}{}", self.login_base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .headers(login_headers())
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::request(stage, e))?;

        let status = response.status();
        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(AuthError::request(stage, ProxyAuthRequiredError));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AuthError::request(stage, format!("HTTP {status} - {text}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AuthError::request(stage, e))
    }
}

#[async_trait]
impl DeviceAuthApi for GithubDeviceAuthApi {
    async fn request_device_code(&self) -> Result<DeviceCodeResponse, AuthError> {
        let body = serde_json::json!({
            "client_id": self.client_id,
            "scope": "read:user",
        });
        self.post_login("/login/device/code", &body, "device code")
            .await
    }

    async fn poll_access_token(&self, device_code: &str) -> Result<Option<String>, AuthError> {
        let body = serde_json::json!({
            "client_id": self.client_id,
            "device_code": device_code,
            "grant_type": DEVICE_CODE_GRANT_TYPE,
        });
        let response: AccessTokenResponse = self
            .post_login("/login/oauth/access_token", &body, "access token poll")
            .await?;

        if let Some(error) = &response.error {
            debug!("Access token not ready yet: {error}");
        }
        Ok(response.access_token.filter(|token| !token.is_empty()))
    }
}

/// Runs the device authorization grant: request a code, show it, poll until
/// GitHub hands out an access token or the time budget runs out.
pub struct DeviceAuthFlow {
    api: Arc<dyn DeviceAuthApi>,
    presenter: Arc<dyn AuthPresenter>,
    poll_interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
}

impl DeviceAuthFlow {
    pub fn new(api: Arc<dyn DeviceAuthApi>, presenter: Arc<dyn AuthPresenter>) -> Self {
        DeviceAuthFlow {
            api,
            presenter,
            poll_interval: POLL_INTERVAL,
            timeout: AUTH_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts a running `begin_auth` with [`AuthError::Cancelled`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn begin_auth(&self) -> Result<Credential, AuthError> {
        let device_code = self.api.request_device_code().await?;
        let session = DeviceAuthSession::start(device_code);
        info!(
            "Device code issued, waiting for authorization at {}",
            session.verification_uri
        );
        self.presenter
            .display_device_code(&session.verification_uri, &session.user_code);

        match self.poll_until_authorized(&session).await {
            Ok(access_token) => {
                info!("Access token received");
                Ok(Credential::new(access_token))
            }
            Err(AuthError::Timeout(budget)) => {
                warn!("No access token after {budget:?}, giving up");
                self.presenter.notify_timeout();
                Err(AuthError::Timeout(budget))
            }
            Err(e) => Err(e),
        }
    }

    async fn poll_until_authorized(&self, session: &DeviceAuthSession) -> Result<String, AuthError> {
        let deadline = session.started_at + self.timeout;
        let mut attempts: u32 = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(AuthError::Timeout(self.timeout));
            }

            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
                _ = sleep(pause) => {}
            }
            if Instant::now() >= deadline {
                return Err(AuthError::Timeout(self.timeout));
            }

            attempts += 1;
            let poll = timeout_at(deadline, self.api.poll_access_token(&session.device_code));
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
                outcome = poll => outcome,
            };

            match outcome {
                Err(_elapsed) => return Err(AuthError::Timeout(self.timeout)),
                Ok(Ok(Some(access_token))) => {
                    debug!("Authorized after {attempts} poll(s)");
                    return Ok(access_token);
                }
                Ok(Ok(None)) => debug!("Authorization pending (poll {attempts})"),
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}
