//! Copilot Authentication Module
//!
//! Device Code Flow:
//! 1. Get device code from github.com/login/device/code
//! 2. User authorizes at github.com/login/device
//! 3. Poll for access token (the long-lived credential)
//! 4. Persist it through the host's credential store
//!
//! Session tokens:
//! The credential is exchanged for a short-lived Copilot token by a
//! background refresh loop, see [`SessionTokenRefresher`].

pub mod device_flow;
pub mod session_token;

pub use device_flow::{
    AuthPresenter, DeviceAuthApi, DeviceAuthFlow, DeviceAuthSession, DeviceCodeResponse,
    GithubDeviceAuthApi, HeadlessPresenter, AUTH_TIMEOUT, POLL_INTERVAL,
};
pub use session_token::{
    GithubTokenExchanger, RefreshGeneration, SessionToken, SessionTokenRefresher, TokenExchanger,
    REFRESH_TOKEN_MINUTES,
};

use log::info;

use crate::error::AuthError;
use crate::settings::{Credential, CredentialStore};

/// Runs the device flow and stores the resulting credential.
pub async fn login(
    flow: &DeviceAuthFlow,
    store: &dyn CredentialStore,
) -> Result<Credential, AuthError> {
    let credential = flow.begin_auth().await?;
    store
        .persist_credential(&credential)
        .map_err(|e| AuthError::PersistFailed(e.to_string()))?;
    info!("Copilot credential stored");
    Ok(credential)
}

/// Replaces the stored credential with an empty one.
pub fn logout(store: &dyn CredentialStore) -> anyhow::Result<()> {
    store.persist_credential(&Credential::default())?;
    info!("Copilot credential removed");
    Ok(())
}

pub fn is_logged_in(store: &dyn CredentialStore) -> bool {
    !store.read_credential().is_empty()
}
