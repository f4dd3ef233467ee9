use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::auth::{GithubTokenExchanger, RefreshGeneration, SessionTokenRefresher};
use crate::client_trait::CompletionModel;
use crate::config::Config;
use crate::settings::CredentialStore;
use crate::utils::http_utils::HttpClients;

use super::client::{CompletionClient, CompletionRequest};

pub const COMPLETER_ID: &str = "githubcopilot";
pub const COMPLETER_NAME: &str = "GitHub Copilot";
pub const COMPLETER_DESCRIPTION: &str =
    "Inline markdown completions from GitHub Copilot. Sign in with a GitHub account that has Copilot access.";

/// A Copilot-backed model. Creating one starts its session token refresh
/// loop; dropping it stops the loop unless a newer model has taken over.
pub struct CopilotModel {
    id: String,
    name: String,
    description: String,
    refresher: SessionTokenRefresher,
    client: CompletionClient,
    instance: u64,
}

impl CopilotModel {
    /// Must be called from within a tokio runtime.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        config: &Config,
        credentials: Arc<dyn CredentialStore>,
        generation: RefreshGeneration,
    ) -> anyhow::Result<Self> {
        let clients = HttpClients::from_config(config)?;
        let exchanger = Arc::new(GithubTokenExchanger::new(
            clients.retrying.clone(),
            config.github_api_base_url.clone(),
        ));
        let refresher =
            SessionTokenRefresher::new(exchanger, credentials).with_generation(generation);
        // Completion POSTs are never retried.
        let client = CompletionClient::new(
            clients.plain,
            config.completions_base_url.clone(),
            refresher.clone(),
        );
        let instance = refresher.start();

        Ok(CopilotModel {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            refresher,
            client,
            instance,
        })
    }

    pub fn refresher(&self) -> &SessionTokenRefresher {
        &self.refresher
    }

    pub async fn complete_request(&self, request: &CompletionRequest) -> String {
        self.client.complete(request).await
    }
}

#[async_trait]
impl CompletionModel for CopilotModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn complete(&self, prompt: &str) -> String {
        self.client.complete(&CompletionRequest::new(prompt)).await
    }
}

impl Drop for CopilotModel {
    fn drop(&mut self) {
        if self.refresher.is_current_instance(self.instance) {
            debug!("Stopping session token refresher #{}", self.instance);
            self.refresher.stop();
        }
    }
}

/// Provider entry point. Every model it hands out shares one refresh
/// generation, so only the newest model keeps refreshing.
pub struct CopilotCompleter {
    config: Config,
    generation: RefreshGeneration,
}

impl CopilotCompleter {
    pub fn new(config: Config) -> Self {
        CopilotCompleter {
            config,
            generation: RefreshGeneration::new(),
        }
    }

    pub fn id(&self) -> &str {
        COMPLETER_ID
    }

    pub fn name(&self) -> &str {
        COMPLETER_NAME
    }

    pub fn description(&self) -> &str {
        COMPLETER_DESCRIPTION
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds the provider's single model. Must be called from within a
    /// tokio runtime.
    pub fn get_models(
        &self,
        credentials: Arc<dyn CredentialStore>,
    ) -> anyhow::Result<Vec<CopilotModel>> {
        let model = CopilotModel::new(
            COMPLETER_ID,
            COMPLETER_NAME,
            COMPLETER_DESCRIPTION,
            &self.config,
            credentials,
            self.generation.clone(),
        )?;
        info!("Created Copilot model with refresher #{}", model.instance);
        Ok(vec![model])
    }
}
