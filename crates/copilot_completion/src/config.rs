use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_GITHUB_LOGIN_BASE_URL: &str = "https://github.com";
pub const DEFAULT_GITHUB_API_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_COMPLETIONS_BASE_URL: &str = "https://copilot-proxy.githubusercontent.com";
/// Token exchange retries are opt-in; a failed exchange is retried on the
/// refresher's next tick.
pub const DEFAULT_MAX_RETRIES: u32 = 0;

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub http_proxy_auth: Option<ProxyAuth>,
    #[serde(default)]
    pub https_proxy_auth: Option<ProxyAuth>,
    #[serde(default = "default_login_base_url")]
    pub github_login_base_url: String,
    #[serde(default = "default_api_base_url")]
    pub github_api_base_url: String,
    #[serde(default = "default_completions_base_url")]
    pub completions_base_url: String,
    #[serde(default)]
    pub headless_auth: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

fn default_login_base_url() -> String {
    DEFAULT_GITHUB_LOGIN_BASE_URL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_GITHUB_API_BASE_URL.to_string()
}

fn default_completions_base_url() -> String {
    DEFAULT_COMPLETIONS_BASE_URL.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_proxy: String::new(),
            https_proxy: String::new(),
            http_proxy_auth: None,
            https_proxy_auth: None,
            github_login_base_url: default_login_base_url(),
            github_api_base_url: default_api_base_url(),
            completions_base_url: default_completions_base_url(),
            headless_auth: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Config {
    /// Built-in defaults, overlaid with `config.toml` from the working
    /// directory and then with environment variables.
    pub fn new() -> Self {
        Self::load(CONFIG_FILE_PATH)
    }

    /// Like [`Config::new`] with an explicit file. A missing file is skipped,
    /// an unreadable one is logged and skipped.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = Config::default();

        if path.exists() {
            match Self::from_file(path) {
                Ok(file_config) => config = file_config,
                Err(e) => log::warn!("Ignoring unreadable {}: {e}", path.display()),
            }
        }

        config.with_env_overrides()
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<Config>(&content)?)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(http_proxy) = std::env::var("HTTP_PROXY") {
            self.http_proxy = http_proxy;
        }
        if let Ok(https_proxy) = std::env::var("HTTPS_PROXY") {
            self.https_proxy = https_proxy;
        }
        if let Ok(login_base) = std::env::var("COPILOT_LOGIN_BASE") {
            self.github_login_base_url = login_base;
        }
        if let Ok(api_base) = std::env::var("COPILOT_API_BASE") {
            self.github_api_base_url = api_base;
        }
        if let Ok(completions_base) = std::env::var("COPILOT_COMPLETIONS_BASE") {
            self.completions_base_url = completions_base;
        }
        if let Ok(headless) = std::env::var("COPILOT_HEADLESS") {
            self.headless_auth = parse_bool_env(&headless);
        }
        self
    }
}
