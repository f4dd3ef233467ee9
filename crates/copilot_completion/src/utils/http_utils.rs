use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Proxy};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::config::{Config, ProxyAuth};

pub const GITHUB_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
pub const EDITOR_VERSION: &str = "vscode/1.99.2";
pub const EDITOR_PLUGIN_VERSION: &str = "copilot.vim/1.16.0";
pub const USER_AGENT: &str = "GithubCopilot/1.155.0";
pub const ACCEPT_ENCODING: &str = "gzip,deflate,br";

fn apply_proxy_auth(proxy: Proxy, auth: Option<&ProxyAuth>) -> Proxy {
    let Some(auth) = auth else {
        return proxy;
    };
    if auth.username.is_empty() {
        return proxy;
    }
    proxy.basic_auth(&auth.username, &auth.password)
}

/// Headers GitHub expects from an editor plugin on every endpoint.
pub fn editor_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("editor-version", HeaderValue::from_static(EDITOR_VERSION));
    headers.insert(
        "editor-plugin-version",
        HeaderValue::from_static(EDITOR_PLUGIN_VERSION),
    );
    headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
    headers
}

/// Editor headers plus the JSON negotiation headers used by the login endpoints.
pub fn login_headers() -> HeaderMap {
    let mut headers = editor_headers();
    headers.insert("accept", HeaderValue::from_static("application/json"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("accept-encoding", HeaderValue::from_static(ACCEPT_ENCODING));
    headers
}

pub fn build_http_client(config: &Config) -> anyhow::Result<Client> {
    // Only the configured proxies apply; Config already folds in HTTP(S)_PROXY.
    let mut builder = Client::builder()
        .no_proxy()
        .default_headers(editor_headers());
    if !config.http_proxy.is_empty() {
        let mut proxy = Proxy::http(&config.http_proxy)?;
        proxy = apply_proxy_auth(proxy, config.http_proxy_auth.as_ref());
        builder = builder.proxy(proxy);
    }
    if !config.https_proxy.is_empty() {
        let mut proxy = Proxy::https(&config.https_proxy)?;
        proxy = apply_proxy_auth(proxy, config.https_proxy_auth.as_ref());
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| anyhow!("Failed to build HTTP client: {e}"))
}

/// Wraps `client` with transient-failure retries (5xx, connect errors).
pub fn build_retry_client(client: Client, max_retries: u32) -> ClientWithMiddleware {
    // Exponential backoff: 1s, 2s, 4s with jitter
    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(Duration::from_secs(1), Duration::from_secs(8))
        .build_with_max_retries(max_retries);

    ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

/// No retry layer: the device flow treats any request failure as final.
pub fn build_plain_client(client: Client) -> ClientWithMiddleware {
    ClientBuilder::new(client).build()
}

/// The pair of clients every component is built from.
#[derive(Debug, Clone)]
pub struct HttpClients {
    pub retrying: Arc<ClientWithMiddleware>,
    pub plain: Arc<ClientWithMiddleware>,
}

impl HttpClients {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = build_http_client(config)?;
        Ok(HttpClients {
            retrying: Arc::new(build_retry_client(client.clone(), config.max_retries)),
            plain: Arc::new(build_plain_client(client)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_headers_include_editor_identification() {
        let headers = login_headers();
        assert_eq!(headers["editor-version"], EDITOR_VERSION);
        assert_eq!(headers["editor-plugin-version"], EDITOR_PLUGIN_VERSION);
        assert_eq!(headers["user-agent"], USER_AGENT);
        assert_eq!(headers["accept"], "application/json");
        assert_eq!(headers["accept-encoding"], ACCEPT_ENCODING);
    }

    #[test]
    fn proxy_config_builds_clients() {
        let config = Config {
            https_proxy: "http://127.0.0.1:3128".to_string(),
            https_proxy_auth: Some(ProxyAuth {
                username: "user".to_string(),
                password: "secret".to_string(),
            }),
            ..Config::default()
        };
        assert!(HttpClients::from_config(&config).is_ok());
    }
}
