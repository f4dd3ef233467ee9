mod logging;
mod presenter;

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use copilot_completion::auth::{
    self, AuthPresenter, DeviceAuthFlow, GithubDeviceAuthApi, HeadlessPresenter,
};
use copilot_completion::utils::http_utils::HttpClients;
use copilot_completion::{
    CompletionModel, CompletionRequest, Config, CopilotCompleter, CredentialStore,
    FileCredentialStore,
};
use log::debug;

use crate::logging::init_logging;
use crate::presenter::ConsolePresenter;

#[derive(Parser)]
#[command(name = "copilot-completion")]
#[command(about = "GitHub Copilot inline completions from the command line")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    /// Settings file holding the GitHub credential
    #[arg(long, env = "COPILOT_SETTINGS")]
    settings: Option<PathBuf>,

    /// TOML config file (defaults to ./config.toml); environment still overrides it
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with the GitHub device flow
    Login {
        /// Only print the code; do not open a browser or touch the clipboard
        #[arg(long)]
        no_browser: bool,
    },
    /// Forget the stored credential
    Logout,
    /// Show whether a credential is stored
    Status,
    /// Complete a markdown prefix (reads stdin when PREFIX is omitted)
    Complete {
        prefix: Option<String>,

        #[arg(long, default_value = "")]
        suffix: String,

        #[arg(long, default_value_t = 100)]
        max_tokens: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?
            .with_env_overrides(),
        None => Config::new(),
    };
    let store: Arc<dyn CredentialStore> = Arc::new(match cli.settings {
        Some(path) => FileCredentialStore::new(path),
        None => FileCredentialStore::default(),
    });
    debug!(
        "Endpoints: login={} api={} completions={}",
        config.github_login_base_url, config.github_api_base_url, config.completions_base_url
    );

    match cli.command {
        Commands::Login { no_browser } => login(&config, store.as_ref(), no_browser).await,
        Commands::Logout => {
            auth::logout(store.as_ref())?;
            println!("Signed out of GitHub Copilot.");
            Ok(())
        }
        Commands::Status => {
            if auth::is_logged_in(store.as_ref()) {
                println!("{}", "Signed in to GitHub Copilot.".green());
            } else {
                println!("{}", "Not signed in. Run `copilot-completion login`.".yellow());
            }
            Ok(())
        }
        Commands::Complete {
            prefix,
            suffix,
            max_tokens,
        } => complete(config, store, prefix, suffix, max_tokens).await,
    }
}

async fn login(config: &Config, store: &dyn CredentialStore, no_browser: bool) -> anyhow::Result<()> {
    let clients = HttpClients::from_config(config)?;
    let api = GithubDeviceAuthApi::new(clients.plain, config.github_login_base_url.clone());
    let presenter: Arc<dyn AuthPresenter> = if config.headless_auth {
        Arc::new(HeadlessPresenter)
    } else {
        Arc::new(ConsolePresenter::new(!no_browser))
    };
    let flow = DeviceAuthFlow::new(Arc::new(api), presenter);

    let cancel = flow.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    auth::login(&flow, store).await?;
    println!("{}", "Signed in to GitHub Copilot.".green());
    Ok(())
}

async fn complete(
    config: Config,
    store: Arc<dyn CredentialStore>,
    prefix: Option<String>,
    suffix: String,
    max_tokens: u32,
) -> anyhow::Result<()> {
    if !auth::is_logged_in(store.as_ref()) {
        anyhow::bail!("Not signed in. Run `copilot-completion login` first.");
    }

    let prefix = match prefix {
        Some(prefix) => prefix,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read prefix from stdin")?;
            buffer
        }
    };

    let completer = CopilotCompleter::new(config);
    let model = completer
        .get_models(store)?
        .pop()
        .context("No Copilot model available")?;
    debug!("Completing with {}", model.id());

    let request = CompletionRequest::new(prefix)
        .with_suffix(suffix)
        .with_max_tokens(max_tokens);
    println!("{}", model.complete_request(&request).await);
    Ok(())
}
