pub mod api;
pub mod auth;
pub mod client_trait;
pub mod config;
pub mod error;
pub mod settings;
pub mod utils;

pub use api::client::{CompletionClient, CompletionRequest};
pub use api::model::{CopilotCompleter, CopilotModel};
pub use client_trait::CompletionModel;
pub use config::Config;
pub use error::{AuthError, CompletionError, TokenExchangeError};
pub use settings::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
