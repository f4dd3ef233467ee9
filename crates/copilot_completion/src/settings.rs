use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Long-lived GitHub credential obtained through the device flow.
/// An empty `api_key` means "not logged in".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub api_key: String,
}

impl Credential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Credential {
            api_key: api_key.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_empty()
    }

    pub fn to_settings_string(&self) -> String {
        serde_json::json!({ "api_key": self.api_key }).to_string()
    }
}

/// Reads provider settings as stored by the host. Never fails: a missing
/// document, invalid JSON or a non-string `api_key` all yield an empty
/// credential.
pub fn parse_settings(data: Option<&str>) -> Credential {
    let Some(data) = data else {
        return Credential::default();
    };
    serde_json::from_str::<Credential>(data).unwrap_or_default()
}

/// Settings storage owned by the host application.
pub trait CredentialStore: Send + Sync {
    fn read_credential(&self) -> Credential;

    fn persist_credential(&self, credential: &Credential) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Credential>,
}

impl MemoryCredentialStore {
    pub fn new(credential: Credential) -> Self {
        MemoryCredentialStore {
            credential: RwLock::new(credential),
        }
    }

    pub fn from_settings(settings: Option<&str>) -> Self {
        Self::new(parse_settings(settings))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn read_credential(&self) -> Credential {
        match self.credential.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn persist_credential(&self, credential: &Credential) -> anyhow::Result<()> {
        let mut guard = match self.credential.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = credential.clone();
        Ok(())
    }
}

/// Settings document on disk, `{"api_key": "..."}`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCredentialStore { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".copilot-completion")
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileCredentialStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl CredentialStore for FileCredentialStore {
    fn read_credential(&self) -> Credential {
        let content = std::fs::read_to_string(&self.path).ok();
        parse_settings(content.as_deref())
    }

    fn persist_credential(&self, credential: &Credential) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, credential.to_settings_string())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(&self.path, perms) {
                log::warn!("Failed to restrict permissions on {:?}: {e}", self.path);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_settings_degrades_to_empty() {
        assert_eq!(parse_settings(None), Credential::default());
        assert_eq!(parse_settings(Some("not json")), Credential::default());
        assert_eq!(parse_settings(Some(r#"{"api_key": 42}"#)), Credential::default());
        assert_eq!(parse_settings(Some("{}")), Credential::default());
    }

    #[test]
    fn parse_settings_reads_api_key() {
        assert_eq!(
            parse_settings(Some(r#"{"api_key":"x"}"#)),
            Credential::new("x")
        );
    }

    #[test]
    fn settings_string_parses_back() {
        let credential = Credential::new("gho_abc\"quoted");
        assert_eq!(
            parse_settings(Some(&credential.to_settings_string())),
            credential
        );
    }

    #[test]
    fn memory_store_replaces_credential_wholesale() {
        let store = MemoryCredentialStore::from_settings(Some(r#"{"api_key":"old"}"#));
        assert_eq!(store.read_credential().api_key, "old");

        store
            .persist_credential(&Credential::new("new"))
            .expect("persist");
        assert_eq!(store.read_credential().api_key, "new");
    }

    #[test]
    fn file_store_missing_file_is_logged_out() {
        let dir = tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join("settings.json"));
        assert!(store.read_credential().is_empty());
    }

    #[test]
    fn file_store_persists_and_creates_parent() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.json");
        let store = FileCredentialStore::new(&path);

        store
            .persist_credential(&Credential::new("gho_token"))
            .expect("persist");

        assert!(path.exists());
        assert_eq!(store.read_credential(), Credential::new("gho_token"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
