//! Storage layout

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::errors::FleetError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::vault::generate_master_secret;

/// Where fleetd keeps its settings, master secret and logs
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// The agent's vault master secret
    pub fn vault_key_file(&self) -> File {
        File::new(self.base_dir.join("vault.key"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create the directories fleetd writes to
    pub async fn setup(&self) -> Result<(), FleetError> {
        Dir::new(self.base_dir.clone()).create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }

    /// Read the master secret, generating and persisting one on first use so
    /// that restarts derive the same vault key
    pub async fn load_or_create_master_secret(&self) -> Result<SecretString, FleetError> {
        let file = self.vault_key_file();
        if file.exists().await {
            let contents = file.read_string().await?;
            let secret = contents.trim();
            if secret.is_empty() {
                return Err(FleetError::ConfigError(format!(
                    "master secret file {} is empty",
                    file.path().display()
                )));
            }
            return Ok(SecretString::from(secret.to_string()));
        }

        let secret = generate_master_secret();
        file.write_private(secret.expose_secret().as_bytes()).await?;
        info!("Generated a new vault master secret at {}", file.path().display());
        Ok(secret)
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/fleetd");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fleetd");

        Self::new(base_dir)
    }
}
