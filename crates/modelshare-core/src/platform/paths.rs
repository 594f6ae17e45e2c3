//! Storage root discovery for each runtime and the central store.
//!
//! No single canonical path exists for either runtime across operating systems
//! and installation methods, so each runtime gets an ordered candidate list.
//!
//! # Platform Behavior
//! - **Linux**: Ollama `~/.ollama/models`, then the system service locations
//!   `/usr/share/ollama/.ollama/models` and `/var/lib/ollama/.ollama/models`
//! - **macOS**: Ollama `~/.ollama/models`
//! - **Windows**: Ollama `%USERPROFILE%\.ollama\models`, then
//!   `%LOCALAPPDATA%\Ollama\models`
//! - **All**: LM Studio `~/.lmstudio/models`, then `~/.cache/lm-studio/models`

use crate::config::{ModelShareConfig, RuntimeId, StoreConfig};
use crate::error::{ModelShareError, Result};
use crate::storage::StorageBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ordered candidate storage roots for a runtime.
///
/// A configured override is the only candidate when present.
pub fn candidate_roots(runtime: RuntimeId, config: &ModelShareConfig) -> Vec<PathBuf> {
    if let Some(root) = &config.runtime(runtime).storage_root {
        return vec![root.clone()];
    }
    platform_candidates(runtime, dirs::home_dir().as_deref())
}

fn platform_candidates(runtime: RuntimeId, home: Option<&Path>) -> Vec<PathBuf> {
    let mut roots = Vec::new();

    match runtime {
        RuntimeId::Ollama => {
            if let Some(home) = home {
                roots.push(home.join(".ollama").join("models"));
            }

            #[cfg(target_os = "linux")]
            {
                roots.push(PathBuf::from("/usr/share/ollama/.ollama/models"));
                roots.push(PathBuf::from("/var/lib/ollama/.ollama/models"));
            }

            #[cfg(target_os = "windows")]
            {
                if let Some(local) = dirs::data_local_dir() {
                    roots.push(local.join("Ollama").join("models"));
                }
            }
        }
        RuntimeId::LmStudio => {
            if let Some(home) = home {
                roots.push(home.join(".lmstudio").join("models"));
                roots.push(home.join(".cache").join("lm-studio").join("models"));
            }
        }
    }

    roots
}

/// Default central store: `<platform data dir>/modelshare/models`.
pub fn central_store_default() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| ModelShareError::Config {
        message: "Could not determine platform data directory".to_string(),
    })?;
    Ok(data_dir
        .join(StoreConfig::APP_DIR_NAME)
        .join(StoreConfig::MODELS_DIR_NAME))
}

/// Sibling backup location for a runtime directory (`<path>.backup`).
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(StoreConfig::BACKUP_SUFFIX);
    path.with_file_name(name)
}

/// Resolves runtime and central store locations against a storage backend.
///
/// Only performs existence checks; never creates directories.
#[derive(Debug, Clone)]
pub struct PathResolver {
    config: Arc<ModelShareConfig>,
    storage: Arc<dyn StorageBackend>,
}

impl PathResolver {
    pub fn new(config: Arc<ModelShareConfig>, storage: Arc<dyn StorageBackend>) -> Self {
        Self { config, storage }
    }

    pub fn config(&self) -> &ModelShareConfig {
        &self.config
    }

    pub fn candidate_roots(&self, runtime: RuntimeId) -> Vec<PathBuf> {
        candidate_roots(runtime, &self.config)
    }

    /// First candidate that exists, else the first candidate.
    pub fn default_root(&self, runtime: RuntimeId) -> Option<PathBuf> {
        let candidates = self.candidate_roots(runtime);
        candidates
            .iter()
            .find(|p| self.storage.exists(p))
            .or_else(|| candidates.first())
            .cloned()
    }

    /// Root used for link redirection.
    ///
    /// Unlike [`default_root`](Self::default_root) this also matches a
    /// candidate whose directory was moved aside to a backup, so an
    /// interrupted configure run is found again.
    pub fn redirect_root(&self, runtime: RuntimeId) -> Option<PathBuf> {
        let candidates = self.candidate_roots(runtime);
        candidates
            .iter()
            .find(|p| self.storage.entry_exists(p) || self.storage.entry_exists(&backup_path(p)))
            .or_else(|| candidates.first())
            .cloned()
    }

    /// Configured central store, else the platform default.
    pub fn central_store_root(&self) -> Result<PathBuf> {
        match &self.config.central_store {
            Some(path) => Ok(path.clone()),
            None => central_store_default(),
        }
    }
}
