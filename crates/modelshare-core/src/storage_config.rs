//! Redirects a runtime's storage directory to the central store.
//!
//! There is no persisted state. Every call re-derives the state from the
//! filesystem (is the path a link, does it point at the store, does a
//! backup exist), and each step of `configure`/`restore` can be retried
//! after an interruption.

use crate::config::RuntimeId;
use crate::error::{ModelShareError, Result};
use crate::model_library::CentralRegistry;
use crate::platform::{backup_path, PathResolver};
use crate::storage::{normalize_path, StorageBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Redirection state of one runtime's storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StorageState {
    /// The runtime's own directory (or nothing) is in place.
    Unconfigured,
    /// The path is a link to the central store.
    Redirected,
    /// Leftovers of an interrupted or foreign change.
    NeedsRepair { reason: String },
}

/// Link and backup status for one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLinkStatus {
    pub runtime: RuntimeId,
    pub path: Option<PathBuf>,
    pub exists: bool,
    pub is_link: bool,
    pub link_target: Option<PathBuf>,
    pub points_to_central: bool,
    pub backup_path: Option<PathBuf>,
    pub backup_exists: bool,
    pub central_store: PathBuf,
    #[serde(flatten)]
    pub state: StorageState,
}

impl RuntimeLinkStatus {
    pub fn is_redirected(&self) -> bool {
        self.state == StorageState::Redirected
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfigurator {
    resolver: PathResolver,
    registry: Arc<CentralRegistry>,
    storage: Arc<dyn StorageBackend>,
}

impl StorageConfigurator {
    pub fn new(
        resolver: PathResolver,
        registry: Arc<CentralRegistry>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            resolver,
            registry,
            storage,
        }
    }

    fn runtime_path(&self, runtime: RuntimeId) -> Result<PathBuf> {
        self.resolver
            .redirect_root(runtime)
            .ok_or_else(|| ModelShareError::Config {
                message: format!(
                    "No storage location for {} on this platform",
                    runtime.display_name()
                ),
            })
    }

    fn points_at(&self, link: &Path, target: &Path, link_target: &Path) -> bool {
        match (self.storage.canonicalize(link), self.storage.canonicalize(target)) {
            (Ok(a), Ok(b)) => a == b,
            _ => {
                let resolved = match link.parent() {
                    Some(parent) if link_target.is_relative() => parent.join(link_target),
                    _ => link_target.to_path_buf(),
                };
                normalize_path(&resolved) == normalize_path(target)
            }
        }
    }

    /// Current status, derived from the filesystem.
    pub fn status(&self, runtime: RuntimeId) -> RuntimeLinkStatus {
        let central = self.registry.store_root().to_path_buf();
        let Some(path) = self.resolver.redirect_root(runtime) else {
            return RuntimeLinkStatus {
                runtime,
                path: None,
                exists: false,
                is_link: false,
                link_target: None,
                points_to_central: false,
                backup_path: None,
                backup_exists: false,
                central_store: central,
                state: StorageState::NeedsRepair {
                    reason: "No storage location for this platform".to_string(),
                },
            };
        };

        let backup = backup_path(&path);
        let exists = self.storage.entry_exists(&path);
        let is_link = self.storage.is_symlink(&path);
        let link_target = if is_link {
            self.storage.read_link(&path).ok()
        } else {
            None
        };
        let points_to_central = link_target
            .as_deref()
            .map(|t| self.points_at(&path, &central, t))
            .unwrap_or(false);
        let backup_exists = self.storage.entry_exists(&backup);

        let state = if is_link && points_to_central {
            StorageState::Redirected
        } else if is_link {
            StorageState::NeedsRepair {
                reason: "Storage path links somewhere other than the central store".to_string(),
            }
        } else if !exists && backup_exists {
            StorageState::NeedsRepair {
                reason: "Original directory is in backup but no link is in place".to_string(),
            }
        } else if exists && backup_exists {
            StorageState::NeedsRepair {
                reason: "A backup exists next to a real directory".to_string(),
            }
        } else {
            StorageState::Unconfigured
        };

        RuntimeLinkStatus {
            runtime,
            path: Some(path),
            exists,
            is_link,
            link_target,
            points_to_central,
            backup_path: Some(backup),
            backup_exists,
            central_store: central,
            state,
        }
    }

    pub fn status_all(&self) -> Vec<RuntimeLinkStatus> {
        RuntimeId::ALL.iter().map(|r| self.status(*r)).collect()
    }

    /// Replace the runtime's storage directory with a link to the store.
    ///
    /// With `backup` the existing directory is moved to `<path>.backup`;
    /// without it only an empty directory may be replaced.
    pub fn configure(&self, runtime: RuntimeId, backup: bool) -> Result<RuntimeLinkStatus> {
        let path = self.runtime_path(runtime)?;
        let central = self.registry.ensure_store()?;
        let status = self.status(runtime);

        if status.is_redirected() {
            debug!("{} already redirected to {}", runtime, central.display());
            return Ok(status);
        }
        if status.is_link {
            return Err(ModelShareError::conflict(format!(
                "{} is a link to {}; remove it first",
                path.display(),
                status
                    .link_target
                    .as_deref()
                    .map(|t| t.display().to_string())
                    .unwrap_or_default()
            )));
        }

        let backup_target = backup_path(&path);
        let mut moved_to_backup = false;
        if status.exists {
            if !self.storage.is_dir(&path) {
                return Err(ModelShareError::conflict(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
            if backup {
                if status.backup_exists {
                    return Err(ModelShareError::conflict(format!(
                        "Backup {} already exists",
                        backup_target.display()
                    )));
                }
                self.storage
                    .rename(&path, &backup_target)
                    .map_err(|e| ModelShareError::io_with_path(e, &path))?;
                moved_to_backup = true;
                info!("Moved {} to {}", path.display(), backup_target.display());
            } else {
                let empty = self
                    .storage
                    .read_dir(&path)
                    .map_err(|e| ModelShareError::io_with_path(e, &path))?
                    .is_empty();
                if !empty {
                    return Err(ModelShareError::conflict(format!(
                        "{} contains models; configure with a backup",
                        path.display()
                    )));
                }
                self.storage
                    .remove_dir(&path)
                    .map_err(|e| ModelShareError::io_with_path(e, &path))?;
            }
        } else if status.backup_exists {
            info!(
                "Resuming configure of {}: backup already in place",
                runtime.display_name()
            );
        }

        if let Some(parent) = path.parent() {
            self.storage
                .create_dir_all(parent)
                .map_err(|e| ModelShareError::io_with_path(e, parent))?;
        }

        if let Err(e) = self.storage.symlink(&central, &path) {
            if moved_to_backup {
                if let Err(undo) = self.storage.rename(&backup_target, &path) {
                    warn!(
                        "Failed to move {} back after link failure: {}",
                        backup_target.display(),
                        undo
                    );
                }
            }
            return Err(ModelShareError::SymlinkFailed {
                src: central,
                dest: path,
                reason: e.to_string(),
            });
        }

        info!(
            "Redirected {} storage {} -> {}",
            runtime.display_name(),
            path.display(),
            central.display()
        );
        Ok(self.status(runtime))
    }

    /// Undo [`configure`](Self::configure): drop the link and move the
    /// backup back into place, if there is one.
    pub fn restore(&self, runtime: RuntimeId) -> Result<RuntimeLinkStatus> {
        let path = self.runtime_path(runtime)?;
        let status = self.status(runtime);
        let backup = backup_path(&path);

        if status.is_link {
            if !status.points_to_central {
                return Err(ModelShareError::conflict(format!(
                    "{} links somewhere other than the central store",
                    path.display()
                )));
            }
            self.storage
                .remove_file(&path)
                .map_err(|e| ModelShareError::io_with_path(e, &path))?;
            info!("Removed link {}", path.display());
        } else if status.exists && status.backup_exists {
            return Err(ModelShareError::conflict(format!(
                "{} is a real directory and {} exists; resolve manually",
                path.display(),
                backup.display()
            )));
        }

        if status.backup_exists {
            self.storage
                .rename(&backup, &path)
                .map_err(|e| ModelShareError::io_with_path(e, &backup))?;
            info!("Restored {} from {}", path.display(), backup.display());
        } else {
            debug!("No backup for {}; leaving path absent", path.display());
        }

        Ok(self.status(runtime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelShareConfig, RuntimeConfig};
    use crate::storage::MemoryStorage;

    const OLLAMA_ROOT: &str = "/home/u/.ollama/models";

    fn setup() -> (Arc<MemoryStorage>, StorageConfigurator) {
        let storage = Arc::new(MemoryStorage::new());
        let config = Arc::new(ModelShareConfig {
            central_store: Some(PathBuf::from("/store")),
            ollama: RuntimeConfig {
                base_url: None,
                storage_root: Some(PathBuf::from(OLLAMA_ROOT)),
            },
            ..Default::default()
        });
        let registry = Arc::new(CentralRegistry::new("/store", storage.clone()));
        let configurator = StorageConfigurator::new(
            PathResolver::new(config, storage.clone()),
            registry,
            storage.clone(),
        );
        (storage, configurator)
    }

    #[test]
    fn test_unconfigured_status() {
        let (storage, configurator) = setup();
        storage.add_file(format!("{}/blobs/sha256-a", OLLAMA_ROOT), "a");

        let status = configurator.status(RuntimeId::Ollama);
        assert_eq!(status.state, StorageState::Unconfigured);
        assert!(status.exists);
        assert!(!status.is_link);
        assert!(!status.backup_exists);
    }

    #[test]
    fn test_configure_is_idempotent() {
        let (storage, configurator) = setup();
        storage.add_file(format!("{}/blobs/sha256-a", OLLAMA_ROOT), "a");

        let first = configurator.configure(RuntimeId::Ollama, true).unwrap();
        assert!(first.is_redirected());
        assert!(first.backup_exists);

        let second = configurator.configure(RuntimeId::Ollama, true).unwrap();
        assert_eq!(first, second);
        assert!(!storage.entry_exists(Path::new("/home/u/.ollama/models.backup.backup")));
        assert!(storage.exists(Path::new("/home/u/.ollama/models.backup/blobs/sha256-a")));
    }

    #[test]
    fn test_configure_refuses_existing_backup() {
        let (storage, configurator) = setup();
        storage.add_dir(OLLAMA_ROOT);
        storage.add_file("/home/u/.ollama/models.backup/old", "old");

        let err = configurator.configure(RuntimeId::Ollama, true).unwrap_err();
        assert!(matches!(err, ModelShareError::Conflict { .. }));
        assert_eq!(storage.file_bytes("/home/u/.ollama/models.backup/old").unwrap(), b"old");
        assert!(!storage.is_symlink(Path::new(OLLAMA_ROOT)));
    }

    #[test]
    fn test_restore_returns_original_directory() {
        let (storage, configurator) = setup();
        storage.add_file(format!("{}/manifests/m", OLLAMA_ROOT), "manifest");
        storage.add_file(format!("{}/blobs/sha256-b", OLLAMA_ROOT), "blob");

        configurator.configure(RuntimeId::Ollama, true).unwrap();
        let status = configurator.restore(RuntimeId::Ollama).unwrap();

        assert_eq!(status.state, StorageState::Unconfigured);
        assert!(!status.is_link);
        assert!(!status.backup_exists);
        assert_eq!(
            storage.file_bytes(format!("{}/manifests/m", OLLAMA_ROOT)).unwrap(),
            b"manifest"
        );
        assert_eq!(
            storage.file_bytes(format!("{}/blobs/sha256-b", OLLAMA_ROOT)).unwrap(),
            b"blob"
        );
        assert!(storage.exists(Path::new("/store")));
    }

    #[test]
    fn test_configure_resumes_after_interrupted_run() {
        let (storage, configurator) = setup();
        storage.add_file("/home/u/.ollama/models.backup/blobs/x", "x");

        let status = configurator.status(RuntimeId::Ollama);
        assert!(matches!(status.state, StorageState::NeedsRepair { .. }));

        let status = configurator.configure(RuntimeId::Ollama, true).unwrap();
        assert!(status.is_redirected());
        assert!(status.backup_exists);
    }

    #[test]
    fn test_configure_without_backup_requires_empty_dir() {
        let (storage, configurator) = setup();
        storage.add_file(format!("{}/blobs/sha256-a", OLLAMA_ROOT), "a");
        let err = configurator.configure(RuntimeId::Ollama, false).unwrap_err();
        assert!(matches!(err, ModelShareError::Conflict { .. }));

        let (storage, configurator) = setup();
        storage.add_dir(OLLAMA_ROOT);
        let status = configurator.configure(RuntimeId::Ollama, false).unwrap();
        assert!(status.is_redirected());
        assert!(!status.backup_exists);
    }

    #[test]
    fn test_foreign_link_is_conflict() {
        let (storage, configurator) = setup();
        storage.add_dir("/elsewhere");
        storage.add_dir("/home/u/.ollama");
        storage
            .symlink(Path::new("/elsewhere"), Path::new(OLLAMA_ROOT))
            .unwrap();

        assert!(matches!(
            configurator.status(RuntimeId::Ollama).state,
            StorageState::NeedsRepair { .. }
        ));
        assert!(configurator.configure(RuntimeId::Ollama, true).is_err());
        assert!(configurator.restore(RuntimeId::Ollama).is_err());
        assert!(storage.is_symlink(Path::new(OLLAMA_ROOT)));
    }

    #[test]
    fn test_restore_without_backup_leaves_path_absent() {
        let (storage, configurator) = setup();
        configurator.configure(RuntimeId::Ollama, true).unwrap();
        assert!(storage.is_symlink(Path::new(OLLAMA_ROOT)));

        let status = configurator.restore(RuntimeId::Ollama).unwrap();
        assert!(!status.exists);
        assert_eq!(status.state, StorageState::Unconfigured);
    }

    #[cfg(unix)]
    #[test]
    fn test_configure_and_restore_on_disk() {
        use crate::storage::LocalStorage;

        let temp = tempfile::TempDir::new().unwrap();
        let runtime_root = temp.path().join("lmstudio").join("models");
        std::fs::create_dir_all(runtime_root.join("pub/model")).unwrap();
        std::fs::write(runtime_root.join("pub/model/m.gguf"), b"weights").unwrap();
        let store = temp.path().join("store");

        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage);
        let config = Arc::new(ModelShareConfig {
            central_store: Some(store.clone()),
            lmstudio: RuntimeConfig {
                base_url: None,
                storage_root: Some(runtime_root.clone()),
            },
            ..Default::default()
        });
        let configurator = StorageConfigurator::new(
            PathResolver::new(config, storage.clone()),
            Arc::new(CentralRegistry::new(&store, storage.clone())),
            storage,
        );

        let status = configurator.configure(RuntimeId::LmStudio, true).unwrap();
        assert!(status.is_redirected());
        assert!(runtime_root.is_symlink());
        assert_eq!(std::fs::canonicalize(&runtime_root).unwrap(), std::fs::canonicalize(&store).unwrap());

        configurator.restore(RuntimeId::LmStudio).unwrap();
        assert!(!runtime_root.is_symlink());
        assert_eq!(std::fs::read(runtime_root.join("pub/model/m.gguf")).unwrap(), b"weights");
    }
}
