//! Storage location, redirection and snapshot methods on ModelShareApi.

use crate::aggregator::UnifiedSnapshot;
use crate::config::RuntimeId;
use crate::error::{ErrorKind, Result};
use crate::platform;
use crate::storage_config::RuntimeLinkStatus;
use crate::ModelShareApi;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Locations considered for one runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimePaths {
    pub runtime: RuntimeId,
    pub base_url: String,
    pub candidates: Vec<PathBuf>,
    pub default_root: Option<PathBuf>,
    pub default_root_exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePaths {
    pub platform: String,
    pub central_store: PathBuf,
    pub central_store_exists: bool,
    pub runtimes: Vec<RuntimePaths>,
}

/// Outcome of a configure or restore, always with the status afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageOperationResult {
    pub success: bool,
    pub runtime: RuntimeId,
    pub status: RuntimeLinkStatus,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl ModelShareApi {
    /// Candidate and default locations for the store and both runtimes.
    pub fn get_storage_paths(&self) -> StoragePaths {
        let state = &self.state;
        let runtimes = RuntimeId::ALL
            .iter()
            .map(|runtime| {
                let default_root = state.resolver.default_root(*runtime);
                RuntimePaths {
                    runtime: *runtime,
                    base_url: state.config.base_url(*runtime).to_string(),
                    candidates: state.resolver.candidate_roots(*runtime),
                    default_root_exists: default_root
                        .as_deref()
                        .map(|p| state.storage.exists(p))
                        .unwrap_or(false),
                    default_root,
                }
            })
            .collect();

        let central_store = state.registry.store_root().to_path_buf();
        StoragePaths {
            platform: platform::current_platform().to_string(),
            central_store_exists: state.storage.is_dir(&central_store),
            central_store,
            runtimes,
        }
    }

    /// Link status for one runtime, or both.
    pub fn get_storage_status(&self, runtime: Option<RuntimeId>) -> Vec<RuntimeLinkStatus> {
        match runtime {
            Some(runtime) => vec![self.state.configurator.status(runtime)],
            None => self.state.configurator.status_all(),
        }
    }

    /// Redirect a runtime's storage directory to the central store.
    pub fn configure_storage(&self, runtime: RuntimeId, backup: bool) -> StorageOperationResult {
        let outcome = self.state.configurator.configure(runtime, backup);
        self.storage_result(runtime, outcome)
    }

    /// Undo [`configure_storage`](Self::configure_storage).
    pub fn restore_storage(&self, runtime: RuntimeId) -> StorageOperationResult {
        let outcome = self.state.configurator.restore(runtime);
        self.storage_result(runtime, outcome)
    }

    fn storage_result(
        &self,
        runtime: RuntimeId,
        outcome: Result<RuntimeLinkStatus>,
    ) -> StorageOperationResult {
        match outcome {
            Ok(status) => StorageOperationResult {
                success: true,
                runtime,
                status,
                error: None,
                error_kind: None,
            },
            Err(e) => {
                warn!("Storage operation on {} failed: {}", runtime, e);
                StorageOperationResult {
                    success: false,
                    runtime,
                    status: self.state.configurator.status(runtime),
                    error: Some(e.to_string()),
                    error_kind: Some(e.kind()),
                }
            }
        }
    }

    /// Live runtimes, registry and detection in one read-only view.
    pub async fn get_unified_snapshot(&self) -> UnifiedSnapshot {
        self.state.aggregator.snapshot().await
    }
}
