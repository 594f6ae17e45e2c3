//! Detection, registry, import and install methods on ModelShareApi.

use crate::cancel::CancellationToken;
use crate::config::RuntimeId;
use crate::detection::{CombinedDetection, DetectionResult, DiscoveredModel};
use crate::error::{ModelShareError, Result};
use crate::model_library::{
    DeleteResult, ImportOptions, ImportProgress, ImportResult, InstallOptions, InstallResult,
    StoredModelRecord,
};
use crate::ModelShareApi;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;

impl ModelShareApi {
    // ========================================
    // Detection
    // ========================================

    /// Scan both runtimes concurrently.
    pub async fn detect_models(&self) -> CombinedDetection {
        self.state.detector.detect_all().await
    }

    /// Scan one runtime.
    pub async fn detect_runtime(&self, runtime: RuntimeId) -> DetectionResult {
        self.state.detector.detect_one(runtime).await
    }

    /// Find a discovered model by its path or display name.
    pub async fn find_discovered_model(
        &self,
        runtime: RuntimeId,
        selector: &str,
    ) -> Result<DiscoveredModel> {
        let result = self.detect_runtime(runtime).await;
        let selector_path = Path::new(selector);
        result
            .models
            .into_iter()
            .find(|m| m.path == selector_path || m.name == selector)
            .ok_or_else(|| {
                ModelShareError::NotFound(format!(
                    "No {} model matching {}",
                    runtime.display_name(),
                    selector
                ))
            })
    }

    // ========================================
    // Central Registry
    // ========================================

    /// Create the central store if needed and return its path.
    pub fn ensure_central_store(&self) -> Result<PathBuf> {
        self.state.registry.ensure_store()
    }

    pub async fn list_registry_models(&self) -> Result<Vec<StoredModelRecord>> {
        self.state.registry.list().await
    }

    pub async fn get_registry_model(&self, model_id: &str) -> Result<StoredModelRecord> {
        self.state.registry.get(model_id).await
    }

    /// Register a file a downloader already placed in the central store.
    pub async fn register_downloaded_model(
        &self,
        path: &Path,
        source_url: Option<String>,
        display_name: Option<String>,
    ) -> Result<StoredModelRecord> {
        self.state
            .registry
            .register_existing(path, source_url, display_name)
            .await
    }

    /// Register model files in the store that have no record yet.
    pub async fn adopt_orphan_models(&self) -> Result<Vec<StoredModelRecord>> {
        self.state.registry.adopt_orphans().await
    }

    /// Delete a record, uninstalling it from every runtime first.
    ///
    /// Stops at the first runtime that cannot be detached; the record and
    /// its file are kept in that case.
    pub async fn delete_registry_model(&self, model_id: &str, delete_file: bool) -> DeleteResult {
        let record = match self.state.registry.get(model_id).await {
            Ok(record) => record,
            Err(e) => return DeleteResult::failed(model_id, Vec::new(), &e),
        };

        let mut detached = Vec::new();
        for runtime in record.linked_runtimes.iter().copied() {
            if let Err(e) = self.state.installer.try_uninstall(model_id, runtime).await {
                return DeleteResult::failed(model_id, detached, &e);
            }
            detached.push(runtime);
        }

        match self.state.registry.delete(model_id, delete_file).await {
            Ok(_) => {
                info!("Deleted {} (file removed: {})", model_id, delete_file);
                DeleteResult {
                    success: true,
                    model_id: model_id.to_string(),
                    detached,
                    file_removed: delete_file,
                    error: None,
                    error_kind: None,
                }
            }
            Err(e) => DeleteResult::failed(model_id, detached, &e),
        }
    }

    // ========================================
    // Import / Install
    // ========================================

    /// Import a model found by [`find_discovered_model`](Self::find_discovered_model).
    pub async fn import_discovered_model(
        &self,
        runtime: RuntimeId,
        selector: &str,
        options: &ImportOptions,
    ) -> ImportResult {
        match self.find_discovered_model(runtime, selector).await {
            Ok(model) => {
                self.promote_model(&model, options, None, &CancellationToken::new())
                    .await
            }
            Err(e) => ImportResult::failed(&e),
        }
    }

    /// Import a discovered model with progress reporting and cancellation.
    pub async fn promote_model(
        &self,
        model: &DiscoveredModel,
        options: &ImportOptions,
        progress: Option<mpsc::Sender<ImportProgress>>,
        cancel: &CancellationToken,
    ) -> ImportResult {
        self.state
            .importer
            .promote(model, options, progress, cancel)
            .await
    }

    pub async fn install_model(
        &self,
        model_id: &str,
        runtime: RuntimeId,
        options: &InstallOptions,
    ) -> InstallResult {
        self.state.installer.install(model_id, runtime, options).await
    }

    pub async fn uninstall_model(&self, model_id: &str, runtime: RuntimeId) -> InstallResult {
        self.state.installer.uninstall(model_id, runtime).await
    }
}
