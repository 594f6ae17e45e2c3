//! ModelShare Core - shared model storage for Ollama and LM Studio.
//!
//! Finds models already sitting in each runtime's private storage, keeps a
//! deduplicated central store, moves files between the two safely and can
//! redirect a runtime's storage directory to the central store.
//!
//! # Example
//!
//! ```rust,ignore
//! use modelshare_core::{ModelShareApi, config::ModelShareConfig};
//!
//! #[tokio::main]
//! async fn main() -> modelshare_core::Result<()> {
//!     let api = ModelShareApi::new(ModelShareConfig::default()).await?;
//!
//!     let detection = api.detect_models().await;
//!     println!("Found {} models", detection.total_models);
//!
//!     let snapshot = api.get_unified_snapshot().await;
//!     println!("{} not yet imported", snapshot.totals.not_imported);
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod cancel;
pub mod config;
pub mod detection;
pub mod error;
pub mod model_library;
pub mod platform;
pub mod runtime;
pub mod storage;
pub mod storage_config;

mod api;

pub use aggregator::{RuntimeSummary, UnifiedAggregator, UnifiedSnapshot};
pub use api::{ModelShareApiBuilder, RuntimePaths, StorageOperationResult, StoragePaths};
pub use cancel::CancellationToken;
pub use config::{ModelShareConfig, RuntimeId};
pub use detection::{CombinedDetection, DetectionResult, DiscoveredModel, ModelDetector};
pub use error::{ErrorKind, ModelShareError, Result};
pub use model_library::{
    CentralRegistry, DeleteResult, ImportOptions, ImportProgress, ImportResult, InstallOptions,
    InstallResult, ModelImporter, ModelInstaller, StoredModelRecord,
};
pub use storage::{LocalStorage, MemoryStorage, StorageBackend};
pub use storage_config::{RuntimeLinkStatus, StorageConfigurator, StorageState};

use api::ApiState;
use std::sync::Arc;

/// Entry point for programmatic access to the model storage subsystem.
///
/// Every component receives the configuration at construction; nothing
/// here reads the environment.
#[derive(Clone)]
pub struct ModelShareApi {
    state: Arc<ApiState>,
}

impl ModelShareApi {
    /// Create a builder for more control over initialization.
    ///
    /// ```rust,ignore
    /// let api = ModelShareApi::builder(config)
    ///     .with_storage(Arc::new(MemoryStorage::new()))
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder(config: ModelShareConfig) -> ModelShareApiBuilder {
        ModelShareApiBuilder::new(config)
    }

    /// Create an API over the real filesystem and live runtime clients.
    pub async fn new(config: ModelShareConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    pub fn config(&self) -> &ModelShareConfig {
        &self.state.config
    }
}

impl std::fmt::Debug for ModelShareApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelShareApi")
            .field("central_store", &self.state.registry.store_root())
            .finish_non_exhaustive()
    }
}
