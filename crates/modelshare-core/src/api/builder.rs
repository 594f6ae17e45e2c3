//! Builder for configuring ModelShareApi initialization.

use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::UnifiedAggregator;
use crate::api::state::ApiState;
use crate::config::{ModelShareConfig, RuntimeId};
use crate::detection::ModelDetector;
use crate::error::Result;
use crate::model_library::{CentralRegistry, ModelImporter, ModelInstaller};
use crate::platform::PathResolver;
use crate::runtime::{LmStudioClient, ManifestRuntimeApi, OllamaClient, RuntimeProbe};
use crate::storage::{LocalStorage, StorageBackend};
use crate::storage_config::StorageConfigurator;
use crate::ModelShareApi;

/// Builder for configuring ModelShareApi initialization.
///
/// By default the real filesystem and live HTTP clients for both runtimes
/// are used. Tests swap in [`MemoryStorage`](crate::storage::MemoryStorage)
/// and fake runtime clients.
///
/// # Example
///
/// ```rust,ignore
/// use modelshare_core::ModelShareApi;
///
/// let api = ModelShareApi::builder(config)
///     .create_store(true)
///     .adopt_orphans(true)
///     .build()
///     .await?;
/// ```
pub struct ModelShareApiBuilder {
    config: ModelShareConfig,
    storage: Option<Arc<dyn StorageBackend>>,
    ollama_api: Option<Arc<dyn ManifestRuntimeApi>>,
    probes: Option<Vec<Arc<dyn RuntimeProbe>>>,
    create_store: bool,
    adopt_orphans: bool,
}

impl ModelShareApiBuilder {
    pub fn new(config: ModelShareConfig) -> Self {
        Self {
            config,
            storage: None,
            ollama_api: None,
            probes: None,
            create_store: false,
            adopt_orphans: false,
        }
    }

    /// Use a different storage backend.
    ///
    /// Default: [`LocalStorage`]
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use a different client for Ollama's model API.
    pub fn with_ollama_api(mut self, api: Arc<dyn ManifestRuntimeApi>) -> Self {
        self.ollama_api = Some(api);
        self
    }

    /// Use different reachability probes, one per runtime.
    pub fn with_probes(mut self, probes: Vec<Arc<dyn RuntimeProbe>>) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Create the central store directory during build.
    ///
    /// Default: `false`
    pub fn create_store(mut self, enable: bool) -> Self {
        self.create_store = enable;
        self
    }

    /// Register untracked model files found in the store during build.
    ///
    /// Default: `false`
    pub fn adopt_orphans(mut self, enable: bool) -> Self {
        self.adopt_orphans = enable;
        self
    }

    /// Build the ModelShareApi instance.
    pub async fn build(self) -> Result<ModelShareApi> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(LocalStorage) as Arc<dyn StorageBackend>);

        let resolver = PathResolver::new(config.clone(), storage.clone());
        let central = resolver.central_store_root()?;
        let registry = Arc::new(CentralRegistry::new(central, storage.clone()));
        if self.create_store {
            registry.ensure_store()?;
        }

        // Live clients are only built for the seams not overridden.
        let (ollama_api, probes) = match (self.ollama_api, self.probes) {
            (Some(api), Some(probes)) => (api, probes),
            (api, probes) => {
                let client = Arc::new(OllamaClient::new(config.base_url(RuntimeId::Ollama))?);
                let api = api.unwrap_or_else(|| client.clone() as Arc<dyn ManifestRuntimeApi>);
                let probes = match probes {
                    Some(probes) => probes,
                    None => {
                        let lmstudio = LmStudioClient::new(config.base_url(RuntimeId::LmStudio))?;
                        vec![
                            client as Arc<dyn RuntimeProbe>,
                            Arc::new(lmstudio) as Arc<dyn RuntimeProbe>,
                        ]
                    }
                };
                (api, probes)
            }
        };

        let detector = ModelDetector::new(resolver.clone(), storage.clone());
        let importer = ModelImporter::new(registry.clone(), storage.clone(), config.clone());
        let installer = ModelInstaller::new(
            registry.clone(),
            storage.clone(),
            resolver.clone(),
            ollama_api,
            config.clone(),
        );
        let configurator =
            StorageConfigurator::new(resolver.clone(), registry.clone(), storage.clone());
        let aggregator = UnifiedAggregator::new(
            detector.clone(),
            registry.clone(),
            configurator.clone(),
            probes,
        );

        if self.adopt_orphans {
            match registry.adopt_orphans().await {
                Ok(adopted) if !adopted.is_empty() => {
                    info!("Startup orphan scan adopted {} models", adopted.len());
                }
                Ok(_) => {}
                Err(e) => warn!("Startup orphan scan failed (non-fatal): {}", e),
            }
        }

        info!("Central store: {}", registry.store_root().display());

        Ok(ModelShareApi {
            state: Arc::new(ApiState {
                config,
                storage,
                resolver,
                detector,
                registry,
                importer,
                installer,
                configurator,
                aggregator,
            }),
        })
    }
}
