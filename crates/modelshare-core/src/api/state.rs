//! Components owned by a [`ModelShareApi`](crate::ModelShareApi).

use crate::aggregator::UnifiedAggregator;
use crate::config::ModelShareConfig;
use crate::detection::ModelDetector;
use crate::model_library::{CentralRegistry, ModelImporter, ModelInstaller};
use crate::platform::PathResolver;
use crate::storage::StorageBackend;
use crate::storage_config::StorageConfigurator;
use std::sync::Arc;

/// Every subsystem, wired against one configuration and storage backend.
pub(crate) struct ApiState {
    pub(crate) config: Arc<ModelShareConfig>,
    pub(crate) storage: Arc<dyn StorageBackend>,
    pub(crate) resolver: PathResolver,
    pub(crate) detector: ModelDetector,
    pub(crate) registry: Arc<CentralRegistry>,
    pub(crate) importer: ModelImporter,
    pub(crate) installer: ModelInstaller,
    pub(crate) configurator: StorageConfigurator,
    pub(crate) aggregator: UnifiedAggregator,
}
