//! Read-only snapshot combining live runtimes, the registry and detection.

use crate::config::RuntimeId;
use crate::detection::{CombinedDetection, DiscoveredModel, ModelDetector};
use crate::model_library::{import_filename, CentralRegistry, ModelFormat, StoredModelRecord};
use crate::runtime::RuntimeProbe;
use crate::storage_config::{RuntimeLinkStatus, StorageConfigurator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-runtime part of a [`UnifiedSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSummary {
    pub runtime: RuntimeId,
    pub reachable: bool,
    pub loaded_models: Vec<String>,
    pub probe_error: Option<String>,
    pub storage_root: Option<PathBuf>,
    pub storage_exists: bool,
    pub detected_models: usize,
    pub detected_size: u64,
    /// Discovered models with no matching registry record.
    pub not_imported: usize,
    pub scan_error: Option<String>,
    pub link_status: RuntimeLinkStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotTotals {
    pub registered_models: usize,
    pub registered_size: u64,
    pub discovered_models: usize,
    pub discovered_size: u64,
    pub not_imported: usize,
}

/// Everything a consumer needs to render the model overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedSnapshot {
    pub generated_at: DateTime<Utc>,
    pub runtimes: Vec<RuntimeSummary>,
    pub records: Vec<StoredModelRecord>,
    pub registry_error: Option<String>,
    /// Runtimes each format can be installed into.
    pub compatibility: BTreeMap<ModelFormat, Vec<RuntimeId>>,
    pub totals: SnapshotTotals,
}

impl UnifiedSnapshot {
    pub fn runtime(&self, runtime: RuntimeId) -> Option<&RuntimeSummary> {
        self.runtimes.iter().find(|r| r.runtime == runtime)
    }
}

pub fn compatibility_matrix() -> BTreeMap<ModelFormat, Vec<RuntimeId>> {
    ModelFormat::ALL
        .iter()
        .map(|f| (*f, f.compatible_runtimes()))
        .collect()
}

/// True if a registry record already covers this discovered model.
pub fn is_imported(model: &DiscoveredModel, records: &[StoredModelRecord]) -> bool {
    let filename = import_filename(model, None);
    records
        .iter()
        .any(|r| r.source_path() == Some(model.path.as_path()) || r.filename == filename)
}

struct ProbeOutcome {
    reachable: bool,
    loaded: Vec<String>,
    error: Option<String>,
}

#[derive(Clone)]
pub struct UnifiedAggregator {
    detector: ModelDetector,
    registry: Arc<CentralRegistry>,
    configurator: StorageConfigurator,
    probes: Vec<Arc<dyn RuntimeProbe>>,
}

impl std::fmt::Debug for UnifiedAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedAggregator")
            .field("probes", &self.probes.iter().map(|p| p.runtime()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl UnifiedAggregator {
    pub fn new(
        detector: ModelDetector,
        registry: Arc<CentralRegistry>,
        configurator: StorageConfigurator,
        probes: Vec<Arc<dyn RuntimeProbe>>,
    ) -> Self {
        Self {
            detector,
            registry,
            configurator,
            probes,
        }
    }

    async fn probe(&self, runtime: RuntimeId) -> ProbeOutcome {
        let Some(probe) = self.probes.iter().find(|p| p.runtime() == runtime) else {
            return ProbeOutcome {
                reachable: false,
                loaded: Vec::new(),
                error: Some("No client configured".to_string()),
            };
        };
        match probe.loaded_models().await {
            Ok(loaded) => ProbeOutcome {
                reachable: true,
                loaded,
                error: None,
            },
            Err(e) => {
                debug!("{} probe failed: {}", runtime.display_name(), e);
                ProbeOutcome {
                    reachable: false,
                    loaded: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Build a snapshot. Performs no writes.
    pub async fn snapshot(&self) -> UnifiedSnapshot {
        let (ollama, lmstudio, detection, records) = tokio::join!(
            self.probe(RuntimeId::Ollama),
            self.probe(RuntimeId::LmStudio),
            self.detector.detect_all(),
            self.registry.list(),
        );

        let (records, registry_error) = match records {
            Ok(records) => (records, None),
            Err(e) => {
                warn!("Registry unavailable for snapshot: {}", e);
                (Vec::new(), Some(e.to_string()))
            }
        };

        let runtimes = vec![
            self.summarize(RuntimeId::Ollama, ollama, &detection, &records),
            self.summarize(RuntimeId::LmStudio, lmstudio, &detection, &records),
        ];

        let mut seen = HashSet::new();
        let totals = SnapshotTotals {
            registered_models: records.len(),
            registered_size: records
                .iter()
                .filter(|r| seen.insert(r.path.clone()))
                .map(|r| r.size)
                .sum(),
            discovered_models: detection.total_models,
            discovered_size: detection.total_size,
            not_imported: runtimes.iter().map(|r| r.not_imported).sum(),
        };

        UnifiedSnapshot {
            generated_at: Utc::now(),
            runtimes,
            records,
            registry_error,
            compatibility: compatibility_matrix(),
            totals,
        }
    }

    fn summarize(
        &self,
        runtime: RuntimeId,
        probe: ProbeOutcome,
        detection: &CombinedDetection,
        records: &[StoredModelRecord],
    ) -> RuntimeSummary {
        let result = detection.get(runtime);
        let not_imported = result
            .models
            .iter()
            .filter(|m| !is_imported(m, records))
            .count();

        RuntimeSummary {
            runtime,
            reachable: probe.reachable,
            loaded_models: probe.loaded,
            probe_error: probe.error,
            storage_root: result.root.clone(),
            storage_exists: result.exists,
            detected_models: result.model_count(),
            detected_size: result.total_size,
            not_imported,
            scan_error: result.error.clone(),
            link_status: self.configurator.status(runtime),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelShareConfig, RuntimeConfig};
    use crate::error::{ModelShareError, Result};
    use crate::model_library::{NewModelRecord, Provenance};
    use crate::platform::PathResolver;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;

    struct FakeProbe {
        runtime: RuntimeId,
        loaded: Option<Vec<String>>,
    }

    #[async_trait]
    impl RuntimeProbe for FakeProbe {
        fn runtime(&self) -> RuntimeId {
            self.runtime
        }

        async fn is_reachable(&self) -> bool {
            self.loaded.is_some()
        }

        async fn loaded_models(&self) -> Result<Vec<String>> {
            self.loaded.clone().ok_or_else(|| ModelShareError::Unreachable {
                runtime: self.runtime,
                message: "connection refused".to_string(),
            })
        }
    }

    fn aggregator(storage: Arc<MemoryStorage>) -> (Arc<CentralRegistry>, UnifiedAggregator) {
        let config = Arc::new(ModelShareConfig {
            central_store: Some(PathBuf::from("/store")),
            ollama: RuntimeConfig {
                base_url: None,
                storage_root: Some(PathBuf::from("/ollama")),
            },
            lmstudio: RuntimeConfig {
                base_url: None,
                storage_root: Some(PathBuf::from("/lms")),
            },
            ..Default::default()
        });
        let resolver = PathResolver::new(config, storage.clone());
        let registry = Arc::new(CentralRegistry::new("/store", storage.clone()));
        let probes: Vec<Arc<dyn RuntimeProbe>> = vec![
            Arc::new(FakeProbe {
                runtime: RuntimeId::Ollama,
                loaded: Some(vec!["llama3:latest".to_string()]),
            }),
            Arc::new(FakeProbe {
                runtime: RuntimeId::LmStudio,
                loaded: None,
            }),
        ];
        let aggregator = UnifiedAggregator::new(
            ModelDetector::new(resolver.clone(), storage.clone()),
            registry.clone(),
            StorageConfigurator::new(resolver, registry.clone(), storage),
            probes,
        );
        (registry, aggregator)
    }

    #[test]
    fn test_compatibility_matrix() {
        let matrix = compatibility_matrix();
        assert_eq!(
            matrix[&ModelFormat::Gguf],
            vec![RuntimeId::Ollama, RuntimeId::LmStudio]
        );
        assert!(matrix[&ModelFormat::Safetensors].is_empty());
        assert!(matrix[&ModelFormat::Unknown].is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_counts_unimported_models() {
        let storage = Arc::new(MemoryStorage::new());
        storage.add_file("/lms/pub/a/a-7b.gguf", vec![0u8; 10]);
        storage.add_file("/lms/pub/b/b-13b.gguf", vec![0u8; 5]);
        let (registry, aggregator) = aggregator(storage.clone());

        let snapshot = aggregator.snapshot().await;
        let lms = snapshot.runtime(RuntimeId::LmStudio).unwrap();
        assert_eq!(lms.detected_models, 2);
        assert_eq!(lms.not_imported, 2);
        assert!(!lms.reachable);
        assert!(lms.probe_error.is_some());

        let ollama = snapshot.runtime(RuntimeId::Ollama).unwrap();
        assert!(ollama.reachable);
        assert_eq!(ollama.loaded_models, vec!["llama3:latest"]);
        assert!(!ollama.storage_exists);

        storage.add_file("/store/a-7b.gguf", vec![0u8; 10]);
        registry
            .register(NewModelRecord {
                display_name: "pub/a".to_string(),
                filename: "a-7b.gguf".to_string(),
                path: PathBuf::from("/store/a-7b.gguf"),
                size: 10,
                format: ModelFormat::Gguf,
                quantization: None,
                parameters: Some("7B".to_string()),
                sha256: None,
                provenance: Provenance::Discovered {
                    runtime: RuntimeId::LmStudio,
                    source_path: PathBuf::from("/lms/pub/a/a-7b.gguf"),
                    source_name: "pub/a".to_string(),
                },
            })
            .await
            .unwrap();

        let snapshot = aggregator.snapshot().await;
        let lms = snapshot.runtime(RuntimeId::LmStudio).unwrap();
        assert_eq!(lms.not_imported, 1);
        assert_eq!(snapshot.totals.registered_models, 1);
        assert_eq!(snapshot.totals.not_imported, 1);
        assert_eq!(snapshot.totals.discovered_size, 15);
    }

    #[tokio::test]
    async fn test_filename_match_counts_as_imported() {
        let storage = Arc::new(MemoryStorage::new());
        storage.add_file("/lms/x/y/Shared-Q4_K_M.gguf", "w");
        storage.add_file("/store/shared-q4_k_m.gguf", "w");
        let (registry, aggregator) = aggregator(storage);
        registry.adopt_orphans().await.unwrap();

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.totals.not_imported, 0);
    }
}
