//! Model detection across runtime-private storage.
//!
//! Each runtime has its own scanning strategy ([`ollama`], [`lmstudio`]) but
//! both produce a [`DetectionResult`]. Scan-level failures are attached to
//! the result rather than returned, so one runtime never hides the other.

pub mod lmstudio;
pub mod ollama;

pub use ollama::{digest_to_blob_name, ManifestDescriptor, OllamaManifest};

use crate::config::RuntimeId;
use crate::model_library::ModelFormat;
use crate::platform::PathResolver;
use crate::storage::StorageBackend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Whether every blob a model references is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelIntegrity {
    Intact,
    MissingBlobs { missing: Vec<PathBuf> },
}

/// A model found in a runtime's private storage. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredModel {
    pub runtime: RuntimeId,
    pub name: String,
    /// Manifest file (Ollama) or weight file (LM Studio).
    pub path: PathBuf,
    /// The weight artifact itself: the model blob or the flat file.
    pub weight_path: PathBuf,
    pub size: u64,
    pub format: ModelFormat,
    pub quantization: Option<String>,
    pub parameters: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    /// The entry is a filesystem link (LM Studio only).
    pub is_link: bool,
    /// Digest of the model-weight layer (Ollama only).
    pub digest: Option<String>,
    pub integrity: ModelIntegrity,
    /// Every blob referenced by the manifest (Ollama only).
    pub blob_paths: Vec<PathBuf>,
    pub manifest: Option<OllamaManifest>,
}

/// Outcome of scanning one runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub runtime: RuntimeId,
    pub root: Option<PathBuf>,
    pub exists: bool,
    pub models: Vec<DiscoveredModel>,
    pub total_size: u64,
    pub error: Option<String>,
    pub probed_paths: Vec<PathBuf>,
}

impl DetectionResult {
    pub fn new(runtime: RuntimeId, root: &Path) -> Self {
        Self {
            runtime,
            root: Some(root.to_path_buf()),
            exists: false,
            models: Vec::new(),
            total_size: 0,
            error: None,
            probed_paths: vec![root.to_path_buf()],
        }
    }

    /// Result for a runtime with no candidate root on this platform.
    pub fn unavailable(runtime: RuntimeId) -> Self {
        Self {
            runtime,
            root: None,
            exists: false,
            models: Vec::new(),
            total_size: 0,
            error: Some(format!(
                "No storage location known for {} on this platform",
                runtime.display_name()
            )),
            probed_paths: Vec::new(),
        }
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub(crate) fn finish(&mut self) {
        self.models.sort_by(|a, b| a.name.cmp(&b.name));
        self.total_size = self.models.iter().map(|m| m.size).sum();
    }
}

/// Both runtimes' results plus their sums.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedDetection {
    pub ollama: DetectionResult,
    pub lmstudio: DetectionResult,
    pub total_models: usize,
    pub total_size: u64,
}

impl CombinedDetection {
    pub fn new(ollama: DetectionResult, lmstudio: DetectionResult) -> Self {
        Self {
            total_models: ollama.model_count() + lmstudio.model_count(),
            total_size: ollama.total_size + lmstudio.total_size,
            ollama,
            lmstudio,
        }
    }

    pub fn get(&self, runtime: RuntimeId) -> &DetectionResult {
        match runtime {
            RuntimeId::Ollama => &self.ollama,
            RuntimeId::LmStudio => &self.lmstudio,
        }
    }

    pub fn models(&self) -> impl Iterator<Item = &DiscoveredModel> {
        self.ollama.models.iter().chain(self.lmstudio.models.iter())
    }
}

/// Runs the per-runtime scanners against resolved storage roots.
#[derive(Debug, Clone)]
pub struct ModelDetector {
    resolver: PathResolver,
    storage: Arc<dyn StorageBackend>,
}

impl ModelDetector {
    pub fn new(resolver: PathResolver, storage: Arc<dyn StorageBackend>) -> Self {
        Self { resolver, storage }
    }

    /// Scan one runtime at its default root.
    ///
    /// Every candidate checked before settling on a root is reported in
    /// `probed_paths`.
    pub fn detect(&self, runtime: RuntimeId) -> DetectionResult {
        let candidates = self.resolver.candidate_roots(runtime);
        let Some(root) = self.resolver.default_root(runtime) else {
            return DetectionResult::unavailable(runtime);
        };

        let mut result = self.detect_at(runtime, &root);
        let probed_until = candidates
            .iter()
            .position(|c| c == &root)
            .map(|i| i + 1)
            .unwrap_or(candidates.len());
        result.probed_paths = candidates.into_iter().take(probed_until).collect();
        if result.probed_paths.is_empty() {
            result.probed_paths.push(root);
        }

        if let Some(error) = &result.error {
            warn!("{} scan error: {}", runtime.display_name(), error);
        }
        result
    }

    /// Scan one runtime at an explicit root.
    pub fn detect_at(&self, runtime: RuntimeId, root: &Path) -> DetectionResult {
        match runtime {
            RuntimeId::Ollama => ollama::scan(self.storage.as_ref(), root),
            RuntimeId::LmStudio => {
                let central = self.resolver.central_store_root().ok();
                lmstudio::scan(self.storage.as_ref(), root, central.as_deref())
            }
        }
    }

    /// Scan both runtimes concurrently on the blocking pool.
    pub async fn detect_all(&self) -> CombinedDetection {
        let ollama = {
            let detector = self.clone();
            tokio::task::spawn_blocking(move || detector.detect(RuntimeId::Ollama))
        };
        let lmstudio = {
            let detector = self.clone();
            tokio::task::spawn_blocking(move || detector.detect(RuntimeId::LmStudio))
        };

        let (ollama, lmstudio) = tokio::join!(ollama, lmstudio);
        let ollama = ollama.unwrap_or_else(|e| failed_scan(RuntimeId::Ollama, e));
        let lmstudio = lmstudio.unwrap_or_else(|e| failed_scan(RuntimeId::LmStudio, e));

        let combined = CombinedDetection::new(ollama, lmstudio);
        info!(
            "Detected {} models ({} bytes) across runtimes",
            combined.total_models, combined.total_size
        );
        combined
    }

    /// Scan one runtime on the blocking pool.
    pub async fn detect_one(&self, runtime: RuntimeId) -> DetectionResult {
        let detector = self.clone();
        tokio::task::spawn_blocking(move || detector.detect(runtime))
            .await
            .unwrap_or_else(|e| failed_scan(runtime, e))
    }
}

fn failed_scan(runtime: RuntimeId, err: tokio::task::JoinError) -> DetectionResult {
    let mut result = DetectionResult::unavailable(runtime);
    result.error = Some(format!("Scan task failed: {}", err));
    result
}
