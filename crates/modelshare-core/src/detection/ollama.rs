//! Scanner for Ollama's manifest + content-addressed blob layout.
//!
//! ```text
//! <root>/manifests/<registry>/<namespace>/<model>/<tag>   JSON manifest
//! <root>/blobs/sha256-<hex>                               layer content
//! ```

use super::{DetectionResult, DiscoveredModel, ModelIntegrity};
use crate::config::{OllamaLayout, RuntimeId};
use crate::model_library::{extract_parameters, extract_quantization};
use crate::model_library::ModelFormat;
use crate::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One content descriptor inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDescriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
}

/// Parsed Ollama manifest. Every field except the layer digests is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaManifest {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub config: Option<ManifestDescriptor>,
    #[serde(default)]
    pub layers: Vec<ManifestDescriptor>,
}

impl OllamaManifest {
    /// Sum of all layer sizes plus the config size.
    pub fn total_size(&self) -> u64 {
        self.layers.iter().map(|l| l.size).sum::<u64>()
            + self.config.as_ref().map(|c| c.size).unwrap_or(0)
    }

    /// The layer holding the model weights.
    pub fn model_layer(&self) -> Option<&ManifestDescriptor> {
        self.layers
            .iter()
            .find(|l| l.media_type == OllamaLayout::MODEL_MEDIA_TYPE)
    }

    /// Every digest referenced by this manifest (layers, then config).
    pub fn digests(&self) -> impl Iterator<Item = &str> {
        self.layers
            .iter()
            .chain(self.config.iter())
            .map(|d| d.digest.as_str())
    }
}

/// Map a digest `algorithm:hex` to its blob filename `algorithm-hex`.
pub fn digest_to_blob_name(digest: &str) -> Option<String> {
    let (algorithm, hex) = digest.split_once(':')?;
    let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
    if valid(algorithm) && valid(hex) {
        Some(format!("{}-{}", algorithm, hex))
    } else {
        None
    }
}

/// Blob path for a digest under `root`.
pub fn blob_path(root: &Path, digest: &str) -> Option<PathBuf> {
    digest_to_blob_name(digest).map(|name| root.join(OllamaLayout::BLOBS_DIR).join(name))
}

/// Display name: `<model>` for the default tag, else `<model>:<tag>`.
pub fn display_name(model: &str, tag: &str) -> String {
    if tag == OllamaLayout::DEFAULT_TAG {
        model.to_string()
    } else {
        format!("{}:{}", model, tag)
    }
}

/// Parse one manifest file, returning `None` when it should be skipped.
pub fn read_manifest(storage: &dyn StorageBackend, path: &Path) -> Option<OllamaManifest> {
    let content = match storage.read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!("Skipping unreadable manifest {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<OllamaManifest>(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            debug!("Skipping malformed manifest {}: {}", path.display(), e);
            None
        }
    }
}

/// All manifest files under `<root>/manifests` with their
/// `(registry, namespace, model, tag)` path segments.
pub(crate) fn manifest_files(
    storage: &dyn StorageBackend,
    root: &Path,
) -> std::io::Result<Vec<(PathBuf, [String; 4])>> {
    let manifests_dir = root.join(OllamaLayout::MANIFESTS_DIR);
    let entries = storage.walk_files(&manifests_dir, &|p| {
        !p.file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false)
    })?;

    let mut files = Vec::new();
    for entry in entries {
        if entry.name.starts_with('.') {
            continue;
        }
        let Ok(relative) = entry.path.strip_prefix(&manifests_dir) else {
            continue;
        };
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        match <[String; 4]>::try_from(segments) {
            Ok(segments) => files.push((entry.path, segments)),
            Err(other) => debug!(
                "Skipping manifest at unexpected depth {}: {:?}",
                entry.path.display(),
                other
            ),
        }
    }
    Ok(files)
}

/// Scan an Ollama storage root.
///
/// A missing or empty root yields `exists = false` with no error; a non-empty
/// root without a `manifests` directory is a scan-level error. Everything else
/// is skipped per entry.
pub fn scan(storage: &dyn StorageBackend, root: &Path) -> DetectionResult {
    let mut result = DetectionResult::new(RuntimeId::Ollama, root);

    let is_empty = storage
        .read_dir(root)
        .map(|entries| entries.is_empty())
        .unwrap_or(true);
    if !storage.is_dir(root) || is_empty {
        return result;
    }
    result.exists = true;

    let files = match manifest_files(storage, root) {
        Ok(files) => files,
        Err(e) => {
            warn!("No manifests directory under {}: {}", root.display(), e);
            result.error = Some(format!(
                "Manifests directory missing under {}",
                root.display()
            ));
            return result;
        }
    };

    for (path, [_registry, _namespace, model, tag]) in files {
        let Some(manifest) = read_manifest(storage, &path) else {
            continue;
        };
        let Some(model_layer) = manifest.model_layer().cloned() else {
            debug!("Skipping {} (no model layer)", path.display());
            continue;
        };
        let Some(weight_path) = blob_path(root, &model_layer.digest) else {
            debug!(
                "Skipping {} (invalid digest {})",
                path.display(),
                model_layer.digest
            );
            continue;
        };

        let mut blob_paths = Vec::new();
        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for digest in manifest.digests() {
            if !seen.insert(digest.to_string()) {
                continue;
            }
            if let Some(blob) = blob_path(root, digest) {
                if !storage.exists(&blob) {
                    missing.push(blob.clone());
                }
                blob_paths.push(blob);
            }
        }

        let name = display_name(&model, &tag);
        let hint = format!("{}:{}", model, tag);
        let modified = storage.metadata(&path).ok().and_then(|m| m.modified);

        result.models.push(DiscoveredModel {
            runtime: RuntimeId::Ollama,
            name,
            path: path.clone(),
            weight_path,
            size: manifest.total_size(),
            format: ModelFormat::Gguf,
            quantization: extract_quantization(&hint),
            parameters: extract_parameters(&hint),
            modified,
            is_link: false,
            digest: Some(model_layer.digest.clone()),
            integrity: if missing.is_empty() {
                ModelIntegrity::Intact
            } else {
                ModelIntegrity::MissingBlobs { missing }
            },
            blob_paths,
            manifest: Some(manifest),
        });
    }

    result.finish();
    debug!(
        "Ollama scan of {} found {} models",
        root.display(),
        result.models.len()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn manifest_json(weight_digest: &str, weight_size: u64, config_size: u64) -> String {
        format!(
            r#"{{
  "schemaVersion": 2,
  "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
  "config": {{"mediaType": "application/vnd.docker.container.image.v1+json", "digest": "sha256:cfg", "size": {config_size}}},
  "layers": [
    {{"mediaType": "application/vnd.ollama.image.model", "digest": "{weight_digest}", "size": {weight_size}}},
    {{"mediaType": "application/vnd.ollama.image.template", "digest": "sha256:tmpl", "size": 100}}
  ]
}}"#
        )
    }

    fn add_model(fs: &MemoryStorage, model: &str, tag: &str, digest_hex: &str, size: u64) {
        let path = format!("/ollama/manifests/registry.ollama.ai/library/{}/{}", model, tag);
        fs.add_file(&path, manifest_json(&format!("sha256:{}", digest_hex), size, 50));
        fs.add_file(format!("/ollama/blobs/sha256-{}", digest_hex), vec![0u8; 4]);
        fs.add_file("/ollama/blobs/sha256-cfg", "{}");
        fs.add_file("/ollama/blobs/sha256-tmpl", "tmpl");
    }

    #[test]
    fn test_total_size_sums_layers_and_config() {
        let manifest: OllamaManifest =
            serde_json::from_str(&manifest_json("sha256:abc", 1000, 50)).unwrap();
        assert_eq!(manifest.total_size(), 1000 + 100 + 50);
    }

    #[test]
    fn test_digest_to_blob_name() {
        assert_eq!(
            digest_to_blob_name("sha256:abcd1234").as_deref(),
            Some("sha256-abcd1234")
        );
        assert_eq!(digest_to_blob_name("sha256"), None);
        assert_eq!(digest_to_blob_name("sha256:../x"), None);
    }

    #[test]
    fn test_scan_nonexistent_root() {
        let fs = MemoryStorage::new();
        let result = scan(&fs, Path::new("/nope"));
        assert!(!result.exists);
        assert!(result.models.is_empty());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_scan_empty_root() {
        let fs = MemoryStorage::new();
        fs.add_dir("/ollama");
        let result = scan(&fs, Path::new("/ollama"));
        assert!(!result.exists);
        assert!(result.models.is_empty());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_scan_missing_manifests_dir_is_scan_error() {
        let fs = MemoryStorage::new();
        fs.add_file("/ollama/blobs/sha256-abc", "x");
        let result = scan(&fs, Path::new("/ollama"));
        assert!(result.exists);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_scan_finds_models_and_names() {
        let fs = MemoryStorage::new();
        add_model(&fs, "llama3", "latest", "aaa", 4000);
        add_model(&fs, "qwen2.5", "7b-instruct-q4_K_M", "bbb", 3000);

        let result = scan(&fs, Path::new("/ollama"));
        assert!(result.exists);
        assert!(result.error.is_none());
        assert_eq!(result.models.len(), 2);

        let llama = result.models.iter().find(|m| m.name == "llama3").unwrap();
        assert_eq!(llama.size, 4000 + 100 + 50);
        assert_eq!(llama.weight_path, PathBuf::from("/ollama/blobs/sha256-aaa"));
        assert_eq!(llama.blob_paths.len(), 3);
        assert_eq!(llama.integrity, ModelIntegrity::Intact);

        let qwen = result
            .models
            .iter()
            .find(|m| m.name == "qwen2.5:7b-instruct-q4_K_M")
            .unwrap();
        assert_eq!(qwen.quantization.as_deref(), Some("Q4_K_M"));
        assert_eq!(qwen.parameters.as_deref(), Some("7B"));

        assert_eq!(result.total_size, 4150 + 3150);
    }

    #[test]
    fn test_scan_skips_malformed_and_layerless() {
        let fs = MemoryStorage::new();
        add_model(&fs, "good", "latest", "ccc", 10);
        fs.add_file(
            "/ollama/manifests/registry.ollama.ai/library/broken/latest",
            "{not json",
        );
        fs.add_file(
            "/ollama/manifests/registry.ollama.ai/library/adapter/latest",
            r#"{"schemaVersion":2,"layers":[{"mediaType":"application/vnd.ollama.image.adapter","digest":"sha256:ddd","size":1}]}"#,
        );
        fs.add_file("/ollama/manifests/stray-file", "{}");

        let result = scan(&fs, Path::new("/ollama"));
        assert!(result.error.is_none());
        assert_eq!(result.models.len(), 1);
        assert_eq!(result.models[0].name, "good");
    }

    #[test]
    fn test_scan_reports_missing_blobs() {
        let fs = MemoryStorage::new();
        fs.add_file(
            "/ollama/manifests/registry.ollama.ai/library/ghost/latest",
            manifest_json("sha256:eee", 10, 5),
        );

        let result = scan(&fs, Path::new("/ollama"));
        assert_eq!(result.models.len(), 1);
        assert!(matches!(
            result.models[0].integrity,
            ModelIntegrity::MissingBlobs { ref missing } if missing.len() == 3
        ));
    }
}
