//! Promotes discovered runtime models into the central store.
//!
//! The weight artifact is streamed into a uniquely named `<dest>.<uuid>.part`,
//! verified, moved into place without replacing anything and only then
//! registered. A failed or cancelled copy removes the partial file and
//! registers nothing; a destination that appears meanwhile is a Conflict.
//! Originals are removed strictly after a successful import, and only with
//! explicit confirmation.

use crate::cancel::CancellationToken;
use crate::config::{LmStudioLayout, ModelShareConfig, OllamaLayout, RuntimeId, StoreConfig};
use crate::detection::ollama::{blob_path, manifest_files, read_manifest};
use crate::detection::{DiscoveredModel, ModelIntegrity};
use crate::error::{ModelShareError, Result};
use crate::model_library::naming::{normalize_filename, normalize_name};
use crate::model_library::registry::CentralRegistry;
use crate::model_library::types::{
    ImportOptions, ImportProgress, ImportResult, ImportStage, NewModelRecord, Provenance,
    StoredModelRecord,
};
use crate::storage::StorageBackend;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bytes copied and, when requested, the SHA-256 of the copied stream.
#[derive(Debug)]
pub(crate) struct CopyOutcome {
    pub bytes: u64,
    pub sha256: Option<String>,
}

/// Stream `src` into `dst`, reporting progress and honouring cancellation.
///
/// `dst` is removed again on any failure.
pub(crate) fn copy_with_progress(
    storage: &dyn StorageBackend,
    src: &Path,
    dst: &Path,
    total_bytes: u64,
    hash: bool,
    cancel: &CancellationToken,
    progress: Option<&mpsc::Sender<ImportProgress>>,
) -> Result<CopyOutcome> {
    let mut hasher = hash.then(Sha256::new);
    let mut copied: u64 = 0;
    let mut cancelled = false;

    let result = storage.copy_file(src, dst, &mut |chunk| {
        if cancel.is_cancelled() {
            cancelled = true;
            return false;
        }
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(chunk);
        }
        copied += chunk.len() as u64;
        if let Some(tx) = progress {
            // Lossy on a full channel; values stay monotonic.
            let _ = tx.try_send(ImportProgress {
                stage: ImportStage::Copying,
                bytes_copied: copied,
                total_bytes,
            });
        }
        true
    });

    match result {
        Ok(bytes) => Ok(CopyOutcome {
            bytes,
            sha256: hasher.map(|h| hex::encode(h.finalize())),
        }),
        Err(e) => {
            remove_partial(storage, dst);
            if cancelled {
                info!("Copy of {} cancelled", src.display());
                Err(ModelShareError::Cancelled)
            } else {
                Err(ModelShareError::io_with_path(e, src))
            }
        }
    }
}

pub(crate) fn remove_partial(storage: &dyn StorageBackend, path: &Path) {
    match storage.remove_file(path) {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial file {}: {}", path.display(), e),
    }
}

/// Per-copy temp path next to `dest`; concurrent copies never share one.
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}", uuid::Uuid::new_v4().simple()));
    name.push(StoreConfig::PARTIAL_SUFFIX);
    dest.with_file_name(name)
}

/// Central-store filename for a discovered model.
pub fn import_filename(model: &DiscoveredModel, target_name: Option<&str>) -> String {
    // Blobs carry no extension.
    let extension = model
        .weight_path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| LmStudioLayout::WEIGHT_EXTENSION.to_string());
    match (model.runtime, target_name) {
        (_, Some(name)) => format!("{}.{}", normalize_name(name), extension),
        // `model:tag` keeps the tag as a separate word.
        (RuntimeId::Ollama, None) => format!(
            "{}.{}",
            normalize_name(&model.name.replace(':', "-")),
            extension
        ),
        (RuntimeId::LmStudio, None) => {
            let filename = model
                .weight_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| model.name.clone());
            normalize_filename(&filename)
        }
    }
}

/// Map a failed no-replace move onto Conflict when the destination is taken.
pub(crate) fn place_error(err: std::io::Error, dest: &Path) -> ModelShareError {
    if err.kind() == std::io::ErrorKind::AlreadyExists {
        ModelShareError::conflict(format!("{} already exists", dest.display()))
    } else {
        ModelShareError::io_with_path(err, dest)
    }
}

/// What happened to the runtime-private copy after an import.
#[derive(Debug, Default)]
struct SourceCleanup {
    removed: bool,
    relink_error: Option<String>,
}

/// Copies discovered models into the central store.
#[derive(Debug, Clone)]
pub struct ModelImporter {
    registry: Arc<CentralRegistry>,
    storage: Arc<dyn StorageBackend>,
    config: Arc<ModelShareConfig>,
}

impl ModelImporter {
    pub fn new(
        registry: Arc<CentralRegistry>,
        storage: Arc<dyn StorageBackend>,
        config: Arc<ModelShareConfig>,
    ) -> Self {
        Self {
            registry,
            storage,
            config,
        }
    }

    /// Promote a discovered model; failures come back as a failed result.
    pub async fn promote(
        &self,
        model: &DiscoveredModel,
        options: &ImportOptions,
        progress: Option<mpsc::Sender<ImportProgress>>,
        cancel: &CancellationToken,
    ) -> ImportResult {
        match self.try_promote(model, options, progress, cancel).await {
            Ok((record, cleanup)) => {
                ImportResult::succeeded(record, cleanup.removed, cleanup.relink_error)
            }
            Err(e) => {
                warn!("Import of {} failed: {}", model.name, e);
                ImportResult::failed(&e)
            }
        }
    }

    async fn try_promote(
        &self,
        model: &DiscoveredModel,
        options: &ImportOptions,
        progress: Option<mpsc::Sender<ImportProgress>>,
        cancel: &CancellationToken,
    ) -> Result<(StoredModelRecord, SourceCleanup)> {
        if let ModelIntegrity::MissingBlobs { missing } = &model.integrity {
            return Err(ModelShareError::NotFound(format!(
                "{} is missing {} blob(s)",
                model.name,
                missing.len()
            )));
        }
        let source_meta = self
            .storage
            .metadata(&model.weight_path)
            .map_err(|e| ModelShareError::io_with_path(e, &model.weight_path))?;

        let filename = import_filename(model, options.target_name.as_deref());
        let root = self.registry.ensure_store()?;
        let dest = self.registry.destination_path(&filename);
        if self.registry.find_by_filename(&filename).await?.is_some()
            || self.storage.entry_exists(&dest)
        {
            return Err(ModelShareError::conflict(format!(
                "{} already exists in {}",
                filename,
                root.display()
            )));
        }

        cancel.check()?;
        let part = partial_path(&dest);
        let expected_digest = match (model.runtime, &model.digest) {
            (RuntimeId::Ollama, Some(digest)) if self.config.verify_digests => digest
                .strip_prefix("sha256:")
                .map(|hex| hex.to_ascii_lowercase()),
            _ => None,
        };

        info!(
            "Importing {} ({} bytes) into {}",
            model.name,
            source_meta.len,
            dest.display()
        );
        let outcome = {
            let storage = self.storage.clone();
            let src = model.weight_path.clone();
            let part = part.clone();
            let cancel = cancel.clone();
            let tx = progress.clone();
            let total = source_meta.len;
            let hash = expected_digest.is_some();
            tokio::task::spawn_blocking(move || {
                copy_with_progress(storage.as_ref(), &src, &part, total, hash, &cancel, tx.as_ref())
            })
            .await
            .map_err(|e| ModelShareError::Other(format!("Copy task failed: {}", e)))??
        };

        send(&progress, ImportStage::Verifying, outcome.bytes, source_meta.len).await;
        if let Err(e) = self.verify(&part, &outcome, source_meta.len, expected_digest.as_deref()) {
            remove_partial(self.storage.as_ref(), &part);
            return Err(e);
        }
        if let Err(e) = cancel.check() {
            remove_partial(self.storage.as_ref(), &part);
            return Err(e);
        }

        // Another import may have claimed the filename since the check above.
        if let Err(e) = self.storage.rename_no_replace(&part, &dest) {
            remove_partial(self.storage.as_ref(), &part);
            return Err(place_error(e, &dest));
        }

        send(&progress, ImportStage::Registering, outcome.bytes, source_meta.len).await;
        let new = NewModelRecord {
            display_name: model.name.clone(),
            filename,
            path: dest.clone(),
            size: outcome.bytes,
            format: model.format,
            quantization: model.quantization.clone(),
            parameters: model.parameters.clone(),
            sha256: outcome.sha256.clone(),
            provenance: Provenance::Discovered {
                runtime: model.runtime,
                source_path: model.path.clone(),
                source_name: model.name.clone(),
            },
        };
        let mut record = match self.registry.register(new).await {
            Ok(record) => record,
            Err(e) => {
                // The no-replace move above means `dest` holds this import's copy.
                remove_partial(self.storage.as_ref(), &dest);
                return Err(e);
            }
        };

        let mut cleanup = SourceCleanup::default();
        if options.delete_source {
            if options.confirm_delete {
                send(&progress, ImportStage::RemovingSource, outcome.bytes, source_meta.len).await;
                match self.remove_source(model) {
                    Ok(()) => cleanup.removed = true,
                    Err(e) => warn!("Imported {} but could not remove source: {}", model.name, e),
                }
                if cleanup.removed && options.relink && model.runtime == RuntimeId::LmStudio {
                    match self.relink_source(model, &record).await {
                        Ok(updated) => record = updated,
                        Err(e) => {
                            warn!("Removed {} but could not relink it: {}", model.path.display(), e);
                            cleanup.relink_error = Some(e.to_string());
                        }
                    }
                }
            } else {
                warn!(
                    "Keeping source of {}: deletion was requested without confirmation",
                    model.name
                );
            }
        }

        send(&progress, ImportStage::Complete, outcome.bytes, source_meta.len).await;
        info!("Imported {} as {}", model.name, record.id);
        Ok((record, cleanup))
    }

    fn verify(
        &self,
        part: &Path,
        outcome: &CopyOutcome,
        expected_size: u64,
        expected_digest: Option<&str>,
    ) -> Result<()> {
        let written = self
            .storage
            .metadata(part)
            .map_err(|e| ModelShareError::io_with_path(e, part))?
            .len;
        if outcome.bytes != expected_size || written != expected_size {
            return Err(ModelShareError::Io {
                message: format!(
                    "Size mismatch after copy: expected {}, copied {}, on disk {}",
                    expected_size, outcome.bytes, written
                ),
                path: Some(part.to_path_buf()),
                source: None,
            });
        }

        if let (Some(expected), Some(actual)) = (expected_digest, outcome.sha256.as_deref()) {
            if expected != actual {
                return Err(ModelShareError::HashMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Remove the runtime-private copy after a successful import.
    fn remove_source(&self, model: &DiscoveredModel) -> Result<()> {
        match model.runtime {
            RuntimeId::LmStudio => {
                self.storage
                    .remove_file(&model.path)
                    .map_err(|e| ModelShareError::io_with_path(e, &model.path))?;
                info!("Removed {}", model.path.display());
                Ok(())
            }
            RuntimeId::Ollama => self.remove_manifest_model(model),
        }
    }

    /// Put a link to the central copy where a removed flat file was.
    async fn relink_source(
        &self,
        model: &DiscoveredModel,
        record: &StoredModelRecord,
    ) -> Result<StoredModelRecord> {
        self.storage
            .symlink(&record.path, &model.path)
            .map_err(|e| ModelShareError::SymlinkFailed {
                src: record.path.clone(),
                dest: model.path.clone(),
                reason: e.to_string(),
            })?;
        match self
            .registry
            .mark_linked(&record.id, RuntimeId::LmStudio, Some(model.name.clone()))
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) => {
                remove_partial(self.storage.as_ref(), &model.path);
                Err(e)
            }
        }
    }

    /// Remove a manifest and every blob no other manifest still references.
    fn remove_manifest_model(&self, model: &DiscoveredModel) -> Result<()> {
        let root = model
            .weight_path
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| {
                ModelShareError::malformed(Some(model.weight_path.clone()), "Unexpected blob path")
            })?
            .to_path_buf();

        self.storage
            .remove_file(&model.path)
            .map_err(|e| ModelShareError::io_with_path(e, &model.path))?;
        info!("Removed manifest {}", model.path.display());

        // The manifest is gone; from here on failures only leave blobs behind.
        let files = match manifest_files(self.storage.as_ref(), &root) {
            Ok(files) => files,
            Err(e) => {
                warn!("Keeping blobs of {}: cannot list manifests: {}", model.name, e);
                return Ok(());
            }
        };
        let mut still_referenced = HashSet::new();
        for (path, _) in files {
            if let Some(manifest) = read_manifest(self.storage.as_ref(), &path) {
                still_referenced.extend(manifest.digests().filter_map(|d| blob_path(&root, d)));
            }
        }

        for blob in &model.blob_paths {
            if still_referenced.contains(blob) {
                debug!("Keeping shared blob {}", blob.display());
                continue;
            }
            match self.storage.remove_file(blob) {
                Ok(()) => debug!("Removed blob {}", blob.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove blob {}: {}", blob.display(), e),
            }
        }

        // Drop now-empty manifest directories up to `manifests/`.
        let manifests_dir = root.join(OllamaLayout::MANIFESTS_DIR);
        let mut dir = model.path.parent();
        while let Some(current) = dir {
            if current == manifests_dir || !current.starts_with(&manifests_dir) {
                break;
            }
            if self.storage.remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
        Ok(())
    }
}

async fn send(
    progress: &Option<mpsc::Sender<ImportProgress>>,
    stage: ImportStage,
    bytes_copied: u64,
    total_bytes: u64,
) {
    if let Some(tx) = progress {
        let _ = tx
            .send(ImportProgress {
                stage,
                bytes_copied,
                total_bytes,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelShareConfig;
    use crate::detection::{lmstudio, ollama};
    use crate::storage::{
        ChunkCallback, DirEntry, EntryMetadata, LocalStorage, MemoryStorage,
    };
    use std::io;
    use tempfile::TempDir;

    const WEIGHTS: &[u8] = b"GGUF fake weights for testing";

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn setup() -> (Arc<MemoryStorage>, Arc<CentralRegistry>, ModelImporter) {
        let storage = Arc::new(MemoryStorage::new());
        let registry = Arc::new(CentralRegistry::new("/store", storage.clone()));
        let importer = ModelImporter::new(
            registry.clone(),
            storage.clone(),
            Arc::new(ModelShareConfig::default()),
        );
        (storage, registry, importer)
    }

    fn leftover_partials(storage: &dyn StorageBackend, dir: &Path) -> Vec<String> {
        storage
            .read_dir(dir)
            .map(|entries| {
                entries
                    .into_iter()
                    .map(|e| e.name)
                    .filter(|name| name.ends_with(StoreConfig::PARTIAL_SUFFIX))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn add_ollama_model(storage: &MemoryStorage, model: &str, weights: &[u8], digest_hex: &str) {
        let manifest = format!(
            r#"{{"schemaVersion":2,"config":{{"digest":"sha256:cfg","size":2}},"layers":[{{"mediaType":"application/vnd.ollama.image.model","digest":"sha256:{}","size":{}}},{{"mediaType":"application/vnd.ollama.image.license","digest":"sha256:lic","size":3}}]}}"#,
            digest_hex,
            weights.len()
        );
        storage.add_file(
            format!("/ollama/manifests/registry.ollama.ai/library/{}/latest", model),
            manifest,
        );
        storage.add_file(format!("/ollama/blobs/sha256-{}", digest_hex), weights.to_vec());
        storage.add_file("/ollama/blobs/sha256-cfg", "{}");
        storage.add_file("/ollama/blobs/sha256-lic", "MIT");
    }

    #[tokio::test]
    async fn test_promote_flat_file() {
        let (storage, registry, importer) = setup();
        storage.add_file("/lms/pub/Model/Model-7B-Q4_K_M.gguf", WEIGHTS.to_vec());
        let scan = lmstudio::scan(storage.as_ref(), Path::new("/lms"), Some(Path::new("/store")));
        let model = &scan.models[0];

        let (tx, mut rx) = mpsc::channel(64);
        let result = importer
            .promote(model, &ImportOptions::default(), Some(tx), &CancellationToken::new())
            .await;

        assert!(result.success, "{:?}", result.error);
        let record = result.record.unwrap();
        assert_eq!(record.filename, "model-7b-q4_k_m.gguf");
        assert_eq!(storage.file_bytes(&record.path).unwrap(), WEIGHTS);
        assert!(leftover_partials(storage.as_ref(), Path::new("/store")).is_empty());
        assert!(storage.exists(&model.path));
        assert!(registry.find_by_source_path(&model.path).await.unwrap().is_some());

        let mut last = 0;
        let mut stages = Vec::new();
        while let Ok(p) = rx.try_recv() {
            assert!(p.bytes_copied >= last);
            last = p.bytes_copied;
            stages.push(p.stage);
        }
        assert_eq!(stages.last(), Some(&ImportStage::Complete));
    }

    #[tokio::test]
    async fn test_promote_ollama_copies_blob_not_manifest() {
        let (storage, _registry, importer) = setup();
        let digest = sha256_hex(WEIGHTS);
        add_ollama_model(&storage, "llama3", WEIGHTS, &digest);
        let scan = ollama::scan(storage.as_ref(), Path::new("/ollama"));

        let result = importer
            .promote(&scan.models[0], &ImportOptions::default(), None, &CancellationToken::new())
            .await;

        assert!(result.success, "{:?}", result.error);
        let record = result.record.unwrap();
        assert_eq!(record.filename, "llama3.gguf");
        assert_eq!(storage.file_bytes(&record.path).unwrap(), WEIGHTS);
        assert_eq!(record.sha256.as_deref(), Some(digest.as_str()));
    }

    #[tokio::test]
    async fn test_digest_mismatch_removes_partial() {
        let (storage, registry, importer) = setup();
        add_ollama_model(&storage, "bad", WEIGHTS, "0000");
        let scan = ollama::scan(storage.as_ref(), Path::new("/ollama"));

        let result = importer
            .promote(&scan.models[0], &ImportOptions::default(), None, &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert!(leftover_partials(storage.as_ref(), Path::new("/store")).is_empty());
        assert!(!storage.exists(Path::new("/store/bad.gguf")));
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_import_leaves_nothing() {
        let (storage, registry, importer) = setup();
        storage.add_file("/lms/a/b/big.gguf", vec![1u8; 256 * 1024]);
        let scan = lmstudio::scan(storage.as_ref(), Path::new("/lms"), None);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = importer
            .promote(&scan.models[0], &ImportOptions::default(), None, &cancel)
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::Cancelled));
        assert!(leftover_partials(storage.as_ref(), Path::new("/store")).is_empty());
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_destination_conflicts() {
        let (storage, _registry, importer) = setup();
        storage.add_file("/lms/a/b/same.gguf", "new");
        storage.add_file("/store/same.gguf", "old");
        let scan = lmstudio::scan(storage.as_ref(), Path::new("/lms"), None);

        let result = importer
            .promote(&scan.models[0], &ImportOptions::default(), None, &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::Conflict));
        assert_eq!(storage.file_bytes("/store/same.gguf").unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_delete_requires_confirmation() {
        let (storage, _registry, importer) = setup();
        storage.add_file("/lms/a/b/keep.gguf", "w");
        let scan = lmstudio::scan(storage.as_ref(), Path::new("/lms"), None);

        let options = ImportOptions {
            delete_source: true,
            confirm_delete: false,
            ..Default::default()
        };
        let result = importer
            .promote(&scan.models[0], &options, None, &CancellationToken::new())
            .await;
        assert!(result.success);
        assert!(!result.source_removed);
        assert!(storage.exists(Path::new("/lms/a/b/keep.gguf")));
    }

    #[tokio::test]
    async fn test_delete_and_relink_flat_file() {
        let (storage, _registry, importer) = setup();
        storage.add_file("/lms/a/b/move.gguf", "w");
        let scan = lmstudio::scan(storage.as_ref(), Path::new("/lms"), None);

        let options = ImportOptions {
            delete_source: true,
            confirm_delete: true,
            relink: true,
            ..Default::default()
        };
        let result = importer
            .promote(&scan.models[0], &options, None, &CancellationToken::new())
            .await;

        assert!(result.success);
        assert!(result.source_removed);
        assert!(storage.is_symlink(Path::new("/lms/a/b/move.gguf")));
        let record = result.record.unwrap();
        assert!(record.linked_runtimes.contains(&RuntimeId::LmStudio));

        let rescan = lmstudio::scan(storage.as_ref(), Path::new("/lms"), Some(Path::new("/store")));
        assert!(rescan.models.is_empty());
    }

    #[tokio::test]
    async fn test_delete_ollama_keeps_shared_blobs() {
        let (storage, _registry, importer) = setup();
        let digest_a = sha256_hex(b"aaaa");
        add_ollama_model(&storage, "first", b"aaaa", &digest_a);
        let digest_b = sha256_hex(b"bbbb");
        add_ollama_model(&storage, "second", b"bbbb", &digest_b);

        let scan = ollama::scan(storage.as_ref(), Path::new("/ollama"));
        let first = scan.models.iter().find(|m| m.name == "first").unwrap();

        let options = ImportOptions {
            delete_source: true,
            confirm_delete: true,
            ..Default::default()
        };
        let result = importer
            .promote(first, &options, None, &CancellationToken::new())
            .await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.source_removed);
        assert!(!storage.exists(&first.path));
        assert!(!storage.exists(&PathBuf::from(format!("/ollama/blobs/sha256-{}", digest_a))));
        assert!(storage.exists(Path::new("/ollama/blobs/sha256-cfg")));
        assert!(storage.exists(Path::new("/ollama/blobs/sha256-lic")));
        assert!(!storage.exists(Path::new("/ollama/manifests/registry.ollama.ai/library/first")));

        let rescan = ollama::scan(storage.as_ref(), Path::new("/ollama"));
        assert_eq!(rescan.models.len(), 1);
        assert_eq!(rescan.models[0].integrity, ModelIntegrity::Intact);
    }

    #[tokio::test]
    async fn test_missing_blobs_is_not_found() {
        let (storage, _registry, importer) = setup();
        storage.add_file(
            "/ollama/manifests/registry.ollama.ai/library/ghost/latest",
            r#"{"layers":[{"mediaType":"application/vnd.ollama.image.model","digest":"sha256:abc","size":1}]}"#,
        );
        let scan = ollama::scan(storage.as_ref(), Path::new("/ollama"));

        let result = importer
            .promote(&scan.models[0], &ImportOptions::default(), None, &CancellationToken::new())
            .await;
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::NotFound));
    }

    #[test]
    fn test_partial_paths_are_unique() {
        let dest = Path::new("/store/model.gguf");
        let a = partial_path(dest);
        let b = partial_path(dest);
        assert_ne!(a, b);
        assert_eq!(a.parent(), dest.parent());
        assert!(a.to_string_lossy().ends_with(StoreConfig::PARTIAL_SUFFIX));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_imports_of_same_filename() {
        const SIZE: usize = 4 * 1024 * 1024;

        for _ in 0..8 {
            let temp = TempDir::new().unwrap();
            let lms = temp.path().join("lms");
            let store = temp.path().join("store");
            std::fs::create_dir_all(lms.join("a/x")).unwrap();
            std::fs::create_dir_all(lms.join("b/y")).unwrap();
            std::fs::write(lms.join("a/x/same.gguf"), vec![0xAAu8; SIZE]).unwrap();
            std::fs::write(lms.join("b/y/same.gguf"), vec![0xBBu8; SIZE]).unwrap();

            let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new());
            let registry = Arc::new(CentralRegistry::new(store.clone(), storage.clone()));
            let importer = ModelImporter::new(
                registry.clone(),
                storage.clone(),
                Arc::new(ModelShareConfig::default()),
            );
            let scan = lmstudio::scan(storage.as_ref(), &lms, Some(store.as_path()));
            assert_eq!(scan.models.len(), 2);

            let cancel = CancellationToken::new();
            let options = ImportOptions::default();
            let (first, second) = tokio::join!(
                importer.promote(&scan.models[0], &options, None, &cancel),
                importer.promote(&scan.models[1], &options, None, &cancel),
            );

            let (winner, loser) = match (first.success, second.success) {
                (true, false) => (first, second),
                (false, true) => (second, first),
                other => panic!("expected exactly one import to succeed, got {:?}", other),
            };
            assert_eq!(loser.error_kind, Some(crate::error::ErrorKind::Conflict));

            let record = winner.record.unwrap();
            let source = std::fs::read(record.source_path().unwrap()).unwrap();
            let stored = std::fs::read(&record.path).unwrap();
            assert_eq!(stored.len(), SIZE);
            assert!(stored.iter().all(|b| *b == source[0]));

            assert_eq!(registry.list().await.unwrap().len(), 1);
            assert!(leftover_partials(storage.as_ref(), &store).is_empty());
        }
    }

    /// Memory storage that cannot create links.
    #[derive(Debug, Default)]
    struct NoLinks(MemoryStorage);

    impl StorageBackend for NoLinks {
        fn metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
            self.0.metadata(path)
        }
        fn symlink_metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
            self.0.symlink_metadata(path)
        }
        fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
            self.0.read_dir(path)
        }
        fn walk_files(
            &self,
            root: &Path,
            descend: &dyn Fn(&Path) -> bool,
        ) -> io::Result<Vec<DirEntry>> {
            self.0.walk_files(root, descend)
        }
        fn read_to_string(&self, path: &Path) -> io::Result<String> {
            self.0.read_to_string(path)
        }
        fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            self.0.write_atomic(path, contents)
        }
        fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
            self.0.read_link(path)
        }
        fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
            self.0.canonicalize(path)
        }
        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            self.0.create_dir_all(path)
        }
        fn copy_file(
            &self,
            src: &Path,
            dst: &Path,
            on_chunk: &mut ChunkCallback<'_>,
        ) -> io::Result<u64> {
            self.0.copy_file(src, dst, on_chunk)
        }
        fn symlink(&self, _target: &Path, _link: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "links disabled"))
        }
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            self.0.rename(from, to)
        }
        fn rename_no_replace(&self, from: &Path, to: &Path) -> io::Result<()> {
            self.0.rename_no_replace(from, to)
        }
        fn remove_file(&self, path: &Path) -> io::Result<()> {
            self.0.remove_file(path)
        }
        fn remove_dir(&self, path: &Path) -> io::Result<()> {
            self.0.remove_dir(path)
        }
        fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            self.0.remove_dir_all(path)
        }
    }

    #[tokio::test]
    async fn test_failed_relink_still_reports_removed_source() {
        let storage = Arc::new(NoLinks::default());
        storage.0.add_file("/lms/a/b/move.gguf", "w");
        let registry = Arc::new(CentralRegistry::new("/store", storage.clone()));
        let importer = ModelImporter::new(
            registry.clone(),
            storage.clone(),
            Arc::new(ModelShareConfig::default()),
        );
        let scan = lmstudio::scan(storage.as_ref(), Path::new("/lms"), None);

        let options = ImportOptions {
            delete_source: true,
            confirm_delete: true,
            relink: true,
            ..Default::default()
        };
        let result = importer
            .promote(&scan.models[0], &options, None, &CancellationToken::new())
            .await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.source_removed);
        assert!(result.relink_error.is_some());
        assert!(!storage.entry_exists(Path::new("/lms/a/b/move.gguf")));
        let record = registry.get(result.model_id.as_deref().unwrap()).await.unwrap();
        assert!(record.linked_runtimes.is_empty());
    }
}
