//! Install and uninstall central records into runtimes.
//!
//! Ollama installs go through its create API, pointed at the central file.
//! LM Studio installs place a link (or a copy) under its model tree. The
//! record's link set only changes after the runtime side succeeded.

use crate::cancel::CancellationToken;
use crate::config::{ModelShareConfig, RuntimeId, StoreConfig};
use crate::error::{ModelShareError, Result};
use crate::model_library::importer::{
    copy_with_progress, partial_path, place_error, remove_partial,
};
use crate::model_library::naming::derive_ollama_name;
use crate::model_library::registry::CentralRegistry;
use crate::model_library::types::{InstallOptions, InstallResult, StoredModelRecord};
use crate::platform::PathResolver;
use crate::runtime::ManifestRuntimeApi;
use crate::storage::{EntryKind, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn file_stem(record: &StoredModelRecord) -> String {
    Path::new(&record.filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| record.filename.clone())
}

#[derive(Clone)]
pub struct ModelInstaller {
    registry: Arc<CentralRegistry>,
    storage: Arc<dyn StorageBackend>,
    resolver: PathResolver,
    ollama: Arc<dyn ManifestRuntimeApi>,
    config: Arc<ModelShareConfig>,
}

impl std::fmt::Debug for ModelInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInstaller")
            .field("store", &self.registry.store_root())
            .field("link_installs", &self.config.link_installs)
            .finish()
    }
}

impl ModelInstaller {
    pub fn new(
        registry: Arc<CentralRegistry>,
        storage: Arc<dyn StorageBackend>,
        resolver: PathResolver,
        ollama: Arc<dyn ManifestRuntimeApi>,
        config: Arc<ModelShareConfig>,
    ) -> Self {
        Self {
            registry,
            storage,
            resolver,
            ollama,
            config,
        }
    }

    pub async fn install(
        &self,
        model_id: &str,
        runtime: RuntimeId,
        options: &InstallOptions,
    ) -> InstallResult {
        match self.try_install(model_id, runtime, options).await {
            Ok(record) => {
                InstallResult::succeeded(runtime, model_id, record.aliases.get(&runtime).cloned())
            }
            Err(e) => {
                warn!("Install of {} into {} failed: {}", model_id, runtime, e);
                InstallResult::failed(runtime, model_id, &e)
            }
        }
    }

    pub async fn uninstall(&self, model_id: &str, runtime: RuntimeId) -> InstallResult {
        match self.try_uninstall(model_id, runtime).await {
            Ok(alias) => InstallResult::succeeded(runtime, model_id, alias),
            Err(e) => {
                warn!("Uninstall of {} from {} failed: {}", model_id, runtime, e);
                InstallResult::failed(runtime, model_id, &e)
            }
        }
    }

    /// Install a record, returning it with the runtime added to its link set.
    pub async fn try_install(
        &self,
        model_id: &str,
        runtime: RuntimeId,
        options: &InstallOptions,
    ) -> Result<StoredModelRecord> {
        let record = self.registry.get(model_id).await?;
        if !record.format.compatible_runtimes().contains(&runtime) {
            return Err(ModelShareError::InvalidParams {
                message: format!(
                    "{} models cannot be installed into {}",
                    record.format,
                    runtime.display_name()
                ),
            });
        }
        if !self.storage.is_file(&record.path) {
            return Err(ModelShareError::FileNotFound(record.path.clone()));
        }

        match runtime {
            RuntimeId::Ollama => self.install_ollama(&record, options).await,
            RuntimeId::LmStudio => self.install_lmstudio(&record).await,
        }
    }

    /// Uninstall a record, returning the alias it had been installed under.
    pub async fn try_uninstall(&self, model_id: &str, runtime: RuntimeId) -> Result<Option<String>> {
        let record = self.registry.get(model_id).await?;
        if !record.linked_runtimes.contains(&runtime) {
            return Err(ModelShareError::NotFound(format!(
                "{} is not installed in {}",
                record.display_name,
                runtime.display_name()
            )));
        }
        let alias = record.aliases.get(&runtime).cloned();

        match runtime {
            RuntimeId::Ollama => self.uninstall_ollama(&record).await?,
            RuntimeId::LmStudio => self.uninstall_lmstudio(&record)?,
        }

        self.registry.mark_unlinked(&record.id, runtime).await?;
        info!("Uninstalled {} from {}", record.id, runtime.display_name());
        Ok(alias)
    }

    async fn ensure_ollama_reachable(&self) -> Result<()> {
        if self.ollama.is_reachable().await {
            Ok(())
        } else {
            Err(ModelShareError::Unreachable {
                runtime: RuntimeId::Ollama,
                message: format!("No response from {}", self.config.base_url(RuntimeId::Ollama)),
            })
        }
    }

    async fn install_ollama(
        &self,
        record: &StoredModelRecord,
        options: &InstallOptions,
    ) -> Result<StoredModelRecord> {
        self.ensure_ollama_reachable().await?;

        let name = derive_ollama_name(options.name.as_deref().unwrap_or(&file_stem(record)));
        self.ollama
            .create_model(
                &name,
                &record.path,
                record.sha256.as_deref(),
                options.system_prompt.as_deref(),
            )
            .await?;

        match self
            .registry
            .mark_linked(&record.id, RuntimeId::Ollama, Some(name.clone()))
            .await
        {
            Ok(updated) => {
                info!("Installed {} into Ollama as {}", record.id, name);
                Ok(updated)
            }
            Err(e) => {
                if let Err(rollback) = self.ollama.delete_model(&name).await {
                    warn!("Failed to roll back Ollama model {}: {}", name, rollback);
                }
                Err(e)
            }
        }
    }

    async fn uninstall_ollama(&self, record: &StoredModelRecord) -> Result<()> {
        self.ensure_ollama_reachable().await?;

        let name = record
            .aliases
            .get(&RuntimeId::Ollama)
            .cloned()
            .unwrap_or_else(|| derive_ollama_name(&file_stem(record)));
        match self.ollama.delete_model(&name).await {
            Ok(()) => Ok(()),
            Err(ModelShareError::NotFound(_)) => {
                warn!("Ollama model {} was already removed", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn lmstudio_root(&self) -> Result<PathBuf> {
        self.resolver
            .default_root(RuntimeId::LmStudio)
            .ok_or_else(|| ModelShareError::Config {
                message: "No LM Studio storage location for this platform".to_string(),
            })
    }

    /// True when LM Studio's root already resolves into the central store.
    fn lmstudio_redirected(&self, root: &Path) -> bool {
        match (
            self.storage.canonicalize(root),
            self.storage.canonicalize(self.registry.store_root()),
        ) {
            (Ok(root), Ok(store)) => root.starts_with(store),
            _ => false,
        }
    }

    /// `<root>/modelshare/<stem>/<filename>` and its alias.
    fn lmstudio_destination(root: &Path, record: &StoredModelRecord) -> (PathBuf, String) {
        let stem = file_stem(record);
        let dir = root.join(StoreConfig::LMSTUDIO_PUBLISHER).join(&stem);
        (
            dir.join(&record.filename),
            format!("{}/{}", StoreConfig::LMSTUDIO_PUBLISHER, stem),
        )
    }

    fn points_to(&self, link: &Path, target: &Path) -> bool {
        match (self.storage.canonicalize(link), self.storage.canonicalize(target)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    async fn install_lmstudio(&self, record: &StoredModelRecord) -> Result<StoredModelRecord> {
        let root = self.lmstudio_root()?;
        let (dest, alias) = Self::lmstudio_destination(&root, record);

        if self.lmstudio_redirected(&root) {
            debug!("LM Studio root {} is redirected; recording link only", root.display());
            return self
                .registry
                .mark_linked(&record.id, RuntimeId::LmStudio, Some(alias))
                .await;
        }

        if self.storage.entry_exists(&dest) {
            if self.points_to(&dest, &record.path) {
                debug!("{} already links to {}", dest.display(), record.path.display());
                return self
                    .registry
                    .mark_linked(&record.id, RuntimeId::LmStudio, Some(alias))
                    .await;
            }
            return Err(ModelShareError::conflict(format!(
                "{} already exists",
                dest.display()
            )));
        }

        if let Some(parent) = dest.parent() {
            self.storage
                .create_dir_all(parent)
                .map_err(|e| ModelShareError::io_with_path(e, parent))?;
        }

        let linked = self.config.link_installs
            && match self.storage.symlink(&record.path, &dest) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "Linking {} failed ({}), copying instead",
                        dest.display(),
                        e
                    );
                    false
                }
            };
        if !linked {
            self.copy_into(&record.path, &dest, record.size).await?;
        }

        match self
            .registry
            .mark_linked(&record.id, RuntimeId::LmStudio, Some(alias))
            .await
        {
            Ok(updated) => {
                info!(
                    "Installed {} into LM Studio at {} ({})",
                    record.id,
                    dest.display(),
                    if linked { "link" } else { "copy" }
                );
                Ok(updated)
            }
            Err(e) => {
                remove_partial(self.storage.as_ref(), &dest);
                self.remove_empty_dirs(&root, &dest);
                Err(e)
            }
        }
    }

    async fn copy_into(&self, src: &Path, dest: &Path, size: u64) -> Result<()> {
        let part = partial_path(dest);
        let storage = self.storage.clone();
        let (src_owned, part_owned) = (src.to_path_buf(), part.clone());
        tokio::task::spawn_blocking(move || {
            copy_with_progress(
                storage.as_ref(),
                &src_owned,
                &part_owned,
                size,
                false,
                &CancellationToken::new(),
                None,
            )
        })
        .await
        .map_err(|e| ModelShareError::Other(format!("Copy task failed: {}", e)))??;

        if let Err(e) = self.storage.rename_no_replace(&part, dest) {
            remove_partial(self.storage.as_ref(), &part);
            return Err(place_error(e, dest));
        }
        Ok(())
    }

    fn uninstall_lmstudio(&self, record: &StoredModelRecord) -> Result<()> {
        let root = self.lmstudio_root()?;
        if self.lmstudio_redirected(&root) {
            return Ok(());
        }

        // Links created by install or by relinking an import, plus an
        // install-time copy.
        let (dest, _) = Self::lmstudio_destination(&root, record);
        let mut targets: Vec<PathBuf> = match self.storage.walk_files(&root, &|_| true) {
            Ok(entries) => entries
                .into_iter()
                .filter(|e| e.kind == EntryKind::Symlink && self.points_to(&e.path, &record.path))
                .map(|e| e.path)
                .collect(),
            Err(e) => {
                debug!("Could not walk {}: {}", root.display(), e);
                Vec::new()
            }
        };
        if self.storage.is_file(&dest) && !targets.contains(&dest) {
            targets.push(dest.clone());
        }

        for target in &targets {
            self.storage
                .remove_file(target)
                .map_err(|e| ModelShareError::io_with_path(e, target))?;
            info!("Removed {}", target.display());
        }
        self.remove_empty_dirs(&root, &dest);
        Ok(())
    }

    /// Remove the install directories above `dest` when they are empty.
    fn remove_empty_dirs(&self, root: &Path, dest: &Path) {
        let mut dir = dest.parent();
        while let Some(current) = dir {
            if current == root || !current.starts_with(root) {
                break;
            }
            if self.storage.remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::error::ErrorKind;
    use crate::model_library::types::{NewModelRecord, Provenance};
    use crate::model_library::ModelFormat;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeOllama {
        down: AtomicBool,
        models: Mutex<Vec<(String, PathBuf, Option<String>)>>,
    }

    #[async_trait]
    impl ManifestRuntimeApi for FakeOllama {
        async fn is_reachable(&self) -> bool {
            !self.down.load(Ordering::SeqCst)
        }

        async fn create_model(
            &self,
            name: &str,
            weight_path: &Path,
            _known_sha256: Option<&str>,
            system_prompt: Option<&str>,
        ) -> Result<()> {
            self.models.lock().unwrap().push((
                name.to_string(),
                weight_path.to_path_buf(),
                system_prompt.map(String::from),
            ));
            Ok(())
        }

        async fn delete_model(&self, name: &str) -> Result<()> {
            let mut models = self.models.lock().unwrap();
            let before = models.len();
            models.retain(|(n, _, _)| n != name);
            if models.len() == before {
                return Err(ModelShareError::NotFound(name.to_string()));
            }
            Ok(())
        }
    }

    struct Fixture {
        storage: Arc<MemoryStorage>,
        registry: Arc<CentralRegistry>,
        ollama: Arc<FakeOllama>,
        installer: ModelInstaller,
    }

    fn fixture(link_installs: bool) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        storage.add_dir("/lms");
        let config = Arc::new(ModelShareConfig {
            central_store: Some(PathBuf::from("/store")),
            lmstudio: RuntimeConfig {
                base_url: None,
                storage_root: Some(PathBuf::from("/lms")),
            },
            link_installs,
            ..Default::default()
        });
        let registry = Arc::new(CentralRegistry::new("/store", storage.clone()));
        let ollama = Arc::new(FakeOllama::default());
        let installer = ModelInstaller::new(
            registry.clone(),
            storage.clone(),
            PathResolver::new(config.clone(), storage.clone()),
            ollama.clone(),
            config,
        );
        Fixture {
            storage,
            registry,
            ollama,
            installer,
        }
    }

    async fn add_record(fx: &Fixture, filename: &str) -> StoredModelRecord {
        let path = PathBuf::from("/store").join(filename);
        fx.storage.add_file(&path, "weights");
        fx.registry
            .register(NewModelRecord {
                display_name: filename.to_string(),
                filename: filename.to_string(),
                path,
                size: 7,
                format: ModelFormat::Gguf,
                quantization: None,
                parameters: None,
                sha256: None,
                provenance: Provenance::Adopted,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_install_then_uninstall_lmstudio() {
        let fx = fixture(true);
        let record = add_record(&fx, "qwen-7b.gguf").await;

        let result = fx
            .installer
            .install(&record.id, RuntimeId::LmStudio, &InstallOptions::default())
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.installed_name.as_deref(), Some("modelshare/qwen-7b"));

        let link = Path::new("/lms/modelshare/qwen-7b/qwen-7b.gguf");
        assert!(fx.storage.is_symlink(link));
        let stored = fx.registry.get(&record.id).await.unwrap();
        assert!(stored.linked_runtimes.contains(&RuntimeId::LmStudio));

        let result = fx.installer.uninstall(&record.id, RuntimeId::LmStudio).await;
        assert!(result.success, "{:?}", result.error);
        assert!(!fx.storage.entry_exists(link));
        assert!(!fx.storage.entry_exists(Path::new("/lms/modelshare")));
        assert!(fx.storage.exists(&record.path));
        let stored = fx.registry.get(&record.id).await.unwrap();
        assert!(stored.linked_runtimes.is_empty());
    }

    #[tokio::test]
    async fn test_install_lmstudio_copies_when_links_disabled() {
        let fx = fixture(false);
        let record = add_record(&fx, "copy.gguf").await;

        let result = fx
            .installer
            .install(&record.id, RuntimeId::LmStudio, &InstallOptions::default())
            .await;
        assert!(result.success, "{:?}", result.error);

        let dest = Path::new("/lms/modelshare/copy/copy.gguf");
        assert!(!fx.storage.is_symlink(dest));
        assert_eq!(fx.storage.file_bytes(dest).unwrap(), b"weights");
        let leftovers: Vec<_> = fx
            .storage
            .read_dir(Path::new("/lms/modelshare/copy"))
            .unwrap()
            .into_iter()
            .filter(|e| e.name.ends_with(StoreConfig::PARTIAL_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());

        let result = fx.installer.uninstall(&record.id, RuntimeId::LmStudio).await;
        assert!(result.success);
        assert!(!fx.storage.entry_exists(dest));
    }

    #[tokio::test]
    async fn test_install_lmstudio_conflicting_file() {
        let fx = fixture(true);
        let record = add_record(&fx, "taken.gguf").await;
        fx.storage.add_file("/lms/modelshare/taken/taken.gguf", "other");

        let result = fx
            .installer
            .install(&record.id, RuntimeId::LmStudio, &InstallOptions::default())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::Conflict));
        assert!(!fx.registry.get(&record.id).await.unwrap().is_linked());
    }

    #[tokio::test]
    async fn test_install_into_redirected_lmstudio_only_records() {
        let fx = fixture(true);
        let record = add_record(&fx, "shared.gguf").await;
        fx.storage.remove_dir(Path::new("/lms")).unwrap();
        fx.storage
            .symlink(Path::new("/store"), Path::new("/lms"))
            .unwrap();

        let result = fx
            .installer
            .install(&record.id, RuntimeId::LmStudio, &InstallOptions::default())
            .await;
        assert!(result.success, "{:?}", result.error);
        assert!(!fx.storage.entry_exists(Path::new("/store/modelshare")));

        let result = fx.installer.uninstall(&record.id, RuntimeId::LmStudio).await;
        assert!(result.success);
        assert!(fx.storage.exists(&record.path));
    }

    #[tokio::test]
    async fn test_install_ollama_uses_custom_name() {
        let fx = fixture(true);
        let record = add_record(&fx, "llama_3_8b.gguf").await;

        let options = InstallOptions {
            name: Some("My Llama".to_string()),
            system_prompt: Some("Be brief.".to_string()),
        };
        let result = fx
            .installer
            .install(&record.id, RuntimeId::Ollama, &options)
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.installed_name.as_deref(), Some("my-llama"));

        let models = fx.ollama.models.lock().unwrap().clone();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].1, record.path);
        assert_eq!(models[0].2.as_deref(), Some("Be brief."));
    }

    #[tokio::test]
    async fn test_install_ollama_unreachable_does_nothing() {
        let fx = fixture(true);
        let record = add_record(&fx, "offline.gguf").await;
        fx.ollama.down.store(true, Ordering::SeqCst);

        let result = fx
            .installer
            .install(&record.id, RuntimeId::Ollama, &InstallOptions::default())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::Unreachable));
        assert!(fx.ollama.models.lock().unwrap().is_empty());
        assert!(!fx.registry.get(&record.id).await.unwrap().is_linked());
    }

    #[tokio::test]
    async fn test_uninstall_failure_keeps_link_set() {
        let fx = fixture(true);
        let record = add_record(&fx, "keep.gguf").await;
        let result = fx
            .installer
            .install(&record.id, RuntimeId::Ollama, &InstallOptions::default())
            .await;
        assert!(result.success);

        fx.ollama.down.store(true, Ordering::SeqCst);
        let result = fx.installer.uninstall(&record.id, RuntimeId::Ollama).await;
        assert!(!result.success);
        let stored = fx.registry.get(&record.id).await.unwrap();
        assert!(stored.linked_runtimes.contains(&RuntimeId::Ollama));

        fx.ollama.down.store(false, Ordering::SeqCst);
        let result = fx.installer.uninstall(&record.id, RuntimeId::Ollama).await;
        assert!(result.success);
        assert_eq!(result.installed_name.as_deref(), Some("keep"));
        assert!(fx.ollama.models.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_uninstall_not_installed() {
        let fx = fixture(true);
        let record = add_record(&fx, "never.gguf").await;
        let result = fx.installer.uninstall(&record.id, RuntimeId::LmStudio).await;
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_incompatible_format_rejected() {
        let fx = fixture(true);
        fx.storage.add_file("/store/weights.safetensors", "x");
        let record = fx
            .registry
            .register(NewModelRecord {
                display_name: "st".to_string(),
                filename: "weights.safetensors".to_string(),
                path: PathBuf::from("/store/weights.safetensors"),
                size: 1,
                format: ModelFormat::Safetensors,
                quantization: None,
                parameters: None,
                sha256: None,
                provenance: Provenance::Adopted,
            })
            .await
            .unwrap();

        let result = fx
            .installer
            .install(&record.id, RuntimeId::Ollama, &InstallOptions::default())
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::Invalid));
    }
}
