//! Central registry of models under central management.
//!
//! Records are persisted as JSON at `<store>/.modelshare/registry.json`,
//! loaded lazily on first access and cached behind a `RwLock`. Every mutation
//! is applied to a copy, persisted, and only then swapped in, so a failed
//! write leaves the in-memory state untouched.

use crate::config::{RuntimeId, StoreConfig};
use crate::error::{ModelShareError, Result};
use crate::model_library::naming::{extract_parameters, extract_quantization};
use crate::model_library::types::{ModelFormat, NewModelRecord, Provenance, StoredModelRecord};
use crate::storage::{EntryKind, StorageBackend};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryData {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    models: BTreeMap<String, StoredModelRecord>,
}

/// Canonical record store for the central model directory.
#[derive(Debug)]
pub struct CentralRegistry {
    root: PathBuf,
    storage: Arc<dyn StorageBackend>,
    data: RwLock<Option<RegistryData>>,
}

impl CentralRegistry {
    pub fn new(root: impl Into<PathBuf>, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            root: root.into(),
            storage,
            data: RwLock::new(None),
        }
    }

    /// Root directory of the central store.
    pub fn store_root(&self) -> &Path {
        &self.root
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root
            .join(StoreConfig::METADATA_DIR_NAME)
            .join(StoreConfig::REGISTRY_FILENAME)
    }

    /// Candidate destination path for a file inside the store.
    pub fn destination_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Create the store root if needed (idempotent) and return it.
    pub fn ensure_store(&self) -> Result<PathBuf> {
        self.storage
            .create_dir_all(&self.root)
            .map_err(|e| ModelShareError::io_with_path(e, &self.root))?;
        Ok(self.root.clone())
    }

    fn load_from_disk(&self) -> Result<RegistryData> {
        let path = self.registry_path();
        if !self.storage.exists(&path) {
            return Ok(RegistryData {
                version: REGISTRY_VERSION,
                models: BTreeMap::new(),
            });
        }

        let content = self
            .storage
            .read_to_string(&path)
            .map_err(|e| ModelShareError::io_with_path(e, &path))?;
        let data: RegistryData = serde_json::from_str(&content).map_err(|e| {
            ModelShareError::malformed(Some(path.clone()), format!("Invalid registry file: {}", e))
        })?;
        debug!("Loaded {} records from {}", data.models.len(), path.display());
        Ok(data)
    }

    fn persist(&self, data: &RegistryData) -> Result<()> {
        let path = self.registry_path();
        let json = serde_json::to_vec_pretty(data)?;
        self.storage
            .write_atomic(&path, &json)
            .map_err(|e| ModelShareError::io_with_path(e, &path))
    }

    async fn ensure_loaded(&self) -> Result<()> {
        if self.data.read().await.is_some() {
            return Ok(());
        }
        let mut guard = self.data.write().await;
        if guard.is_none() {
            *guard = Some(self.load_from_disk()?);
        }
        Ok(())
    }

    async fn read<R>(&self, f: impl FnOnce(&RegistryData) -> R) -> Result<R> {
        self.ensure_loaded().await?;
        let guard = self.data.read().await;
        match guard.as_ref() {
            Some(data) => Ok(f(data)),
            None => Ok(f(&RegistryData::default())),
        }
    }

    async fn mutate<R>(&self, f: impl FnOnce(&mut RegistryData) -> Result<R>) -> Result<R> {
        self.ensure_loaded().await?;
        let mut guard = self.data.write().await;
        let current = guard.get_or_insert_with(RegistryData::default);

        let mut next = current.clone();
        next.version = REGISTRY_VERSION;
        let out = f(&mut next)?;
        self.persist(&next)?;
        *current = next;
        Ok(out)
    }

    /// Register a new record, assigning its id and acquisition time.
    ///
    /// A filename already used by another record is a conflict.
    pub async fn register(&self, new: NewModelRecord) -> Result<StoredModelRecord> {
        let record = self
            .mutate(|data| {
                if data.models.values().any(|r| r.filename == new.filename) {
                    return Err(ModelShareError::conflict(format!(
                        "A model named {} is already registered",
                        new.filename
                    )));
                }

                let record = StoredModelRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    display_name: new.display_name,
                    filename: new.filename,
                    path: new.path,
                    size: new.size,
                    format: new.format,
                    quantization: new.quantization,
                    parameters: new.parameters,
                    sha256: new.sha256,
                    acquired_at: Utc::now(),
                    provenance: new.provenance,
                    linked_runtimes: Default::default(),
                    aliases: Default::default(),
                };
                data.models.insert(record.id.clone(), record.clone());
                Ok(record)
            })
            .await?;

        info!("Registered {} as {}", record.filename, record.id);
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<StoredModelRecord> {
        self.read(|data| data.models.get(id).cloned())
            .await?
            .ok_or_else(|| ModelShareError::ModelNotFound {
                model_id: id.to_string(),
            })
    }

    /// All records, oldest first.
    pub async fn list(&self) -> Result<Vec<StoredModelRecord>> {
        let mut records = self
            .read(|data| data.models.values().cloned().collect::<Vec<_>>())
            .await?;
        records.sort_by(|a, b| {
            a.acquired_at
                .cmp(&b.acquired_at)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(records)
    }

    pub async fn find_by_filename(&self, filename: &str) -> Result<Option<StoredModelRecord>> {
        self.read(|data| {
            data.models
                .values()
                .find(|r| r.filename == filename)
                .cloned()
        })
        .await
    }

    pub async fn find_by_source_path(&self, path: &Path) -> Result<Option<StoredModelRecord>> {
        self.read(|data| {
            data.models
                .values()
                .find(|r| r.source_path() == Some(path))
                .cloned()
        })
        .await
    }

    /// Delete a record, optionally removing its file.
    ///
    /// Refused while the record is still linked into any runtime.
    pub async fn delete(&self, id: &str, delete_file: bool) -> Result<StoredModelRecord> {
        let record = self.get(id).await?;
        if record.is_linked() {
            let runtimes: Vec<_> = record.linked_runtimes.iter().map(|r| r.as_str()).collect();
            return Err(ModelShareError::conflict(format!(
                "Model {} is still installed in: {}",
                id,
                runtimes.join(", ")
            )));
        }

        if delete_file {
            match self.storage.remove_file(&record.path) {
                Ok(()) => debug!("Removed {}", record.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("File for {} was already gone: {}", id, record.path.display());
                }
                Err(e) => return Err(ModelShareError::io_with_path(e, &record.path)),
            }
        }

        let removed = self
            .mutate(|data| {
                data.models
                    .remove(id)
                    .ok_or_else(|| ModelShareError::ModelNotFound {
                        model_id: id.to_string(),
                    })
            })
            .await?;

        info!("Deleted record {} ({})", id, removed.filename);
        Ok(removed)
    }

    /// Add a runtime to a record's link set.
    pub async fn mark_linked(
        &self,
        id: &str,
        runtime: RuntimeId,
        alias: Option<String>,
    ) -> Result<StoredModelRecord> {
        self.mutate(|data| {
            let record = data
                .models
                .get_mut(id)
                .ok_or_else(|| ModelShareError::ModelNotFound {
                    model_id: id.to_string(),
                })?;
            record.linked_runtimes.insert(runtime);
            match alias {
                Some(alias) => {
                    record.aliases.insert(runtime, alias);
                }
                None => {
                    record.aliases.remove(&runtime);
                }
            }
            Ok(record.clone())
        })
        .await
    }

    /// Remove a runtime from a record's link set.
    pub async fn mark_unlinked(&self, id: &str, runtime: RuntimeId) -> Result<StoredModelRecord> {
        self.mutate(|data| {
            let record = data
                .models
                .get_mut(id)
                .ok_or_else(|| ModelShareError::ModelNotFound {
                    model_id: id.to_string(),
                })?;
            record.linked_runtimes.remove(&runtime);
            record.aliases.remove(&runtime);
            Ok(record.clone())
        })
        .await
    }

    /// Register a file an external downloader already placed in the store.
    pub async fn register_existing(
        &self,
        path: &Path,
        source: Option<String>,
        display_name: Option<String>,
    ) -> Result<StoredModelRecord> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        if path.parent() != Some(self.root.as_path()) {
            return Err(ModelShareError::InvalidParams {
                message: format!(
                    "{} is not directly inside the central store {}",
                    path.display(),
                    self.root.display()
                ),
            });
        }

        let meta = self
            .storage
            .metadata(&path)
            .map_err(|e| ModelShareError::io_with_path(e, &path))?;
        if !meta.is_file() {
            return Err(ModelShareError::malformed(
                Some(path.clone()),
                "Not a regular file",
            ));
        }

        let new = new_record_for(&path, meta.len, Provenance::Downloaded { source }, display_name);
        self.register(new).await
    }

    /// Register every model file in the store root that has no record.
    pub async fn adopt_orphans(&self) -> Result<Vec<StoredModelRecord>> {
        let entries = match self.storage.read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ModelShareError::io_with_path(e, &self.root)),
        };

        let mut adopted = Vec::new();
        for entry in entries {
            if entry.kind != EntryKind::File
                || entry.name.starts_with('.')
                || entry.name.ends_with(StoreConfig::PARTIAL_SUFFIX)
                || ModelFormat::from_path(&entry.path) == ModelFormat::Unknown
            {
                continue;
            }
            if self.find_by_filename(&entry.name).await?.is_some() {
                continue;
            }

            let len = match self.storage.metadata(&entry.path) {
                Ok(meta) => meta.len,
                Err(e) => {
                    warn!("Cannot adopt {}: {}", entry.path.display(), e);
                    continue;
                }
            };
            let record = self
                .register(new_record_for(&entry.path, len, Provenance::Adopted, None))
                .await?;
            adopted.push(record);
        }

        if !adopted.is_empty() {
            info!("Adopted {} orphaned files", adopted.len());
        }
        Ok(adopted)
    }
}

fn new_record_for(
    path: &Path,
    size: u64,
    provenance: Provenance,
    display_name: Option<String>,
) -> NewModelRecord {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.clone());

    NewModelRecord {
        display_name: display_name.unwrap_or_else(|| stem.clone()),
        quantization: extract_quantization(&filename),
        parameters: extract_parameters(&stem),
        format: ModelFormat::from_path(path),
        filename,
        path: path.to_path_buf(),
        size,
        sha256: None,
        provenance,
    }
}
