//! Types for the central model library.

use crate::config::RuntimeId;
use crate::error::{ErrorKind, ModelShareError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Model weight file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    Gguf,
    Safetensors,
    Unknown,
}

impl ModelFormat {
    pub const ALL: [ModelFormat; 3] = [ModelFormat::Gguf, ModelFormat::Safetensors, ModelFormat::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Gguf => "gguf",
            ModelFormat::Safetensors => "safetensors",
            ModelFormat::Unknown => "unknown",
        }
    }

    /// Infer the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("gguf") => ModelFormat::Gguf,
            Some("safetensors") => ModelFormat::Safetensors,
            _ => ModelFormat::Unknown,
        }
    }

    /// Runtimes able to load this format.
    pub fn compatible_runtimes(&self) -> Vec<RuntimeId> {
        match self {
            ModelFormat::Gguf => vec![RuntimeId::Ollama, RuntimeId::LmStudio],
            ModelFormat::Safetensors | ModelFormat::Unknown => Vec::new(),
        }
    }
}

impl Default for ModelFormat {
    fn default() -> Self {
        ModelFormat::Unknown
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a record entered the central store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Provenance {
    /// Placed in the store by a downloader.
    Downloaded { source: Option<String> },
    /// Promoted from a runtime's private storage.
    Discovered {
        runtime: RuntimeId,
        source_path: PathBuf,
        source_name: String,
    },
    /// Found in the store without a record.
    Adopted,
}

/// Persistent record for a model under central management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredModelRecord {
    pub id: String,
    pub display_name: String,
    /// File name inside the store (unique across records).
    pub filename: String,
    /// Absolute path inside the store.
    pub path: PathBuf,
    pub size: u64,
    pub format: ModelFormat,
    pub quantization: Option<String>,
    pub parameters: Option<String>,
    /// SHA-256 hex of the file when known (verified Ollama blobs).
    #[serde(default)]
    pub sha256: Option<String>,
    pub acquired_at: DateTime<Utc>,
    pub provenance: Provenance,
    #[serde(default)]
    pub linked_runtimes: BTreeSet<RuntimeId>,
    /// Name the model is installed under, per runtime.
    #[serde(default)]
    pub aliases: BTreeMap<RuntimeId, String>,
}

impl StoredModelRecord {
    pub fn is_linked(&self) -> bool {
        !self.linked_runtimes.is_empty()
    }

    pub fn source_path(&self) -> Option<&Path> {
        match &self.provenance {
            Provenance::Discovered { source_path, .. } => Some(source_path),
            _ => None,
        }
    }
}

/// Input for registering a new record; id and timestamp are assigned.
#[derive(Debug, Clone)]
pub struct NewModelRecord {
    pub display_name: String,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub format: ModelFormat,
    pub quantization: Option<String>,
    pub parameters: Option<String>,
    pub sha256: Option<String>,
    pub provenance: Provenance,
}

/// Stage of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Copying,
    Verifying,
    Registering,
    RemovingSource,
    Complete,
}

/// Progress update sent while importing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub stage: ImportStage,
    /// Bytes copied so far (monotonically increasing).
    pub bytes_copied: u64,
    pub total_bytes: u64,
}

/// Options for promoting a discovered model into the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Remove the runtime-private copy after a verified copy.
    pub delete_source: bool,
    /// Explicit user confirmation required together with `delete_source`.
    pub confirm_delete: bool,
    /// Replace a removed flat-file source with a link to the central copy.
    pub relink: bool,
    /// Override the display name used for the destination filename.
    pub target_name: Option<String>,
}

/// Result of an import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    pub model_id: Option<String>,
    pub path: Option<PathBuf>,
    pub record: Option<StoredModelRecord>,
    pub source_removed: bool,
    /// Set when the source was removed but the link replacing it was not created.
    pub relink_error: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl ImportResult {
    pub fn succeeded(
        record: StoredModelRecord,
        source_removed: bool,
        relink_error: Option<String>,
    ) -> Self {
        Self {
            success: true,
            model_id: Some(record.id.clone()),
            path: Some(record.path.clone()),
            record: Some(record),
            source_removed,
            relink_error,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(err: &ModelShareError) -> Self {
        Self {
            success: false,
            model_id: None,
            path: None,
            record: None,
            source_removed: false,
            relink_error: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

/// Options for installing a central record into a runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallOptions {
    /// Custom name for the installed model.
    pub name: Option<String>,
    /// System prompt attached to the created model (manifest runtime only).
    pub system_prompt: Option<String>,
}

/// Result of an install or uninstall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallResult {
    pub success: bool,
    pub runtime: RuntimeId,
    pub model_id: String,
    pub installed_name: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl InstallResult {
    pub fn succeeded(runtime: RuntimeId, model_id: &str, installed_name: Option<String>) -> Self {
        Self {
            success: true,
            runtime,
            model_id: model_id.to_string(),
            installed_name,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(runtime: RuntimeId, model_id: &str, err: &ModelShareError) -> Self {
        Self {
            success: false,
            runtime,
            model_id: model_id.to_string(),
            installed_name: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

/// Result of deleting a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResult {
    pub success: bool,
    pub model_id: String,
    /// Runtimes the record was uninstalled from first.
    pub detached: Vec<RuntimeId>,
    pub file_removed: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl DeleteResult {
    pub fn failed(model_id: &str, detached: Vec<RuntimeId>, err: &ModelShareError) -> Self {
        Self {
            success: false,
            model_id: model_id.to_string(),
            detached,
            file_removed: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}
