//! Configuration for ModelShare.
//!
//! Constants live on unit structs grouped by concern. Everything that varies
//! per installation (store location, runtime addresses, storage overrides) is
//! carried by [`ModelShareConfig`] and handed to components explicitly.

use crate::error::{ModelShareError, Result};
use crate::storage::atomic_read_json;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const USER_AGENT: &'static str = "modelshare";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    /// Timeout for short API calls (list, delete, probes).
    pub const API_TIMEOUT: Duration = Duration::from_secs(10);
    /// Timeout for reachability probes.
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
    /// Timeout for model creation after the blob is uploaded.
    pub const CREATE_TIMEOUT: Duration = Duration::from_secs(300);
    /// Connect timeout for streaming uploads (no total timeout).
    pub const UPLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Chunk size for streaming blob uploads (8 MB).
    pub const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;
}

/// Central store layout constants.
pub struct StoreConfig;

impl StoreConfig {
    /// Directory name under the platform data dir.
    pub const APP_DIR_NAME: &'static str = "modelshare";
    /// Store directory under the app dir.
    pub const MODELS_DIR_NAME: &'static str = "models";
    /// Hidden metadata directory inside the store.
    pub const METADATA_DIR_NAME: &'static str = ".modelshare";
    /// Registry file inside the metadata directory.
    pub const REGISTRY_FILENAME: &'static str = "registry.json";
    /// Suffix for in-flight copies.
    pub const PARTIAL_SUFFIX: &'static str = ".part";
    /// Suffix appended to a runtime directory when it is moved aside.
    pub const BACKUP_SUFFIX: &'static str = ".backup";
    /// Streaming copy buffer (8 MB, matches the upload chunk size).
    pub const COPY_CHUNK_SIZE: usize = 8 * 1024 * 1024;
    /// Publisher directory used for models installed into LM Studio.
    pub const LMSTUDIO_PUBLISHER: &'static str = "modelshare";
}

/// Ollama on-disk and API constants.
pub struct OllamaLayout;

impl OllamaLayout {
    pub const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:11434";
    pub const MANIFESTS_DIR: &'static str = "manifests";
    pub const BLOBS_DIR: &'static str = "blobs";
    pub const DEFAULT_TAG: &'static str = "latest";
    pub const MODEL_MEDIA_TYPE: &'static str = "application/vnd.ollama.image.model";
}

/// LM Studio on-disk and API constants.
pub struct LmStudioLayout;

impl LmStudioLayout {
    pub const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:1234";
    pub const WEIGHT_EXTENSION: &'static str = "gguf";
}

/// The two local runtimes whose storage is synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeId {
    /// Manifest-based runtime (content-addressed blobs).
    Ollama,
    /// Flat-file runtime (nested GGUF tree).
    LmStudio,
}

impl RuntimeId {
    pub const ALL: [RuntimeId; 2] = [RuntimeId::Ollama, RuntimeId::LmStudio];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeId::Ollama => "ollama",
            RuntimeId::LmStudio => "lmstudio",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RuntimeId::Ollama => "Ollama",
            RuntimeId::LmStudio => "LM Studio",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            RuntimeId::Ollama => OllamaLayout::DEFAULT_BASE_URL,
            RuntimeId::LmStudio => LmStudioLayout::DEFAULT_BASE_URL,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "ollama" => Some(RuntimeId::Ollama),
            "lmstudio" => Some(RuntimeId::LmStudio),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-runtime settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// API base address; `None` uses the runtime's default.
    pub base_url: Option<String>,
    /// Storage root override; when set it is the only candidate root.
    pub storage_root: Option<PathBuf>,
}

/// Installation-wide configuration passed to every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelShareConfig {
    /// Central store location; `None` uses the platform default.
    pub central_store: Option<PathBuf>,
    pub ollama: RuntimeConfig,
    pub lmstudio: RuntimeConfig,
    /// Install into LM Studio with symlinks (copies when false).
    pub link_installs: bool,
    /// Verify SHA-256 of Ollama blobs while promoting them.
    pub verify_digests: bool,
}

impl Default for ModelShareConfig {
    fn default() -> Self {
        Self {
            central_store: None,
            ollama: RuntimeConfig::default(),
            lmstudio: RuntimeConfig::default(),
            link_installs: true,
            verify_digests: true,
        }
    }
}

impl ModelShareConfig {
    /// Load a configuration file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Option<Self> = atomic_read_json(path)?;
        let config = config.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Check that both base addresses are usable HTTP URLs.
    pub fn validate(&self) -> Result<()> {
        for runtime in RuntimeId::ALL {
            let base = self.base_url(runtime);
            let parsed = url::Url::parse(base).map_err(|e| ModelShareError::Config {
                message: format!("Invalid base URL for {}: {} ({})", runtime, base, e),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ModelShareError::Config {
                    message: format!("Base URL for {} must be http(s): {}", runtime, base),
                });
            }
        }
        Ok(())
    }

    /// Effective API base address for a runtime, without a trailing slash.
    pub fn base_url(&self, runtime: RuntimeId) -> &str {
        self.runtime(runtime)
            .base_url
            .as_deref()
            .unwrap_or(runtime.default_base_url())
            .trim_end_matches('/')
    }

    pub fn runtime(&self, runtime: RuntimeId) -> &RuntimeConfig {
        match runtime {
            RuntimeId::Ollama => &self.ollama,
            RuntimeId::LmStudio => &self.lmstudio,
        }
    }

    pub fn runtime_mut(&mut self, runtime: RuntimeId) -> &mut RuntimeConfig {
        match runtime {
            RuntimeId::Ollama => &mut self.ollama,
            RuntimeId::LmStudio => &mut self.lmstudio,
        }
    }
}
