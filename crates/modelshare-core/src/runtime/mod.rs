//! Clients for the runtimes' local HTTP APIs.
//!
//! The installer and aggregator only see the traits below, so tests can
//! substitute fakes for live runtimes.

mod lmstudio_client;
mod ollama_client;

pub use lmstudio_client::{LmStudioClient, LmStudioModel};
pub use ollama_client::{OllamaClient, RunningModel};

use crate::config::RuntimeId;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Reachability and loaded-model queries, available for every runtime.
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    fn runtime(&self) -> RuntimeId;

    /// True if the runtime answered within the probe timeout.
    async fn is_reachable(&self) -> bool;

    /// Models currently loaded into memory.
    async fn loaded_models(&self) -> Result<Vec<String>>;
}

/// Model management for the manifest-based runtime.
#[async_trait]
pub trait ManifestRuntimeApi: Send + Sync {
    async fn is_reachable(&self) -> bool;

    /// Create `name` from a weight file on disk.
    async fn create_model(
        &self,
        name: &str,
        weight_path: &Path,
        known_sha256: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<()>;

    async fn delete_model(&self, name: &str) -> Result<()>;
}
