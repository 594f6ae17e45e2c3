//! HTTP client for a running Ollama instance.
//!
//! Installing a central-store file uses the blob-based create API:
//! 1. Compute the SHA256 of the GGUF file (skipped when already known)
//! 2. Check whether the blob exists via `HEAD /api/blobs/sha256:{digest}`
//! 3. Stream the file to `POST /api/blobs/sha256:{digest}` if missing
//! 4. Create the model via `POST /api/create` with a `files` mapping

use super::{ManifestRuntimeApi, RuntimeProbe};
use crate::config::{AppConfig, NetworkConfig, RuntimeId};
use crate::error::{ModelShareError, Result};
use async_trait::async_trait;
use futures::stream;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

fn net_err(msg: String) -> ModelShareError {
    ModelShareError::Network {
        message: msg,
        cause: None,
    }
}

/// A model loaded in memory, as returned by `GET /api/ps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub size_vram: u64,
    #[serde(default)]
    pub expires_at: String,
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    models: Option<Vec<RunningModel>>,
}

/// One line of the streamed `POST /api/create` response.
#[derive(Debug, Deserialize)]
struct CreateProgressLine {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for Ollama's local API.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    probe_client: reqwest::Client,
    /// No total timeout; blob uploads can take a long time.
    upload_client: reqwest::Client,
    create_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let build = |builder: reqwest::ClientBuilder| {
            builder
                .user_agent(AppConfig::USER_AGENT)
                .build()
                .map_err(|e| net_err(format!("Failed to build HTTP client: {}", e)))
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build(reqwest::Client::builder().timeout(NetworkConfig::API_TIMEOUT))?,
            probe_client: build(reqwest::Client::builder().timeout(NetworkConfig::PROBE_TIMEOUT))?,
            upload_client: build(
                reqwest::Client::builder().connect_timeout(NetworkConfig::UPLOAD_CONNECT_TIMEOUT),
            )?,
            create_client: build(reqwest::Client::builder().timeout(NetworkConfig::CREATE_TIMEOUT))?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe `GET /api/version`.
    pub async fn version(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct VersionResponse {
            version: String,
        }

        let url = format!("{}/api/version", self.base_url);
        let response = self
            .probe_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ModelShareError::Unreachable {
                runtime: RuntimeId::Ollama,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ModelShareError::Unreachable {
                runtime: RuntimeId::Ollama,
                message: format!("version endpoint returned {}", response.status()),
            });
        }

        let body: VersionResponse = response
            .json()
            .await
            .map_err(|e| net_err(format!("Failed to parse Ollama version response: {}", e)))?;
        Ok(body.version)
    }

    /// List models currently loaded in memory.
    pub async fn running(&self) -> Result<Vec<RunningModel>> {
        let url = format!("{}/api/ps", self.base_url);

        let response = self
            .probe_client
            .get(&url)
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to connect to Ollama at {}: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: String = response.text().await.unwrap_or_default();
            return Err(net_err(format!("Ollama API returned {}: {}", status, body)));
        }

        let ps: PsResponse = response
            .json()
            .await
            .map_err(|e| net_err(format!("Failed to parse Ollama ps response: {}", e)))?;
        Ok(ps.models.unwrap_or_default())
    }

    /// Create a model from a local GGUF file.
    pub async fn create(
        &self,
        name: &str,
        gguf_path: &Path,
        known_sha256: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<()> {
        info!("Creating Ollama model '{}' from {}", name, gguf_path.display());

        let digest = match known_sha256 {
            Some(hash) => hash.to_string(),
            None => {
                info!("Computing SHA256 for {}", gguf_path.display());
                compute_sha256_async(gguf_path.to_path_buf()).await?
            }
        };
        let digest_ref = format!("sha256:{}", digest);

        if self.blob_exists(&digest_ref).await? {
            debug!("Blob {} already present, skipping upload", digest_ref);
        } else {
            self.upload_blob(&digest_ref, gguf_path).await?;
        }

        let filename = gguf_path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("model.gguf");
        let body = create_request_body(name, filename, &digest_ref, system_prompt);

        let url = format!("{}/api/create", self.base_url);
        let response = self
            .create_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to send create request to Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: String = response.text().await.unwrap_or_default();
            return Err(net_err(format!(
                "Ollama create API returned {}: {}",
                status, body
            )));
        }

        let text: String = response
            .text()
            .await
            .map_err(|e| net_err(format!("Failed to read Ollama create response: {}", e)))?;
        check_create_stream(&text)?;

        info!("Created Ollama model '{}'", name);
        Ok(())
    }

    async fn blob_exists(&self, digest: &str) -> Result<bool> {
        let url = format!("{}/api/blobs/{}", self.base_url, digest);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to check Ollama blob: {}", e)))?;
        Ok(response.status().is_success())
    }

    /// Stream a file to Ollama's blob endpoint without buffering it.
    async fn upload_blob(&self, digest: &str, path: &Path) -> Result<()> {
        let url = format!("{}/api/blobs/{}", self.base_url, digest);
        let file_size = tokio::fs::metadata(path)
            .await
            .map_err(|e| ModelShareError::io_with_path(e, path))?
            .len();

        info!(
            "Uploading blob {} ({:.1} GB) to Ollama",
            digest,
            file_size as f64 / 1e9
        );

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ModelShareError::io_with_path(e, path))?;

        let file_stream = stream::unfold(file, |mut file| async move {
            let mut buf = vec![0u8; NetworkConfig::UPLOAD_CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok::<_, std::io::Error>(bytes::Bytes::from(buf)), file))
                }
                Err(e) => Some((Err(e), file)),
            }
        });

        let response = self
            .upload_client
            .post(&url)
            .header(reqwest::header::CONTENT_LENGTH, file_size)
            .body(reqwest::Body::wrap_stream(file_stream))
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to upload blob to Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: String = response.text().await.unwrap_or_default();
            return Err(net_err(format!(
                "Ollama blob upload returned {}: {}",
                status, body
            )));
        }

        debug!("Blob upload complete for {}", digest);
        Ok(())
    }

    /// Delete a model by name.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/delete", self.base_url);
        info!("Deleting Ollama model '{}'", name);

        let response = self
            .client
            .delete(&url)
            .json(&serde_json::json!({ "model": name }))
            .send()
            .await
            .map_err(|e| net_err(format!("Failed to send delete request to Ollama: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ModelShareError::NotFound(format!(
                "Ollama has no model named '{}'",
                name
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body: String = response.text().await.unwrap_or_default();
            return Err(net_err(format!(
                "Ollama delete API returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

fn create_request_body(
    name: &str,
    filename: &str,
    digest_ref: &str,
    system_prompt: Option<&str>,
) -> serde_json::Value {
    let mut files = HashMap::new();
    files.insert(filename.to_string(), digest_ref.to_string());

    let mut body = serde_json::json!({
        "model": name,
        "files": files,
    });
    if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
        body["system"] = serde_json::Value::String(system.to_string());
    }
    body
}

/// Scan the NDJSON create stream for an error line.
fn check_create_stream(text: &str) -> Result<()> {
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Ok(progress) = serde_json::from_str::<CreateProgressLine>(line) {
            if let Some(err) = progress.error {
                return Err(net_err(format!("Ollama model creation failed: {}", err)));
            }
            debug!("Ollama create progress: {}", progress.status);
        }
    }
    Ok(())
}

/// Compute SHA256 of a file on the blocking pool.
async fn compute_sha256_async(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut file =
            std::fs::File::open(&path).map_err(|e| ModelShareError::io_with_path(e, &path))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; NetworkConfig::UPLOAD_CHUNK_SIZE];
        loop {
            let n = std::io::Read::read(&mut file, &mut buffer)
                .map_err(|e| ModelShareError::io_with_path(e, &path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| ModelShareError::Other(format!("SHA256 task failed: {}", e)))?
}

#[async_trait]
impl RuntimeProbe for OllamaClient {
    fn runtime(&self) -> RuntimeId {
        RuntimeId::Ollama
    }

    async fn is_reachable(&self) -> bool {
        self.version().await.is_ok()
    }

    async fn loaded_models(&self) -> Result<Vec<String>> {
        Ok(self.running().await?.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl ManifestRuntimeApi for OllamaClient {
    async fn is_reachable(&self) -> bool {
        self.version().await.is_ok()
    }

    async fn create_model(
        &self,
        name: &str,
        weight_path: &Path,
        known_sha256: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<()> {
        self.create(name, weight_path, known_sha256, system_prompt).await
    }

    async fn delete_model(&self, name: &str) -> Result<()> {
        self.delete(name).await
    }
}
