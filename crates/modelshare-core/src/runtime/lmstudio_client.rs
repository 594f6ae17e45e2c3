//! Read-only probe for LM Studio's OpenAI-compatible server.
//!
//! LM Studio has no control API for model files; the only call made is
//! `GET /v1/models`, used for reachability and the available-model list.

use super::RuntimeProbe;
use crate::config::{AppConfig, NetworkConfig, RuntimeId};
use crate::error::{ModelShareError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Entry of the `/v1/models` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmStudioModel {
    pub id: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<LmStudioModel>,
}

#[derive(Debug, Clone)]
pub struct LmStudioClient {
    base_url: String,
    client: reqwest::Client,
}

impl LmStudioClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(NetworkConfig::PROBE_TIMEOUT)
            .user_agent(AppConfig::USER_AGENT)
            .build()
            .map_err(|e| ModelShareError::Network {
                message: format!("Failed to build HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn models(&self) -> Result<Vec<LmStudioModel>> {
        let url = format!("{}/v1/models", self.base_url);
        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| ModelShareError::Unreachable {
                    runtime: RuntimeId::LmStudio,
                    message: e.to_string(),
                })?;

        if !response.status().is_success() {
            return Err(ModelShareError::Unreachable {
                runtime: RuntimeId::LmStudio,
                message: format!("{} returned {}", url, response.status()),
            });
        }

        let body: ModelsResponse = response.json().await.map_err(|e| {
            ModelShareError::malformed(None, format!("Invalid /v1/models response: {}", e))
        })?;
        debug!("LM Studio reports {} models", body.data.len());
        Ok(body.data)
    }
}

#[async_trait]
impl RuntimeProbe for LmStudioClient {
    fn runtime(&self) -> RuntimeId {
        RuntimeId::LmStudio
    }

    async fn is_reachable(&self) -> bool {
        self.models().await.is_ok()
    }

    async fn loaded_models(&self) -> Result<Vec<String>> {
        Ok(self.models().await?.into_iter().map(|m| m.id).collect())
    }
}
