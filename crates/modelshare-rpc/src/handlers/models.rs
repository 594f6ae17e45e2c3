//! Detection, registry, import and install handlers.

use super::{
    get_bool_param, get_runtime_param, get_str_param, outcome, require_runtime_param,
    require_str_param,
};
use crate::server::AppState;
use modelshare_core::{ImportOptions, InstallOptions, Result};
use serde_json::{json, Value};
use std::path::PathBuf;

pub async fn detect_models(state: &AppState, params: &Value) -> Result<Value> {
    let detection = match get_runtime_param(params)? {
        Some(runtime) => serde_json::to_value(state.api.detect_runtime(runtime).await)?,
        None => serde_json::to_value(state.api.detect_models().await)?,
    };
    Ok(json!({"success": true, "detection": detection}))
}

pub async fn list_registry_models(state: &AppState, _params: &Value) -> Result<Value> {
    outcome("models", state.api.list_registry_models().await)
}

pub async fn get_registry_model(state: &AppState, params: &Value) -> Result<Value> {
    let model_id = require_str_param(params, "model_id", "modelId")?;
    outcome("model", state.api.get_registry_model(&model_id).await)
}

pub async fn register_downloaded_model(state: &AppState, params: &Value) -> Result<Value> {
    let path = PathBuf::from(require_str_param(params, "path", "path")?);
    let source_url = get_str_param(params, "source_url", "sourceUrl").map(String::from);
    let display_name = get_str_param(params, "display_name", "displayName").map(String::from);
    outcome(
        "model",
        state
            .api
            .register_downloaded_model(&path, source_url, display_name)
            .await,
    )
}

pub async fn adopt_orphan_models(state: &AppState, _params: &Value) -> Result<Value> {
    outcome("adopted", state.api.adopt_orphan_models().await)
}

pub async fn delete_registry_model(state: &AppState, params: &Value) -> Result<Value> {
    let model_id = require_str_param(params, "model_id", "modelId")?;
    let delete_file = get_bool_param(params, "delete_file", "deleteFile").unwrap_or(false);
    let result = state.api.delete_registry_model(&model_id, delete_file).await;
    Ok(serde_json::to_value(result)?)
}

pub async fn import_discovered_model(state: &AppState, params: &Value) -> Result<Value> {
    let runtime = require_runtime_param(params)?;
    let selector = match get_str_param(params, "selector", "selector")
        .or_else(|| get_str_param(params, "path", "path"))
    {
        Some(selector) => selector.to_string(),
        None => require_str_param(params, "name", "name")?,
    };
    let options = ImportOptions {
        delete_source: get_bool_param(params, "delete_source", "deleteSource").unwrap_or(false),
        confirm_delete: get_bool_param(params, "confirm_delete", "confirmDelete")
            .unwrap_or(false),
        relink: get_bool_param(params, "relink", "relink").unwrap_or(false),
        target_name: get_str_param(params, "target_name", "targetName").map(String::from),
    };

    let result = state
        .api
        .import_discovered_model(runtime, &selector, &options)
        .await;
    Ok(serde_json::to_value(result)?)
}

pub async fn install_model(state: &AppState, params: &Value) -> Result<Value> {
    let model_id = require_str_param(params, "model_id", "modelId")?;
    let runtime = require_runtime_param(params)?;
    let options = InstallOptions {
        name: get_str_param(params, "name", "name").map(String::from),
        system_prompt: get_str_param(params, "system_prompt", "systemPrompt").map(String::from),
    };
    let result = state.api.install_model(&model_id, runtime, &options).await;
    Ok(serde_json::to_value(result)?)
}

pub async fn uninstall_model(state: &AppState, params: &Value) -> Result<Value> {
    let model_id = require_str_param(params, "model_id", "modelId")?;
    let runtime = require_runtime_param(params)?;
    let result = state.api.uninstall_model(&model_id, runtime).await;
    Ok(serde_json::to_value(result)?)
}
