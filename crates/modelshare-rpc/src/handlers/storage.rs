//! Storage location, redirection and snapshot handlers.

use super::{get_bool_param, get_runtime_param, outcome, require_runtime_param};
use crate::server::AppState;
use modelshare_core::Result;
use serde_json::{json, Value};

pub async fn get_storage_paths(state: &AppState, _params: &Value) -> Result<Value> {
    let paths = state.api.get_storage_paths();
    Ok(json!({"success": true, "paths": paths}))
}

pub async fn ensure_central_store(state: &AppState, _params: &Value) -> Result<Value> {
    outcome("path", state.api.ensure_central_store())
}

pub async fn get_storage_status(state: &AppState, params: &Value) -> Result<Value> {
    let runtime = get_runtime_param(params)?;
    let statuses = state.api.get_storage_status(runtime);
    Ok(json!({"success": true, "statuses": statuses}))
}

/// Backs up the runtime's directory unless `backup` is explicitly false.
pub async fn configure_storage(state: &AppState, params: &Value) -> Result<Value> {
    let runtime = require_runtime_param(params)?;
    let backup = get_bool_param(params, "backup", "backup").unwrap_or(true);
    Ok(serde_json::to_value(
        state.api.configure_storage(runtime, backup),
    )?)
}

pub async fn restore_storage(state: &AppState, params: &Value) -> Result<Value> {
    let runtime = require_runtime_param(params)?;
    Ok(serde_json::to_value(state.api.restore_storage(runtime))?)
}

pub async fn get_unified_snapshot(state: &AppState, _params: &Value) -> Result<Value> {
    let snapshot = state.api.get_unified_snapshot().await;
    Ok(json!({"success": true, "snapshot": snapshot}))
}
