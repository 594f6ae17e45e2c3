//! JSON-RPC request handlers, split by domain.

mod models;
mod storage;

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use modelshare_core::{ModelShareError, Result, RuntimeId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;

/// Every method served on `/rpc`.
pub(crate) const METHODS: &[&str] = &[
    "get_storage_paths",
    "ensure_central_store",
    "detect_models",
    "list_registry_models",
    "get_registry_model",
    "import_discovered_model",
    "register_downloaded_model",
    "adopt_orphan_models",
    "install_model",
    "uninstall_model",
    "delete_registry_model",
    "get_storage_status",
    "configure_storage",
    "restore_storage",
    "get_unified_snapshot",
];

// ============================================================================
// Parameter extraction helpers
// ============================================================================

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(params: &Value, snake: &str, camel: &str) -> Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| ModelShareError::InvalidParams {
            message: format!("Missing required parameter: {}", snake),
        })
}

/// Extract an optional bool parameter, supporting both snake_case and camelCase.
pub(crate) fn get_bool_param(params: &Value, snake: &str, camel: &str) -> Option<bool> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_bool())
}

/// Optional `runtime` parameter; present but unknown is an error.
pub(crate) fn get_runtime_param(params: &Value) -> Result<Option<RuntimeId>> {
    match get_str_param(params, "runtime", "runtime") {
        None => Ok(None),
        Some(name) => RuntimeId::parse(name)
            .map(Some)
            .ok_or_else(|| ModelShareError::InvalidParams {
                message: format!("Unknown runtime: {}", name),
            }),
    }
}

pub(crate) fn require_runtime_param(params: &Value) -> Result<RuntimeId> {
    get_runtime_param(params)?.ok_or_else(|| ModelShareError::InvalidParams {
        message: "Missing required parameter: runtime".to_string(),
    })
}

/// Report a core result as `{success, <key>}` or `{success: false, error, error_kind}`.
pub(crate) fn outcome<T: Serialize>(key: &str, result: Result<T>) -> Result<Value> {
    match result {
        Ok(value) => {
            let mut body = json!({"success": true});
            body[key] = serde_json::to_value(value)?;
            Ok(body)
        }
        Err(e) => Ok(json!({
            "success": false,
            "error": e.to_string(),
            "error_kind": e.kind(),
        })),
    }
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = request.method.as_str();
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id;

    debug!("RPC call: {}({:?})", method, params);

    if request.jsonrpc != "2.0" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("Unsupported JSON-RPC version: {}", request.jsonrpc),
            )),
        );
    }

    if !METHODS.contains(&method) {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            )),
        );
    }

    match dispatch_method(&state, method, &params).await {
        Ok(value) => (StatusCode::OK, Json(JsonRpcResponse::success(id, value))),
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, code, e.to_string())),
            )
        }
    }
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate domain handler.
async fn dispatch_method(state: &AppState, method: &str, params: &Value) -> Result<Value> {
    match method {
        // Detection & Registry
        "detect_models" => models::detect_models(state, params).await,
        "list_registry_models" => models::list_registry_models(state, params).await,
        "get_registry_model" => models::get_registry_model(state, params).await,
        "register_downloaded_model" => models::register_downloaded_model(state, params).await,
        "adopt_orphan_models" => models::adopt_orphan_models(state, params).await,
        "delete_registry_model" => models::delete_registry_model(state, params).await,

        // Import & Install
        "import_discovered_model" => models::import_discovered_model(state, params).await,
        "install_model" => models::install_model(state, params).await,
        "uninstall_model" => models::uninstall_model(state, params).await,

        // Storage
        "get_storage_paths" => storage::get_storage_paths(state, params).await,
        "ensure_central_store" => storage::ensure_central_store(state, params).await,
        "get_storage_status" => storage::get_storage_status(state, params).await,
        "configure_storage" => storage::configure_storage(state, params).await,
        "restore_storage" => storage::restore_storage(state, params).await,
        "get_unified_snapshot" => storage::get_unified_snapshot(state, params).await,

        _ => Err(ModelShareError::Other(format!("Method not found: {}", method))),
    }
}
