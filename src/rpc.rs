use crate::host::{HttpClient, HttpError, HttpRequest};
use crate::invocation::ExternalApi;
use serde::Serialize;
use serde_json::{json, Value};
use std::rc::Rc;

pub const LOGGER_RPC_PATH: &str = "/apis/v1/logger/_rpc";
pub const STORAGE_RPC_PATH: &str = "/apis/v1/storage/_rpc";
pub const MODULE_HEADER: &str = "X-Wasm-Module";

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("{error}")]
    Remote {
        status: u16,
        error: String,
        description: Option<String>,
    },
    #[error("invalid rpc response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
    #[error("failed to encode rpc payload: {0}")]
    Encode(#[source] serde_json::Error),
}

impl RpcError {
    /// Failure record handed back to script code, which rethrows it as an `Error`.
    pub fn to_script_failure(&self) -> Value {
        match self {
            RpcError::Remote {
                error, description, ..
            } => json!({
                "ok": false,
                "error": error,
                "error_description": description,
            }),
            other => json!({
                "ok": false,
                "error": other.to_string(),
                "error_description": Value::Null,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageOperation {
    Get,
    Set,
    Remove,
    Find,
    Clear,
}

impl StorageOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Remove => "remove",
            Self::Find => "find",
            Self::Clear => "clear",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "get" => Some(Self::Get),
            "set" => Some(Self::Set),
            "remove" => Some(Self::Remove),
            "find" => Some(Self::Find),
            "clear" => Some(Self::Clear),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageCall {
    pub operation: StorageOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opts: Option<Value>,
}

impl StorageCall {
    pub fn new(operation: StorageOperation) -> Self {
        Self {
            operation,
            key: None,
            value: None,
            opts: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct LogCall<'a> {
    module: Option<&'a str>,
    level: &'a str,
    messages: &'a [Value],
}

/// Synchronous client for the logger and storage RPC endpoints, tagged with
/// the calling plugin's module id. One method call is one HTTP round trip.
#[derive(Clone)]
pub struct ExternalApiClient {
    api: ExternalApi,
    module: Option<String>,
    http: Rc<dyn HttpClient>,
}

impl std::fmt::Debug for ExternalApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalApiClient")
            .field("url", &self.api.url)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl ExternalApiClient {
    pub fn new(api: ExternalApi, module: Option<String>, http: Rc<dyn HttpClient>) -> Self {
        Self { api, module, http }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api.url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> HttpRequest {
        let mut request = HttpRequest::new("POST", self.endpoint(path))
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");
        if let Some(module) = &self.module {
            request = request.header(MODULE_HEADER, module);
        }
        for (name, value) in &self.api.headers {
            request = request.header(name, value);
        }
        request
    }

    /// Remote status and body are not inspected; only transport failures surface.
    pub fn log(&self, level: &str, messages: &[Value]) -> Result<(), RpcError> {
        let body = serde_json::to_string(&LogCall {
            module: self.module.as_deref(),
            level,
            messages,
        })
        .map_err(RpcError::Encode)?;
        self.http
            .request(&self.post(LOGGER_RPC_PATH), Some(body.as_str()))?;
        Ok(())
    }

    /// Sends one storage operation and returns the decoded response body
    /// (`{}` for empty bodies).
    pub fn storage(&self, call: &StorageCall) -> Result<Value, RpcError> {
        let request = self.post(STORAGE_RPC_PATH);
        let body = serde_json::to_string(call).map_err(RpcError::Encode)?;
        let response = self.http.request(&request, Some(body.as_str()))?;

        let parsed = if response.body.trim().is_empty() {
            Some(json!({}))
        } else {
            serde_json::from_str::<Value>(&response.body).ok()
        };

        if matches!(response.status, 200 | 201 | 204) {
            return parsed.ok_or_else(|| RpcError::InvalidResponse {
                url: request.url.clone(),
                message: "response body is not valid json".to_string(),
            });
        }

        let parsed = parsed.unwrap_or(Value::Null);
        let error = parsed
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "storage {} failed with status {}",
                    call.operation.as_str(),
                    response.status
                )
            });
        let description = parsed
            .get("error_description")
            .and_then(Value::as_str)
            .map(str::to_string);
        Err(RpcError::Remote {
            status: response.status,
            error,
            description,
        })
    }

    pub fn get_item(&self, key: &str) -> Result<Value, RpcError> {
        let body = self.storage(&StorageCall::new(StorageOperation::Get).key(key))?;
        Ok(value_or_null(&body))
    }

    pub fn set_item(
        &self,
        key: &str,
        value: Value,
        opts: Option<Value>,
    ) -> Result<Value, RpcError> {
        // The storage service keeps strings; structured values travel as JSON text.
        let value = match value {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        };
        let mut call = StorageCall::new(StorageOperation::Set).key(key);
        call.value = Some(value.clone());
        call.opts = opts.filter(|opts| !opts.is_null());

        let body = self.storage(&call)?;
        Ok(json!({
            "key": body.get("key").cloned().unwrap_or_else(|| Value::String(key.to_string())),
            "value": body.get("value").cloned().unwrap_or(value),
            "previous": body.get("previous").cloned().unwrap_or(Value::Null),
        }))
    }

    pub fn remove_item(&self, key: &str) -> Result<Value, RpcError> {
        let body = self.storage(&StorageCall::new(StorageOperation::Remove).key(key))?;
        Ok(value_or_null(&body))
    }

    pub fn find_items(&self, pattern: &str) -> Result<Value, RpcError> {
        let body = self.storage(&StorageCall::new(StorageOperation::Find).key(pattern))?;
        match body.get("value") {
            Some(Value::Array(items)) => Ok(Value::Array(items.clone())),
            _ => Ok(Value::Array(Vec::new())),
        }
    }

    pub fn clear(&self) -> Result<(), RpcError> {
        self.storage(&StorageCall::new(StorageOperation::Clear))?;
        Ok(())
    }
}

fn value_or_null(body: &Value) -> Value {
    body.get("value").cloned().unwrap_or(Value::Null)
}
