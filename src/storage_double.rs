//! Disposable logger/storage RPC service used for local development and tests.
//!
//! The production service lives outside this crate; this double only mirrors
//! its wire contract: an in-memory key/value table behind [`KeyValueStore`],
//! last writer wins, no locking.

pub mod server;

use crate::host::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::rpc::{StorageOperation, LOGGER_RPC_PATH, STORAGE_RPC_PATH};
use crate::shared::logging::EngineLog;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;

pub use server::{serve, StorageDoubleServer};

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: String, value: Value) -> Option<Value>;
    fn remove(&mut self, key: &str) -> Option<Value>;
    fn entries(&self) -> Vec<(String, Value)>;
    fn clear(&mut self);
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: String, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    fn entries(&self) -> Vec<(String, Value)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub status: u16,
    pub body: Option<Value>,
}

impl RpcReply {
    fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body: Some(body),
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: None,
        }
    }

    fn failure(status: u16, error: &str, description: String) -> Self {
        Self {
            status,
            body: Some(json!({ "error": error, "error_description": description })),
        }
    }

    pub fn body_string(&self) -> String {
        self.body
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default()
    }
}

pub struct StorageService<S: KeyValueStore> {
    store: S,
    log: EngineLog,
}

impl<S: KeyValueStore> StorageService<S> {
    pub fn new(store: S, log: EngineLog) -> Self {
        Self { store, log }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn log(&self) -> &EngineLog {
        &self.log
    }

    pub fn route(&mut self, method: &str, path: &str, body: &str) -> RpcReply {
        let path = path.split('?').next().unwrap_or(path);
        match (method.to_ascii_uppercase().as_str(), path) {
            ("POST", LOGGER_RPC_PATH) => self.handle_logger(body),
            ("POST", STORAGE_RPC_PATH) => self.handle_storage(body),
            _ => RpcReply {
                status: 404,
                body: Some(json!({})),
            },
        }
    }

    pub fn handle_logger(&self, body: &str) -> RpcReply {
        self.log.info("logger.rpc", body);
        RpcReply::no_content()
    }

    pub fn handle_storage(&mut self, body: &str) -> RpcReply {
        self.log.info("storage.rpc", body);
        let reply = self.storage_reply(body);
        if reply.status >= 400 {
            self.log.warn("storage.rejected", &reply.body_string());
        }
        reply
    }

    fn storage_reply(&mut self, body: &str) -> RpcReply {
        let payload: Value = match serde_json::from_str(body) {
            Ok(payload) => payload,
            Err(err) => return RpcReply::failure(400, "invalid_request", err.to_string()),
        };
        let Some(operation) = payload
            .get("operation")
            .and_then(Value::as_str)
            .and_then(StorageOperation::parse)
        else {
            return RpcReply {
                status: 404,
                body: Some(json!({})),
            };
        };
        let key = payload.get("key").and_then(Value::as_str);
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        match (operation, key) {
            (StorageOperation::Get, Some(key)) => {
                let mut body = json!({ "key": key });
                if let Some(value) = self.store.get(key) {
                    body["value"] = value;
                }
                RpcReply::ok(body)
            }
            (StorageOperation::Set, Some(key)) => {
                let previous = self
                    .store
                    .set(key.to_string(), value.clone())
                    .map(|old| json!({ "key": key, "value": old }))
                    .unwrap_or(Value::Null);
                RpcReply::ok(json!({ "key": key, "value": value, "previous": previous }))
            }
            (StorageOperation::Remove, Some(key)) => {
                self.store.remove(key);
                RpcReply::no_content()
            }
            (StorageOperation::Find, Some(pattern)) => match regex::Regex::new(pattern) {
                Ok(matcher) => {
                    let items: Vec<Value> = self
                        .store
                        .entries()
                        .into_iter()
                        .filter(|(k, _)| matcher.is_match(k))
                        .map(|(k, v)| json!({ "key": k, "value": v }))
                        .collect();
                    RpcReply::ok(json!({ "value": items }))
                }
                Err(err) => RpcReply::failure(400, "invalid_pattern", err.to_string()),
            },
            (StorageOperation::Clear, _) => {
                self.store.clear();
                RpcReply::no_content()
            }
            (operation, None) => RpcReply::failure(
                400,
                "missing_key",
                format!("operation `{}` requires a key", operation.as_str()),
            ),
        }
    }
}

/// [`HttpClient`] that answers logger/storage RPCs from an in-process
/// [`StorageService`] and records every request it sees. Requests to any
/// other URL get a 404.
pub struct LoopbackHttpClient {
    service: RefCell<StorageService<MemoryStore>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub request: HttpRequest,
    pub body: Option<String>,
}

impl RecordedRequest {
    pub fn json_body(&self) -> Option<Value> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
    }
}

impl LoopbackHttpClient {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            service: RefCell::new(StorageService::new(store, EngineLog::disabled())),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn stored(&self, key: &str) -> Option<Value> {
        self.service.borrow().store().get(key)
    }
}

impl Default for LoopbackHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for LoopbackHttpClient {
    fn request(
        &self,
        request: &HttpRequest,
        body: Option<&str>,
    ) -> Result<HttpResponse, HttpError> {
        self.requests.borrow_mut().push(RecordedRequest {
            request: request.clone(),
            body: body.map(str::to_string),
        });

        let path = url_path(&request.url);
        let reply = self
            .service
            .borrow_mut()
            .route(&request.method, path, body.unwrap_or(""));
        let mut headers = BTreeMap::new();
        if reply.body.is_some() {
            headers.insert("content-type".to_string(), "application/json".to_string());
        }
        Ok(HttpResponse {
            status: reply.status,
            headers,
            body: reply.body_string(),
        })
    }
}

fn url_path(url: &str) -> &str {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    without_scheme
        .find('/')
        .map(|idx| &without_scheme[idx..])
        .unwrap_or("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> StorageService<MemoryStore> {
        StorageService::new(MemoryStore::new(), EngineLog::disabled())
    }

    #[test]
    fn set_reports_previous_entry_on_overwrite() {
        let mut service = service();
        let first = service.handle_storage(r#"{"operation":"set","key":"foo","value":"a"}"#);
        assert_eq!(first.status, 200);
        assert_eq!(
            first.body,
            Some(json!({ "key": "foo", "value": "a", "previous": null }))
        );

        let second = service.handle_storage(r#"{"operation":"set","key":"foo","value":"b"}"#);
        assert_eq!(
            second.body,
            Some(json!({
                "key": "foo",
                "value": "b",
                "previous": { "key": "foo", "value": "a" }
            }))
        );
    }

    #[test]
    fn get_omits_value_for_missing_key() {
        let mut service = service();
        let reply = service.handle_storage(r#"{"operation":"get","key":"nope"}"#);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, Some(json!({ "key": "nope" })));
    }

    #[test]
    fn find_filters_keys_by_unanchored_regex() {
        let mut service = service();
        service.handle_storage(r#"{"operation":"set","key":"foo","value":"1"}"#);
        service.handle_storage(r#"{"operation":"set","key":"bar","value":"2"}"#);
        service.handle_storage(r#"{"operation":"set","key":"xfoo","value":"3"}"#);

        let reply = service.handle_storage(r#"{"operation":"find","key":"^fo.*"}"#);
        assert_eq!(
            reply.body,
            Some(json!({ "value": [{ "key": "foo", "value": "1" }] }))
        );

        let reply = service.handle_storage(r#"{"operation":"find","key":"fo.*"}"#);
        let items = reply.body.expect("body")["value"].as_array().expect("array").len();
        assert_eq!(items, 2);
    }

    #[test]
    fn remove_and_clear_reply_without_content() {
        let mut service = service();
        service.handle_storage(r#"{"operation":"set","key":"foo","value":"1"}"#);

        let removed = service.handle_storage(r#"{"operation":"remove","key":"foo"}"#);
        assert_eq!(removed, RpcReply::no_content());
        assert!(service.store().is_empty());

        service.handle_storage(r#"{"operation":"set","key":"bar","value":"2"}"#);
        let cleared = service.handle_storage(r#"{"operation":"clear"}"#);
        assert_eq!(cleared.status, 204);
        assert!(service.store().is_empty());
    }

    #[test]
    fn unknown_operation_and_route_are_not_found() {
        let mut service = service();
        let reply = service.handle_storage(r#"{"operation":"drop"}"#);
        assert_eq!(reply.status, 404);
        assert_eq!(reply.body, Some(json!({})));

        let reply = service.route("GET", STORAGE_RPC_PATH, "");
        assert_eq!(reply.status, 404);
    }

    #[test]
    fn invalid_pattern_is_a_client_error() {
        let mut service = service();
        let reply = service.handle_storage(r#"{"operation":"find","key":"(unclosed"}"#);
        assert_eq!(reply.status, 400);
        assert_eq!(reply.body.expect("body")["error"], "invalid_pattern");
    }

    #[test]
    fn rejected_storage_calls_are_logged_as_warnings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("double.log");
        let mut service =
            StorageService::new(MemoryStore::new(), EngineLog::new(Some(path.clone())));

        service.handle_storage(r#"{"operation":"get"}"#);
        service.handle_storage(r#"{"operation":"set","key":"ok","value":"1"}"#);

        let entries: Vec<(String, String)> = std::fs::read_to_string(&path)
            .expect("read log")
            .lines()
            .map(|line| {
                let entry: Value = serde_json::from_str(line).expect("json line");
                (
                    entry["level"].as_str().expect("level").to_string(),
                    entry["event"].as_str().expect("event").to_string(),
                )
            })
            .collect();
        assert_eq!(
            entries,
            vec![
                ("info".to_string(), "storage.rpc".to_string()),
                ("warn".to_string(), "storage.rejected".to_string()),
                ("info".to_string(), "storage.rpc".to_string()),
            ]
        );
    }

    #[test]
    fn url_path_strips_scheme_and_authority() {
        assert_eq!(
            url_path("http://127.0.0.1:3004/apis/v1/storage/_rpc"),
            STORAGE_RPC_PATH
        );
        assert_eq!(url_path("http://example.com"), "/");
    }
}
