//! `console` and `storage` capabilities backed by the external RPC service.
//!
//! Building the shim is free: the fragment is static source and the native
//! bindings only capture an [`ExternalApiClient`]. Each capability call later
//! costs exactly one RPC round trip.

use super::prelude::{LOG_BRIDGE, STORAGE_BRIDGE};
use crate::rpc::{ExternalApiClient, RpcError, StorageOperation};
use rquickjs::function::Func;
use rquickjs::Ctx;
use serde::Deserialize;
use serde_json::{json, Value};

const HOST_API_FRAGMENT: &str = r#"
  const host_api = (function() {
    function unwrap(raw) {
      const reply = JSON.parse(raw);
      if (!reply.ok) {
        if (reply.error_description === null || reply.error_description === undefined) {
          throw new Error(reply.error);
        }
        throw new Error(reply.error, { cause: reply.error_description });
      }
      return reply.value === undefined ? null : reply.value;
    }

    function raw_log(level, ...messages) {
      unwrap(__log(String(level), JSON.stringify(messages)));
    }

    function raw_storage(call) {
      return unwrap(__storage(JSON.stringify(call)));
    }

    const console = Object.freeze({
      raw: (level, ...args) => raw_log(level, ...args),
      log: (...args) => raw_log('info', ...args),
      info: (...args) => raw_log('info', ...args),
      warn: (...args) => raw_log('warn', ...args),
      error: (...args) => raw_log('error', ...args),
      debug: (...args) => raw_log('debug', ...args),
    });

    const storage = Object.freeze({
      getItem: (key) => raw_storage({ operation: 'get', key: key }),
      setItem: (key, value, opts) => raw_storage({ operation: 'set', key: key, value: value, opts: opts }),
      removeItem: (key) => raw_storage({ operation: 'remove', key: key }),
      findItems: (pattern) => raw_storage({ operation: 'find', key: pattern }),
      findAllItems: () => storage.findItems('.*'),
      allItems: () => storage.findItems('.*').map((item) => item.value),
      allKeys: () => storage.findItems('.*').map((item) => item.key),
      clear: () => {
        raw_storage({ operation: 'clear' });
      },
    });

    return Object.freeze({ console: console, storage: storage });
  })();
  const console = host_api.console;
  const storage = host_api.storage;
"#;

/// Returns the capability fragment, empty when no external API is bound.
pub fn shim_source(enabled: bool) -> &'static str {
    if enabled {
        HOST_API_FRAGMENT
    } else {
        ""
    }
}

#[derive(Debug, Deserialize)]
struct ScriptStorageCall {
    operation: String,
    #[serde(default)]
    key: Option<Value>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    opts: Option<Value>,
}

pub fn install(ctx: &Ctx<'_>, client: Option<ExternalApiClient>) -> rquickjs::Result<()> {
    let Some(client) = client else {
        return Ok(());
    };
    let globals = ctx.globals();

    let log_client = client.clone();
    globals.set(
        LOG_BRIDGE,
        Func::from(
            move |level: String, messages: String| -> rquickjs::Result<String> {
                Ok(log_bridge(&log_client, &level, &messages).to_string())
            },
        ),
    )?;

    globals.set(
        STORAGE_BRIDGE,
        Func::from(move |call: String| -> rquickjs::Result<String> {
            Ok(storage_bridge(&client, &call).to_string())
        }),
    )?;
    Ok(())
}

fn log_bridge(client: &ExternalApiClient, level: &str, messages: &str) -> Value {
    let messages: Vec<Value> = match serde_json::from_str(messages) {
        Ok(messages) => messages,
        Err(err) => return RpcError::Encode(err).to_script_failure(),
    };
    match client.log(level, &messages) {
        Ok(()) => json!({ "ok": true }),
        Err(err) => err.to_script_failure(),
    }
}

fn storage_bridge(client: &ExternalApiClient, raw: &str) -> Value {
    let call: ScriptStorageCall = match serde_json::from_str(raw) {
        Ok(call) => call,
        Err(err) => return RpcError::Encode(err).to_script_failure(),
    };
    let Some(operation) = StorageOperation::parse(&call.operation) else {
        return json!({
            "ok": false,
            "error": format!("unknown storage operation `{}`", call.operation),
            "error_description": Value::Null,
        });
    };
    let key = key_string(call.key);

    let result = match operation {
        StorageOperation::Get => client.get_item(&key),
        StorageOperation::Set => {
            client.set_item(&key, call.value.unwrap_or(Value::Null), call.opts)
        }
        StorageOperation::Remove => client.remove_item(&key),
        StorageOperation::Find => client.find_items(&key),
        StorageOperation::Clear => client.clear().map(|()| Value::Null),
    };

    match result {
        Ok(value) => json!({ "ok": true, "value": value }),
        Err(err) => err.to_script_failure(),
    }
}

// Keys are coerced the way a JS property access would coerce them.
fn key_string(key: Option<Value>) -> String {
    match key {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}
