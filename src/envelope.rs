use crate::sandbox::{exception_message, is_truthy, thrown_message};
use crate::shared::errors::EngineError;
use rquickjs::{Ctx, Value};
use serde::Serialize;
use std::collections::BTreeMap;

const NO_RESULT: &str = "no result";

/// The one message written back to the host per invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Serialized JSON exactly as produced by the handler or default table.
    Success(String),
    Failure(ErrorEnvelope),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub error: bool,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_str: Option<String>,
}

impl ErrorEnvelope {
    fn internal(body_json: Option<serde_json::Value>, body_str: Option<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            error: true,
            status: 500,
            headers,
            body_json,
            body_str,
        }
    }
}

impl Envelope {
    pub fn from_error(err: &EngineError) -> Self {
        Self::Failure(ErrorEnvelope::internal(
            Some(serde_json::json!({ "error": err.to_string() })),
            None,
        ))
    }

    /// The handler ran but answered nothing usable.
    pub fn no_result() -> Self {
        Self::Failure(ErrorEnvelope::internal(None, Some(NO_RESULT.to_string())))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn to_json_string(&self) -> String {
        match self {
            Self::Success(raw) => raw.clone(),
            Self::Failure(failure) => serde_json::to_string(failure).unwrap_or_else(|_| {
                r#"{"error":true,"status":500,"headers":{"Content-Type":"application/json"},"body_str":"unserializable error"}"#
                    .to_string()
            }),
        }
    }
}

/// Normalizes a handler's return value into an envelope.
///
/// Settled promise-likes are unwrapped first: a sync promise (`then` plus
/// `value`/`error`) or a native promise that settles once pending jobs drain.
pub fn marshal<'js>(ctx: &Ctx<'js>, result: Value<'js>) -> Result<Envelope, EngineError> {
    let result = settle_native_promise(ctx, result)?;
    if !is_truthy(&result) {
        return Ok(Envelope::no_result());
    }

    if let Some(object) = result.as_object() {
        let then: Value<'js> = object
            .get("then")
            .map_err(|err| EngineError::Handler(exception_message(ctx, err)))?;
        if then.is_function() {
            let has = |key: &str| {
                object
                    .contains_key(key)
                    .map_err(|err| EngineError::Handler(exception_message(ctx, err)))
            };
            if has("value")? {
                let value: Value<'js> = object
                    .get("value")
                    .map_err(|err| EngineError::Handler(exception_message(ctx, err)))?;
                let value = settle_native_promise(ctx, value)?;
                if value.is_undefined() {
                    return Ok(Envelope::no_result());
                }
                return stringify(ctx, value);
            }
            if has("error")? {
                let error: Value<'js> = object
                    .get("error")
                    .map_err(|err| EngineError::Handler(exception_message(ctx, err)))?;
                return Err(EngineError::Handler(thrown_message(ctx, error)));
            }
        }
    }

    stringify(ctx, result)
}

fn settle_native_promise<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<Value<'js>, EngineError> {
    let Some(promise) = value.as_promise() else {
        return Ok(value);
    };
    match promise.finish::<Value<'js>>() {
        Ok(settled) => Ok(settled),
        Err(rquickjs::Error::WouldBlock) => Err(EngineError::Handler(
            "handler returned a promise that did not settle synchronously".to_string(),
        )),
        Err(err) => Err(EngineError::Handler(exception_message(ctx, err))),
    }
}

fn stringify<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<Envelope, EngineError> {
    let serialized = ctx
        .json_stringify(value)
        .map_err(|err| EngineError::Handler(exception_message(ctx, err)))?;
    match serialized {
        Some(text) => text
            .to_string()
            .map(Envelope::Success)
            .map_err(|err| EngineError::Runtime(err.to_string())),
        None => Ok(Envelope::no_result()),
    }
}
