//! Per-call QuickJS sandbox.
//!
//! A [`Sandbox`] owns a fresh runtime and context. It is built for one
//! invocation and dropped afterwards, so no global state written by one guest
//! script can be observed by the next.

pub mod capabilities;
pub mod prelude;

use crate::config::EngineConfig;
use crate::dispatch::{self, Dispatch};
use crate::envelope::{self, Envelope};
use crate::host::{HttpClient, HttpRequest};
use crate::invocation::{InvocationRequest, Phase};
use crate::rpc::ExternalApiClient;
use crate::shared::errors::EngineError;
use rquickjs::function::{Func, Opt};
use rquickjs::{Context, Ctx, Function, Object, Runtime, Value};
use serde_json::json;
use std::rc::Rc;

/// The guest's populated `exports` object.
pub struct HandlerTable<'js> {
    exports: Object<'js>,
}

impl<'js> HandlerTable<'js> {
    /// `Ok(None)` when the phase has no (truthy) handler.
    pub fn handler(
        &self,
        ctx: &Ctx<'js>,
        phase: Phase,
    ) -> Result<Option<Function<'js>>, EngineError> {
        let value: Value<'js> = self
            .exports
            .get(phase.handler_name())
            .map_err(|err| EngineError::Handler(exception_message(ctx, err)))?;
        if !is_truthy(&value) {
            return Ok(None);
        }
        value.into_function().map(Some).ok_or_else(|| {
            EngineError::Handler(format!("{} is not a function", phase.handler_name()))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub envelope: Envelope,
    pub handled: bool,
}

pub struct Sandbox {
    _runtime: Runtime,
    context: Context,
}

impl Sandbox {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let runtime = Runtime::new().map_err(|err| EngineError::Runtime(err.to_string()))?;
        runtime.set_memory_limit(config.memory_limit_bytes);
        runtime.set_max_stack_size(config.max_stack_size_bytes);
        let context =
            Context::full(&runtime).map_err(|err| EngineError::Runtime(err.to_string()))?;
        Ok(Self {
            _runtime: runtime,
            context,
        })
    }

    /// Evaluates the request's script, dispatches its phase and marshals the
    /// outcome, all within this sandbox's single context.
    pub fn run(
        &self,
        request: &InvocationRequest,
        http: Rc<dyn HttpClient>,
        client: Option<ExternalApiClient>,
    ) -> Result<Completion, EngineError> {
        self.context.with(|ctx| {
            let capabilities = client.is_some();
            install_http_bridge(&ctx, http)
                .and_then(|()| capabilities::install(&ctx, client))
                .map_err(|err| EngineError::Runtime(err.to_string()))?;

            let table = evaluate(&ctx, request, capabilities::shim_source(capabilities))?;
            match dispatch::dispatch(&ctx, &table, request)? {
                Dispatch::Handled(result) => Ok(Completion {
                    envelope: envelope::marshal(&ctx, result)?,
                    handled: true,
                }),
                Dispatch::Default(value) => Ok(Completion {
                    envelope: Envelope::Success(value.to_string()),
                    handled: false,
                }),
            }
        })
    }
}

pub fn evaluate<'js>(
    ctx: &Ctx<'js>,
    request: &InvocationRequest,
    capability_fragment: &str,
) -> Result<HandlerTable<'js>, EngineError> {
    let env_json = serde_json::to_string(&request.environment)
        .map_err(|err| EngineError::Runtime(err.to_string()))?;
    let source = prelude::scope_source(&env_json, capability_fragment, &request.source);

    let exports: Value<'js> = ctx
        .eval(source)
        .map_err(|err| EngineError::Evaluation(exception_message(ctx, err)))?;
    let exports = exports.into_object().ok_or_else(|| {
        EngineError::Evaluation("script exports must be an object".to_string())
    })?;
    Ok(HandlerTable { exports })
}

fn install_http_bridge(ctx: &Ctx<'_>, http: Rc<dyn HttpClient>) -> rquickjs::Result<()> {
    ctx.globals().set(
        prelude::HTTP_BRIDGE,
        Func::from(
            move |request: String, body: Opt<String>| -> rquickjs::Result<String> {
                Ok(http_bridge(http.as_ref(), &request, body.0.as_deref()).to_string())
            },
        ),
    )
}

fn http_bridge(http: &dyn HttpClient, raw: &str, body: Option<&str>) -> serde_json::Value {
    let request: HttpRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(err) => return json!({ "ok": false, "error": format!("invalid fetch request: {err}") }),
    };
    match http.request(&request, body) {
        Ok(response) => json!({
            "ok": true,
            "status": response.status,
            "headers": response.headers,
            "body": response.body,
        }),
        Err(err) => json!({ "ok": false, "error": err.to_string() }),
    }
}

/// Extracts the message of whatever the script threw. For `Error` instances
/// this is exactly `error.message`.
pub fn exception_message(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !err.is_exception() {
        return err.to_string();
    }
    thrown_message(ctx, ctx.catch())
}

pub fn thrown_message<'js>(ctx: &Ctx<'js>, thrown: Value<'js>) -> String {
    if let Some(exception) = thrown.as_exception() {
        return exception.message().unwrap_or_default();
    }
    if let Some(text) = thrown.as_string() {
        return text.to_string().unwrap_or_default();
    }
    if let Some(object) = thrown.as_object() {
        if let Ok(Some(message)) = object.get::<_, Option<String>>("message") {
            return message;
        }
    }
    ctx.json_stringify(thrown)
        .ok()
        .flatten()
        .and_then(|text| text.to_string().ok())
        .unwrap_or_else(|| "uncaught exception".to_string())
}

/// JavaScript truthiness.
pub fn is_truthy(value: &Value<'_>) -> bool {
    if value.is_undefined() || value.is_null() {
        return false;
    }
    if let Some(flag) = value.as_bool() {
        return flag;
    }
    if let Some(number) = value.as_int() {
        return number != 0;
    }
    if let Some(number) = value.as_float() {
        return number != 0.0 && !number.is_nan();
    }
    if let Some(text) = value.as_string() {
        return text.to_string().map(|s| !s.is_empty()).unwrap_or(true);
    }
    if let Some(big) = value.as_big_int() {
        // Out-of-range values cannot be zero.
        return big.clone().to_i64().map(|n| n != 0).unwrap_or(true);
    }
    true
}
