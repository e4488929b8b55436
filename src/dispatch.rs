use crate::invocation::{InvocationRequest, Phase};
use crate::sandbox::{exception_message, HandlerTable};
use crate::shared::errors::EngineError;
use rquickjs::{Ctx, Value};
use serde_json::{json, Map};

pub enum Dispatch<'js> {
    /// Raw return value of the guest handler, still to be marshaled.
    Handled(Value<'js>),
    /// Canonical pass-through answer for a phase the script does not handle.
    Default(serde_json::Value),
}

pub fn dispatch<'js>(
    ctx: &Ctx<'js>,
    table: &HandlerTable<'js>,
    request: &InvocationRequest,
) -> Result<Dispatch<'js>, EngineError> {
    let Some(handler) = table.handler(ctx, request.phase)? else {
        return Ok(Dispatch::Default(default_result(
            request.phase,
            &request.context,
        )));
    };

    let context_json = serde_json::to_string(&request.context)
        .map_err(|err| EngineError::Runtime(err.to_string()))?;
    let context: Value<'js> = ctx
        .json_parse(context_json)
        .map_err(|err| EngineError::Runtime(exception_message(ctx, err)))?;

    let result: Value<'js> = handler
        .call((context,))
        .map_err(|err| EngineError::Handler(exception_message(ctx, err)))?;
    Ok(Dispatch::Handled(result))
}

/// Answer for a phase without a handler; never blocks the gateway pipeline.
pub fn default_result(phase: Phase, context: &serde_json::Value) -> serde_json::Value {
    match phase {
        Phase::Validate => json!({ "result": true }),
        Phase::BackendCall => json!({ "delegates_call": true }),
        Phase::Request => context
            .get("otoroshi_request")
            .cloned()
            .unwrap_or(serde_json::Value::Null),
        Phase::Response => context
            .get("otoroshi_response")
            .cloned()
            .unwrap_or(serde_json::Value::Null),
        Phase::Error => match context.get("otoroshi_response") {
            Some(serde_json::Value::Object(fields)) => serde_json::Value::Object(fields.clone()),
            _ => serde_json::Value::Object(Map::new()),
        },
    }
}
