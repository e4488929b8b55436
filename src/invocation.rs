use crate::shared::errors::EngineError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const CODE_FIELD: &str = "code";
const MODULE_FIELD: &str = "module";
const ENV_FIELD: &str = "env";
const EXTERNAL_API_URL_FIELD: &str = "externalApiUrl";
const EXTERNAL_API_HEADERS_FIELD: &str = "externalApiHeaders";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Validate,
    Request,
    BackendCall,
    Response,
    Error,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Validate,
        Phase::Request,
        Phase::BackendCall,
        Phase::Response,
        Phase::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Request => "request",
            Self::BackendCall => "backend_call",
            Self::Response => "response",
            Self::Error => "error",
        }
    }

    /// Name the script must assign on `exports` to handle this phase.
    pub fn handler_name(self) -> &'static str {
        match self {
            Self::Validate => "on_validate",
            Self::Request => "on_request",
            Self::BackendCall => "on_backend_call",
            Self::Response => "on_response",
            Self::Error => "on_error",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim().to_ascii_lowercase();
        let name = normalized.strip_prefix("on_").unwrap_or(&normalized);
        match name {
            "validate" => Ok(Self::Validate),
            "request" => Ok(Self::Request),
            "backend_call" => Ok(Self::BackendCall),
            "response" => Ok(Self::Response),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown phase `{}`; expected one of: validate, request, backend_call, response, error",
                raw.trim()
            )),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalApi {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub phase: Phase,
    pub source: String,
    pub module: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub external_api: Option<ExternalApi>,
    pub context: Value,
}

pub fn decode(phase: Phase, raw: &str) -> Result<InvocationRequest, EngineError> {
    let parsed: Value =
        serde_json::from_str(raw).map_err(|err| EngineError::Decode(err.to_string()))?;
    let Value::Object(mut fields) = parsed else {
        return Err(EngineError::Decode(
            "expected a JSON object at the top level".to_string(),
        ));
    };

    let source = match fields.shift_remove(CODE_FIELD) {
        Some(Value::String(code)) => code,
        Some(_) => return Err(EngineError::Decode("`code` must be a string".to_string())),
        None => return Err(EngineError::Decode("missing `code` field".to_string())),
    };
    let module = optional_string(fields.shift_remove(MODULE_FIELD), MODULE_FIELD)?;
    let url = optional_string(fields.shift_remove(EXTERNAL_API_URL_FIELD), EXTERNAL_API_URL_FIELD)?
        .filter(|url| !url.is_empty());
    let headers = string_map(
        fields.shift_remove(EXTERNAL_API_HEADERS_FIELD),
        EXTERNAL_API_HEADERS_FIELD,
    )?;
    // `env` stays visible in the context; only the fields above are stripped.
    let environment = string_map(fields.get(ENV_FIELD).cloned(), ENV_FIELD)?;

    Ok(InvocationRequest {
        phase,
        source,
        module,
        environment,
        external_api: url.map(|url| ExternalApi { url, headers }),
        context: Value::Object(fields),
    })
}

fn optional_string(value: Option<Value>, field: &str) -> Result<Option<String>, EngineError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(EngineError::Decode(format!("`{field}` must be a string"))),
    }
}

fn string_map(
    value: Option<Value>,
    field: &str,
) -> Result<BTreeMap<String, String>, EngineError> {
    let entries: Map<String, Value> = match value {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(entries)) => entries,
        Some(_) => {
            return Err(EngineError::Decode(format!(
                "`{field}` must be an object of strings"
            )))
        }
    };

    entries
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, s)),
            other => Err(EngineError::Decode(format!(
                "`{field}.{key}` must be a string, got {other}"
            ))),
        })
        .collect()
}
