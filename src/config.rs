use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "GATEWAY_JS_RUNTIME_CONFIG";
pub const LOG_PATH_ENV: &str = "GATEWAY_JS_RUNTIME_LOG";
pub const MEMORY_LIMIT_ENV: &str = "GATEWAY_JS_RUNTIME_MEMORY_LIMIT";
pub const MAX_STACK_ENV: &str = "GATEWAY_JS_RUNTIME_MAX_STACK";
pub const HTTP_TIMEOUT_ENV: &str = "GATEWAY_JS_RUNTIME_HTTP_TIMEOUT_MS";

const DEFAULT_MEMORY_LIMIT_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_MAX_STACK_SIZE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value `{value}` for {var}: expected a positive integer")]
    InvalidEnv { var: String, value: String },
    #[error("engine config validation failed: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: usize,
    #[serde(default = "default_max_stack_size")]
    pub max_stack_size_bytes: usize,
    #[serde(default)]
    pub http_timeout_ms: Option<u64>,
}

fn default_memory_limit() -> usize {
    DEFAULT_MEMORY_LIMIT_BYTES
}

fn default_max_stack_size() -> usize {
    DEFAULT_MAX_STACK_SIZE_BYTES
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            max_stack_size_bytes: DEFAULT_MAX_STACK_SIZE_BYTES,
            http_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Loads the optional YAML file named by [`CONFIG_PATH_ENV`], then applies
    /// per-field overrides. Blank variables are treated as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = match var(CONFIG_PATH_ENV) {
            Some(path) => Self::from_path(Path::new(path.trim()))?,
            None => Self::default(),
        };

        if let Some(path) = var(LOG_PATH_ENV) {
            config.log_path = Some(PathBuf::from(path.trim()));
        }
        if let Some(raw) = var(MEMORY_LIMIT_ENV) {
            config.memory_limit_bytes = parse_positive(MEMORY_LIMIT_ENV, &raw)? as usize;
        }
        if let Some(raw) = var(MAX_STACK_ENV) {
            config.max_stack_size_bytes = parse_positive(MAX_STACK_ENV, &raw)? as usize;
        }
        if let Some(raw) = var(HTTP_TIMEOUT_ENV) {
            config.http_timeout_ms = Some(parse_positive(HTTP_TIMEOUT_ENV, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_limit_bytes == 0 {
            return Err(ConfigError::Invalid(
                "`memory_limit_bytes` must be greater than zero".to_string(),
            ));
        }
        if self.max_stack_size_bytes == 0 {
            return Err(ConfigError::Invalid(
                "`max_stack_size_bytes` must be greater than zero".to_string(),
            ));
        }
        if self.http_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "`http_timeout_ms` must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_positive(var: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw.to_string(),
        })
}
