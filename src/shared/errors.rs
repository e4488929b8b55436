#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid invocation input: {0}")]
    Decode(String),
    #[error("failed to read invocation input: {source}")]
    Channel {
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Evaluation(String),
    #[error("{0}")]
    Handler(String),
    #[error("script runtime failure: {0}")]
    Runtime(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Decode(_) => "decode",
            EngineError::Channel { .. } => "channel",
            EngineError::Evaluation(_) => "evaluation",
            EngineError::Handler(_) => "handler",
            EngineError::Runtime(_) => "runtime",
        }
    }
}
