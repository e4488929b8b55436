use crate::config::EngineConfig;
use crate::envelope::Envelope;
use crate::host::{HttpClient, InvocationChannel, UreqHttpClient};
use crate::invocation::{self, Phase};
use crate::rpc::ExternalApiClient;
use crate::sandbox::Sandbox;
use crate::shared::logging::EngineLog;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

pub use crate::shared::errors::EngineError;

/// Runs guest scripts for gateway phases. Holds only configuration and the
/// host HTTP primitive; every call builds and discards its own sandbox.
pub struct Engine {
    config: EngineConfig,
    http: Rc<dyn HttpClient>,
    log: EngineLog,
}

impl Engine {
    pub fn new(config: EngineConfig, http: Rc<dyn HttpClient>) -> Self {
        let log = EngineLog::new(config.log_path.clone());
        Self { config, http, log }
    }

    pub fn with_ureq(config: EngineConfig) -> Self {
        let timeout = config.http_timeout_ms.map(Duration::from_millis);
        Self::new(config, Rc::new(UreqHttpClient::new(timeout)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Error boundary: always yields exactly one envelope.
    pub fn execute(&self, phase: Phase, input: &str) -> Envelope {
        self.log
            .info("invocation.start", &format!("phase={phase} bytes={}", input.len()));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_execute(phase, input)))
            .unwrap_or_else(|_| {
                Err(EngineError::Runtime(
                    "script engine panicked during invocation".to_string(),
                ))
            });

        match outcome {
            Ok(envelope) => {
                self.log.info(
                    "invocation.complete",
                    &format!("phase={phase} error={}", envelope.is_error()),
                );
                envelope
            }
            Err(err) => {
                self.log.error(
                    "invocation.failed",
                    &format!("phase={phase} kind={} message={err}", err.kind()),
                );
                Envelope::from_error(&err)
            }
        }
    }

    fn try_execute(&self, phase: Phase, input: &str) -> Result<Envelope, EngineError> {
        let request = invocation::decode(phase, input)?;
        let client = request.external_api.clone().map(|api| {
            ExternalApiClient::new(api, request.module.clone(), Rc::clone(&self.http))
        });

        let sandbox = Sandbox::new(&self.config)?;
        let completion = sandbox.run(&request, Rc::clone(&self.http), client)?;
        if !completion.handled {
            self.log.info(
                "invocation.default",
                &format!("phase={phase} handler={} missing", phase.handler_name()),
            );
        }
        Ok(completion.envelope)
    }

    /// Reads the single input message and writes the single output message.
    pub fn run(&self, phase: Phase, channel: &mut dyn InvocationChannel) -> std::io::Result<()> {
        let envelope = match channel.input_string() {
            Ok(input) => self.execute(phase, &input),
            Err(source) => {
                let err = EngineError::Channel { source };
                self.log.error("invocation.failed", &err.to_string());
                Envelope::from_error(&err)
            }
        };
        channel.output_string(&envelope.to_json_string())
    }

    pub fn on_validate(&self, channel: &mut dyn InvocationChannel) -> std::io::Result<()> {
        self.run(Phase::Validate, channel)
    }

    pub fn on_request(&self, channel: &mut dyn InvocationChannel) -> std::io::Result<()> {
        self.run(Phase::Request, channel)
    }

    pub fn on_backend_call(&self, channel: &mut dyn InvocationChannel) -> std::io::Result<()> {
        self.run(Phase::BackendCall, channel)
    }

    pub fn on_response(&self, channel: &mut dyn InvocationChannel) -> std::io::Result<()> {
        self.run(Phase::Response, channel)
    }

    pub fn on_error(&self, channel: &mut dyn InvocationChannel) -> std::io::Result<()> {
        self.run(Phase::Error, channel)
    }
}
