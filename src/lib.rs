pub mod config;
pub mod dispatch;
pub mod engine;
pub mod envelope;
pub mod host;
pub mod invocation;
pub mod rpc;
pub mod sandbox;
pub mod shared;
pub mod storage_double;

pub use engine::{Engine, EngineError};
pub use envelope::Envelope;
pub use invocation::Phase;
