//! Primitives supplied by whatever process embeds the engine: the single-shot
//! invocation channel and a blocking HTTP call.

pub mod channel;
pub mod http;

pub use channel::{BufferChannel, InvocationChannel, StdioChannel};
pub use http::{HttpClient, HttpError, HttpRequest, HttpResponse, UreqHttpClient};
