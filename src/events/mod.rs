//! SSE parsing, event verification/dispatch, and the connection lifecycle
//! that the reconnect engine drives.

pub mod dispatcher;
pub mod pipeline;
pub mod sse;
pub mod types;

pub use dispatcher::{Dispatcher, Handler};
pub use pipeline::{EventPipeline, PipelineError};
pub use sse::{SseError, SseEvent, SseParser};
pub use types::EventPayload;
