//! Streamed reply delivery.

pub mod session;
pub mod sink;

pub use session::{DEFAULT_PLACEHOLDER, EMPTY_REPLY_TEXT, StreamConfig, StreamError, StreamSession};
pub use sink::{Destination, MessageHandle, MessageSink, SinkError};
