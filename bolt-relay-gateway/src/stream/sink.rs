//! Abstraction over the chat surface's message API.

use std::time::Duration;

/// Where a new message should be posted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub channel: String,
    /// Parent message id when replying inside a thread.
    pub thread: Option<String>,
}

impl Destination {
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread: None,
        }
    }

    pub fn in_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }
}

/// Sink-issued reference to a posted message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub channel: String,
    pub message_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("API error: {0}")]
    Api(String),
}

/// Posts a message once, then edits it in place.
#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    async fn post(&self, destination: &Destination, text: &str)
    -> Result<MessageHandle, SinkError>;

    async fn update(&self, handle: &MessageHandle, text: &str) -> Result<(), SinkError>;
}
