//! Coalescing delivery of a streamed reply into a single edited message.
//!
//! Producers push fragments into an unbounded queue. A dedicated flush loop
//! drains the queue into the buffer on every poll tick and edits the
//! message at most once per update interval, plus one final edit once the
//! session is finished. The buffer is owned by the flush loop alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bolt_relay_core::StreamSettings;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use super::sink::{Destination, MessageHandle, MessageSink, SinkError};

pub const DEFAULT_PLACEHOLDER: &str = "⏳ Thinking...";
pub const EMPTY_REPLY_TEXT: &str = "_(empty response)_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Minimum spacing between two intermediate edits.
    pub update_interval: Duration,
    /// Flush loop wake-up period.
    pub poll_interval: Duration,
    pub placeholder: String,
}

impl StreamConfig {
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            update_interval: Duration::from_millis(settings.update_interval_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            placeholder: settings.placeholder.clone(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to post placeholder message: {0}")]
    Open(#[source] SinkError),
    #[error("failed to update streamed message: {0}")]
    Delivery(#[source] SinkError),
    #[error("reply generation failed: {0}")]
    Aborted(String),
    #[error("flush loop stopped unexpectedly: {0}")]
    Worker(String),
}

#[derive(Default)]
struct Control {
    complete: AtomicBool,
    abort_reason: Mutex<Option<String>>,
}

impl Control {
    fn abort_reason(&self) -> Option<String> {
        self.abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One in-flight streamed reply.
pub struct StreamSession {
    handle: MessageHandle,
    pending: mpsc::UnboundedSender<String>,
    control: Arc<Control>,
    worker: JoinHandle<Result<String, StreamError>>,
}

impl StreamSession {
    /// Post the placeholder and start the flush loop.
    pub async fn open(
        sink: Arc<dyn MessageSink>,
        destination: &Destination,
        config: StreamConfig,
    ) -> Result<Self, StreamError> {
        let handle = sink
            .post(destination, &config.placeholder)
            .await
            .map_err(StreamError::Open)?;
        debug!(
            channel = %handle.channel,
            message_id = %handle.message_id,
            "stream session opened"
        );

        let (pending, rx) = mpsc::unbounded_channel();
        let control = Arc::new(Control::default());
        let worker = tokio::spawn(flush_loop(
            sink,
            handle.clone(),
            rx,
            Arc::clone(&control),
            config,
        ));

        Ok(Self {
            handle,
            pending,
            control,
            worker,
        })
    }

    pub fn handle(&self) -> &MessageHandle {
        &self.handle
    }

    pub fn is_complete(&self) -> bool {
        self.control.complete.load(Ordering::Acquire)
    }

    /// Queue a fragment. Fragments pushed after completion are dropped.
    pub fn push(&self, fragment: impl Into<String>) {
        if self.is_complete() {
            warn!(message_id = %self.handle.message_id, "fragment pushed after finish, dropped");
            return;
        }
        if self.pending.send(fragment.into()).is_err() {
            debug!(message_id = %self.handle.message_id, "flush loop already stopped");
        }
    }

    /// Mark the reply complete. The flush loop performs the final edit.
    pub fn finish(&self) {
        if self.control.complete.swap(true, Ordering::AcqRel) {
            debug!(message_id = %self.handle.message_id, "finish called twice");
        }
    }

    /// Complete the reply with an error note appended to whatever was
    /// produced so far.
    pub fn abort(&self, reason: impl Into<String>) {
        {
            let mut slot = self
                .control
                .abort_reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() && !self.is_complete() {
                *slot = Some(reason.into());
            }
        }
        self.finish();
    }

    /// Wait for the flush loop to end and return the delivered text.
    pub async fn result(self) -> Result<String, StreamError> {
        match self.worker.await {
            Ok(result) => result,
            Err(join_error) => Err(StreamError::Worker(join_error.to_string())),
        }
    }
}

async fn flush_loop(
    sink: Arc<dyn MessageSink>,
    handle: MessageHandle,
    mut pending: mpsc::UnboundedReceiver<String>,
    control: Arc<Control>,
    config: StreamConfig,
) -> Result<String, StreamError> {
    let mut buffer = String::new();
    let mut dirty = false;
    let mut last_update = Instant::now();
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // Read the flag before draining so every fragment pushed ahead of
        // `finish` is already in the queue.
        let mut complete = control.complete.load(Ordering::Acquire);
        loop {
            match pending.try_recv() {
                Ok(fragment) => {
                    buffer.push_str(&fragment);
                    dirty = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Session dropped without finish.
                    complete = true;
                    break;
                }
            }
        }

        if complete {
            let abort_reason = control.abort_reason();
            let text = final_text(&buffer, abort_reason.as_deref());
            if let Err(e) = sink.update(&handle, &text).await {
                return Err(delivery_failed(sink.as_ref(), &handle, &buffer, e).await);
            }
            debug!(message_id = %handle.message_id, chars = buffer.len(), "stream session finished");
            return match abort_reason {
                Some(reason) => Err(StreamError::Aborted(reason)),
                None => Ok(buffer),
            };
        }

        if dirty && last_update.elapsed() >= config.update_interval {
            if let Err(e) = sink.update(&handle, &buffer).await {
                return Err(delivery_failed(sink.as_ref(), &handle, &buffer, e).await);
            }
            last_update = Instant::now();
            dirty = false;
        }
    }
}

async fn delivery_failed(
    sink: &dyn MessageSink,
    handle: &MessageHandle,
    buffer: &str,
    cause: SinkError,
) -> StreamError {
    error!(message_id = %handle.message_id, error = %cause, "streamed message update failed");
    let note = format!(":warning: Error delivering response: {cause}");
    let text = if buffer.is_empty() {
        note
    } else {
        format!("{buffer}\n\n{note}")
    };
    if let Err(e) = sink.update(handle, &text).await {
        warn!(message_id = %handle.message_id, error = %e, "final error update failed");
    }
    StreamError::Delivery(cause)
}

fn final_text(buffer: &str, abort_reason: Option<&str>) -> String {
    match abort_reason {
        Some(reason) if buffer.is_empty() => format!("Error generating response: {reason}"),
        Some(reason) => format!("{buffer}\n\nError generating response: {reason}"),
        None if buffer.is_empty() => EMPTY_REPLY_TEXT.to_string(),
        None => buffer.to_string(),
    }
}
