//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;

use bolt_relay_gateway::prep::{Preparer, PreparerError, Readiness};
use bolt_relay_gateway::providers::{CompletionProvider, ProviderError};
use bolt_relay_gateway::stream::{Destination, MessageHandle, MessageSink, SinkError};

/// Which preparer call never returns during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hang {
    Begin,
    Poll,
}

/// One full attempt-loop run: what `begin` returns and the readiness answers
/// that follow. The last answer repeats once the list is exhausted.
pub struct Run {
    pub begin: Result<(), String>,
    pub polls: Vec<Result<Readiness, String>>,
    pub hang: Option<Hang>,
}

impl Run {
    pub fn ready_after(pending: usize, items: u64) -> Self {
        let mut polls: Vec<_> = (0..pending).map(|_| Ok(Readiness::pending())).collect();
        polls.push(Ok(Readiness::ready(items)));
        Self {
            begin: Ok(()),
            polls,
            hang: None,
        }
    }

    pub fn begin_fails(message: &str) -> Self {
        Self {
            begin: Err(message.to_string()),
            polls: vec![Ok(Readiness::pending())],
            hang: None,
        }
    }

    pub fn never_ready() -> Self {
        Self {
            begin: Ok(()),
            polls: vec![Ok(Readiness::pending())],
            hang: None,
        }
    }

    pub fn hangs(at: Hang) -> Self {
        Self {
            hang: Some(at),
            ..Self::never_ready()
        }
    }
}

pub struct ScriptedPreparer {
    runs: Mutex<VecDeque<Run>>,
    current: Mutex<VecDeque<Result<Readiness, String>>>,
    hang: Mutex<Option<Hang>>,
    poll_delay: Duration,
    pub begins: AtomicUsize,
    pub polls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl ScriptedPreparer {
    pub fn new(runs: Vec<Run>) -> Self {
        Self::with_poll_delay(runs, Duration::ZERO)
    }

    pub fn with_poll_delay(runs: Vec<Run>, poll_delay: Duration) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            current: Mutex::new(VecDeque::new()),
            hang: Mutex::new(None),
            poll_delay,
            begins: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn next_poll(&self) -> Result<Readiness, String> {
        let mut current = self.current.lock().unwrap();
        if current.len() > 1 {
            current.pop_front().unwrap()
        } else {
            current
                .front()
                .cloned()
                .unwrap_or(Ok(Readiness::pending()))
        }
    }
}

#[async_trait::async_trait]
impl Preparer for ScriptedPreparer {
    async fn begin(&self, _resource_id: &str) -> Result<(), PreparerError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let run = self
            .runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Run::never_ready);
        *self.current.lock().unwrap() = run.polls.into();
        *self.hang.lock().unwrap() = run.hang;
        if run.hang == Some(Hang::Begin) {
            futures::future::pending::<()>().await;
        }
        run.begin.map_err(PreparerError::Service)
    }

    async fn is_ready(&self, _resource_id: &str) -> Result<Readiness, PreparerError> {
        if *self.hang.lock().unwrap() == Some(Hang::Poll) {
            self.polls.fetch_add(1, Ordering::SeqCst);
            futures::future::pending::<()>().await;
        }
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.polls.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let answer = self.next_poll();
        self.active.fetch_sub(1, Ordering::SeqCst);
        answer.map_err(PreparerError::Service)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Post { destination: Destination, text: String },
    Update { message_id: String, text: String },
}

/// Records every call; update number `fail_update_at` (zero-based) fails.
pub struct RecordingSink {
    calls: Mutex<Vec<(Instant, SinkCall)>>,
    fail_post: bool,
    fail_update_at: Option<usize>,
    updates: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_post: false,
            fail_update_at: None,
            updates: AtomicUsize::new(0),
        }
    }

    pub fn failing_post() -> Self {
        Self {
            fail_post: true,
            ..Self::new()
        }
    }

    pub fn failing_update_at(index: usize) -> Self {
        Self {
            fail_update_at: Some(index),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn posts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Post { text, .. } => Some(text),
                SinkCall::Update { .. } => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Update { text, .. } => Some(text),
                SinkCall::Post { .. } => None,
            })
            .collect()
    }

    pub fn update_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, call)| matches!(call, SinkCall::Update { .. }))
            .map(|(at, _)| *at)
            .collect()
    }
}

#[async_trait::async_trait]
impl MessageSink for RecordingSink {
    async fn post(
        &self,
        destination: &Destination,
        text: &str,
    ) -> Result<MessageHandle, SinkError> {
        if self.fail_post {
            return Err(SinkError::Api("channel_not_found".to_string()));
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push((
            Instant::now(),
            SinkCall::Post {
                destination: destination.clone(),
                text: text.to_string(),
            },
        ));
        Ok(MessageHandle {
            channel: destination.channel.clone(),
            message_id: format!("msg-{}", calls.len()),
        })
    }

    async fn update(&self, handle: &MessageHandle, text: &str) -> Result<(), SinkError> {
        self.calls.lock().unwrap().push((
            Instant::now(),
            SinkCall::Update {
                message_id: handle.message_id.clone(),
                text: text.to_string(),
            },
        ));
        let index = self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update_at == Some(index) {
            return Err(SinkError::RateLimited { retry_after: None });
        }
        Ok(())
    }
}

/// Streams fixed fragments with a delay between them, optionally ending in
/// an error.
pub struct FragmentProvider {
    pub fragments: Vec<String>,
    pub delay: Duration,
    pub fail_with: Option<String>,
}

impl FragmentProvider {
    pub fn new(fragments: &[&str], delay: Duration) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            delay,
            fail_with: None,
        }
    }

    pub fn failing_after(fragments: &[&str], message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new(fragments, Duration::from_millis(10))
        }
    }
}

#[async_trait::async_trait]
impl CompletionProvider for FragmentProvider {
    fn name(&self) -> &str {
        "fragments"
    }

    async fn generate(&self, _prompt: &str, _system: &str) -> Result<String, ProviderError> {
        Ok(self.fragments.concat())
    }

    fn generate_streaming<'a>(
        &'a self,
        _prompt: &'a str,
        _system: &'a str,
    ) -> Option<BoxStream<'a, Result<String, ProviderError>>> {
        let delay = self.delay;
        let fragments = stream::iter(self.fragments.clone()).then(move |fragment| async move {
            tokio::time::sleep(delay).await;
            Ok(fragment)
        });
        let tail = stream::iter(self.fail_with.clone().map(|message| {
            Err(ProviderError::StreamInterrupted(message))
        }));
        Some(fragments.chain(tail).boxed())
    }
}

/// Provider without streaming support.
pub struct SingleShotProvider {
    pub reply: Result<String, String>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl SingleShotProvider {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl CompletionProvider for SingleShotProvider {
    fn name(&self) -> &str {
        "single-shot"
    }

    async fn generate(&self, prompt: &str, system: &str) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), system.to_string()));
        self.reply.clone().map_err(|message| ProviderError::ApiError { message })
    }
}
