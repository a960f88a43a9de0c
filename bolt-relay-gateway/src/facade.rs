//! Entry point used by request handlers.
//!
//! [`AgentFacade`] keeps one [`PreparationJob`] per repository and turns
//! questions into replies, streaming them when the provider supports it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use bolt_relay_core::Settings;
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::messages;
use crate::prep::{BackoffPolicy, JobPhase, JobState, JobStatus, PreparationJob, Preparer};
use crate::providers::{CompletionProvider, ProviderError};
use crate::stream::{Destination, MessageSink, SinkError, StreamConfig, StreamError, StreamSession};

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("failed to post message: {0}")]
    Sink(#[from] SinkError),
}

/// What `ask` did with a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    /// The repository was ready and this reply was delivered.
    Answered(String),
    /// The repository was not ready; the status text was posted instead.
    NotReady(JobStatus),
}

pub struct AgentFacade {
    preparer: Arc<dyn Preparer>,
    provider: Arc<dyn CompletionProvider>,
    sink: Arc<dyn MessageSink>,
    backoff: BackoffPolicy,
    stream: StreamConfig,
    streaming: bool,
    jobs: RwLock<HashMap<String, PreparationJob>>,
}

impl AgentFacade {
    pub fn new(
        preparer: Arc<dyn Preparer>,
        provider: Arc<dyn CompletionProvider>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            preparer,
            provider,
            sink,
            backoff: BackoffPolicy::default(),
            stream: StreamConfig::default(),
            streaming: true,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Apply `[preparation]` and `[stream]` settings.
    pub fn with_settings(self, settings: &Settings) -> Self {
        self.with_backoff(BackoffPolicy::from_settings(&settings.preparation))
            .with_stream_config(StreamConfig::from_settings(&settings.stream))
            .with_streaming(settings.stream.enabled)
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream = config;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    /// Get or create the job for `resource_id`.
    pub fn job(&self, resource_id: &str) -> PreparationJob {
        if let Some(job) = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource_id)
        {
            return job.clone();
        }

        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.entry(resource_id.to_string())
            .or_insert_with(|| {
                PreparationJob::new(resource_id, Arc::clone(&self.preparer), self.backoff)
            })
            .clone()
    }

    fn existing_job(&self, resource_id: &str) -> Option<PreparationJob> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource_id)
            .cloned()
    }

    /// Start preparing `resource_id` if it was never started and return its
    /// status. A failed job stays failed until [`retry`](Self::retry).
    pub fn prepare(&self, resource_id: &str) -> JobStatus {
        let job = self.job(resource_id);
        if job.phase() == JobPhase::NotStarted {
            job.start();
        }
        job.status()
    }

    /// Status of a known job; `None` if it was never requested.
    pub fn status(&self, resource_id: &str) -> Option<JobStatus> {
        self.existing_job(resource_id).map(|job| job.status())
    }

    pub fn retry(&self, resource_id: &str) -> bool {
        self.existing_job(resource_id)
            .is_some_and(|job| job.retry())
    }

    /// Handle a user's retry request and return the text to show them.
    pub fn retry_message(&self, resource_id: &str) -> String {
        if self.retry(resource_id) {
            messages::RETRY_STARTED.to_string()
        } else {
            format!(
                "{}\n\n{}",
                messages::RETRY_NOT_AVAILABLE,
                self.status_message(resource_id)
            )
        }
    }

    /// Wait until a known job is no longer in progress.
    pub async fn settled(&self, resource_id: &str) -> Option<JobStatus> {
        match self.existing_job(resource_id) {
            Some(job) => Some(job.settled().await),
            None => None,
        }
    }

    /// User-facing description of where `resource_id` stands.
    pub fn status_message(&self, resource_id: &str) -> String {
        let status = self
            .status(resource_id)
            .unwrap_or_else(|| JobState::new(resource_id).snapshot());
        messages::preparation_status(&status)
    }

    /// Answer a question about `resource_id` once it is prepared.
    ///
    /// Kicks off preparation when needed. Until the repository is ready the
    /// current status text is posted instead of an answer.
    pub async fn ask(
        &self,
        resource_id: &str,
        question: &str,
        destination: &Destination,
    ) -> Result<AskOutcome, ReplyError> {
        let status = self.prepare(resource_id);
        if !status.is_ready() {
            self.sink
                .post(destination, &messages::preparation_status(&status))
                .await?;
            return Ok(AskOutcome::NotReady(status));
        }

        let prompt = messages::research_prompt(resource_id, question);
        let text = self
            .reply(&prompt, messages::RESEARCH_SYSTEM_PROMPT, destination)
            .await?;
        Ok(AskOutcome::Answered(text))
    }

    /// Generate a reply and deliver it to `destination`.
    pub async fn reply(
        &self,
        prompt: &str,
        system: &str,
        destination: &Destination,
    ) -> Result<String, ReplyError> {
        if !self.streaming {
            let text = self
                .provider
                .generate(prompt, system)
                .await
                .map_err(|source| self.provider_error(source))?;
            self.sink.post(destination, &text).await?;
            return Ok(text);
        }

        let session =
            StreamSession::open(Arc::clone(&self.sink), destination, self.stream.clone()).await?;
        let message_id = session.handle().message_id.clone();

        let produced = match self.provider.generate_streaming(prompt, system) {
            Some(mut fragments) => loop {
                match fragments.next().await {
                    Some(Ok(fragment)) => session.push(fragment),
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                }
            },
            None => self
                .provider
                .generate(prompt, system)
                .await
                .map(|text| session.push(text)),
        };

        match produced {
            Ok(()) => {
                session.finish();
                let text = session.result().await?;
                info!(
                    provider = self.provider.name(),
                    message_id = %message_id,
                    chars = text.len(),
                    "reply delivered"
                );
                Ok(text)
            }
            Err(source) => {
                error!(
                    provider = self.provider.name(),
                    message_id = %message_id,
                    error = %source,
                    "reply generation failed"
                );
                session.abort(source.to_string());
                match session.result().await {
                    Err(StreamError::Aborted(_)) | Ok(_) => {}
                    Err(e) => warn!(error = %e, "error note could not be delivered"),
                }
                Err(self.provider_error(source))
            }
        }
    }

    fn provider_error(&self, source: ProviderError) -> ReplyError {
        ReplyError::Provider {
            provider: self.provider.name().to_string(),
            source,
        }
    }
}
