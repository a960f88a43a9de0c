//! Background preparation of one resource.
//!
//! A [`PreparationJob`] owns the [`JobState`] of a single resource inside a
//! `watch` channel. The channel's lock is the exclusion boundary: `start`,
//! `retry` and the attempt loop only touch the state through
//! `send_if_modified`/`send_modify`, and `status` reads a snapshot through
//! `borrow`. No lock is held across an `.await`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::preparer::{Preparer, PreparerError};
use super::state::{JobFailure, JobPhase, JobState, JobStatus};

/// Cloning yields another handle to the same job.
#[derive(Clone)]
pub struct PreparationJob {
    inner: Arc<JobInner>,
}

struct JobInner {
    resource_id: String,
    preparer: Arc<dyn Preparer>,
    backoff: BackoffPolicy,
    state: watch::Sender<JobState>,
}

impl PreparationJob {
    pub fn new(
        resource_id: impl Into<String>,
        preparer: Arc<dyn Preparer>,
        backoff: BackoffPolicy,
    ) -> Self {
        let resource_id = resource_id.into();
        let (state, _) = watch::channel(JobState::new(resource_id.clone()));
        Self {
            inner: Arc::new(JobInner {
                resource_id,
                preparer,
                backoff,
                state,
            }),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.inner.resource_id
    }

    /// Launch the attempt loop unless one is already running or the job is
    /// done. Returns whether a loop was launched.
    ///
    /// Must be called from within a tokio runtime; otherwise the job is
    /// marked failed instead.
    pub fn start(&self) -> bool {
        let launched = self.inner.state.send_if_modified(JobState::begin_run);
        if !launched {
            debug!(
                resource_id = %self.inner.resource_id,
                phase = %self.phase(),
                "start ignored"
            );
            return false;
        }

        match Handle::try_current() {
            Ok(handle) => {
                info!(resource_id = %self.inner.resource_id, "preparation started");
                handle.spawn(Arc::clone(&self.inner).run());
                true
            }
            Err(_) => {
                warn!(
                    resource_id = %self.inner.resource_id,
                    "no tokio runtime, cannot run preparation"
                );
                self.inner.finish(Err(JobFailure::NoRuntime));
                false
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        self.inner.state.borrow().snapshot()
    }

    pub fn phase(&self) -> JobPhase {
        self.inner.state.borrow().phase()
    }

    /// Re-run a failed job. Returns `false` (and does nothing) unless the
    /// job is currently failed.
    pub fn retry(&self) -> bool {
        if !self.inner.state.send_if_modified(JobState::reset) {
            debug!(
                resource_id = %self.inner.resource_id,
                phase = %self.phase(),
                "retry ignored"
            );
            return false;
        }
        info!(resource_id = %self.inner.resource_id, "retrying preparation");
        self.start();
        true
    }

    /// Wait until the job is no longer in progress and return that status.
    pub async fn settled(&self) -> JobStatus {
        let mut rx = self.inner.state.subscribe();
        match rx
            .wait_for(|state| state.phase() != JobPhase::InProgress)
            .await
        {
            Ok(state) => state.snapshot(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.status(),
        }
    }
}

impl JobInner {
    async fn run(self: Arc<Self>) {
        let outcome = AssertUnwindSafe(self.drive())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(JobFailure::Panicked {
                    message: panic_message(panic.as_ref()),
                })
            });
        self.finish(outcome);
    }

    async fn drive(&self) -> Result<u64, JobFailure> {
        let resource_id = self.resource_id.as_str();
        self.bounded("begin", self.preparer.begin(resource_id)).await?;

        let max_attempts = self.backoff.max_attempts();
        for index in 0..max_attempts {
            let mut attempt = 0;
            self.state.send_modify(|state| attempt = state.record_attempt());

            let readiness = self
                .bounded("is_ready", self.preparer.is_ready(resource_id))
                .await?;
            debug!(
                resource_id,
                attempt,
                ready = readiness.ready,
                items = readiness.item_count,
                "readiness poll"
            );

            if readiness.ready {
                if readiness.item_count == 0 {
                    return Err(JobFailure::EmptyResult);
                }
                return Ok(readiness.item_count);
            }

            if index + 1 < max_attempts {
                tokio::time::sleep(self.backoff.wait(index)).await;
            }
        }

        Err(JobFailure::TimedOut {
            attempts: max_attempts,
        })
    }

    /// Await one preparer call under the per-call deadline. The call's
    /// future is dropped when the deadline passes.
    async fn bounded<T>(
        &self,
        call: &'static str,
        fut: impl Future<Output = Result<T, PreparerError>>,
    ) -> Result<T, JobFailure> {
        let limit = self.backoff.call_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(|e| JobFailure::preparer(e.to_string())),
            Err(_) => {
                warn!(
                    resource_id = %self.resource_id,
                    call,
                    timeout = ?limit,
                    "preparer call timed out"
                );
                Err(JobFailure::CallTimedOut {
                    call: call.to_string(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    fn finish(&self, outcome: Result<u64, JobFailure>) {
        let resource_id = self.resource_id.as_str();
        match outcome {
            Ok(items) => {
                self.state.send_if_modified(|state| state.complete(items));
                info!(resource_id, items, "preparation completed");
            }
            Err(failure) => {
                warn!(resource_id, error = %failure, "preparation failed");
                self.state.send_if_modified(|state| state.fail(failure));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prep::preparer::Readiness;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays a fixed list of readiness answers, then repeats the last.
    struct Scripted {
        begins: AtomicUsize,
        answers: Mutex<VecDeque<Result<Readiness, String>>>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<Readiness, String>>) -> Arc<Self> {
            Arc::new(Self {
                begins: AtomicUsize::new(0),
                answers: Mutex::new(answers.into()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Preparer for Scripted {
        async fn begin(&self, _resource_id: &str) -> Result<(), PreparerError> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_ready(&self, _resource_id: &str) -> Result<Readiness, PreparerError> {
            let mut answers = self.answers.lock().unwrap();
            let answer = if answers.len() > 1 {
                answers.pop_front().unwrap()
            } else {
                answers.front().cloned().unwrap()
            };
            answer.map_err(PreparerError::Service)
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl Preparer for Panicking {
        async fn begin(&self, _resource_id: &str) -> Result<(), PreparerError> {
            panic!("index corrupted");
        }

        async fn is_ready(&self, _resource_id: &str) -> Result<Readiness, PreparerError> {
            Ok(Readiness::pending())
        }
    }

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(5), max_attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_pending_polls() {
        let preparer = Scripted::new(vec![
            Ok(Readiness::pending()),
            Ok(Readiness::pending()),
            Ok(Readiness::ready(9)),
        ]);
        let job = PreparationJob::new("repo", preparer.clone(), policy(5));

        assert!(job.start());
        let status = job.settled().await;
        assert_eq!(status.phase, JobPhase::Completed);
        assert_eq!(status.attempt_count, 3);
        assert_eq!(status.item_count, Some(9));
        assert_eq!(preparer.begins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_max_attempts() {
        let preparer = Scripted::new(vec![Ok(Readiness::pending())]);
        let job = PreparationJob::new("repo", preparer, policy(4));

        job.start();
        let status = job.settled().await;
        assert_eq!(status.phase, JobPhase::Failed);
        assert_eq!(status.attempt_count, 4);
        assert_eq!(status.last_error, Some(JobFailure::TimedOut { attempts: 4 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_with_zero_items_fails() {
        let preparer = Scripted::new(vec![Ok(Readiness::ready(0))]);
        let job = PreparationJob::new("repo", preparer, policy(4));

        job.start();
        let status = job.settled().await;
        assert_eq!(status.phase, JobPhase::Failed);
        assert_eq!(status.last_error, Some(JobFailure::EmptyResult));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preparer_error_is_captured() {
        let preparer = Scripted::new(vec![Err("repository not found".to_string())]);
        let job = PreparationJob::new("repo", preparer, policy(4));

        job.start();
        let status = job.settled().await;
        assert_eq!(status.phase, JobPhase::Failed);
        assert_eq!(status.error_message().as_deref(), Some("repository not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_becomes_failure() {
        let job = PreparationJob::new("repo", Arc::new(Panicking), policy(4));

        job.start();
        let status = job.settled().await;
        assert_eq!(status.phase, JobPhase::Failed);
        assert_eq!(
            status.last_error,
            Some(JobFailure::Panicked {
                message: "index corrupted".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_only_when_failed() {
        let preparer = Scripted::new(vec![
            Err("flaky".to_string()),
            Ok(Readiness::ready(1)),
        ]);
        let job = PreparationJob::new("repo", preparer.clone(), policy(4));

        assert!(!job.retry());
        job.start();
        assert!(!job.retry());
        assert_eq!(job.settled().await.phase, JobPhase::Failed);

        assert!(job.retry());
        let status = job.settled().await;
        assert_eq!(status.phase, JobPhase::Completed);
        assert!(status.last_error.is_none());
        assert_eq!(preparer.begins.load(Ordering::SeqCst), 2);
        assert!(!job.retry());
    }

    #[test]
    fn test_start_without_runtime_fails_cleanly() {
        let preparer = Scripted::new(vec![Ok(Readiness::ready(1))]);
        let job = PreparationJob::new("repo", preparer.clone(), policy(4));

        assert!(!job.start());
        let status = job.status();
        assert_eq!(status.phase, JobPhase::Failed);
        assert_eq!(status.last_error, Some(JobFailure::NoRuntime));
        assert_eq!(preparer.begins.load(Ordering::SeqCst), 0);
    }
}
