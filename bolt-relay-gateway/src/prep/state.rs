//! Lifecycle state of one preparation job.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl JobPhase {
    /// Whether a caller may launch a new attempt loop from this phase.
    pub fn can_start(self) -> bool {
        matches!(self, Self::NotStarted | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in [`JobPhase::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// The preparer returned an error.
    #[error("{message}")]
    Preparer { message: String },

    /// Readiness was never reported within the polling window.
    #[error("preparation did not finish after {attempts} readiness checks")]
    TimedOut { attempts: u32 },

    /// A single `begin` or `is_ready` call outlived its deadline.
    #[error("preparer `{call}` did not respond within {timeout_ms} ms")]
    CallTimedOut { call: String, timeout_ms: u64 },

    /// Readiness was reported with nothing in it.
    #[error("preparer reported ready but produced no items")]
    EmptyResult,

    /// The preparer panicked while being driven.
    #[error("preparer panicked: {message}")]
    Panicked { message: String },

    /// No async runtime was available to run the attempt loop.
    #[error("no async runtime available to run preparation")]
    NoRuntime,
}

impl JobFailure {
    pub fn preparer(message: impl Into<String>) -> Self {
        Self::Preparer {
            message: message.into(),
        }
    }

    /// Whether the failure points at the readiness signal itself being
    /// untrustworthy rather than at the preparer being slow or erroring.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::EmptyResult)
    }
}

/// Snapshot of a job, safe to hand to any number of readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub resource_id: String,
    pub phase: JobPhase,
    pub last_error: Option<JobFailure>,
    pub attempt_count: u32,
    pub item_count: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn is_ready(&self) -> bool {
        self.phase == JobPhase::Completed
    }

    pub fn error_message(&self) -> Option<String> {
        self.last_error.as_ref().map(ToString::to_string)
    }
}

/// Mutable job state. Transition methods return `false` when the current
/// phase does not allow the transition, leaving the state untouched.
#[derive(Debug, Clone)]
pub struct JobState {
    resource_id: String,
    phase: JobPhase,
    last_error: Option<JobFailure>,
    attempt_count: u32,
    item_count: Option<u64>,
    updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            phase: JobPhase::NotStarted,
            last_error: None,
            attempt_count: 0,
            item_count: None,
            updated_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn snapshot(&self) -> JobStatus {
        JobStatus {
            resource_id: self.resource_id.clone(),
            phase: self.phase,
            last_error: self.last_error.clone(),
            attempt_count: self.attempt_count,
            item_count: self.item_count,
            updated_at: self.updated_at,
        }
    }

    /// NotStarted | Failed -> InProgress, with a fresh attempt counter.
    pub fn begin_run(&mut self) -> bool {
        if !self.phase.can_start() {
            return false;
        }
        self.phase = JobPhase::InProgress;
        self.last_error = None;
        self.attempt_count = 0;
        self.item_count = None;
        self.touch();
        true
    }

    /// Count one readiness poll of the active run.
    pub fn record_attempt(&mut self) -> u32 {
        if self.phase == JobPhase::InProgress {
            self.attempt_count = self.attempt_count.saturating_add(1);
        }
        self.attempt_count
    }

    /// InProgress -> Completed.
    pub fn complete(&mut self, item_count: u64) -> bool {
        if self.phase != JobPhase::InProgress {
            return false;
        }
        self.phase = JobPhase::Completed;
        self.last_error = None;
        self.item_count = Some(item_count);
        self.touch();
        true
    }

    /// Any non-terminal phase -> Failed.
    pub fn fail(&mut self, failure: JobFailure) -> bool {
        if matches!(self.phase, JobPhase::Completed | JobPhase::Failed) {
            return false;
        }
        self.phase = JobPhase::Failed;
        self.last_error = Some(failure);
        self.touch();
        true
    }

    /// Failed -> NotStarted, clearing the stored error.
    pub fn reset(&mut self) -> bool {
        if self.phase != JobPhase::Failed {
            return false;
        }
        self.phase = JobPhase::NotStarted;
        self.last_error = None;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
