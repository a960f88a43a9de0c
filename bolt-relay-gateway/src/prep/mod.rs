//! Repository preparation: a background state machine that drives one
//! resource to readiness, with capped backoff between readiness polls and
//! caller-initiated retries.

pub mod backoff;
pub mod job;
pub mod preparer;
pub mod state;

pub use backoff::BackoffPolicy;
pub use job::PreparationJob;
pub use preparer::{CommandPreparer, Preparer, PreparerError, Readiness, parse_readiness};
pub use state::{JobFailure, JobPhase, JobState, JobStatus};
