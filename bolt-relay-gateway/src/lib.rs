pub mod facade;
pub mod messages;
pub mod prep;
pub mod providers;
pub mod stream;

pub use facade::{AgentFacade, AskOutcome, ReplyError};
pub use prep::{
    BackoffPolicy, CommandPreparer, JobFailure, JobPhase, JobStatus, PreparationJob, Preparer,
    PreparerError, Readiness,
};
pub use providers::{CompletionProvider, ProviderError};
pub use stream::{
    Destination, MessageHandle, MessageSink, SinkError, StreamConfig, StreamError, StreamSession,
};
