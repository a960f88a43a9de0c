//! Deterministic, non-model-facing messages shown to chat users.

use crate::prep::{JobFailure, JobPhase, JobStatus};

pub const RESEARCH_SYSTEM_PROMPT: &str = "You are a code research expert. Answer questions \
about the repository using its structure, patterns and design decisions. Break complex ideas \
into understandable pieces and give specific, actionable answers.";

pub const RETRY_HINT: &str = "You can ask me to retry preparation to attempt again.";
pub const RETRY_STARTED: &str = "Retrying repository preparation.";
pub const RETRY_NOT_AVAILABLE: &str = "Retry is only available after preparation has failed.";

pub fn preparation_status(status: &JobStatus) -> String {
    let repo = &status.resource_id;
    match status.phase {
        JobPhase::NotStarted => {
            format!("Preparation of `{}` has not started yet. Please wait...", repo)
        }
        JobPhase::InProgress => format!(
            "Repository `{}` is still being prepared. Please wait...",
            repo
        ),
        JobPhase::Completed => match status.item_count {
            Some(items) => format!("Repository `{}` is ready ({} items indexed).", repo, items),
            None => format!("Repository `{}` is ready.", repo),
        },
        JobPhase::Failed => {
            let error = status
                .error_message()
                .unwrap_or_else(|| "unknown error".to_string());
            if status.last_error.as_ref().is_some_and(JobFailure::is_integrity) {
                format!(
                    "Preparation of `{}` finished without a usable index: {}\n\n{}",
                    repo, error, RETRY_HINT
                )
            } else {
                format!(
                    "Preparation failed for `{}` with error: {}\n\n{}",
                    repo, error, RETRY_HINT
                )
            }
        }
    }
}

pub fn research_prompt(repo: &str, question: &str) -> String {
    format!(
        "I'm working with the repository {}.\n\nI have a specific question about the codebase:\n{}",
        repo, question
    )
}
