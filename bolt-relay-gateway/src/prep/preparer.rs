//! The external service that makes a repository queryable.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Result of one readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub ready: bool,
    pub item_count: u64,
}

impl Readiness {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn ready(item_count: u64) -> Self {
        Self {
            ready: true,
            item_count,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreparerError {
    #[error("{0}")]
    Service(String),
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("unrecognised readiness report: {0:?}")]
    InvalidReport(String),
}

/// Collaborator contract for repository preparation.
///
/// `begin` may be called once per attempt loop run; `is_ready` must be
/// free of side effects.
#[async_trait::async_trait]
pub trait Preparer: Send + Sync {
    async fn begin(&self, resource_id: &str) -> Result<(), PreparerError>;

    async fn is_ready(&self, resource_id: &str) -> Result<Readiness, PreparerError>;
}

/// Preparer backed by two shell commands.
///
/// `{resource}` in either template is replaced with the resource id. The
/// status command prints `ready [count]` or `pending` on stdout.
#[derive(Debug, Clone)]
pub struct CommandPreparer {
    begin_command: String,
    status_command: String,
}

impl CommandPreparer {
    pub fn new(begin_command: impl Into<String>, status_command: impl Into<String>) -> Self {
        Self {
            begin_command: begin_command.into(),
            status_command: status_command.into(),
        }
    }

    fn render(template: &str, resource_id: &str) -> String {
        template.replace("{resource}", &shell_quote(resource_id))
    }

    async fn run(command: &str) -> Result<String, PreparerError> {
        debug!(command, "running preparer command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PreparerError::Spawn {
                command: command.to_string(),
                source,
            })?
            .wait_with_output()
            .await
            .map_err(|source| PreparerError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(PreparerError::CommandFailed {
                command: command.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait::async_trait]
impl Preparer for CommandPreparer {
    async fn begin(&self, resource_id: &str) -> Result<(), PreparerError> {
        Self::run(&Self::render(&self.begin_command, resource_id)).await?;
        Ok(())
    }

    async fn is_ready(&self, resource_id: &str) -> Result<Readiness, PreparerError> {
        let stdout = Self::run(&Self::render(&self.status_command, resource_id)).await?;
        parse_readiness(&stdout)
    }
}

/// Parse `ready [count]` / `pending` (or `true` / `false`).
///
/// A bare `ready` carries no item count and therefore reads as zero items.
pub fn parse_readiness(report: &str) -> Result<Readiness, PreparerError> {
    let mut tokens = report.split_whitespace();
    let ready = match tokens.next().map(str::to_ascii_lowercase).as_deref() {
        Some("ready" | "true" | "completed") => true,
        Some("pending" | "false" | "in_progress") => false,
        _ => return Err(PreparerError::InvalidReport(report.trim().to_string())),
    };
    let item_count = match tokens.next() {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| PreparerError::InvalidReport(report.trim().to_string()))?,
        None => 0,
    };
    Ok(Readiness { ready, item_count })
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}
