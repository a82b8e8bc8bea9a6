//! Error taxonomy for process execution and version resolution.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while running an external command.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("refusing to run an empty command")]
    EmptyCommand,

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and reported failure. This is the only condition a
    /// Target's test step is allowed to survive.
    #[error("command '{command}' exited with {}", describe_code(.code))]
    NonZeroExit { command: String, code: Option<i32> },

    #[error("command '{command}' timed out after {limit:?}")]
    Timeout { command: String, limit: Duration },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Switchboard core errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("no tag of {url} matches the tag policy")]
    NoMatchingTag { url: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("invalid tag pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True when the error is an external command that ran and exited non-zero.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, CoreError::Process(ProcessError::NonZeroExit { .. }))
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
