//! Error types for conda-env-manager

use switchboard_core::{CoreError, ProcessError};
use thiserror::Error;

/// Errors that can occur while provisioning toolchains and environments
#[derive(Error, Debug)]
pub enum EnvError {
    /// Environment already present (callers must check before creating)
    #[error("Environment already exists: {0}")]
    EnvironmentExists(String),

    /// Environment not present in the listing
    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    /// No installer is published for this OS/architecture
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// `conda env list --json` output did not have the expected shape
    #[error("Invalid environment listing: {0}")]
    InvalidEnvironmentListing(String),

    /// Installer download failed
    #[error("Download failed: {0}")]
    Download(String),

    /// External command failed
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Any other core failure (search path, tag resolution, git)
    #[error(transparent)]
    Core(CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for EnvError {
    fn from(err: reqwest::Error) -> Self {
        EnvError::Download(err.to_string())
    }
}

impl From<CoreError> for EnvError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Process(process) => EnvError::Process(process),
            CoreError::Io(io) => EnvError::Io(io),
            other => EnvError::Core(other),
        }
    }
}

impl EnvError {
    /// True when an external command ran and exited non-zero.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, EnvError::Process(ProcessError::NonZeroExit { .. }))
    }
}
