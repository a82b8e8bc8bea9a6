//! Pipeline error taxonomy.

use conda_env_manager::EnvError;
use switchboard_core::{CoreError, ProcessError};
use thiserror::Error;

/// Errors raised while driving the pipeline.
///
/// Only [`PipelineError::is_command_failure`] errors coming out of a target's
/// test step are survivable; everything else aborts the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("failed to install source '{source_name}': {error}")]
    SourceInstall {
        source_name: String,
        #[source]
        error: EnvError,
    },

    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("target '{0}' is listed more than once")]
    DuplicateTarget(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    /// True when an external command ran and exited non-zero.
    pub fn is_command_failure(&self) -> bool {
        match self {
            PipelineError::Process(ProcessError::NonZeroExit { .. }) => true,
            PipelineError::Core(err) => err.is_command_failure(),
            PipelineError::Env(err) => err.is_command_failure(),
            _ => false,
        }
    }

    /// True for errors detected before any stage runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::UnknownTarget(_)
                | PipelineError::DuplicateTarget(_)
                | PipelineError::Configuration(_)
                | PipelineError::Core(CoreError::NoMatchingTag { .. })
        )
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
