//! Switchboard Core Library
//!
//! Building blocks shared by the Switchboard pipeline: external command
//! execution against an explicit [`ExecutionContext`], git access, remote tag
//! resolution and tracing setup.

pub mod error;
pub mod fakes;
pub mod git;
pub mod obs;
pub mod process;
pub mod telemetry;
pub mod version;

pub use error::{CoreError, ProcessError, Result};
pub use git::{parse_ls_remote_tags, CloneRequest, GitClient, VersionControl};
pub use process::{
    CommandLine, CommandOutput, CommandRunner, EnvGuard, ExecutionContext, OutputMode,
    SystemRunner, PATH_VAR,
};
pub use telemetry::init_tracing;
pub use version::{select_latest, RefPolicy, TagFilter, TagOrder, TagRule, VersionKey, VersionOracle};
