//! The package under test.

use async_trait::async_trait;
use conda_env_manager::EnvironmentProvisioner;
use serde::{Deserialize, Serialize};
use switchboard_core::{CommandLine, ExecutionContext};
use tracing::info;

use crate::error::{PipelineError, Result};

/// What is under test. Installed into every target's environment before the
/// target's own dependencies.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Package specifier handed to the environment manager, e.g.
    /// `-c numba/label/dev numba`.
    fn resolve_install_spec(&self) -> String;

    /// Command printing the installed source's build and runtime details.
    fn diagnostics(&self) -> Option<CommandLine> {
        None
    }

    /// Install into environment `env`. Any failure is fatal for the run.
    async fn install_into(
        &self,
        ctx: &ExecutionContext,
        environments: &EnvironmentProvisioner,
        env: &str,
    ) -> Result<()> {
        let spec = self.resolve_install_spec();
        info!(source = %self.name(), environment = %env, "installing source");
        environments
            .install(ctx, env, &spec)
            .await
            .map_err(|error| PipelineError::SourceInstall {
                source_name: self.name().to_string(),
                error,
            })
    }
}

/// How a registry-backed source is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSpec {
    /// Packages from the given channels, channels first.
    Channel {
        channels: Vec<String>,
        packages: Vec<String>,
    },
    /// Specifier passed through untouched.
    Raw(String),
}

impl SourceSpec {
    pub fn render(&self) -> String {
        match self {
            SourceSpec::Channel { channels, packages } => channels
                .iter()
                .flat_map(|channel| ["-c", channel.as_str()])
                .chain(packages.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" "),
            SourceSpec::Raw(spec) => spec.clone(),
        }
    }
}

/// [`Source`] installed from a package registry.
#[derive(Debug, Clone)]
pub struct PackageSource {
    name: String,
    spec: SourceSpec,
    diagnostics: Option<CommandLine>,
}

impl PackageSource {
    pub fn new(name: impl Into<String>, spec: SourceSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, command: CommandLine) -> Self {
        self.diagnostics = Some(command);
        self
    }
}

#[async_trait]
impl Source for PackageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_install_spec(&self) -> String {
        self.spec.render()
    }

    fn diagnostics(&self) -> Option<CommandLine> {
        self.diagnostics.clone()
    }
}
