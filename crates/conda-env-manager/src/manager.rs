//! Named, isolated package environments managed through `conda`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use switchboard_core::{CommandLine, CommandRunner, ExecutionContext};
use tracing::debug;

use crate::error::EnvError;
use crate::Result;

/// Package-environment operations the provisioner relies on.
#[async_trait]
pub trait EnvironmentManager: Send + Sync {
    /// Existing environments, by name.
    async fn list(&self, ctx: &ExecutionContext) -> Result<BTreeMap<String, PathBuf>>;

    /// Create an empty environment. Not idempotent.
    async fn create(&self, ctx: &ExecutionContext, name: &str) -> Result<()>;

    /// Apply one dependency specifier to `name`. The specifier is passed
    /// through word by word, uninterpreted.
    async fn install(&self, ctx: &ExecutionContext, name: &str, spec: &str) -> Result<()>;

    /// Update the package manager in the base environment.
    async fn update_base(&self, ctx: &ExecutionContext) -> Result<()>;

    /// Print the package set of `name` to standard output.
    async fn export(&self, ctx: &ExecutionContext, name: &str) -> Result<()>;
}

/// Shape of `conda env list --json`.
#[derive(Debug, Deserialize)]
struct EnvListing {
    envs: Vec<PathBuf>,
}

/// Parse `conda env list --json` output into a name -> prefix mapping.
///
/// The name of an environment is the last component of its prefix.
pub fn parse_env_list(json: &str) -> Result<BTreeMap<String, PathBuf>> {
    let listing: EnvListing = serde_json::from_str(json)
        .map_err(|e| EnvError::InvalidEnvironmentListing(e.to_string()))?;

    Ok(listing
        .envs
        .into_iter()
        .filter_map(|prefix| {
            let name = prefix.file_name()?.to_string_lossy().into_owned();
            Some((name, prefix))
        })
        .collect())
}

/// Executables directory of an environment prefix.
pub fn env_bin_dir(prefix: &Path) -> PathBuf {
    prefix.join("bin")
}

/// [`EnvironmentManager`] backed by the `conda` executable on the search path.
#[derive(Clone)]
pub struct CondaManager {
    runner: Arc<dyn CommandRunner>,
}

impl CondaManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn conda(args: &[&str]) -> CommandLine {
        conda_command(args)
    }
}

/// `conda` followed by `args`.
pub(crate) fn conda_command(args: &[&str]) -> CommandLine {
    CommandLine::new(std::iter::once("conda").chain(args.iter().copied()))
}

#[async_trait]
impl EnvironmentManager for CondaManager {
    async fn list(&self, ctx: &ExecutionContext) -> Result<BTreeMap<String, PathBuf>> {
        let stdout = self
            .runner
            .capture(ctx, &Self::conda(&["env", "list", "--json"]))
            .await?;
        let envs = parse_env_list(&stdout)?;
        debug!(count = envs.len(), "listed environments");
        Ok(envs)
    }

    async fn create(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.runner
            .execute(ctx, &Self::conda(&["create", "-y", "-n", name]))
            .await?;
        Ok(())
    }

    async fn install(&self, ctx: &ExecutionContext, name: &str, spec: &str) -> Result<()> {
        let command = Self::conda(&["install", "-y", "-n", name]).words(spec);
        self.runner.execute(ctx, &command).await?;
        Ok(())
    }

    async fn update_base(&self, ctx: &ExecutionContext) -> Result<()> {
        self.runner
            .execute(
                ctx,
                &Self::conda(&["update", "-y", "-n", "base", "-c", "defaults", "conda"]),
            )
            .await?;
        Ok(())
    }

    async fn export(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.runner
            .execute(ctx, &Self::conda(&["env", "export", "-n", name]))
            .await?;
        Ok(())
    }
}
