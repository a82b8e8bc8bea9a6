//! Toolchain bootstrap, environment lookup/creation and activation.
//!
//! Activation rewrites the search path of the caller's [`ExecutionContext`];
//! only one environment is active per context at a time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use switchboard_core::ExecutionContext;
use tracing::{debug, info};

use crate::error::EnvError;
use crate::manager::{env_bin_dir, EnvironmentManager};
use crate::toolchain::{ToolchainInstaller, ToolchainLayout};
use crate::Result;

/// Whether [`EnvironmentProvisioner::bootstrap_toolchain`] had to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap {
    Installed,
    AlreadyPresent,
}

/// Provisions the base toolchain and per-project environments.
#[derive(Clone)]
pub struct EnvironmentProvisioner {
    layout: ToolchainLayout,
    installer: Arc<dyn ToolchainInstaller>,
    manager: Arc<dyn EnvironmentManager>,
}

impl EnvironmentProvisioner {
    pub fn new(
        layout: ToolchainLayout,
        installer: Arc<dyn ToolchainInstaller>,
        manager: Arc<dyn EnvironmentManager>,
    ) -> Self {
        Self {
            layout,
            installer,
            manager,
        }
    }

    pub fn layout(&self) -> &ToolchainLayout {
        &self.layout
    }

    /// Install the toolchain unless present, then put it on the search path
    /// and update the base package manager.
    ///
    /// The path is rewritten on every call: a fresh context needs it even
    /// when the install was cached by an earlier run.
    pub async fn bootstrap_toolchain(&self, ctx: &mut ExecutionContext) -> Result<Bootstrap> {
        let outcome = if self.installer.is_installed(&self.layout) {
            debug!(root = %self.layout.root.display(), "toolchain already installed");
            Bootstrap::AlreadyPresent
        } else {
            info!(root = %self.layout.root.display(), "installing toolchain");
            self.installer.install(ctx, &self.layout).await?;
            Bootstrap::Installed
        };

        self.inject_toolchain_path(ctx)?;
        self.manager.update_base(ctx).await?;
        Ok(outcome)
    }

    /// Prepend the toolchain's bin and condabin directories to the path.
    pub fn inject_toolchain_path(&self, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.prepend_path(&self.layout.search_dirs())?;
        Ok(())
    }

    pub async fn list_environments(&self, ctx: &ExecutionContext) -> Result<BTreeMap<String, PathBuf>> {
        self.manager.list(ctx).await
    }

    pub async fn environment_exists(&self, ctx: &ExecutionContext, name: &str) -> Result<bool> {
        Ok(self.list_environments(ctx).await?.contains_key(name))
    }

    /// Create `name`. Fails with [`EnvError::EnvironmentExists`] if it is
    /// already listed; the check and the creation are not atomic.
    pub async fn create_environment(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        if self.environment_exists(ctx, name).await? {
            return Err(EnvError::EnvironmentExists(name.to_string()));
        }
        info!(environment = %name, "creating environment");
        self.manager.create(ctx, name).await
    }

    /// Apply one dependency specifier verbatim.
    pub async fn install(&self, ctx: &ExecutionContext, name: &str, spec: &str) -> Result<()> {
        info!(environment = %name, spec = %spec, "installing into environment");
        self.manager.install(ctx, name, spec).await
    }

    /// Switch the context's search path to `name`, replacing whichever
    /// environment was active before. Returns the activated bin directory.
    pub async fn activate(&self, ctx: &mut ExecutionContext, name: &str) -> Result<PathBuf> {
        let envs = self.list_environments(ctx).await?;
        let prefix = envs
            .get(name)
            .ok_or_else(|| EnvError::EnvironmentNotFound(name.to_string()))?;
        let bin = env_bin_dir(prefix);
        ctx.activate_bin(bin.clone())?;
        info!(environment = %name, bin = %bin.display(), "activated environment");
        Ok(bin)
    }

    /// Print the package set of `name`.
    pub async fn describe(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.manager.export(ctx, name).await
    }
}
