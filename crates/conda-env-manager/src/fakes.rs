//! In-memory fakes for environment management (testing only)
//!
//! `MemoryEnvironmentManager` keeps environments in a map and logs each
//! operation as a short string (`"create umap"`, `"install umap numpy"`,
//! `"export umap"`, `"update base"`). When mirrored to a command runner it
//! also issues the equivalent `conda` command line through it, so a
//! `ScriptedRunner` sees environment operations interleaved with every other
//! command. `MemoryInstaller` counts installs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use switchboard_core::{CommandLine, CommandRunner, ExecutionContext, ProcessError};

use crate::error::EnvError;
use crate::manager::{conda_command, EnvironmentManager};
use crate::toolchain::{ToolchainInstaller, ToolchainLayout};
use crate::Result;

/// Environment manager backed by a `BTreeMap<name, prefix>`.
pub struct MemoryEnvironmentManager {
    envs_root: PathBuf,
    envs: Mutex<BTreeMap<String, PathBuf>>,
    log: Mutex<Vec<String>>,
    failing_installs: Vec<String>,
    mirror: Option<Arc<dyn CommandRunner>>,
}

impl MemoryEnvironmentManager {
    /// New manager placing environments under `envs_root/<name>`.
    pub fn new(envs_root: impl Into<PathBuf>) -> Self {
        Self {
            envs_root: envs_root.into(),
            envs: Mutex::new(BTreeMap::new()),
            log: Mutex::new(Vec::new()),
            failing_installs: Vec::new(),
            mirror: None,
        }
    }

    /// Issue the equivalent `conda` command through `runner` for every
    /// mutating operation.
    pub fn mirrored_to(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.mirror = Some(runner);
        self
    }

    /// Pre-existing environment.
    pub fn with_environment(self, name: &str) -> Self {
        let prefix = self.envs_root.join(name);
        self.envs.lock().unwrap().insert(name.to_string(), prefix);
        self
    }

    /// Installs whose specifier contains `needle` exit non-zero.
    pub fn with_failing_install(mut self, needle: &str) -> Self {
        self.failing_installs.push(needle.to_string());
        self
    }

    /// Operations performed so far, in order.
    pub fn operations(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Number of operations starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.operations()
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    fn record(&self, op: String) {
        self.log.lock().unwrap().push(op);
    }

    async fn mirror(&self, ctx: &ExecutionContext, command: CommandLine) -> Result<()> {
        if let Some(runner) = &self.mirror {
            runner.execute(ctx, &command).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EnvironmentManager for MemoryEnvironmentManager {
    async fn list(&self, _ctx: &ExecutionContext) -> Result<BTreeMap<String, PathBuf>> {
        Ok(self.envs.lock().unwrap().clone())
    }

    async fn create(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.record(format!("create {name}"));
        self.mirror(ctx, conda_command(&["create", "-y", "-n", name]))
            .await?;
        let mut envs = self.envs.lock().unwrap();
        if envs.contains_key(name) {
            return Err(EnvError::EnvironmentExists(name.to_string()));
        }
        envs.insert(name.to_string(), self.envs_root.join(name));
        Ok(())
    }

    async fn install(&self, ctx: &ExecutionContext, name: &str, spec: &str) -> Result<()> {
        self.record(format!("install {name} {spec}"));
        let command = conda_command(&["install", "-y", "-n", name]).words(spec);
        if !self.envs.lock().unwrap().contains_key(name) {
            return Err(EnvError::EnvironmentNotFound(name.to_string()));
        }
        if self
            .failing_installs
            .iter()
            .any(|needle| spec.contains(needle.as_str()))
        {
            return Err(EnvError::Process(ProcessError::NonZeroExit {
                command: command.to_string(),
                code: Some(1),
            }));
        }
        self.mirror(ctx, command).await
    }

    async fn update_base(&self, ctx: &ExecutionContext) -> Result<()> {
        self.record("update base".to_string());
        self.mirror(
            ctx,
            conda_command(&["update", "-y", "-n", "base", "-c", "defaults", "conda"]),
        )
        .await
    }

    async fn export(&self, ctx: &ExecutionContext, name: &str) -> Result<()> {
        self.record(format!("export {name}"));
        self.mirror(ctx, conda_command(&["env", "export", "-n", name]))
            .await
    }
}

/// Installer that only flips a flag.
#[derive(Debug, Default)]
pub struct MemoryInstaller {
    installed: AtomicBool,
    installs: AtomicUsize,
}

impl MemoryInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installer reporting an existing toolchain.
    pub fn preinstalled() -> Self {
        let installer = Self::default();
        installer.installed.store(true, Ordering::SeqCst);
        installer
    }

    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolchainInstaller for MemoryInstaller {
    fn is_installed(&self, _layout: &ToolchainLayout) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    async fn install(&self, _ctx: &ExecutionContext, _layout: &ToolchainLayout) -> Result<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
