//! External command execution.
//!
//! Every command runs against an explicit [`ExecutionContext`] (working
//! directory, effective environment, optional timeout) instead of mutating
//! process-wide state. The context is owned by the caller and is only changed
//! between commands.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{CoreError, ProcessError};

/// Name of the executable search path variable.
pub const PATH_VAR: &str = "PATH";

/// A command as an argument vector. The first element is the executable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    argv: Vec<String>,
}

impl CommandLine {
    /// Build a command from an explicit argument vector.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command string on whitespace.
    pub fn parse(line: &str) -> Self {
        Self::new(line.split_whitespace())
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Append every whitespace-separated word of `words`, in order.
    pub fn words(mut self, words: &str) -> Self {
        self.argv.extend(words.split_whitespace().map(str::to_string));
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

/// Working directory, environment block and timeout that commands run with.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    active_bin: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ExecutionContext {
    /// Context seeded from the current process environment.
    pub fn from_process(cwd: impl Into<PathBuf>) -> Self {
        Self::isolated(cwd, std::env::vars().collect())
    }

    /// Context with an explicit environment block.
    pub fn isolated(cwd: impl Into<PathBuf>, env: BTreeMap<String, String>) -> Self {
        Self {
            cwd: cwd.into(),
            env,
            active_bin: None,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn set_cwd(&mut self, cwd: impl Into<PathBuf>) {
        self.cwd = cwd.into();
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    pub fn remove_var(&mut self, key: &str) -> Option<String> {
        self.env.remove(key)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Entries of the search path, in lookup order.
    pub fn path_entries(&self) -> Vec<PathBuf> {
        self.var(PATH_VAR)
            .map(|path| std::env::split_paths(path).collect())
            .unwrap_or_default()
    }

    /// Put `dirs` at the front of the search path, in the given order.
    ///
    /// Existing occurrences of those directories are removed first, so
    /// repeating the call does not grow the path.
    pub fn prepend_path(&mut self, dirs: &[PathBuf]) -> crate::Result<()> {
        let rest = self
            .path_entries()
            .into_iter()
            .filter(|entry| !dirs.contains(entry));
        let joined = join_path(dirs.iter().cloned().chain(rest))?;
        self.set_var(PATH_VAR, joined);
        Ok(())
    }

    /// Make `bin_dir` the single active environment directory on the path.
    ///
    /// The previously activated directory, if any, is dropped from the path.
    pub fn activate_bin(&mut self, bin_dir: PathBuf) -> crate::Result<()> {
        let previous = self.active_bin.take();
        let rest = self
            .path_entries()
            .into_iter()
            .filter(|entry| Some(entry) != previous.as_ref() && *entry != bin_dir);
        let joined = join_path(std::iter::once(bin_dir.clone()).chain(rest))?;
        self.set_var(PATH_VAR, joined);
        debug!(bin = %bin_dir.display(), "activated environment");
        self.active_bin = Some(bin_dir);
        Ok(())
    }

    pub fn active_bin(&self) -> Option<&Path> {
        self.active_bin.as_deref()
    }

    /// Set `vars` until the returned guard is dropped, then restore each one
    /// to its prior value (or unset it).
    pub fn scoped_env<I, K, V>(&mut self, vars: I) -> EnvGuard<'_>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut saved = Vec::new();
        for (key, value) in vars {
            let key = key.into();
            let prior = self.env.insert(key.clone(), value.into());
            saved.push((key, prior));
        }
        EnvGuard { ctx: self, saved }
    }
}

fn join_path(entries: impl Iterator<Item = PathBuf>) -> crate::Result<String> {
    let joined: OsString = std::env::join_paths(entries)
        .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    Ok(joined.to_string_lossy().into_owned())
}

/// Restores environment variables set through [`ExecutionContext::scoped_env`].
pub struct EnvGuard<'a> {
    ctx: &'a mut ExecutionContext,
    saved: Vec<(String, Option<String>)>,
}

impl Deref for EnvGuard<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        self.ctx
    }
}

impl DerefMut for EnvGuard<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        self.ctx
    }
}

impl Drop for EnvGuard<'_> {
    fn drop(&mut self) {
        // Reverse order so a key set twice ends at its original value.
        while let Some((key, prior)) = self.saved.pop() {
            match prior {
                Some(value) => {
                    self.ctx.env.insert(key, value);
                }
                None => {
                    self.ctx.env.remove(&key);
                }
            }
        }
    }
}

/// Whether a command's standard output is captured or passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Inherit,
    Capture,
}

/// Result of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Captured stdout (empty unless [`OutputMode::Capture`]).
    pub stdout: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

/// Executes external commands. Any non-zero exit is reported as
/// [`ProcessError::NonZeroExit`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        ctx: &ExecutionContext,
        command: &CommandLine,
        mode: OutputMode,
    ) -> Result<CommandOutput, ProcessError>;

    /// Run with inherited output.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        command: &CommandLine,
    ) -> Result<(), ProcessError> {
        self.run(ctx, command, OutputMode::Inherit).await.map(|_| ())
    }

    /// Run and return captured stdout.
    async fn capture(
        &self,
        ctx: &ExecutionContext,
        command: &CommandLine,
    ) -> Result<String, ProcessError> {
        self.run(ctx, command, OutputMode::Capture)
            .await
            .map(|output| output.stdout)
    }
}

/// Runs commands as child processes of this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        ctx: &ExecutionContext,
        command: &CommandLine,
        mode: OutputMode,
    ) -> Result<CommandOutput, ProcessError> {
        let start = Instant::now();
        let exe = command.program().ok_or(ProcessError::EmptyCommand)?;
        let rendered = command.to_string();

        info!("running: '{}'", rendered);

        let stdout = match mode {
            OutputMode::Inherit => Stdio::inherit(),
            OutputMode::Capture => Stdio::piped(),
        };
        let child = Command::new(exe)
            .args(command.args())
            .current_dir(ctx.cwd())
            .env_clear()
            .envs(ctx.vars())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        let waited = match ctx.timeout() {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ProcessError::Timeout {
                    command: rendered.clone(),
                    limit,
                })?,
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| ProcessError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(ProcessError::NonZeroExit {
                command: rendered,
                code: output.status.code(),
            });
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_path(path: &str) -> ExecutionContext {
        let mut env = BTreeMap::new();
        env.insert(PATH_VAR.to_string(), path.to_string());
        ExecutionContext::isolated("/tmp", env)
    }

    #[test]
    fn test_command_line_parse_and_display() {
        let cmd = CommandLine::parse("pip  install -e .");
        assert_eq!(cmd.program(), Some("pip"));
        assert_eq!(cmd.args(), &["install", "-e", "."]);
        assert_eq!(cmd.to_string(), "pip install -e .");
    }

    #[test]
    fn test_command_line_words_keep_order() {
        let cmd = CommandLine::new(["conda", "install", "-y", "-n", "umap"])
            .words("-c conda-forge ffmpeg");
        assert_eq!(
            cmd.to_string(),
            "conda install -y -n umap -c conda-forge ffmpeg"
        );
        assert!(CommandLine::default().args().is_empty());
    }

    #[test]
    fn test_prepend_path_orders_and_dedups() {
        let mut ctx = ctx_with_path("/usr/bin:/opt/mc/bin");
        let dirs = vec![PathBuf::from("/opt/mc/bin"), PathBuf::from("/opt/mc/condabin")];

        ctx.prepend_path(&dirs).unwrap();
        assert_eq!(ctx.var(PATH_VAR), Some("/opt/mc/bin:/opt/mc/condabin:/usr/bin"));

        ctx.prepend_path(&dirs).unwrap();
        assert_eq!(ctx.var(PATH_VAR), Some("/opt/mc/bin:/opt/mc/condabin:/usr/bin"));
    }

    #[test]
    fn test_activate_bin_replaces_previous_environment() {
        let mut ctx = ctx_with_path("/opt/mc/bin:/usr/bin");

        ctx.activate_bin(PathBuf::from("/envs/umap/bin")).unwrap();
        assert_eq!(ctx.var(PATH_VAR), Some("/envs/umap/bin:/opt/mc/bin:/usr/bin"));

        ctx.activate_bin(PathBuf::from("/envs/librosa/bin")).unwrap();
        assert_eq!(
            ctx.var(PATH_VAR),
            Some("/envs/librosa/bin:/opt/mc/bin:/usr/bin")
        );
        assert_eq!(ctx.active_bin(), Some(Path::new("/envs/librosa/bin")));
    }

    #[test]
    fn test_scoped_env_restores_prior_state() {
        let mut ctx = ctx_with_path("/usr/bin");
        ctx.set_var("EXISTING", "before");

        {
            let guard = ctx.scoped_env([("EXISTING", "during"), ("FRESH", "1")]);
            assert_eq!(guard.var("EXISTING"), Some("during"));
            assert_eq!(guard.var("FRESH"), Some("1"));
        }

        assert_eq!(ctx.var("EXISTING"), Some("before"));
        assert_eq!(ctx.var("FRESH"), None);
    }

    #[tokio::test]
    async fn test_system_runner_captures_stdout() {
        let ctx = ExecutionContext::from_process(std::env::temp_dir());
        let out = SystemRunner
            .capture(&ctx, &CommandLine::parse("echo hello"))
            .await
            .expect("echo failed");
        assert!(out.contains("hello"));
    }

    #[tokio::test]
    async fn test_system_runner_reports_non_zero_exit() {
        let ctx = ExecutionContext::from_process(std::env::temp_dir());
        let err = SystemRunner
            .execute(&ctx, &CommandLine::parse("false"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NonZeroExit { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_system_runner_uses_context_env() {
        let mut ctx = ExecutionContext::from_process(std::env::temp_dir());
        ctx.set_var("SWITCHBOARD_MARKER", "xyzzy");
        let out = SystemRunner
            .capture(&ctx, &CommandLine::parse("printenv SWITCHBOARD_MARKER"))
            .await
            .expect("printenv failed");
        assert_eq!(out.trim(), "xyzzy");
    }

    #[tokio::test]
    async fn test_system_runner_timeout() {
        let ctx = ExecutionContext::from_process(std::env::temp_dir())
            .with_timeout(Some(Duration::from_millis(100)));
        let err = SystemRunner
            .execute(&ctx, &CommandLine::parse("sleep 5"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Timeout { limit, .. } if limit == Duration::from_millis(100)
        ));
        assert!(err.to_string().contains("timed out after 100ms"));
    }

    #[tokio::test]
    async fn test_system_runner_rejects_empty_command() {
        let ctx = ExecutionContext::from_process(std::env::temp_dir());
        let err = SystemRunner
            .execute(&ctx, &CommandLine::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::EmptyCommand));
    }
}
