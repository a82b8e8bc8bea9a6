//! In-memory fakes for the command runner (testing only)
//!
//! `ScriptedRunner` satisfies the `CommandRunner` contract without spawning
//! anything: it records every command together with the working directory and
//! environment it was issued with, and answers from a script keyed by command
//! prefix.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::process::{CommandLine, CommandOutput, CommandRunner, ExecutionContext, OutputMode};

/// One command observed by [`ScriptedRunner`].
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    pub command: String,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub mode: OutputMode,
}

#[derive(Debug, Clone)]
enum Reply {
    Stdout(String),
    Exit(i32),
    Timeout,
}

/// Command runner that answers from a script.
///
/// The first scripted prefix that the rendered command starts with decides the
/// reply; unscripted commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: Vec<(String, Reply)>,
    log: Mutex<Vec<RecordedCommand>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stdout(mut self, prefix: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.script.push((prefix.into(), Reply::Stdout(stdout.into())));
        self
    }

    pub fn with_exit_code(mut self, prefix: impl Into<String>, code: i32) -> Self {
        self.script.push((prefix.into(), Reply::Exit(code)));
        self
    }

    pub fn with_timeout(mut self, prefix: impl Into<String>) -> Self {
        self.script.push((prefix.into(), Reply::Timeout));
        self
    }

    /// Every command issued so far, in order.
    pub fn recorded(&self) -> Vec<RecordedCommand> {
        self.log.lock().unwrap().clone()
    }

    /// Rendered command lines issued so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.recorded().into_iter().map(|r| r.command).collect()
    }

    /// Number of issued commands starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        ctx: &ExecutionContext,
        command: &CommandLine,
        mode: OutputMode,
    ) -> Result<CommandOutput, ProcessError> {
        if command.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }
        let rendered = command.to_string();
        self.log.lock().unwrap().push(RecordedCommand {
            command: rendered.clone(),
            cwd: ctx.cwd().to_path_buf(),
            env: ctx.vars().clone(),
            mode,
        });

        let reply = self
            .script
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            None => Ok(CommandOutput::default()),
            Some(Reply::Stdout(stdout)) => Ok(CommandOutput {
                stdout,
                duration_ms: 0,
            }),
            Some(Reply::Exit(0)) => Ok(CommandOutput::default()),
            Some(Reply::Exit(code)) => Err(ProcessError::NonZeroExit {
                command: rendered,
                code: Some(code),
            }),
            Some(Reply::Timeout) => Err(ProcessError::Timeout {
                command: rendered,
                limit: ctx.timeout().unwrap_or_default(),
            }),
        }
    }
}
