//! Local backend: spawn on this machine.
//!
//! Commands are executed directly (program plus arguments, no shell). Scripts
//! run as `subcommand + [body]`, `sh -c <body>` by default. The child starts
//! with an empty environment unless `inherit_env` is set; the command's own
//! entries are applied on top either way.

use std::path::PathBuf;
use std::process::Command as OsCommand;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{Body, Command};
use crate::error::ExecError;
use crate::process::child::SpawnedChild;
use crate::process::{BackendKind, ExecResult, Process, ProcessHandle, ProcessState, Signal};

use super::{note_uncompiled, parse_env};


// ---------------------------------------------------------------------------
// LocalConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    /// Interpreter prefix for scripts; the body is appended as one argument.
    pub subcommand: Vec<String>,
    /// Directory the child starts in. Defaults to the caller's.
    pub working_dir: Option<PathBuf>,
    /// Start from the caller's environment instead of an empty one.
    pub inherit_env: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            subcommand: vec!["sh".to_string(), "-c".to_string()],
            working_dir: None,
            inherit_env: false,
        }
    }
}


// ---------------------------------------------------------------------------
// LocalExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LocalExecutor {
    config: LocalConfig,
}

impl LocalExecutor {
    pub fn new(config: LocalConfig) -> Result<Self, ExecError> {
        if config.subcommand.is_empty() {
            return Err(ExecError::Config(
                "local: no subcommand for script execution was provided".into(),
            ));
        }
        Ok(LocalExecutor { config })
    }

    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    pub fn exec(&self, cmd: &Command) -> Result<ProcessHandle, ExecError> {
        Ok(ProcessHandle::Local(self.spawn(cmd)?))
    }

    /// Start `cmd` and return the concrete process.
    pub fn spawn(&self, cmd: &Command) -> Result<LocalProcess, ExecError> {
        note_uncompiled(BackendKind::Local, cmd);
        let env = parse_env(BackendKind::Local, cmd.env())?;
        let argv = self.argv(cmd);

        let mut os = OsCommand::new(&argv[0]);
        os.args(&argv[1..]);
        if !self.config.inherit_env {
            os.env_clear();
        }
        os.envs(env);
        if let Some(ref dir) = self.config.working_dir {
            os.current_dir(dir);
        }

        debug!(program = %argv[0], args = argv.len() - 1, "local launch");
        let child = SpawnedChild::spawn(BackendKind::Local, os).map_err(|e| {
            ExecError::launch(
                BackendKind::Local,
                format!("failed to start '{}': {}", argv[0], e),
            )
        })?;
        Ok(LocalProcess { child })
    }

    fn argv(&self, cmd: &Command) -> Vec<String> {
        match cmd.body() {
            Body::Exec { .. } => cmd.raw(),
            Body::Script { body, .. } => {
                let mut argv = self.config.subcommand.clone();
                argv.push(body.clone());
                argv
            }
        }
    }
}


// ---------------------------------------------------------------------------
// LocalProcess
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct LocalProcess {
    child: SpawnedChild,
}

impl LocalProcess {
    /// OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.child.pid() as u32
    }
}

impl Process for LocalProcess {
    fn backend(&self) -> BackendKind {
        BackendKind::Local
    }

    fn state(&self) -> ProcessState {
        self.child.state()
    }

    fn kill(&mut self) -> Result<(), ExecError> {
        self.child.kill()
    }

    fn signal(&mut self, signal: Signal) -> Result<(), ExecError> {
        self.child.signal(signal)
    }

    fn write(&mut self, text: &str) -> Result<(), ExecError> {
        self.child.write(text)
    }

    fn result(&mut self) -> Result<ExecResult, ExecError> {
        self.child.collect()
    }

    fn close(&mut self) -> Result<(), ExecError> {
        self.child.close_stdin();
        Ok(())
    }
}
