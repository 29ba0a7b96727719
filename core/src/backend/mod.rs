//! Backend adapters: where a `Command` becomes a running `Process`.
//!
//! `Executor` is the closed set of adapters a caller picks from. Each adapter
//! is built from explicit configuration and exposes the same `exec` entry
//! point; `exec_fn` turns any of them into a boxed factory function.

pub mod container;
pub mod local;
pub mod ssh;

use std::sync::Arc;

use tracing::warn;

use crate::command::Command;
use crate::error::ExecError;
use crate::process::{BackendKind, ProcessHandle};

pub use container::{ContainerConfig, ContainerExecutor, ContainerRuntime, DockerEngine};
pub use local::{LocalConfig, LocalExecutor};
pub use ssh::{SshConfig, SshExecutor};

/// A factory turning a command into a started process.
pub type ExecFn = Box<dyn Fn(&Command) -> Result<ProcessHandle, ExecError> + Send + Sync>;


// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Executor {
    Local(LocalExecutor),
    SecureShell(SshExecutor),
    Container(ContainerExecutor),
}

impl Executor {
    pub fn local(config: LocalConfig) -> Result<Executor, ExecError> {
        Ok(Executor::Local(LocalExecutor::new(config)?))
    }

    pub fn ssh(config: SshConfig) -> Result<Executor, ExecError> {
        Ok(Executor::SecureShell(SshExecutor::new(config)?))
    }

    /// A container executor talking to the engine socket named in `config`.
    pub fn container(config: ContainerConfig) -> Result<Executor, ExecError> {
        Ok(Executor::Container(ContainerExecutor::new(config)?))
    }

    /// A container executor using a caller-supplied runtime.
    pub fn container_with_runtime(
        config: ContainerConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Executor, ExecError> {
        Ok(Executor::Container(ContainerExecutor::with_runtime(
            config, runtime,
        )?))
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            Executor::Local(_) => BackendKind::Local,
            Executor::SecureShell(_) => BackendKind::SecureShell,
            Executor::Container(_) => BackendKind::Container,
        }
    }

    /// Start `cmd`. The command is used as given; compile it first if it
    /// carries placeholders.
    pub fn exec(&self, cmd: &Command) -> Result<ProcessHandle, ExecError> {
        match self {
            Executor::Local(e) => e.exec(cmd),
            Executor::SecureShell(e) => e.exec(cmd),
            Executor::Container(e) => e.exec(cmd),
        }
    }

    /// A boxed factory owning a copy of this executor.
    pub fn exec_fn(&self) -> ExecFn {
        let executor = self.clone();
        Box::new(move |cmd: &Command| executor.exec(cmd))
    }
}


// ---------------------------------------------------------------------------
// Shared launch helpers
// ---------------------------------------------------------------------------

/// Log when a command reaches a backend with substitution data still set.
pub(crate) fn note_uncompiled(backend: BackendKind, cmd: &Command) {
    if !cmd.data().is_empty() {
        let keys: Vec<&str> = cmd.data().keys().map(String::as_str).collect();
        warn!(
            backend = %backend,
            fields = ?keys,
            "launching a command that still carries substitution data; was it compiled?"
        );
    }
}

/// Split one `KEY=VALUE` entry at the first `=`.
pub(crate) fn parse_env_entry(
    backend: BackendKind,
    entry: &str,
) -> Result<(String, String), ExecError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ExecError::launch(
            backend,
            format!("invalid environment entry '{}': expected KEY=VALUE", entry),
        )),
    }
}

pub(crate) fn parse_env(
    backend: BackendKind,
    entries: &[String],
) -> Result<Vec<(String, String)>, ExecError> {
    entries
        .iter()
        .map(|entry| parse_env_entry(backend, entry))
        .collect()
}
