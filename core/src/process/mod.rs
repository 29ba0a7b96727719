//! The running side of a command: one `Process` per launch.
//!
//! Every backend returns a value implementing `Process`; `ProcessHandle`
//! is the closed enum callers hold so they never need to know which
//! backend produced it.

pub(crate) mod child;
pub mod result;

use std::cell::Cell;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backend::container::ContainerProcess;
use crate::backend::local::LocalProcess;
use crate::backend::ssh::SshProcess;
use crate::error::ExecError;

pub use result::ExecResult;


// ---------------------------------------------------------------------------
// BackendKind
// ---------------------------------------------------------------------------

/// Which adapter launched a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Local,
    SecureShell,
    Container,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::SecureShell => "secure-shell",
            BackendKind::Container => "container",
        }
    }

    /// Whether processes from this backend accept `kill` and `signal`.
    pub fn supports_signals(&self) -> bool {
        !matches!(self, BackendKind::Container)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Signals a caller may deliver to a running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
    Hangup,
    Quit,
    User1,
    User2,
}

impl Signal {
    /// The platform signal number.
    pub fn as_raw(&self) -> i32 {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Hangup => libc::SIGHUP,
            Signal::Quit => libc::SIGQUIT,
            Signal::User1 => libc::SIGUSR1,
            Signal::User2 => libc::SIGUSR2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
            Signal::Hangup => "SIGHUP",
            Signal::Quit => "SIGQUIT",
            Signal::User1 => "SIGUSR1",
            Signal::User2 => "SIGUSR2",
        }
    }

    /// Parse `INT`, `SIGINT` or `int`.
    pub fn from_name(name: &str) -> Option<Signal> {
        let upper = name.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "INT" => Some(Signal::Interrupt),
            "TERM" => Some(Signal::Terminate),
            "KILL" => Some(Signal::Kill),
            "HUP" => Some(Signal::Hangup),
            "QUIT" => Some(Signal::Quit),
            "USR1" => Some(Signal::User1),
            "USR2" => Some(Signal::User2),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}


// ---------------------------------------------------------------------------
// ProcessState
// ---------------------------------------------------------------------------

/// How an exited process ended. Informational only; the exit code in
/// `ExecResult` is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The process returned an exit status on its own.
    Normal,
    /// The process died after `kill()` on this handle.
    Killed,
    /// The process was terminated by the given signal.
    Signaled(i32),
}

/// Lifecycle of a process.
///
/// ```text
/// Starting ──> Running ──> Exited
///     └──────> StartFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Exited(ExitKind),
    StartFailed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited(_) | ProcessState::StartFailed)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_advance(&self, next: &ProcessState) -> bool {
        matches!(
            (self, next),
            (ProcessState::Starting, ProcessState::Running)
                | (ProcessState::Starting, ProcessState::StartFailed)
                | (ProcessState::Running, ProcessState::Exited(_))
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: ProcessState) -> Result<(), String> {
        if !self.can_advance(&next) {
            return Err(format!("invalid transition {:?} -> {:?}", self, next));
        }
        *self = next;
        Ok(())
    }
}

/// The state a backend keeps for one process. Observations arrive through
/// `&self` (`Process::state` polls), hence the cell.
#[derive(Debug)]
pub(crate) struct Lifecycle(Cell<ProcessState>);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Lifecycle(Cell::new(ProcessState::Starting))
    }

    pub(crate) fn get(&self) -> ProcessState {
        self.0.get()
    }

    /// Record `next` and return the state now held. Observing the current
    /// state again is a no-op; an illegal move is logged and dropped.
    pub(crate) fn advance(&self, next: ProcessState) -> ProcessState {
        let mut state = self.0.get();
        if state == next {
            return state;
        }
        match state.advance(next) {
            Ok(()) => self.0.set(state),
            Err(e) => warn!(error = %e, "process state not advanced"),
        }
        self.0.get()
    }
}


// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

/// A single launch of a command, running or finished.
pub trait Process {
    /// The adapter that launched this process.
    fn backend(&self) -> BackendKind;

    fn state(&self) -> ProcessState;

    /// Forcibly terminate. Succeeds without effect if already exited.
    fn kill(&mut self) -> Result<(), ExecError>;

    /// Deliver a signal, best effort.
    fn signal(&mut self, signal: Signal) -> Result<(), ExecError>;

    fn interrupt(&mut self) -> Result<(), ExecError> {
        self.signal(Signal::Interrupt)
    }

    /// Send `text` to standard input exactly as given. No newline is added.
    fn write(&mut self, text: &str) -> Result<(), ExecError>;

    /// Block until the process exits and collect what it produced.
    ///
    /// Standard input is closed first. A non-zero exit status is not an
    /// error. Later calls return the same result.
    fn result(&mut self) -> Result<ExecResult, ExecError>;

    /// Release everything the process holds. Safe to call more than once.
    fn close(&mut self) -> Result<(), ExecError>;
}


// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

/// A process from any backend.
#[derive(Debug)]
pub enum ProcessHandle {
    Local(LocalProcess),
    SecureShell(SshProcess),
    Container(ContainerProcess),
}

impl ProcessHandle {
    fn inner(&self) -> &dyn Process {
        match self {
            ProcessHandle::Local(p) => p,
            ProcessHandle::SecureShell(p) => p,
            ProcessHandle::Container(p) => p,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Process {
        match self {
            ProcessHandle::Local(p) => p,
            ProcessHandle::SecureShell(p) => p,
            ProcessHandle::Container(p) => p,
        }
    }
}

impl Process for ProcessHandle {
    fn backend(&self) -> BackendKind {
        self.inner().backend()
    }

    fn state(&self) -> ProcessState {
        self.inner().state()
    }

    fn kill(&mut self) -> Result<(), ExecError> {
        self.inner_mut().kill()
    }

    fn signal(&mut self, signal: Signal) -> Result<(), ExecError> {
        self.inner_mut().signal(signal)
    }

    fn write(&mut self, text: &str) -> Result<(), ExecError> {
        self.inner_mut().write(text)
    }

    fn result(&mut self) -> Result<ExecResult, ExecError> {
        self.inner_mut().result()
    }

    fn close(&mut self) -> Result<(), ExecError> {
        self.inner_mut().close()
    }
}
