//! The seam between the container adapter and a container engine.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::net::Shutdown;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;


/// Failures talking to the container engine. The adapter maps these to
/// `ExecError::Launch` before a process exists and `ExecError::Wait` after.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot connect to engine at {}: {source}", socket.display())]
    Connect {
        socket: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("engine returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("engine JSON error: {0}")]
    Json(#[from] serde_json::Error),
}


/// What to run inside the container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecSpec {
    /// argv; the first element is the program.
    pub cmd: Vec<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Path inside the container; `None` keeps the image default.
    pub working_dir: Option<String>,
}

/// State of an exec instance as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecInspect {
    pub running: bool,
    pub exit_code: Option<i32>,
}


// ---------------------------------------------------------------------------
// ExecStream
// ---------------------------------------------------------------------------

/// Write side of an attached exec.
pub trait ExecStdin: Write + Send {
    /// Signal end of input while still reading output.
    fn close_write(&mut self) -> io::Result<()>;

    /// Tear the whole connection down so readers see EOF.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl ExecStdin for UnixStream {
    fn close_write(&mut self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Write)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// A started exec: the multiplexed output stream and the stdin writer.
pub struct ExecStream {
    pub output: Box<dyn Read + Send>,
    pub input: Box<dyn ExecStdin>,
}


// ---------------------------------------------------------------------------
// ContainerRuntime
// ---------------------------------------------------------------------------

/// The three engine calls a container process needs.
pub trait ContainerRuntime: Send + Sync {
    /// Register an exec in `container` and return its id.
    fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String, EngineError>;

    /// Start the exec attached, returning its streams.
    fn start_exec(&self, exec_id: &str) -> Result<ExecStream, EngineError>;

    fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspect, EngineError>;
}
