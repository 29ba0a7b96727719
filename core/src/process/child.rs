//! An OS child process with captured streams.
//!
//! Shared by the local backend and the ssh backend (whose child is the
//! `ssh` client). stdout and stderr are redirected into anonymous temp files
//! so nothing has to drain pipes while the child runs. Reaping goes through
//! `wait4` to collect resource usage along with the status.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::process::{ChildStdin, Command as OsCommand, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ExecError;
use crate::process::{BackendKind, ExecResult, ExitKind, Lifecycle, ProcessState, Signal};


/// How the child ended, as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    Exited(i32),
    Signaled(i32),
}

/// Status and usage of a reaped child.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reaped {
    termination: Termination,
    execution_time: Duration,
    user_time: Duration,
    system_time: Duration,
}


// ---------------------------------------------------------------------------
// SpawnedChild
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct SpawnedChild {
    backend: BackendKind,
    pid: libc::pid_t,
    stdin: Option<ChildStdin>,
    stdout: File,
    stderr: File,
    started: Instant,
    lifecycle: Lifecycle,
    reaped: Cell<Option<Reaped>>,
    killed: bool,
    result: Option<ExecResult>,
}

impl SpawnedChild {
    /// Spawn `cmd` with piped stdin and file-backed stdout/stderr.
    pub fn spawn(backend: BackendKind, mut cmd: OsCommand) -> io::Result<SpawnedChild> {
        let stdout = tempfile::tempfile()?;
        let stderr = tempfile::tempfile()?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?));

        let lifecycle = Lifecycle::new();
        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let state = lifecycle.advance(ProcessState::StartFailed);
                debug!(backend = %backend, ?state, error = %e, "spawn failed");
                return Err(e);
            }
        };
        lifecycle.advance(ProcessState::Running);
        let stdin = child.stdin.take();
        let pid = child.id() as libc::pid_t;
        debug!(backend = %backend, pid, "spawned child");

        Ok(SpawnedChild {
            backend,
            pid,
            stdin,
            stdout,
            stderr,
            started,
            lifecycle,
            reaped: Cell::new(None),
            killed: false,
            result: None,
        })
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        if self.lifecycle.get().is_terminal() {
            return self.lifecycle.get();
        }
        let observed = match self.poll() {
            Ok(Some(reaped)) => ProcessState::Exited(self.exit_kind(&reaped)),
            Ok(None) => ProcessState::Running,
            // ECHILD: someone else reaped it; it is certainly gone.
            Err(_) => ProcessState::Exited(ExitKind::Normal),
        };
        self.lifecycle.advance(observed)
    }

    pub fn has_exited(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn kill(&mut self) -> Result<(), ExecError> {
        if self.send(libc::SIGKILL)? {
            self.killed = true;
        }
        Ok(())
    }

    pub fn signal(&mut self, signal: Signal) -> Result<(), ExecError> {
        self.send(signal.as_raw())?;
        Ok(())
    }

    pub fn write(&mut self, text: &str) -> Result<(), ExecError> {
        if self.has_exited() {
            return Err(ExecError::StdinClosed("process has exited".into()));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ExecError::StdinClosed("stdin was closed".into()))?;
        stdin
            .write_all(text.as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|e| ExecError::StdinClosed(format!("write failed: {}", e)))
    }

    /// Drop the write end of stdin so the child reads EOF.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Wait for exit and read both streams. Cached after the first success.
    pub fn collect(&mut self) -> Result<ExecResult, ExecError> {
        if let Some(ref result) = self.result {
            return Ok(result.clone());
        }
        self.close_stdin();
        let reaped = self
            .wait()
            .map_err(|e| ExecError::Wait(format!("waiting for pid {}: {}", self.pid, e)))?;
        self.lifecycle
            .advance(ProcessState::Exited(self.exit_kind(&reaped)));
        let stdout = read_all(&mut self.stdout)
            .map_err(|e| ExecError::Wait(format!("reading stdout: {}", e)))?;
        let stderr = read_all(&mut self.stderr)
            .map_err(|e| ExecError::Wait(format!("reading stderr: {}", e)))?;

        let (exit_code, signal) = match reaped.termination {
            Termination::Exited(code) => (code, None),
            Termination::Signaled(sig) => (-1, Some(sig)),
        };
        debug!(backend = %self.backend, pid = self.pid, exit_code, ?signal, "child exited");

        let result = ExecResult {
            stdout,
            stderr,
            exit_code,
            signal,
            execution_time: reaped.execution_time,
            system_time: reaped.system_time,
            user_time: reaped.user_time,
            release_error: None,
        };
        self.result = Some(result.clone());
        Ok(result)
    }

    fn exit_kind(&self, reaped: &Reaped) -> ExitKind {
        match reaped.termination {
            Termination::Exited(_) => ExitKind::Normal,
            Termination::Signaled(sig) if self.killed && sig == libc::SIGKILL => ExitKind::Killed,
            Termination::Signaled(sig) => ExitKind::Signaled(sig),
        }
    }

    /// Deliver a raw signal. Returns false when the child was already gone.
    fn send(&self, sig: i32) -> Result<bool, ExecError> {
        if self.reaped.get().is_some() {
            return Ok(false);
        }
        if unsafe { libc::kill(self.pid, sig) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(false);
        }
        Err(ExecError::Io(err))
    }

    fn poll(&self) -> io::Result<Option<Reaped>> {
        if let Some(reaped) = self.reaped.get() {
            return Ok(Some(reaped));
        }
        self.reap(libc::WNOHANG)
    }

    fn wait(&self) -> io::Result<Reaped> {
        if let Some(reaped) = self.reaped.get() {
            return Ok(reaped);
        }
        loop {
            if let Some(reaped) = self.reap(0)? {
                return Ok(reaped);
            }
        }
    }

    fn reap(&self, options: libc::c_int) -> io::Result<Option<Reaped>> {
        loop {
            let mut status: libc::c_int = 0;
            let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
            let ret = unsafe { libc::wait4(self.pid, &mut status, options, &mut usage) };
            if ret == 0 {
                return Ok(None);
            }
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            let termination = if libc::WIFSIGNALED(status) {
                Termination::Signaled(libc::WTERMSIG(status))
            } else {
                Termination::Exited(libc::WEXITSTATUS(status))
            };
            let reaped = Reaped {
                termination,
                execution_time: self.started.elapsed(),
                user_time: timeval_duration(&usage.ru_utime),
                system_time: timeval_duration(&usage.ru_stime),
            };
            self.reaped.set(Some(reaped));
            return Ok(Some(reaped));
        }
    }
}

fn timeval_duration(tv: &libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

fn read_all(file: &mut File) -> io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
