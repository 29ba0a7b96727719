//! Container backend: run inside an existing container via the engine's
//! exec API.
//!
//! The argv is handed to the engine as a list, so no formatter is involved:
//! commands go as `[program, args...]`, scripts as `subcommand + [body]`.
//! One drain thread per process reads the framed output into shared buffers
//! and reports completion through a one-shot channel. The engine offers no
//! way to signal an exec, so `kill` and `signal` are unsupported.

pub mod demux;
pub mod engine;
pub mod runtime;

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::{Body, Command};
use crate::error::ExecError;
use crate::process::{
    BackendKind, ExecResult, ExitKind, Lifecycle, Process, ProcessHandle, ProcessState, Signal,
};

use super::{note_uncompiled, parse_env};

pub use demux::demux;
pub use engine::DockerEngine;
pub use runtime::{ContainerRuntime, EngineError, ExecInspect, ExecSpec, ExecStdin, ExecStream};

const BACKEND: BackendKind = BackendKind::Container;

/// How often and how long `result` re-asks the engine for an exit code that
/// is not yet recorded after the stream closed.
const INSPECT_ATTEMPTS: usize = 50;
const INSPECT_INTERVAL: Duration = Duration::from_millis(20);

fn default_socket() -> PathBuf {
    PathBuf::from(engine::DEFAULT_SOCKET)
}

fn default_subcommand() -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string()]
}


// ---------------------------------------------------------------------------
// ContainerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    /// Container id or name.
    pub container: String,
    /// Engine API socket.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    /// Working directory inside the container.
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_subcommand")]
    pub subcommand: Vec<String>,
    /// Pin the engine API version, e.g. `1.43`.
    #[serde(default)]
    pub api_version: Option<String>,
}

impl ContainerConfig {
    pub fn new(container: &str) -> Self {
        ContainerConfig {
            container: container.to_string(),
            socket: default_socket(),
            working_dir: None,
            subcommand: default_subcommand(),
            api_version: None,
        }
    }
}


// ---------------------------------------------------------------------------
// ContainerExecutor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ContainerExecutor {
    config: ContainerConfig,
    runtime: Arc<dyn ContainerRuntime>,
}

impl fmt::Debug for ContainerExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContainerExecutor {
    /// Talk to the Docker-compatible engine at `config.socket`.
    pub fn new(config: ContainerConfig) -> Result<Self, ExecError> {
        let runtime = DockerEngine::new(&config.socket).with_api_version(config.api_version.clone());
        Self::with_runtime(config, Arc::new(runtime))
    }

    pub fn with_runtime(
        config: ContainerConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, ExecError> {
        if config.container.trim().is_empty() {
            return Err(ExecError::Config("container: no container id was provided".into()));
        }
        if config.subcommand.is_empty() {
            return Err(ExecError::Config(
                "container: no subcommand for script execution was provided".into(),
            ));
        }
        Ok(ContainerExecutor { config, runtime })
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn exec(&self, cmd: &Command) -> Result<ProcessHandle, ExecError> {
        Ok(ProcessHandle::Container(self.spawn(cmd)?))
    }

    /// Create and start an exec for `cmd`, then begin draining its output.
    pub fn spawn(&self, cmd: &Command) -> Result<ContainerProcess, ExecError> {
        note_uncompiled(BACKEND, cmd);
        parse_env(BACKEND, cmd.env())?;

        let spec = ExecSpec {
            cmd: self.argv(cmd),
            env: cmd.env().to_vec(),
            working_dir: self.config.working_dir.clone(),
        };
        let lifecycle = Lifecycle::new();
        let exec_id = self
            .runtime
            .create_exec(&self.config.container, &spec)
            .map_err(|e| start_failed(&lifecycle, format!("create exec: {}", e)))?;
        let started = Instant::now();
        let stream = self
            .runtime
            .start_exec(&exec_id)
            .map_err(|e| start_failed(&lifecycle, format!("start exec {}: {}", exec_id, e)))?;
        debug!(container = %self.config.container, exec_id = %exec_id, "container exec started");

        ContainerProcess::start(
            exec_id,
            Arc::clone(&self.runtime),
            stream,
            lifecycle,
            started,
        )
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
// SharedBuffer
// ---------------------------------------------------------------------------

/// A byte buffer written by the drain thread and read by the owner.
#[derive(Debug, Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn text(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output buffer poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}


// ---------------------------------------------------------------------------
// ContainerProcess
// ---------------------------------------------------------------------------

/// An exec inside a container. It counts as exited once its output stream
/// has ended.
pub struct ContainerProcess {
    exec_id: String,
    runtime: Arc<dyn ContainerRuntime>,
    input: Option<Box<dyn ExecStdin>>,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
    finished: Arc<AtomicBool>,
    done: Receiver<Result<(), EngineError>>,
    lifecycle: Lifecycle,
    started: Instant,
    result: Option<ExecResult>,
}

impl fmt::Debug for ContainerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerProcess")
            .field("exec_id", &self.exec_id)
            .field("state", &self.lifecycle.get())
            .finish_non_exhaustive()
    }
}

impl ContainerProcess {
    /// Begin draining `stream`. `started` is taken before the exec was
    /// started so the measured time covers the whole run.
    fn start(
        exec_id: String,
        runtime: Arc<dyn ContainerRuntime>,
        stream: ExecStream,
        lifecycle: Lifecycle,
        started: Instant,
    ) -> Result<ContainerProcess, ExecError> {
        let ExecStream { output, mut input } = stream;
        let stdout = SharedBuffer::default();
        let stderr = SharedBuffer::default();
        let finished = Arc::new(AtomicBool::new(false));
        let (tx, done) = mpsc::sync_channel(1);

        let drain = {
            let stdout = stdout.clone();
            let stderr = stderr.clone();
            let finished = Arc::clone(&finished);
            thread::Builder::new()
                .name(format!("rk-drain-{}", short_id(&exec_id)))
                .spawn(move || {
                    let outcome = demux(output, stdout, stderr).map(|_| ());
                    finished.store(true, Ordering::Release);
                    let _ = tx.send(outcome);
                })
        };
        if let Err(e) = drain {
            let _ = input.shutdown();
            return Err(start_failed(
                &lifecycle,
                format!("failed to start output drain: {}", e),
            ));
        }
        lifecycle.advance(ProcessState::Running);

        Ok(ContainerProcess {
            exec_id,
            runtime,
            input: Some(input),
            stdout,
            stderr,
            finished,
            done,
            lifecycle,
            started,
            result: None,
        })
    }

    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }

    fn has_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn exit_code(&self) -> Result<i32, ExecError> {
        for attempt in 0..INSPECT_ATTEMPTS {
            let inspect = self
                .runtime
                .inspect_exec(&self.exec_id)
                .map_err(|e| ExecError::Wait(format!("inspect exec {}: {}", self.exec_id, e)))?;
            match inspect.exit_code {
                Some(code) if !inspect.running => return Ok(code),
                _ if attempt + 1 < INSPECT_ATTEMPTS => thread::sleep(INSPECT_INTERVAL),
                _ => {}
            }
        }
        Err(ExecError::Wait(format!(
            "exec {} ended its output but the engine reports no exit code",
            self.exec_id
        )))
    }

    fn release(&mut self) -> Result<(), String> {
        match self.input.take() {
            Some(mut input) => match input.shutdown() {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
                Err(e) => Err(format!("closing exec stream: {}", e)),
            },
            None => Ok(()),
        }
    }
}

impl Process for ContainerProcess {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    fn state(&self) -> ProcessState {
        if self.has_finished() {
            self.lifecycle.advance(ProcessState::Exited(ExitKind::Normal))
        } else {
            self.lifecycle.get()
        }
    }

    fn kill(&mut self) -> Result<(), ExecError> {
        Err(ExecError::unsupported(BACKEND, "kill"))
    }

    fn signal(&mut self, _signal: Signal) -> Result<(), ExecError> {
        Err(ExecError::unsupported(BACKEND, "signal"))
    }

    fn write(&mut self, text: &str) -> Result<(), ExecError> {
        if self.has_finished() {
            return Err(ExecError::StdinClosed("process has exited".into()));
        }
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| ExecError::StdinClosed("stdin was closed".into()))?;
        input
            .write_all(text.as_bytes())
            .and_then(|_| input.flush())
            .map_err(|e| ExecError::StdinClosed(format!("write failed: {}", e)))
    }

    fn result(&mut self) -> Result<ExecResult, ExecError> {
        if let Some(ref result) = self.result {
            return Ok(result.clone());
        }
        if let Some(input) = self.input.as_mut() {
            if let Err(e) = input.close_write() {
                debug!(error = %e, "closing exec stdin");
            }
        }

        match self.done.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ExecError::Wait(e.to_string())),
            Err(_) => {
                return Err(ExecError::Wait(
                    "output drain ended without reporting".into(),
                ))
            }
        }
        self.lifecycle
            .advance(ProcessState::Exited(ExitKind::Normal));
        let exit_code = self.exit_code()?;

        let mut result = ExecResult {
            stdout: self.stdout.text(),
            stderr: self.stderr.text(),
            exit_code,
            signal: None,
            execution_time: self.started.elapsed(),
            system_time: Duration::ZERO,
            user_time: Duration::ZERO,
            release_error: None,
        };
        if let Err(e) = self.release() {
            warn!(exec_id = %self.exec_id, error = %e, "container release failed after result");
            result.release_error = Some(e);
        }
        debug!(exec_id = %self.exec_id, exit_code, "container exec finished");
        self.result = Some(result.clone());
        Ok(result)
    }

    fn close(&mut self) -> Result<(), ExecError> {
        self.release()
            .map_err(|e| ExecError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }
}

impl Drop for ContainerProcess {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(exec_id = %self.exec_id, error = %e, "container release failed on drop");
        }
    }
}

/// Mark a launch as failed and build the error the caller sees.
fn start_failed(lifecycle: &Lifecycle, reason: String) -> ExecError {
    let state = lifecycle.advance(ProcessState::StartFailed);
    debug!(?state, reason = %reason, "container exec did not start");
    ExecError::launch(BACKEND, reason)
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((i, _)) => &id[..i],
        None => id,
    }
}


#[cfg(test)]
mod tests {
    use super::demux::frame;
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    /// In-memory engine. Each started exec gets a socket pair; the far end
    /// optionally echoes stdin, then emits the canned frames and hangs up.
    struct FakeRuntime {
        frames: Vec<(u8, Vec<u8>)>,
        echo_stdin: bool,
        exit_code: i32,
        fail_create: bool,
        fail_start: bool,
        start_delay: Duration,
        specs: Mutex<Vec<(String, ExecSpec)>>,
    }

    impl FakeRuntime {
        fn new(frames: Vec<(u8, &[u8])>, exit_code: i32) -> FakeRuntime {
            FakeRuntime {
                frames: frames.into_iter().map(|(s, b)| (s, b.to_vec())).collect(),
                echo_stdin: false,
                exit_code,
                fail_create: false,
                fail_start: false,
                start_delay: Duration::ZERO,
                specs: Mutex::new(Vec::new()),
            }
        }

        fn specs(&self) -> Vec<(String, ExecSpec)> {
            self.specs.lock().unwrap().clone()
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String, EngineError> {
            if self.fail_create {
                return Err(EngineError::Status {
                    status: 404,
                    message: format!("No such container: {}", container),
                });
            }
            self.specs.lock().unwrap().push((container.to_string(), spec.clone()));
            Ok("0123456789abcdef0123".to_string())
        }

        fn start_exec(&self, _exec_id: &str) -> Result<ExecStream, EngineError> {
            if self.fail_start {
                return Err(EngineError::Protocol("hijack refused".into()));
            }
            thread::sleep(self.start_delay);
            let (near, mut far) = UnixStream::pair()?;
            let frames = self.frames.clone();
            let echo = self.echo_stdin;
            thread::spawn(move || {
                if echo {
                    let mut input = Vec::new();
                    far.read_to_end(&mut input).unwrap();
                    far.write_all(&frame(1, &input)).unwrap();
                }
                for (stream, payload) in frames {
                    far.write_all(&frame(stream, &payload)).unwrap();
                }
            });
            Ok(ExecStream {
                output: Box::new(near.try_clone()?),
                input: Box::new(near),
            })
        }

        fn inspect_exec(&self, _exec_id: &str) -> Result<ExecInspect, EngineError> {
            Ok(ExecInspect {
                running: false,
                exit_code: Some(self.exit_code),
            })
        }
    }

    fn executor(runtime: FakeRuntime) -> (ContainerExecutor, Arc<FakeRuntime>) {
        let runtime = Arc::new(runtime);
        let exec = ContainerExecutor::with_runtime(
            ContainerConfig::new("web"),
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        )
        .unwrap();
        (exec, runtime)
    }

    fn wait_until_finished(process: &ContainerProcess) {
        for _ in 0..500 {
            if process.state() != ProcessState::Running {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("exec never finished");
    }

    #[test]
    fn exit_code_seven() {
        let (exec, _) = executor(FakeRuntime::new(vec![(1, b"hi\n")], 7));
        let mut process = exec.spawn(&Command::script("s", "echo hi; exit 7")).unwrap();
        let result = process.result().unwrap();
        assert_eq!(result.exit_code, 7);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.signal, None);
        assert_eq!(result.user_time, Duration::ZERO);
    }

    #[test]
    fn interleaved_frames_are_separated() {
        let (exec, _) = executor(FakeRuntime::new(
            vec![(1, b"a\n"), (2, b"b\n"), (1, b"c\n"), (2, b"d\n")],
            0,
        ));
        let result = exec.spawn(&Command::new("x")).unwrap().result().unwrap();
        assert_eq!(result.stdout, "a\nc\n");
        assert_eq!(result.stderr, "b\nd\n");
    }

    #[test]
    fn argv_env_and_working_dir_reach_the_engine() {
        let runtime = Arc::new(FakeRuntime::new(Vec::new(), 0));
        let exec = ContainerExecutor::with_runtime(
            ContainerConfig {
                working_dir: Some("/srv/app".into()),
                ..ContainerConfig::new("web")
            },
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        )
        .unwrap();

        let cmd = Command::new("ls").with_args(["-l", "two words"]).with_env(["A=1"]);
        exec.spawn(&cmd).unwrap().result().unwrap();
        exec.spawn(&Command::script("s", "echo $A")).unwrap().result().unwrap();

        let specs = runtime.specs();
        assert_eq!(specs[0].0, "web");
        assert_eq!(specs[0].1.cmd, vec!["ls", "-l", "two words"]);
        assert_eq!(specs[0].1.env, vec!["A=1"]);
        assert_eq!(specs[0].1.working_dir.as_deref(), Some("/srv/app"));
        assert_eq!(specs[1].1.cmd, vec!["sh", "-c", "echo $A"]);
    }

    #[test]
    fn stdin_is_closed_before_waiting() {
        let mut fake = FakeRuntime::new(vec![(2, b"done\n")], 0);
        fake.echo_stdin = true;
        let (exec, _) = executor(fake);
        let mut process = exec.spawn(&Command::new("cat")).unwrap();
        process.write("line one\n").unwrap();
        process.write("line two").unwrap();
        let result = process.result().unwrap();
        assert_eq!(result.stdout, "line one\nline two");
        assert_eq!(result.stderr, "done\n");
    }

    #[test]
    fn write_after_exit_is_stdin_closed() {
        let (exec, _) = executor(FakeRuntime::new(vec![(1, b"bye\n")], 0));
        let mut process = exec.spawn(&Command::new("true")).unwrap();
        wait_until_finished(&process);
        let err = process.write("late").unwrap_err();
        assert!(matches!(err, ExecError::StdinClosed(_)));
    }

    #[test]
    fn kill_and_signal_are_unsupported() {
        let (exec, _) = executor(FakeRuntime::new(Vec::new(), 0));
        let mut process = exec.exec(&Command::new("sleep")).unwrap();
        for err in [
            process.kill().unwrap_err(),
            process.signal(Signal::Terminate).unwrap_err(),
            process.interrupt().unwrap_err(),
        ] {
            match err {
                ExecError::Unsupported { backend, .. } => assert_eq!(backend, BACKEND),
                other => panic!("unexpected {:?}", other),
            }
        }
        process.result().unwrap();
    }

    #[test]
    fn state_follows_the_exec() {
        let mut fake = FakeRuntime::new(vec![(1, b"ok\n")], 0);
        fake.echo_stdin = true;
        let (exec, _) = executor(fake);
        let mut process = exec.spawn(&Command::new("cat")).unwrap();
        // the fake holds output back until stdin closes
        assert_eq!(process.state(), ProcessState::Running);
        process.result().unwrap();
        assert_eq!(process.lifecycle.get(), ProcessState::Exited(ExitKind::Normal));
        assert_eq!(process.state(), ProcessState::Exited(ExitKind::Normal));
    }

    #[test]
    fn start_failed_marks_lifecycle() {
        let lifecycle = Lifecycle::new();
        let err = start_failed(&lifecycle, "start exec x: refused".into());
        assert_eq!(lifecycle.get(), ProcessState::StartFailed);
        assert!(matches!(err, ExecError::Launch { backend: BACKEND, .. }));
    }

    #[test]
    fn execution_time_includes_start() {
        let mut fake = FakeRuntime::new(vec![(1, b"x")], 0);
        fake.start_delay = Duration::from_millis(150);
        let (exec, _) = executor(fake);
        let result = exec.spawn(&Command::new("x")).unwrap().result().unwrap();
        assert!(result.execution_time >= Duration::from_millis(150));
    }

    #[test]
    fn create_failure_is_launch_error() {
        let mut fake = FakeRuntime::new(Vec::new(), 0);
        fake.fail_create = true;
        let (exec, _) = executor(fake);
        let err = exec.spawn(&Command::new("true")).unwrap_err();
        match err {
            ExecError::Launch { backend, reason } => {
                assert_eq!(backend, BACKEND);
                assert!(reason.contains("No such container"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn start_failure_is_launch_error() {
        let mut fake = FakeRuntime::new(Vec::new(), 0);
        fake.fail_start = true;
        let (exec, _) = executor(fake);
        assert!(matches!(
            exec.spawn(&Command::new("true")).unwrap_err(),
            ExecError::Launch { .. }
        ));
    }

    #[test]
    fn malformed_env_is_launch_error_before_create() {
        let (exec, runtime) = executor(FakeRuntime::new(Vec::new(), 0));
        let err = exec.spawn(&Command::new("true").with_env(["=x"])).unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }));
        assert!(runtime.specs().is_empty());
    }

    #[test]
    fn engine_error_frame_is_wait_error() {
        let (exec, _) = executor(FakeRuntime::new(vec![(1, b"x"), (3, b"oci runtime error")], 0));
        let err = exec.spawn(&Command::new("x")).unwrap().result().unwrap_err();
        match err {
            ExecError::Wait(msg) => assert!(msg.contains("oci runtime error")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn close_is_idempotent_and_silent_without_output() {
        let (exec, _) = executor(FakeRuntime::new(Vec::new(), 0));
        let mut process = exec.spawn(&Command::new("true")).unwrap();
        process.close().unwrap();
        process.close().unwrap();
        let err = process.write("x").unwrap_err();
        assert!(matches!(err, ExecError::StdinClosed(_)));
    }

    #[test]
    fn result_is_cached() {
        let (exec, _) = executor(FakeRuntime::new(vec![(1, b"once")], 2));
        let mut process = exec.spawn(&Command::new("x")).unwrap();
        let first = process.result().unwrap();
        assert_eq!(process.result().unwrap(), first);
        assert_eq!(process.state(), ProcessState::Exited(ExitKind::Normal));
    }

    #[test]
    fn config_validation_and_yaml() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeRuntime::new(Vec::new(), 0));
        let err = ContainerExecutor::with_runtime(ContainerConfig::new(""), Arc::clone(&runtime))
            .unwrap_err();
        assert!(matches!(err, ExecError::Config(_)));

        let cfg: ContainerConfig =
            serde_yaml::from_str("container: db\nworking_dir: /data\n").unwrap();
        assert_eq!(cfg.socket, PathBuf::from(engine::DEFAULT_SOCKET));
        assert_eq!(cfg.working_dir.as_deref(), Some("/data"));
        assert_eq!(cfg.subcommand, vec!["sh", "-c"]);
    }

    #[test]
    fn short_ids() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
