//! Secure-shell backend: run on a remote host through the OpenSSH client.
//!
//! Each launch dials a control master (`ssh -M -N -f -S <socket>`), runs the
//! command as one multiplexed client session over that socket, and tears the
//! master down once the result is collected. The remote side receives a
//! single command string: the formatted argv for commands, or
//! `subcommand '<body>'` for scripts.
//!
//! The session writes its remote PID to `<pid_dir>/<control dir name>.pid`
//! and then `exec`s the command, so the PID stays valid for the whole run.
//! `signal` and `kill` open a second session over the master and run
//! `kill -<SIG> <pid>` on the remote host; `kill` also stops the local
//! client.
//!
//! Limitations: there is no working-directory support (configuring one is
//! rejected), and environment entries travel as `SetEnv` options that only
//! arrive if the server's `AcceptEnv` allows them.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command as OsCommand, Stdio};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::command::{shell_quote, Body, Command};
use crate::error::ExecError;
use crate::process::child::SpawnedChild;
use crate::process::{BackendKind, ExecResult, Process, ProcessHandle, ProcessState, Signal};

use super::{note_uncompiled, parse_env_entry};

const BACKEND: BackendKind = BackendKind::SecureShell;

fn default_port() -> u16 {
    22
}

fn default_program() -> PathBuf {
    PathBuf::from("ssh")
}

fn default_subcommand() -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string()]
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pid_dir() -> String {
    "/tmp".to_string()
}

/// Polls of the remote PID file (100ms apart) before a signal gives up.
const PID_FILE_POLLS: u32 = 50;


// ---------------------------------------------------------------------------
// SshConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Path of the OpenSSH client binary.
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Extra `-o` options, e.g. `StrictHostKeyChecking=no`.
    #[serde(default)]
    pub options: Vec<String>,
    /// Interpreter prefix for scripts on the remote side.
    #[serde(default = "default_subcommand")]
    pub subcommand: Vec<String>,
    /// Seconds, passed as `ConnectTimeout`.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Where control-socket directories are created. Defaults to the system
    /// temp dir; keep it short, socket paths are length-limited.
    #[serde(default)]
    pub control_dir: Option<PathBuf>,
    /// Remote directory for the session's PID file.
    #[serde(default = "default_pid_dir")]
    pub pid_dir: String,
    /// Not supported; present so a configured value is reported clearly.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl SshConfig {
    pub fn new(host: &str) -> Self {
        SshConfig {
            host: host.to_string(),
            port: default_port(),
            user: None,
            identity_file: None,
            program: default_program(),
            options: Vec::new(),
            subcommand: default_subcommand(),
            connect_timeout: default_connect_timeout(),
            control_dir: None,
            pid_dir: default_pid_dir(),
            working_dir: None,
        }
    }

    /// `user@host`, or just `host` when no user is set.
    pub fn destination(&self) -> String {
        match self.user {
            Some(ref user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Connection options shared by the dial, session and close invocations.
    pub fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout),
        ];
        if let Some(ref key) = self.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        for opt in &self.options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        args
    }

    fn validate(&self) -> Result<(), ExecError> {
        if self.host.trim().is_empty() {
            return Err(ExecError::Config("ssh: host is empty".into()));
        }
        if self.subcommand.is_empty() {
            return Err(ExecError::Config(
                "ssh: no subcommand for script execution was provided".into(),
            ));
        }
        if self.pid_dir.trim().is_empty() {
            return Err(ExecError::Config("ssh: pid_dir is empty".into()));
        }
        if let Some(ref dir) = self.working_dir {
            return Err(ExecError::Config(format!(
                "ssh: working directory '{}' is not supported by this backend",
                dir.display()
            )));
        }
        Ok(())
    }
}


// ---------------------------------------------------------------------------
// SshExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Result<Self, ExecError> {
        config.validate()?;
        Ok(SshExecutor { config })
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn exec(&self, cmd: &Command) -> Result<ProcessHandle, ExecError> {
        Ok(ProcessHandle::SecureShell(self.spawn(cmd)?))
    }

    /// Dial, then start one session for `cmd`. Any failure after the dial
    /// closes the master before returning.
    pub fn spawn(&self, cmd: &Command) -> Result<SshProcess, ExecError> {
        note_uncompiled(BACKEND, cmd);
        let master = ControlMaster::dial(&self.config)?;

        let args = match self.session_args(master.socket(), master.pid_file(), cmd) {
            Ok(args) => args,
            Err(e) => {
                master.release();
                return Err(e);
            }
        };

        let mut os = OsCommand::new(&self.config.program);
        os.args(&args);
        match SpawnedChild::spawn(BACKEND, os) {
            Ok(child) => {
                debug!(destination = %self.config.destination(), "ssh session started");
                Ok(SshProcess {
                    child,
                    master: Some(master),
                    result: None,
                })
            }
            Err(e) => {
                master.release();
                Err(ExecError::launch(
                    BACKEND,
                    format!("failed to start ssh session: {}", e),
                ))
            }
        }
    }

    /// Arguments of the session invocation for `cmd` over `socket`. The
    /// remote side records its PID in `pid_file` before running `cmd`.
    pub fn session_args(
        &self,
        socket: &Path,
        pid_file: &str,
        cmd: &Command,
    ) -> Result<Vec<String>, ExecError> {
        let mut args = self.config.base_args();
        args.extend([
            "-S".to_string(),
            socket.display().to_string(),
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-T".to_string(),
        ]);
        for entry in cmd.env() {
            let (key, value) = parse_env_entry(BACKEND, entry)?;
            args.push("-o".to_string());
            args.push(format!("SetEnv={}=\"{}\"", key, escape_option_value(&value)));
        }
        args.push(self.config.destination());
        args.push(format!(
            "echo $$ > {}; exec {}",
            shell_quote(pid_file),
            self.remote_command(cmd)
        ));
        Ok(args)
    }

    /// The single string the remote shell receives.
    pub fn remote_command(&self, cmd: &Command) -> String {
        match cmd.body() {
            Body::Exec { .. } => cmd.render(),
            Body::Script { body, .. } => {
                format!("{} {}", self.config.subcommand.join(" "), shell_quote(body))
            }
        }
    }
}

fn escape_option_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}


// ---------------------------------------------------------------------------
// ControlMaster
// ---------------------------------------------------------------------------

/// A background master connection and the directory holding its socket.
#[derive(Debug)]
struct ControlMaster {
    program: PathBuf,
    base_args: Vec<String>,
    destination: String,
    dir: TempDir,
    socket: PathBuf,
    pid_file: String,
}

impl ControlMaster {
    fn dial(config: &SshConfig) -> Result<ControlMaster, ExecError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("rk-ssh-");
        let dir = match config.control_dir {
            Some(ref parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| ExecError::launch(BACKEND, format!("control directory: {}", e)))?;
        let socket = dir.path().join("ctl");
        let pid_file = format!(
            "{}/{}.pid",
            config.pid_dir.trim_end_matches('/'),
            dir.path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "rk-ssh".to_string())
        );

        let master = ControlMaster {
            program: config.program.clone(),
            base_args: config.base_args(),
            destination: config.destination(),
            dir,
            socket,
            pid_file,
        };

        let mut args = master.base_args.clone();
        args.extend([
            "-M".to_string(),
            "-N".to_string(),
            "-f".to_string(),
            "-S".to_string(),
            master.socket.display().to_string(),
            master.destination.clone(),
        ]);
        debug!(destination = %master.destination, "dialing ssh control master");

        // The backgrounded master may keep inherited descriptors open, so
        // stderr goes to a file rather than a pipe we would wait on.
        let outcome = tempfile::tempfile().and_then(|mut errfile| {
            let status = OsCommand::new(&master.program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::from(errfile.try_clone()?))
                .status()?;
            let stderr = read_file(&mut errfile)?;
            Ok((status, stderr))
        });

        match outcome {
            Ok((status, _)) if status.success() => Ok(master),
            Ok((status, stderr)) => {
                let reason = format!(
                    "dial {} failed ({}): {}",
                    master.destination,
                    status,
                    stderr.trim()
                );
                master.release();
                Err(ExecError::launch(BACKEND, reason))
            }
            Err(e) => {
                let reason = format!(
                    "failed to run {}: {}",
                    master.program.display(),
                    e
                );
                master.release();
                Err(ExecError::launch(BACKEND, reason))
            }
        }
    }

    fn socket(&self) -> &Path {
        &self.socket
    }

    fn pid_file(&self) -> &str {
        &self.pid_file
    }

    /// Run `remote` as a short extra session over the master.
    fn run(&self, remote: &str) -> Result<(), String> {
        let mut args = self.base_args.clone();
        args.extend([
            "-S".to_string(),
            self.socket.display().to_string(),
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-T".to_string(),
            self.destination.clone(),
            remote.to_string(),
        ]);
        let output = OsCommand::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.program.display(), e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "'{}' failed ({}): {}",
                remote,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    /// Deliver `signal` to the remote process named in the PID file. The
    /// file may lag the session start, so it is polled first.
    fn signal_remote(&self, signal: Signal) -> Result<(), String> {
        let name = signal.name().trim_start_matches("SIG");
        let pid_file = shell_quote(&self.pid_file);
        let remote = format!(
            "i=0; while [ ! -s {f} ] && [ $i -lt {polls} ]; do sleep 0.1; i=$((i+1)); done; \
             kill -{sig} \"$(cat {f})\"",
            f = pid_file,
            polls = PID_FILE_POLLS,
            sig = name,
        );
        debug!(destination = %self.destination, signal = %signal, "signalling remote process");
        self.run(&remote)
    }

    /// Ask the master to exit and remove the socket directory.
    fn close(self) -> Result<(), String> {
        let mut args = self.base_args.clone();
        args.extend([
            "-S".to_string(),
            self.socket.display().to_string(),
            "-O".to_string(),
            "exit".to_string(),
            self.destination.clone(),
        ]);
        let exit = OsCommand::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let mut problems = Vec::new();
        match exit {
            Ok(status) if status.success() => {}
            Ok(status) => problems.push(format!("control master exit: {}", status)),
            Err(e) => problems.push(format!("control master exit: {}", e)),
        }
        if let Err(e) = self.dir.close() {
            problems.push(format!("removing control directory: {}", e));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    /// Close, logging instead of reporting failures.
    fn release(self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "ssh control master cleanup failed");
        }
    }
}

fn read_file(file: &mut File) -> io::Result<String> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}


// ---------------------------------------------------------------------------
// SshProcess
// ---------------------------------------------------------------------------

/// One remote command: the local `ssh` client session plus its master.
#[derive(Debug)]
pub struct SshProcess {
    child: SpawnedChild,
    master: Option<ControlMaster>,
    result: Option<ExecResult>,
}

impl SshProcess {
    /// Remove the remote PID file and close the master. Runs once.
    fn finish(&mut self) -> Result<(), String> {
        let master = match self.master.take() {
            Some(master) => master,
            None => return Ok(()),
        };
        let mut problems = Vec::new();
        let cleanup = format!("rm -f {}", shell_quote(master.pid_file()));
        if let Err(e) = master.run(&cleanup) {
            problems.push(format!("removing remote pid file: {}", e));
        }
        if let Err(e) = master.close() {
            problems.push(e);
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

impl Process for SshProcess {
    fn backend(&self) -> BackendKind {
        BACKEND
    }

    fn state(&self) -> ProcessState {
        self.child.state()
    }

    fn kill(&mut self) -> Result<(), ExecError> {
        if self.child.has_exited() {
            return Ok(());
        }
        if let Some(ref master) = self.master {
            if let Err(e) = master.signal_remote(Signal::Kill) {
                warn!(error = %e, "remote kill failed, stopping the local client only");
            }
        }
        self.child.kill()
    }

    /// Sent to the remote process. Without a master (after `close`) only
    /// the local client can be reached.
    fn signal(&mut self, signal: Signal) -> Result<(), ExecError> {
        if self.child.has_exited() {
            return Ok(());
        }
        match self.master {
            Some(ref master) => master
                .signal_remote(signal)
                .map_err(|e| ExecError::Io(io::Error::new(io::ErrorKind::Other, e))),
            None => self.child.signal(signal),
        }
    }

    fn write(&mut self, text: &str) -> Result<(), ExecError> {
        self.child.write(text)
    }

    /// Exit status 255 means the client itself failed; it is reported as
    /// an ordinary exit code.
    fn result(&mut self) -> Result<ExecResult, ExecError> {
        if let Some(ref result) = self.result {
            return Ok(result.clone());
        }
        let mut result = self.child.collect()?;
        if let Err(e) = self.finish() {
            warn!(error = %e, "ssh release failed after result");
            result.release_error = Some(e);
        }
        self.result = Some(result.clone());
        Ok(result)
    }

    fn close(&mut self) -> Result<(), ExecError> {
        self.child.close_stdin();
        if let Err(e) = self.finish() {
            warn!(error = %e, "ssh control master cleanup failed");
        }
        Ok(())
    }
}

impl Drop for SshProcess {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(error = %e, "ssh control master cleanup failed on drop");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::thread;
    use std::time::Duration;

    /// A stand-in for the ssh client: logs every invocation, succeeds on
    /// dial (`-M`) and close (`-O`), and runs the last argument with `sh -c`
    /// for sessions.
    struct FakeSsh {
        dir: TempDir,
        program: PathBuf,
        log: PathBuf,
        control: PathBuf,
    }

    impl FakeSsh {
        fn new() -> FakeSsh {
            Self::with_dial("exit 0")
        }

        fn with_dial(dial: &str) -> FakeSsh {
            let dir = tempfile::tempdir().unwrap();
            let program = dir.path().join("ssh");
            let log = dir.path().join("calls.log");
            let control = dir.path().join("control");
            fs::create_dir(&control).unwrap();
            let script = format!(
                "#!/bin/sh\n\
                 echo \"$*\" >> '{log}'\n\
                 for arg in \"$@\"; do\n\
                 \x20 case \"$arg\" in -M) {dial} ;; -O) exit 0 ;; esac\n\
                 done\n\
                 for last in \"$@\"; do :; done\n\
                 exec sh -c \"$last\"\n",
                log = log.display(),
                dial = dial,
            );
            fs::write(&program, script).unwrap();
            fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
            FakeSsh { dir, program, log, control }
        }

        fn config(&self) -> SshConfig {
            SshConfig {
                user: Some("deploy".into()),
                program: self.program.clone(),
                control_dir: Some(self.control.clone()),
                pid_dir: self.dir.path().display().to_string(),
                ..SshConfig::new("build-01")
            }
        }

        fn pid_files_left(&self) -> usize {
            fs::read_dir(self.dir.path())
                .unwrap()
                .filter(|e| {
                    e.as_ref()
                        .map(|e| e.file_name().to_string_lossy().ends_with(".pid"))
                        .unwrap_or(false)
                })
                .count()
        }

        fn wait_for(&self, name: &str) {
            let path = self.dir.path().join(name);
            for _ in 0..500 {
                if path.exists() {
                    return;
                }
                thread::sleep(Duration::from_millis(10));
            }
            panic!("{} never appeared", name);
        }

        fn executor(&self) -> SshExecutor {
            SshExecutor::new(self.config()).unwrap()
        }

        fn calls(&self) -> Vec<String> {
            fs::read_to_string(&self.log)
                .unwrap_or_default()
                .lines()
                .map(String::from)
                .collect()
        }

        fn control_dirs_left(&self) -> usize {
            fs::read_dir(&self.control).unwrap().count()
        }
    }

    #[test]
    fn base_args_include_port_key_and_options() {
        let mut cfg = SshConfig::new("10.0.0.1");
        cfg.port = 2222;
        cfg.identity_file = Some(PathBuf::from("/keys/id"));
        cfg.options = vec!["StrictHostKeyChecking=no".into()];
        let args = cfg.base_args();
        assert_eq!(
            args,
            vec![
                "-p", "2222", "-o", "ConnectTimeout=10", "-i", "/keys/id", "-o",
                "StrictHostKeyChecking=no",
            ]
        );
        assert_eq!(cfg.destination(), "10.0.0.1");
        cfg.user = Some("ubuntu".into());
        assert_eq!(cfg.destination(), "ubuntu@10.0.0.1");
    }

    #[test]
    fn session_args_carry_env_and_remote_command() {
        let exec = SshExecutor::new(SshConfig::new("host")).unwrap();
        let cmd = Command::new("ls")
            .with_args(["-l", "/tmp"])
            .with_env(["A=1", "MSG=say \"hi\""]);
        let args = exec
            .session_args(Path::new("/s/ctl"), "/run/rk 1.pid", &cmd)
            .unwrap();
        let tail: Vec<&str> = args.iter().skip(4).map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "-S", "/s/ctl", "-o", "ControlMaster=no", "-T", "-o", "SetEnv=A=\"1\"",
                "-o", "SetEnv=MSG=\"say \\\"hi\\\"\"", "host",
                "echo $$ > '/run/rk 1.pid'; exec ls -l /tmp",
            ]
        );
    }

    #[test]
    fn each_env_entry_is_validated() {
        let exec = SshExecutor::new(SshConfig::new("host")).unwrap();
        let cmd = Command::new("true").with_env(["GOOD=1", "bad"]);
        let err = exec.session_args(Path::new("/s"), "/tmp/x.pid", &cmd).unwrap_err();
        assert!(matches!(err, ExecError::Launch { backend: BACKEND, .. }));
    }

    #[test]
    fn script_remote_command_is_quoted() {
        let exec = SshExecutor::new(SshConfig::new("host")).unwrap();
        let cmd = Command::script("s", "echo 'a b'; exit 3");
        assert_eq!(exec.remote_command(&cmd), "sh -c 'echo '\\''a b'\\''; exit 3'");
    }

    #[test]
    fn config_rejects_working_dir_and_empty_fields() {
        let mut cfg = SshConfig::new("host");
        cfg.working_dir = Some(PathBuf::from("/srv"));
        assert!(matches!(SshExecutor::new(cfg).unwrap_err(), ExecError::Config(_)));

        let mut cfg = SshConfig::new("host");
        cfg.subcommand.clear();
        assert!(matches!(SshExecutor::new(cfg).unwrap_err(), ExecError::Config(_)));

        assert!(matches!(
            SshExecutor::new(SshConfig::new(" ")).unwrap_err(),
            ExecError::Config(_)
        ));
    }

    #[test]
    fn script_exit_code_seven() {
        let fake = FakeSsh::new();
        let mut process = fake.executor().spawn(&Command::script("s", "echo hi; exit 7")).unwrap();
        let result = process.result().unwrap();
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.exit_code, 7);
        assert_eq!(result.release_error, None);
    }

    #[test]
    fn lifecycle_dials_runs_and_closes() {
        let fake = FakeSsh::new();
        let mut process = fake
            .executor()
            .spawn(&Command::new("echo").with_arg("remote"))
            .unwrap();
        assert_eq!(fake.control_dirs_left(), 1);
        assert_eq!(process.result().unwrap().stdout, "remote\n");

        let calls = fake.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].contains("-M -N -f -S"));
        assert!(calls[0].ends_with("deploy@build-01"));
        assert!(calls[1].contains("ControlMaster=no -T deploy@build-01 echo $$ > "));
        assert!(calls[1].ends_with("; exec echo remote"));
        assert!(calls[2].contains("rm -f "));
        assert!(calls[3].contains("-O exit deploy@build-01"));
        assert_eq!(fake.control_dirs_left(), 0);
        assert_eq!(fake.pid_files_left(), 0);
    }

    #[test]
    fn interleaved_streams_are_separated() {
        let fake = FakeSsh::new();
        let mut process = fake
            .executor()
            .spawn(&Command::script("mix", "echo a; echo b >&2; echo c"))
            .unwrap();
        let result = process.result().unwrap();
        assert_eq!(result.stdout, "a\nc\n");
        assert_eq!(result.stderr, "b\n");
    }

    #[test]
    fn stdin_reaches_remote_command() {
        let fake = FakeSsh::new();
        let mut process = fake
            .executor()
            .spawn(&Command::script("read", "read x; echo got:$x"))
            .unwrap();
        process.write("ping\n").unwrap();
        assert_eq!(process.result().unwrap().stdout, "got:ping\n");
    }

    #[test]
    fn dial_failure_is_launch_error_and_cleans_up() {
        let fake = FakeSsh::with_dial("echo 'connection refused' >&2; exit 255");
        let err = fake.executor().spawn(&Command::new("true")).unwrap_err();
        match err {
            ExecError::Launch { backend, reason } => {
                assert_eq!(backend, BACKEND);
                assert!(reason.contains("connection refused"), "{}", reason);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(fake.control_dirs_left(), 0);
    }

    #[test]
    fn bad_env_after_dial_closes_master() {
        let fake = FakeSsh::new();
        let cmd = Command::new("true").with_env(["NOEQUALS"]);
        assert!(fake.executor().spawn(&cmd).is_err());
        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("-O exit"));
        assert_eq!(fake.control_dirs_left(), 0);
    }

    #[test]
    fn missing_client_binary_is_launch_error() {
        let fake = FakeSsh::new();
        let mut cfg = fake.config();
        cfg.program = fake.dir.path().join("no-such-ssh");
        let err = SshExecutor::new(cfg).unwrap().spawn(&Command::new("true")).unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }));
        assert_eq!(fake.control_dirs_left(), 0);
    }

    #[test]
    fn kill_stops_the_client() {
        let fake = FakeSsh::new();
        let mut process = fake
            .executor()
            .spawn(&Command::new("sleep").with_arg("30"))
            .unwrap();
        process.kill().unwrap();
        let result = process.result().unwrap();
        assert_eq!(result.signal, Some(libc::SIGKILL));
        assert!(fake.calls().iter().any(|c| c.contains("kill -KILL")));
        assert_eq!(fake.control_dirs_left(), 0);
    }

    #[test]
    fn signal_reaches_the_remote_process() {
        let fake = FakeSsh::new();
        let ready = fake.dir.path().join("ready");
        let script = format!(
            "trap 'echo got-term; exit 0' TERM; echo up > '{}'; while :; do sleep 0.1; done",
            ready.display()
        );
        let mut process = fake
            .executor()
            .spawn(&Command::script("wait", &script))
            .unwrap();
        fake.wait_for("ready");
        process.signal(Signal::Terminate).unwrap();

        let result = process.result().unwrap();
        // the remote trap ran, so the client exited normally
        assert_eq!(result.stdout, "got-term\n");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.signal, None);
        assert!(fake.calls().iter().any(|c| c.contains("kill -TERM")));
        assert_eq!(fake.pid_files_left(), 0);
    }

    #[test]
    fn signal_after_exit_is_a_no_op() {
        let fake = FakeSsh::new();
        let mut process = fake.executor().spawn(&Command::new("true")).unwrap();
        process.result().unwrap();
        let before = fake.calls().len();
        process.signal(Signal::Interrupt).unwrap();
        process.kill().unwrap();
        assert_eq!(fake.calls().len(), before);
    }

    #[test]
    fn unreadable_dial_stderr_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("err");
        fs::write(&path, "x").unwrap();
        // write-only handle: reading it back fails
        let mut file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        assert!(read_file(&mut file).is_err());
    }

    #[test]
    fn write_after_exit_is_stdin_closed() {
        let fake = FakeSsh::new();
        let mut process = fake.executor().spawn(&Command::new("true")).unwrap();
        for _ in 0..500 {
            if process.state() != ProcessState::Running {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let err = process.write("late").unwrap_err();
        assert!(matches!(err, ExecError::StdinClosed(_)));
    }

    #[test]
    fn drop_releases_master() {
        let fake = FakeSsh::new();
        let process = fake.executor().spawn(&Command::new("true")).unwrap();
        assert_eq!(fake.control_dirs_left(), 1);
        drop(process);
        assert_eq!(fake.control_dirs_left(), 0);
        assert!(fake.calls().iter().any(|c| c.contains("-O exit")));
    }

    #[test]
    fn config_from_yaml_uses_defaults() {
        let cfg: SshConfig = serde_yaml::from_str("host: gpu-box\nuser: ml\n").unwrap();
        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.program, PathBuf::from("ssh"));
        assert_eq!(cfg.subcommand, vec!["sh", "-c"]);
        assert_eq!(cfg.pid_dir, "/tmp");
        assert!(serde_yaml::from_str::<SshConfig>("host: a\nbogus: 1\n").is_err());
    }
}
