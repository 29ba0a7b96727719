//! rk: run a command or script through a runkit backend.
//!
//! # Usage
//!
//! ```text
//! rk run -- uname -a
//! rk run --backend ssh --host deploy@build-01 --script deploy.sh
//! rk run --field who=world --expect 'who == world' -- sh -c 'echo ::set-output name=who::{{ .who }}'
//! rk outputs < build.log
//! ```
//!
//! Exit status: the process's own exit code, 1 when `--expect` does not
//! hold, 2 for usage, configuration and launch errors.

mod args;

use std::io::Read;
use std::process;

use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use args::{parse_args, BackendChoice, Invocation, RunOptions, Target, USAGE};
use runkit_core::backend::{ContainerConfig, Executor, LocalConfig, SshConfig};
use runkit_core::command::Command;
use runkit_core::config::ExecutorConfig;
use runkit_core::output::Output;
use runkit_core::process::{ExecResult, Process};
use runkit_core::ExecError;

const EXIT_EXPECTATION: i32 = 1;
const EXIT_USAGE: i32 = 2;


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args[1..].iter().map(|s| s.as_str()).collect();

    let invocation = match parse_args(&arg_refs) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("rk: {}", e);
            process::exit(EXIT_USAGE);
        }
    };

    let code = match invocation {
        Invocation::Help => {
            println!("{}", USAGE);
            0
        }
        Invocation::Outputs => outputs(),
        Invocation::Run(opts) => match run(&opts) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("rk: {}", e);
                EXIT_USAGE
            }
        },
    };
    process::exit(code);
}


/// `rk outputs`: stdin → annotation map as JSON.
fn outputs() -> i32 {
    let mut text = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut text) {
        eprintln!("rk: reading stdin: {}", e);
        return EXIT_USAGE;
    }
    print_json(&json!(Output::parse(&text)));
    0
}


/// `rk run`: build, launch, wait, report.
fn run(opts: &RunOptions) -> Result<i32, ExecError> {
    let executor = build_executor(opts)?;
    let cmd = build_command(opts)?;

    debug!(backend = %executor.backend(), command = %cmd.render(), "launching");
    let mut process = cmd.compile_exec(&executor)?;
    let result = process.result()?;
    debug!(exit_code = result.exit_code, elapsed = ?result.execution_time, "finished");

    let expectation = match opts.expect {
        Some(ref expr) => Some(result.combined_output().evaluate(expr)?),
        None => None,
    };

    if opts.json {
        print_json(&json!({
            "backend": executor.backend(),
            "result": &result,
            "outputs": result.combined_output(),
            "expectation": expectation,
        }));
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        if let Some(ref e) = result.release_error {
            eprintln!("rk: warning: cleanup failed: {}", e);
        }
    }

    if expectation == Some(false) {
        if let Some(ref expr) = opts.expect {
            eprintln!("rk: expectation failed: {}", expr);
        }
        return Ok(EXIT_EXPECTATION);
    }
    Ok(exit_status(&result))
}

fn build_executor(opts: &RunOptions) -> Result<Executor, ExecError> {
    let mut config = match opts.config {
        Some(ref path) => ExecutorConfig::load(path)?,
        None => match opts.backend {
            BackendChoice::Local => ExecutorConfig::Local(LocalConfig::default()),
            BackendChoice::Ssh => {
                let target = opts.host.as_deref().ok_or_else(|| {
                    ExecError::Config("--backend ssh needs --host or --config".into())
                })?;
                ExecutorConfig::Ssh(ssh_target(target))
            }
            BackendChoice::Container => {
                let id = opts.container.as_deref().ok_or_else(|| {
                    ExecError::Config("--backend container needs --container or --config".into())
                })?;
                ExecutorConfig::Container(ContainerConfig::new(id))
            }
        },
    };

    if let Some(ref dir) = opts.workdir {
        match config {
            ExecutorConfig::Local(ref mut c) => c.working_dir = Some(dir.clone()),
            ExecutorConfig::Ssh(ref mut c) => c.working_dir = Some(dir.clone()),
            ExecutorConfig::Container(ref mut c) => {
                c.working_dir = Some(dir.to_string_lossy().into_owned())
            }
        }
    }
    config.build()
}

/// `user@host` or `host`.
fn ssh_target(target: &str) -> SshConfig {
    match target.split_once('@') {
        Some((user, host)) => SshConfig {
            user: Some(user.to_string()),
            ..SshConfig::new(host)
        },
        None => SshConfig::new(target),
    }
}

fn build_command(opts: &RunOptions) -> Result<Command, ExecError> {
    let mut cmd = match opts.target {
        Target::Argv(ref argv) => Command::new(&argv[0]).with_args(&argv[1..]),
        Target::Script(ref path) => {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "script".to_string());
            Command::script_from_file(&name, path)?
        }
    };
    for (key, value) in &opts.fields {
        cmd = cmd.with_field(key, value.clone());
    }
    cmd = cmd.with_env(opts.env.iter().cloned());
    if opts.local_env {
        cmd = cmd.with_local_env();
    }
    Ok(cmd)
}

/// Shell convention: 128 + signal for a signal death.
fn exit_status(result: &ExecResult) -> i32 {
    match result.signal {
        Some(sig) => 128 + sig,
        None => result.exit_code,
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("rk: cannot encode JSON: {}", e),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn opts(target: Target) -> RunOptions {
        RunOptions {
            backend: BackendChoice::Local,
            config: None,
            host: None,
            container: None,
            fields: Vec::new(),
            env: Vec::new(),
            local_env: false,
            workdir: None,
            expect: None,
            json: false,
            target,
        }
    }

    #[test]
    fn ssh_target_splits_user() {
        let cfg = ssh_target("deploy@build-01");
        assert_eq!(cfg.user.as_deref(), Some("deploy"));
        assert_eq!(cfg.host, "build-01");
        assert_eq!(ssh_target("box").destination(), "box");
    }

    #[test]
    fn ssh_without_host_is_config_error() {
        let mut o = opts(Target::Argv(vec!["true".into()]));
        o.backend = BackendChoice::Ssh;
        assert!(matches!(build_executor(&o), Err(ExecError::Config(_))));
    }

    #[test]
    fn ssh_rejects_workdir() {
        let mut o = opts(Target::Argv(vec!["true".into()]));
        o.backend = BackendChoice::Ssh;
        o.host = Some("h".into());
        o.workdir = Some(PathBuf::from("/srv"));
        assert!(matches!(build_executor(&o), Err(ExecError::Config(_))));
    }

    #[test]
    fn run_reports_exit_code_and_expectation() {
        let mut o = opts(Target::Argv(vec![
            "sh".into(),
            "-c".into(),
            "echo ::set-output name=who::{{ .who }}; exit 7".into(),
        ]));
        o.fields = vec![("who".into(), serde_json::json!("world"))];
        assert_eq!(run(&o).unwrap(), 7);

        o.expect = Some("who == world".into());
        assert_eq!(run(&o).unwrap(), 7);

        o.expect = Some("who == nobody".into());
        assert_eq!(run(&o).unwrap(), EXIT_EXPECTATION);
    }

    #[test]
    fn run_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.sh");
        std::fs::write(&path, "echo ::set-output name=n type=int::{{ .n }}\n").unwrap();
        let mut o = opts(Target::Script(path));
        o.fields = vec![("n".into(), serde_json::json!(4))];
        o.expect = Some("n > 3".into());
        assert_eq!(run(&o).unwrap(), 0);
    }

    #[test]
    fn missing_template_field_is_an_error() {
        let o = opts(Target::Argv(vec!["echo".into(), "{{ .absent }}".into()]));
        assert!(matches!(run(&o), Err(ExecError::TemplateRender(_))));
    }

    #[test]
    fn signal_exit_status() {
        let result = ExecResult {
            exit_code: -1,
            signal: Some(9),
            ..ExecResult::default()
        };
        assert_eq!(exit_status(&result), 137);
    }
}
