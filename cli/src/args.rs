//! Argument parsing for `rk`.

use std::path::PathBuf;

use serde_json::Value;


pub const USAGE: &str = "\
Usage:
  rk run [options] -- <program> [args...]
  rk run [options] --script <file>
  rk outputs            parse ::set-output lines from stdin, print JSON
  rk help

Run options:
  --backend <local|ssh|container>   adapter to use (default: local)
  --config <file>                   executor YAML; overrides --backend
  --host <[user@]host>              target for --backend ssh
  --container <id>                  target for --backend container
  --field <key=value>               substitution data; JSON values are parsed
  --env <KEY=VALUE>                 environment entry for the process
  --local-env                       forward this shell's whole environment
  --workdir <dir>                   working directory (local, container)
  --expect <expression>             require the expression to hold on the outputs
  --json                            print the result as JSON

Logging goes to stderr; set RK_LOG (e.g. RK_LOG=debug) to change the level.";


#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    #[default]
    Local,
    Ssh,
    Container,
}

/// What `rk run` executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Argv(Vec<String>),
    Script(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub backend: BackendChoice,
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub container: Option<String>,
    pub fields: Vec<(String, Value)>,
    pub env: Vec<String>,
    pub local_env: bool,
    pub workdir: Option<PathBuf>,
    pub expect: Option<String>,
    pub json: bool,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Run(RunOptions),
    Outputs,
    Help,
}


/// Parse arguments without the program name.
pub fn parse_args(args: &[&str]) -> Result<Invocation, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'rk help' for usage.".into());
    }
    match args[0] {
        "run" => parse_run(&args[1..]),
        "outputs" => {
            if args.len() > 1 {
                return Err("Usage: rk outputs < file".into());
            }
            Ok(Invocation::Outputs)
        }
        "help" | "--help" | "-h" => Ok(Invocation::Help),
        other => Err(format!("Unknown command: '{}'", other)),
    }
}


// ---------------------------------------------------------------------------
// rk run
// ---------------------------------------------------------------------------

fn parse_run(args: &[&str]) -> Result<Invocation, String> {
    let mut backend = BackendChoice::Local;
    let mut config = None;
    let mut host = None;
    let mut container = None;
    let mut fields = Vec::new();
    let mut env = Vec::new();
    let mut local_env = false;
    let mut workdir = None;
    let mut expect = None;
    let mut json = false;
    let mut script = None;
    let mut argv: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--" => {
                argv = args[i + 1..].iter().map(|s| s.to_string()).collect();
                break;
            }
            "--backend" => {
                i += 1;
                backend = parse_backend(&take_arg(args, i, "--backend")?)?;
            }
            "--config" => {
                i += 1;
                config = Some(PathBuf::from(take_arg(args, i, "--config")?));
            }
            "--host" => {
                i += 1;
                host = Some(take_arg(args, i, "--host")?);
            }
            "--container" => {
                i += 1;
                container = Some(take_arg(args, i, "--container")?);
            }
            "--field" => {
                i += 1;
                fields.push(parse_field(&take_arg(args, i, "--field")?)?);
            }
            "--env" => {
                i += 1;
                env.push(take_arg(args, i, "--env")?);
            }
            "--local-env" => local_env = true,
            "--workdir" => {
                i += 1;
                workdir = Some(PathBuf::from(take_arg(args, i, "--workdir")?));
            }
            "--expect" => {
                i += 1;
                expect = Some(take_arg(args, i, "--expect")?);
            }
            "--json" => json = true,
            "--script" => {
                i += 1;
                script = Some(PathBuf::from(take_arg(args, i, "--script")?));
            }
            other if other.starts_with("--") => {
                return Err(format!("Unknown option for run: '{}'", other));
            }
            other => {
                return Err(format!(
                    "Unexpected argument '{}'; put the command after '--'",
                    other
                ));
            }
        }
        i += 1;
    }

    let target = match (script, argv.is_empty()) {
        (Some(_), false) => return Err("Use either --script or '-- <program>', not both".into()),
        (Some(path), true) => Target::Script(path),
        (None, false) => Target::Argv(argv),
        (None, true) => {
            return Err("Usage: rk run [options] -- <program> [args...] | --script <file>".into())
        }
    };

    Ok(Invocation::Run(RunOptions {
        backend,
        config,
        host,
        container,
        fields,
        env,
        local_env,
        workdir,
        expect,
        json,
        target,
    }))
}

fn parse_backend(name: &str) -> Result<BackendChoice, String> {
    match name {
        "local" => Ok(BackendChoice::Local),
        "ssh" | "secure-shell" => Ok(BackendChoice::Ssh),
        "container" | "docker" => Ok(BackendChoice::Container),
        other => Err(format!("Unknown backend: '{}'", other)),
    }
}

/// `key=value`; the value is JSON when it parses as JSON, else a string.
fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("--field expects key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("--field has an empty key: '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn take_arg(args: &[&str], index: usize, flag: &str) -> Result<String, String> {
    if index >= args.len() {
        return Err(format!("{} requires a value", flag));
    }
    Ok(args[index].into())
}
