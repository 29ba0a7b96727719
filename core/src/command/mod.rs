//! Command model: the description of what to run.
//!
//! A `Command` is either a program with arguments or a script body, together
//! with substitution data for the templater, environment entries for the
//! spawned process, and a `Formatter` for backends that need one string.
//! Builder methods consume and return the value so calls chain.

pub mod format;
pub mod template;

use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

use crate::backend::Executor;
use crate::error::ExecError;
use crate::process::ProcessHandle;

pub use format::{shell_quote, Formatter};
pub use template::{BraceTemplater, Templater};


// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// What the command actually executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// A program path and its ordered arguments.
    Exec { program: String, args: Vec<String> },
    /// A multi-line script handed to an interpreter subcommand.
    Script { name: String, body: String },
}


// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Command {
    body: Body,
    data: Map<String, Value>,
    env: Vec<String>,
    formatter: Formatter,
}

impl Command {
    /// A program to execute directly. Arguments are added with `with_arg`.
    pub fn new(program: &str) -> Self {
        Command {
            body: Body::Exec {
                program: program.to_string(),
                args: Vec::new(),
            },
            data: Map::new(),
            env: Vec::new(),
            formatter: Formatter::SpaceSeparated,
        }
    }

    /// A named script body, run through the backend's interpreter subcommand.
    pub fn script(name: &str, body: &str) -> Self {
        Command {
            body: Body::Script {
                name: name.to_string(),
                body: body.to_string(),
            },
            data: Map::new(),
            env: Vec::new(),
            formatter: Formatter::SpaceSeparated,
        }
    }

    /// A script whose body is read from `path`.
    pub fn script_from_file(name: &str, path: &Path) -> Result<Self, ExecError> {
        let body = std::fs::read_to_string(path)?;
        Ok(Self::script(name, &body))
    }

    /// A script whose body is the response to a GET of `url`. Any status
    /// outside 2xx is an error.
    #[cfg(feature = "http")]
    pub fn script_from_url(name: &str, url: &str) -> Result<Self, ExecError> {
        let fetch_error = |reason: String| ExecError::Fetch {
            url: url.to_string(),
            reason,
        };
        let mut response = ureq::get(url)
            .call()
            .map_err(|e| fetch_error(e.to_string()))?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| fetch_error(format!("reading body: {}", e)))?;
        Ok(Self::script(name, &body))
    }

    // --- builders ---

    /// Append one argument. A script takes no arguments, so the call is
    /// dropped with a warning.
    pub fn with_arg(mut self, arg: &str) -> Self {
        match &mut self.body {
            Body::Exec { args, .. } => args.push(arg.to_string()),
            Body::Script { name, .. } => {
                warn!(script = %name, arg, "argument ignored for script command");
            }
        }
        self
    }

    pub fn with_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter()
            .fold(self, |cmd, arg| cmd.with_arg(arg.as_ref()))
    }

    /// Set one substitution field, overwriting any existing value.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Merge a map of fields. Existing keys are replaced only when
    /// `overwrite` is set.
    pub fn with_fields(mut self, fields: Map<String, Value>, overwrite: bool) -> Self {
        for (key, value) in fields {
            if overwrite || !self.data.contains_key(&key) {
                self.data.insert(key, value);
            }
        }
        self
    }

    /// Merge a map of fields, always overwriting.
    pub fn with_data(self, fields: Map<String, Value>) -> Self {
        self.with_fields(fields, true)
    }

    /// Append `KEY=VALUE` entries for the spawned process. They never appear
    /// in the rendered command text.
    pub fn with_env<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Append every variable of the calling process's environment.
    ///
    /// This forwards whatever the caller holds (tokens, credentials) to the
    /// target, including remote hosts and containers.
    pub fn with_local_env(self) -> Self {
        let vars: Vec<String> = std::env::vars_os()
            .map(|(k, v)| format!("{}={}", k.to_string_lossy(), v.to_string_lossy()))
            .collect();
        self.with_env(vars)
    }

    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    // --- accessors ---

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The argv (program first) or, for a script, the single body element.
    pub fn raw(&self) -> Vec<String> {
        match &self.body {
            Body::Exec { program, args } => {
                let mut raw = Vec::with_capacity(args.len() + 1);
                raw.push(program.clone());
                raw.extend(args.iter().cloned());
                raw
            }
            Body::Script { body, .. } => vec![body.clone()],
        }
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn env(&self) -> &[String] {
        &self.env
    }

    pub fn formatter(&self) -> &Formatter {
        &self.formatter
    }

    pub fn is_script(&self) -> bool {
        matches!(self.body, Body::Script { .. })
    }

    /// The single display string: the formatted argv, or the script body.
    pub fn render(&self) -> String {
        match &self.body {
            Body::Exec { .. } => self.formatter.format(&self.raw()),
            Body::Script { body, .. } => body.clone(),
        }
    }

    // --- compilation ---

    /// Compile with the strict `BraceTemplater`.
    pub fn compile(&self) -> Result<Command, ExecError> {
        self.compile_with(&BraceTemplater::default())
    }

    /// Render every template through `templater`. The returned command is
    /// fully literal and carries no substitution data.
    pub fn compile_with(&self, templater: &dyn Templater) -> Result<Command, ExecError> {
        let body = match &self.body {
            Body::Exec { program, args } => Body::Exec {
                program: templater.render(program, &self.data)?,
                args: args
                    .iter()
                    .map(|arg| templater.render(arg, &self.data))
                    .collect::<Result<Vec<_>, _>>()?,
            },
            Body::Script { name, body } => Body::Script {
                name: name.clone(),
                body: templater.render(body, &self.data)?,
            },
        };
        Ok(Command {
            body,
            data: Map::new(),
            env: self.env.clone(),
            formatter: self.formatter.clone(),
        })
    }

    /// Like `compile`, for commands whose templates are fixed at build time.
    ///
    /// # Panics
    ///
    /// Panics when any template fails to parse or render.
    pub fn must_compile(&self) -> Command {
        match self.compile() {
            Ok(cmd) => cmd,
            Err(e) => panic!("command '{}' failed to compile: {}", self.render(), e),
        }
    }

    /// Compile and return the display string without keeping the result.
    pub fn compile_dry_run(&self) -> Result<String, ExecError> {
        Ok(self.compile()?.render())
    }

    // --- execution ---

    /// Start this command as-is on `executor`.
    pub fn exec(&self, executor: &Executor) -> Result<ProcessHandle, ExecError> {
        executor.exec(self)
    }

    /// Compile with the default templater, then start on `executor`.
    pub fn compile_exec(&self, executor: &Executor) -> Result<ProcessHandle, ExecError> {
        self.compile()?.exec(executor)
    }
}
