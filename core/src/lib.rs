//! runkit: describe a command or script once, run it locally, over ssh, or
//! inside a container through one process lifecycle, and read typed results
//! back out of its output.
//!
//! ```no_run
//! use runkit_core::backend::{Executor, LocalConfig};
//! use runkit_core::command::Command;
//! use runkit_core::process::Process;
//!
//! # fn main() -> Result<(), runkit_core::ExecError> {
//! let executor = Executor::local(LocalConfig::default())?;
//! let cmd = Command::script("greet", "echo '::set-output name=who::{{ .who }}'")
//!     .with_field("who", "world");
//! let mut process = cmd.compile_exec(&executor)?;
//! let result = process.result()?;
//! assert!(result.output().evaluate("who == world")?);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod eval;
pub mod output;
pub mod process;

pub use error::ExecError;
