//! What a finished process leaves behind.

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::output::Output;


/// Captured streams, exit status and timing of one finished process.
///
/// The time metrics come from the process itself and do not include time
/// spent in this crate after the process exited.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit status, or -1 when a local process was ended by a signal.
    pub exit_code: i32,
    /// Signal number that ended the process, when there was one.
    pub signal: Option<i32>,
    /// Wall-clock time from spawn to exit.
    #[serde(serialize_with = "as_secs")]
    pub execution_time: Duration,
    #[serde(serialize_with = "as_secs")]
    pub system_time: Duration,
    #[serde(serialize_with = "as_secs")]
    pub user_time: Duration,
    /// A cleanup step that failed after the result was already collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_error: Option<String>,
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Annotations found on stdout.
    pub fn output(&self) -> Output {
        Output::parse(&self.stdout)
    }

    /// Annotations found on stderr.
    pub fn error_output(&self) -> Output {
        Output::parse(&self.stderr)
    }

    /// Annotations from both streams; stdout wins on a name collision.
    pub fn combined_output(&self) -> Output {
        Output::combined(&self.stdout, &self.stderr)
    }
}
