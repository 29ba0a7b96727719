//! Error type shared by every layer of the crate.

use thiserror::Error;

use crate::process::BackendKind;

/// Every failure the execution layer can report to a caller.
///
/// A non-zero exit status is never an error; it is reported through
/// `ExecResult::exit_code`.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The templating collaborator could not parse a template.
    #[error("template parse error: {0}")]
    TemplateParse(String),

    /// A parsed template failed to render against the substitution data.
    #[error("template render error: {0}")]
    TemplateRender(String),

    /// A backend could not start a process. Nothing opened during the
    /// attempt is left behind.
    #[error("{backend} launch failed: {reason}")]
    Launch { backend: BackendKind, reason: String },

    /// The operation has no meaning for the backend.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },

    /// Standard input cannot be written (process exited or stream gone).
    #[error("stdin is closed: {0}")]
    StdinClosed(String),

    /// The transport failed while waiting for the process to finish.
    #[error("wait failed: {0}")]
    Wait(String),

    /// The expression is not syntactically valid.
    #[error("expression '{expression}' failed to compile: {reason}")]
    ExpressionCompile { expression: String, reason: String },

    /// Evaluating the expression failed (unknown identifier, bad operand).
    #[error("expression '{expression}' failed to evaluate: {reason}")]
    ExpressionEval { expression: String, reason: String },

    /// The expression evaluated to something other than a boolean.
    #[error("expression '{expression}' produced a non-boolean value: {found}")]
    NonBooleanResult { expression: String, found: String },

    /// A script body could not be downloaded.
    #[error("fetching {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    /// Adapter or file configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    pub(crate) fn launch(backend: BackendKind, reason: impl Into<String>) -> Self {
        ExecError::Launch {
            backend,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(backend: BackendKind, operation: &'static str) -> Self {
        ExecError::Unsupported { backend, operation }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_error_names_backend() {
        let err = ExecError::launch(BackendKind::SecureShell, "dial refused");
        assert_eq!(err.to_string(), "secure-shell launch failed: dial refused");
    }

    #[test]
    fn unsupported_error_names_operation() {
        let err = ExecError::unsupported(BackendKind::Container, "kill");
        assert_eq!(
            err.to_string(),
            "kill is not supported by the container backend"
        );
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ExecError = io.into();
        assert!(matches!(err, ExecError::Io(_)));
    }
}
