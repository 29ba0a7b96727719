//! Rendering policies that turn an argv into a single command string.
//!
//! Only backends that must ship a command as one string (secure shell) use
//! these. Local and container execution pass the argv through untouched.

use std::fmt;


// ---------------------------------------------------------------------------
// Formatter
// ---------------------------------------------------------------------------

/// A pure function from the raw argv (program followed by its arguments) to a
/// display string.
#[derive(Clone)]
pub enum Formatter {
    /// Join with single spaces. An argument containing spaces becomes
    /// indistinguishable from two arguments.
    SpaceSeparated,
    /// Join with spaces, wrapping any argument containing a space in the
    /// given quotes.
    QuoteIfSpace { open: String, close: String },
    /// Join with spaces, wrapping only the final element in the given quotes.
    QuoteLast { open: String, close: String },
    /// POSIX shell quoting of every element that needs it.
    ShellQuoted,
    /// Caller-supplied policy.
    Custom(fn(&[String]) -> String),
}

impl Formatter {
    /// Apply this policy to an argv.
    pub fn format(&self, raw: &[String]) -> String {
        if raw.is_empty() {
            return String::new();
        }
        match self {
            Formatter::SpaceSeparated => raw.join(" "),
            Formatter::QuoteIfSpace { open, close } => raw
                .iter()
                .map(|arg| {
                    if arg.contains(' ') {
                        format!("{}{}{}", open, arg, close)
                    } else {
                        arg.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
            Formatter::QuoteLast { open, close } => {
                let last = raw.len() - 1;
                raw.iter()
                    .enumerate()
                    .map(|(idx, arg)| {
                        if idx == last {
                            format!("{}{}{}", open, arg, close)
                        } else {
                            arg.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            Formatter::ShellQuoted => raw
                .iter()
                .map(|arg| shell_quote(arg))
                .collect::<Vec<_>>()
                .join(" "),
            Formatter::Custom(f) => f(raw),
        }
    }

    /// `QuoteIfSpace` with double quotes.
    pub fn quote_if_space() -> Self {
        Formatter::QuoteIfSpace {
            open: "\"".into(),
            close: "\"".into(),
        }
    }

    /// `QuoteLast` with double quotes.
    pub fn quote_last() -> Self {
        Formatter::QuoteLast {
            open: "\"".into(),
            close: "\"".into(),
        }
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Formatter::SpaceSeparated
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formatter::SpaceSeparated => write!(f, "SpaceSeparated"),
            Formatter::QuoteIfSpace { open, close } => {
                write!(f, "QuoteIfSpace({}..{})", open, close)
            }
            Formatter::QuoteLast { open, close } => write!(f, "QuoteLast({}..{})", open, close),
            Formatter::ShellQuoted => write!(f, "ShellQuoted"),
            Formatter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}


/// Quote a string for a POSIX shell. Strings made only of safe characters are
/// returned bare; everything else is single-quoted.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | '=' | '+' | ',' | '@')
    }) {
        return s.to_string();
    }
    let escaped = s.replace('\'', "'\\''");
    format!("'{}'", escaped)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn space_separated_joins() {
        let raw = argv(&["echo", "hello world"]);
        assert_eq!(Formatter::SpaceSeparated.format(&raw), "echo hello world");
    }

    #[test]
    fn empty_argv_formats_empty() {
        assert_eq!(Formatter::quote_last().format(&[]), "");
        assert_eq!(Formatter::ShellQuoted.format(&[]), "");
    }

    #[test]
    fn quote_if_space_wraps_only_spaced_args() {
        let raw = argv(&["grep", "two words", "file.txt"]);
        assert_eq!(
            Formatter::quote_if_space().format(&raw),
            "grep \"two words\" file.txt"
        );
    }

    #[test]
    fn quote_last_wraps_final_arg() {
        let raw = argv(&["sh", "-c", "echo hi"]);
        assert_eq!(Formatter::quote_last().format(&raw), "sh -c \"echo hi\"");
    }

    #[test]
    fn quote_last_does_not_mutate_input() {
        let raw = argv(&["a", "b"]);
        let _ = Formatter::quote_last().format(&raw);
        assert_eq!(raw, argv(&["a", "b"]));
    }

    #[test]
    fn shell_quoted_escapes_single_quotes() {
        let raw = argv(&["echo", "it's", "plain"]);
        assert_eq!(
            Formatter::ShellQuoted.format(&raw),
            "echo 'it'\\''s' plain"
        );
    }

    #[test]
    fn custom_formatter_is_called() {
        fn upper(raw: &[String]) -> String {
            raw.join("|").to_uppercase()
        }
        let raw = argv(&["ls", "-la"]);
        assert_eq!(Formatter::Custom(upper).format(&raw), "LS|-LA");
    }

    #[test]
    fn shell_quote_empty() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("KEY=value"), "KEY=value");
        assert_eq!(shell_quote("a b"), "'a b'");
    }
}
