//! Substitution of `{{ .field }}` placeholders.
//!
//! `Templater` is the seam the compiler renders through. `BraceTemplater` is
//! the bundled implementation: placeholders hold a dotted path into the
//! substitution data, with numeric segments indexing into arrays.
//!
//! ```text
//! deploy {{ .service }} --replicas {{ .scale.replicas }} --zone {{ .zones.0 }}
//! ```

use serde_json::{Map, Value};

use crate::error::ExecError;


// ---------------------------------------------------------------------------
// Templater
// ---------------------------------------------------------------------------

/// Renders a text template against a key/value environment.
///
/// Implementations must be deterministic and free of side effects.
pub trait Templater {
    fn render(&self, template: &str, data: &Map<String, Value>) -> Result<String, ExecError>;
}


// ---------------------------------------------------------------------------
// Template AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Lit(String),
    Field(Vec<String>),
}

/// Parse `input` into literal and placeholder segments.
fn parse(input: &str) -> Result<Vec<Segment>, ExecError> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Lit(rest[..open].to_string()));
        }
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or_else(|| {
            ExecError::TemplateParse(format!(
                "unclosed '{{{{' at byte {}",
                input.len() - rest.len() + open
            ))
        })?;
        segments.push(Segment::Field(parse_path(after[..close].trim())?));
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Lit(rest.to_string()));
    }
    Ok(segments)
}

/// Parse the inside of a placeholder: `.a.b.0` or `a.b.0`.
fn parse_path(expr: &str) -> Result<Vec<String>, ExecError> {
    let expr = expr.strip_prefix('.').unwrap_or(expr);
    if expr.is_empty() {
        return Err(ExecError::TemplateParse("empty placeholder".into()));
    }
    expr.split('.')
        .map(|seg| {
            if seg.is_empty() {
                Err(ExecError::TemplateParse(format!(
                    "empty path segment in '{}'",
                    expr
                )))
            } else if !seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                Err(ExecError::TemplateParse(format!(
                    "invalid placeholder '{}'",
                    expr
                )))
            } else {
                Ok(seg.to_string())
            }
        })
        .collect()
}

fn lookup<'a>(data: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = data.get(first)?;
    for seg in rest {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}


// ---------------------------------------------------------------------------
// BraceTemplater
// ---------------------------------------------------------------------------

/// The bundled `{{ .path }}` templater.
#[derive(Debug, Clone)]
pub struct BraceTemplater {
    /// When set, a placeholder with no value is a render error. Otherwise it
    /// renders as the empty string.
    pub strict: bool,
}

impl BraceTemplater {
    pub fn strict() -> Self {
        BraceTemplater { strict: true }
    }

    pub fn lenient() -> Self {
        BraceTemplater { strict: false }
    }
}

impl Default for BraceTemplater {
    fn default() -> Self {
        Self::strict()
    }
}

impl Templater for BraceTemplater {
    fn render(&self, template: &str, data: &Map<String, Value>) -> Result<String, ExecError> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }
        let mut out = String::with_capacity(template.len());
        for segment in parse(template)? {
            match segment {
                Segment::Lit(text) => out.push_str(&text),
                Segment::Field(path) => match lookup(data, &path) {
                    Some(value) => out.push_str(&display(value)),
                    None if self.strict => {
                        return Err(ExecError::TemplateRender(format!(
                            "no value for '{}'",
                            path.join(".")
                        )))
                    }
                    None => {}
                },
            }
        }
        Ok(out)
    }
}
