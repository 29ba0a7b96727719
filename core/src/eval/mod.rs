//! Boolean evaluation of expressions against an `Output` map.
//!
//! `Evaluator` is the seam; `ExprEvaluator` is the bundled implementation of
//! the language parsed by [`expr`].

pub mod expr;

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::ExecError;
use crate::output::Output;

pub use expr::{Condition, Expression, Operand, Operator, Path};


/// Evaluates a boolean expression with an `Output` as its variables.
pub trait Evaluator {
    fn evaluate(&self, expression: &str, output: &Output) -> Result<bool, ExecError>;
}


// ---------------------------------------------------------------------------
// ExprEvaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl Evaluator for ExprEvaluator {
    fn evaluate(&self, expression: &str, output: &Output) -> Result<bool, ExecError> {
        let parsed = Expression::parse(expression).map_err(|reason| {
            ExecError::ExpressionCompile {
                expression: expression.to_string(),
                reason,
            }
        })?;
        let eval_err = |reason: String| ExecError::ExpressionEval {
            expression: expression.to_string(),
            reason,
        };
        match eval_expression(&parsed, output).map_err(eval_err)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExecError::NonBooleanResult {
                expression: expression.to_string(),
                found: describe(&other),
            }),
        }
    }
}

fn eval_expression(expr: &Expression, output: &Output) -> Result<Value, String> {
    match expr {
        Expression::Condition(cond) => {
            let left = operand_value(&cond.left, output)?;
            let right = match cond.right {
                Some(ref operand) => operand_value(operand, output)?,
                None => None,
            };
            Ok(Value::Bool(compare(cond.operator, left.as_ref(), right.as_ref())))
        }
        Expression::Operand(operand) => Ok(operand_value(operand, output)?.unwrap_or(Value::Null)),
        Expression::And(parts) => {
            for part in parts {
                if !truth(part, output, "AND")? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Expression::Or(parts) => {
            for part in parts {
                if truth(part, output, "OR")? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expression::Not(inner) => Ok(Value::Bool(!truth(inner, output, "NOT")?)),
    }
}

/// Evaluate an operand of a connective, which must be boolean.
fn truth(expr: &Expression, output: &Output, connective: &str) -> Result<bool, String> {
    match eval_expression(expr, output)? {
        Value::Bool(b) => Ok(b),
        other => Err(format!(
            "operand of {} is not boolean: {}",
            connective,
            describe(&other)
        )),
    }
}

fn operand_value(operand: &Operand, output: &Output) -> Result<Option<Value>, String> {
    match operand {
        Operand::Literal(value) => Ok(Some(value.clone())),
        Operand::Path(path) => resolve(path, output),
    }
}

/// Look a path up in the output. An unknown root name is an error; a missing
/// nested field is `None`.
fn resolve(path: &Path, output: &Output) -> Result<Option<Value>, String> {
    let mut current = output
        .get(path.root())
        .ok_or_else(|| format!("unknown identifier '{}'", path.root()))?;
    for seg in &path.segments[1..] {
        let next = match current {
            Value::Object(map) => map.get(seg),
            Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current.clone()))
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string \"{}\"", s),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

/// Text form of a scalar; arrays and objects have none.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".into()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => false,
    }
}

/// Apply `op`. A missing side makes every comparison false. Both sides are
/// compared as numbers when both read as numbers, as text otherwise.
fn compare(op: Operator, left: Option<&Value>, right: Option<&Value>) -> bool {
    match op {
        Operator::IsEmpty => return is_empty(left),
        Operator::IsNotEmpty => return !is_empty(left),
        _ => {}
    }
    let (left, needle) = match (left, right.and_then(scalar_text)) {
        (Some(l), Some(r)) => (l, r),
        _ => return false,
    };

    if op == Operator::Contains {
        return match left {
            Value::Array(items) => items
                .iter()
                .any(|item| scalar_text(item).as_deref() == Some(needle.as_str())),
            Value::Object(map) => map.contains_key(&needle),
            Value::String(s) => s.contains(needle.as_str()),
            _ => false,
        };
    }

    let text = match scalar_text(left) {
        Some(t) => t,
        None => return false,
    };
    let ordering = match (text.parse::<f64>(), needle.parse::<f64>()) {
        (Ok(a), Ok(b)) => match a.partial_cmp(&b) {
            Some(o) => o,
            None => return false,
        },
        _ => text.cmp(&needle),
    };
    match op {
        Operator::Eq => ordering == Ordering::Equal,
        Operator::NotEq => ordering != Ordering::Equal,
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Lt => ordering == Ordering::Less,
        Operator::GtEq => ordering != Ordering::Less,
        Operator::LtEq => ordering != Ordering::Greater,
        Operator::Contains | Operator::IsEmpty | Operator::IsNotEmpty => false,
    }
}
