//! Typed results published by a process through its text streams.
//!
//! A process prints `::set-output name=<name>::<value>` lines; `Output`
//! collects them into a name → value map that the evaluator can test.

pub mod annotation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecError;
use crate::eval::{Evaluator, ExprEvaluator};

pub use annotation::{Annotation, ValueType};


// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Annotation name → typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Output {
    values: BTreeMap<String, Value>,
}

impl Output {
    pub fn new() -> Self {
        Output {
            values: BTreeMap::new(),
        }
    }

    /// Scan `source` line by line. Later lines overwrite earlier ones with the
    /// same name; annotations whose value cannot be typed are skipped.
    pub fn parse(source: &str) -> Self {
        let mut output = Output::new();
        for line in source.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(annotation) = Annotation::find(line) {
                if let Some(value) = annotation.value() {
                    output.values.insert(annotation.name, value);
                }
            }
        }
        output
    }

    /// Parse both streams. stderr is applied first and stdout on top, so
    /// stdout wins a name collision.
    pub fn combined(stdout: &str, stderr: &str) -> Self {
        let mut output = Output::parse(stderr);
        output.values.extend(Output::parse(stdout).values);
        output
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.values
    }

    /// Evaluate a boolean expression with the bundled expression language.
    pub fn evaluate(&self, expression: &str) -> Result<bool, ExecError> {
        self.evaluate_with(&ExprEvaluator, expression)
    }

    /// Evaluate a boolean expression with a caller-supplied evaluator.
    pub fn evaluate_with(
        &self,
        evaluator: &dyn Evaluator,
        expression: &str,
    ) -> Result<bool, ExecError> {
        evaluator.evaluate(expression, self)
    }
}

impl From<BTreeMap<String, Value>> for Output {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Output { values }
    }
}
