//! The `::set-output` line syntax.
//!
//! ```text
//! ::set-output name=<name>[ type=<type>]::<value>
//! ```
//!
//! `<name>` is `[A-Za-z0-9_-]+`. `<type>` is optional and case-insensitive:
//! `json`/`j`, `int`/`i`, anything else keeps the value as text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static SET_OUTPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"::set-output name=([A-Za-z0-9_-]+)(?:\s+type=([A-Za-z]+))?::(.*)")
        .expect("set-output pattern is valid")
});


// ---------------------------------------------------------------------------
// ValueType
// ---------------------------------------------------------------------------

/// The type hint carried by an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Text,
    Int,
    Json,
}

impl ValueType {
    /// Case-insensitive lookup. Unknown or absent hints mean text.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(|h| h.to_ascii_lowercase()).as_deref() {
            Some("json") | Some("j") => ValueType::Json,
            Some("int") | Some("i") => ValueType::Int,
            _ => ValueType::Text,
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            ValueType::Text => None,
            ValueType::Int => Some("int"),
            ValueType::Json => Some("json"),
        }
    }
}


// ---------------------------------------------------------------------------
// Annotation
// ---------------------------------------------------------------------------

/// One matched annotation, before its value is typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub name: String,
    pub value_type: ValueType,
    pub raw: String,
}

impl Annotation {
    /// Find the first annotation on a single line.
    pub fn find(line: &str) -> Option<Annotation> {
        let caps = SET_OUTPUT.captures(line)?;
        Some(Annotation {
            name: caps[1].to_string(),
            value_type: ValueType::from_hint(caps.get(2).map(|m| m.as_str())),
            raw: caps[3].to_string(),
        })
    }

    /// The typed value, or `None` when the annotation must be dropped.
    ///
    /// A malformed `int` yields `None` and the key is never set. A malformed
    /// `json` yields `Value::Null` so the key is present but empty.
    pub fn value(&self) -> Option<Value> {
        match self.value_type {
            ValueType::Text => Some(Value::String(self.raw.clone())),
            ValueType::Int => self.raw.parse::<i64>().ok().map(Value::from),
            ValueType::Json => Some(serde_json::from_str(&self.raw).unwrap_or(Value::Null)),
        }
    }
}


/// Emit a text annotation line.
pub fn format(name: &str, value: &str) -> String {
    format!("::set-output name={}::{}", name, value)
}

/// Emit an annotation line with a type hint.
pub fn format_typed(name: &str, value_type: ValueType, value: &str) -> String {
    match value_type.hint() {
        Some(hint) => format!("::set-output name={} type={}::{}", name, hint, value),
        None => format(name, value),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_plain_annotation() {
        let a = Annotation::find("::set-output name=build_id::abc-123").unwrap();
        assert_eq!(a.name, "build_id");
        assert_eq!(a.value_type, ValueType::Text);
        assert_eq!(a.raw, "abc-123");
    }

    #[test]
    fn finds_annotation_mid_line() {
        let a = Annotation::find("[step 3] ::set-output name=ok::yes").unwrap();
        assert_eq!(a.name, "ok");
        assert_eq!(a.raw, "yes");
    }

    #[test]
    fn type_hint_is_case_insensitive() {
        assert_eq!(ValueType::from_hint(Some("JSON")), ValueType::Json);
        assert_eq!(ValueType::from_hint(Some("I")), ValueType::Int);
        assert_eq!(ValueType::from_hint(Some("float")), ValueType::Text);
        assert_eq!(ValueType::from_hint(None), ValueType::Text);
    }

    #[test]
    fn name_with_hyphen_and_digits() {
        let a = Annotation::find("::set-output name=Step-2_Out::v").unwrap();
        assert_eq!(a.name, "Step-2_Out");
    }

    #[test]
    fn invalid_name_does_not_match() {
        assert!(Annotation::find("::set-output name=bad.name::v").is_none());
        assert!(Annotation::find("::set-output name=::v").is_none());
    }

    #[test]
    fn first_marker_wins() {
        let a = Annotation::find("::set-output name=a::1 ::set-output name=b::2").unwrap();
        assert_eq!(a.name, "a");
        assert_eq!(a.raw, "1 ::set-output name=b::2");
    }

    #[test]
    fn malformed_int_has_no_value() {
        let a = Annotation::find("::set-output name=x type=int::abc").unwrap();
        assert_eq!(a.value(), None);
    }

    #[test]
    fn malformed_json_is_null() {
        let a = Annotation::find("::set-output name=x type=json::{oops").unwrap();
        assert_eq!(a.value(), Some(Value::Null));
    }

    #[test]
    fn format_round_trips() {
        let line = format_typed("count", ValueType::Int, "12");
        assert_eq!(line, "::set-output name=count type=int::12");
        let a = Annotation::find(&line).unwrap();
        assert_eq!(a.value(), Some(Value::from(12)));
        assert_eq!(format_typed("t", ValueType::Text, "x"), format("t", "x"));
    }

    mod generated {
        use super::*;
        use proptest::prelude::*;
        use serde_json::json;

        fn name() -> impl Strategy<Value = String> {
            "[A-Za-z0-9_-]{1,24}"
        }

        fn typed(name: &str, value_type: ValueType, raw: &str) -> Option<Value> {
            let line = format_typed(name, value_type, raw);
            let found = Annotation::find(&line)?;
            assert_eq!(found.name, name);
            assert_eq!(found.value_type, value_type);
            found.value()
        }

        proptest! {
            #[test]
            fn text_survives_separators(
                name in name(),
                head in r"[^\r\n]{0,30}",
                tail in r"[^\r\n]{0,10}",
            ) {
                let value = format!("{}::{}", head, tail);
                prop_assert_eq!(typed(&name, ValueType::Text, &value), Some(Value::String(value)));
            }

            #[test]
            fn text_without_separator(name in name(), value in r"[^\r\n]{0,40}") {
                prop_assert_eq!(
                    typed(&name, ValueType::Text, &value),
                    Some(Value::String(value.clone()))
                );
            }

            #[test]
            fn int_is_exact(name in name(), n in any::<i64>()) {
                prop_assert_eq!(typed(&name, ValueType::Int, &n.to_string()), Some(Value::from(n)));
            }

            #[test]
            fn json_object_is_exact(
                name in name(),
                fields in prop::collection::btree_map("[a-z_-]{1,8}", r"[^\r\n]{0,12}", 0..5),
                n in any::<i64>(),
                flag in any::<bool>(),
            ) {
                let value = json!({ "fields": fields, "n": n, "flag": flag });
                prop_assert_eq!(typed(&name, ValueType::Json, &value.to_string()), Some(value));
            }

            #[test]
            fn parsed_output_keeps_every_key(
                entries in prop::collection::btree_map(name(), r"[^\r\n]{0,20}", 1..8),
            ) {
                let text: String = entries
                    .iter()
                    .map(|(k, v)| format!("noise {}\n", format(k, v)))
                    .collect();
                let output = crate::output::Output::parse(&text);
                prop_assert_eq!(output.len(), entries.len());
                for (k, v) in &entries {
                    prop_assert_eq!(output.get(k), Some(&Value::String(v.clone())));
                }
            }
        }
    }
}
