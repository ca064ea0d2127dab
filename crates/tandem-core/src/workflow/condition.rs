//! Condition DSL — boolean expressions over the flat round-state record.
//!
//! JSON forms:
//!
//! ```json
//! "always"
//! { "field": "status", "equals": "blocked", "caseSensitive": false }
//! { "field": "verdict", "in": ["approve", "fail"] }
//! { "any": [ ... ] }
//! { "all": [ ... ] }
//! ```
//!
//! Evaluation is pure and never fails: `matches` patterns are vetted at
//! workflow load time (see [`super::validate`]), so an invalid regex can
//! only reach evaluation through an unvalidated definition.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A boolean condition evaluated against the round state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Keyword(Keyword),
    Any { any: Vec<Condition> },
    All { all: Vec<Condition> },
    Atom(AtomCondition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keyword {
    Always,
}

/// A single comparison against one state field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomCondition {
    pub field: String,

    #[serde(flatten)]
    pub test: Comparator,

    /// When explicitly `false`, string comparisons lower-case both sides.
    /// Default is case-sensitive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparator {
    Equals(Value),
    NotEquals(Value),
    Includes(String),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Matches(String),
    Exists(bool),
}

impl Condition {
    pub fn always() -> Self {
        Condition::Keyword(Keyword::Always)
    }

    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Atom(AtomCondition {
            field: field.into(),
            test: Comparator::Equals(value.into()),
            case_sensitive: None,
        })
    }

    /// Evaluate against a flat state record.
    ///
    /// Semantics: an absent or null field fails every comparator except
    /// `exists: false`. String comparators operate on the literal string
    /// form of the value (strings verbatim, numbers and booleans via their
    /// display form). `equals`/`in`/`notIn` compare numbers numerically.
    pub fn evaluate(&self, state: &Map<String, Value>) -> bool {
        match self {
            Condition::Keyword(Keyword::Always) => true,
            Condition::Any { any } => any.iter().any(|c| c.evaluate(state)),
            Condition::All { all } => all.iter().all(|c| c.evaluate(state)),
            Condition::Atom(atom) => atom.evaluate(state),
        }
    }
}

impl AtomCondition {
    fn evaluate(&self, state: &Map<String, Value>) -> bool {
        let value = state.get(&self.field).filter(|v| !v.is_null());

        if let Comparator::Exists(expected) = &self.test {
            return value.is_some() == *expected;
        }
        let Some(value) = value else {
            return false;
        };

        let case_sensitive = self.case_sensitive.unwrap_or(true);
        match &self.test {
            Comparator::Equals(expected) => value_eq(value, expected, case_sensitive),
            Comparator::NotEquals(expected) => !value_eq(value, expected, case_sensitive),
            Comparator::Includes(needle) => {
                let hay = display_form(value);
                if case_sensitive {
                    hay.contains(needle.as_str())
                } else {
                    hay.to_lowercase().contains(&needle.to_lowercase())
                }
            }
            Comparator::In(options) => options.iter().any(|o| value_eq(value, o, case_sensitive)),
            Comparator::NotIn(options) => !options.iter().any(|o| value_eq(value, o, case_sensitive)),
            Comparator::Matches(pattern) => {
                let pattern = if case_sensitive {
                    pattern.clone()
                } else {
                    format!("(?i){}", pattern)
                };
                match Regex::new(&pattern) {
                    Ok(re) => re.is_match(&display_form(value)),
                    // Rejected at load time; an unvalidated pattern matches nothing.
                    Err(_) => false,
                }
            }
            // Handled before the field lookup.
            Comparator::Exists(_) => false,
        }
    }
}

/// Literal string form used by the string comparators.
pub(crate) fn display_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Value equality: numbers numerically, everything else on the string form
/// under the case rule.
fn value_eq(value: &Value, expected: &Value, case_sensitive: bool) -> bool {
    if let (Some(a), Some(b)) = (value.as_f64(), expected.as_f64()) {
        return a == b;
    }
    let (a, b) = (display_form(value), display_form(expected));
    if case_sensitive {
        a == b
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}
