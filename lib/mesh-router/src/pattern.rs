//! Condition patterns evaluated against one attribute value

use crate::error::PolicyError;
use regex::Regex;

/// A single match condition over one attribute of a call or candidate.
///
/// Matching is pure and total: any string input, including the empty
/// string, yields a boolean.
#[derive(Clone, Debug)]
pub enum Pattern {
    /// Case-sensitive string equality.
    Exact(String),
    /// Full match against a precompiled expression.
    Regex(Regex),
    /// Always true.
    Wildcard,
}

impl Pattern {
    pub fn exact(value: impl Into<String>) -> Self {
        Pattern::Exact(value.into())
    }

    /// Compile a regex pattern. Compilation happens at rule-load time;
    /// a bad expression is a policy-load error, never a per-call one.
    pub fn regex(expr: &str) -> Result<Self, PolicyError> {
        // Anchor so the expression must match the whole value.
        let compiled =
            Regex::new(&format!("^(?:{})$", expr)).map_err(|source| PolicyError::InvalidRegex {
                expr: expr.to_string(),
                source,
            })?;
        Ok(Pattern::Regex(compiled))
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Exact(expected) => expected == value,
            Pattern::Regex(regex) => regex.is_match(value),
            Pattern::Wildcard => true,
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Pattern::Exact(a), Pattern::Exact(b)) => a == b,
            (Pattern::Regex(a), Pattern::Regex(b)) => a.as_str() == b.as_str(),
            (Pattern::Wildcard, Pattern::Wildcard) => true,
            _ => false,
        }
    }
}
