//! Policy matcher tree
//!
//! A matcher is a recursive boolean expression evaluated against a JSON
//! document (an incoming activity or actor document). Matchers serialize in
//! the externally tagged "one of" form (`{"not": ...}`, `{"value": ...}`,
//! `{"empty": true}`), so a document populating zero or more than one
//! variant is rejected at the serde boundary before it can ever be evaluated.
//!
//! Every branch appends a trace line to the shared [`Resolution`] log so a
//! decision can be audited after the fact.

use serde::{Deserialize, Serialize};

use super::Resolution;
use crate::error::AppError;

/// Selects a value out of the subject document and applies a matcher to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KVMatcher {
    /// Dotted path into the subject document; numeric segments index arrays.
    pub key_path_query: String,
    pub value_matcher: UnaryMatcher,
}

/// Recursive boolean matcher node. Exactly one variant per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryMatcher {
    /// Logical negation of the inner matcher.
    Not(Box<UnaryMatcher>),
    /// Logical AND; both sides always evaluate, even when the left decides.
    And(Box<BinaryMatcher>),
    /// Logical OR; both sides always evaluate, even when the left decides.
    Or(Box<BinaryMatcher>),
    /// Leaf predicate over the selected value.
    Value(ValueMatcher),
    /// Matches when selection-emptiness equals the flag: `empty: true`
    /// matches a path that selects nothing (or an empty array),
    /// `empty: false` a present one.
    Empty(bool),
}

/// Two required operands for AND/OR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinaryMatcher {
    pub left: UnaryMatcher,
    pub right: UnaryMatcher,
}

/// Leaf predicate. Exactly one variant per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueMatcher {
    /// Equality against a second path-selected value in the same document.
    JsonPathEquals(String),
    /// Literal string equality; on an array, any string element may match.
    EqualsString(String),
    /// Substring containment; on an array, any string element may match.
    ContainsString(String),
    /// Selection length equals N. Missing selects 0, a scalar 1, an array
    /// its element count.
    LenEquals(u64),
    /// Selection length strictly greater than N.
    LenGreater(u64),
    /// Selection length strictly less than N.
    LenLess(u64),
}

/// Resolve a dotted key path query against a document.
///
/// Returns `Ok(None)` when the path selects nothing. A malformed query
/// (empty, empty segment, non-numeric segment on an array) is an evaluation
/// error rather than a miss, so typos in policies surface to their authors.
pub(crate) fn select_path<'a>(
    document: &'a serde_json::Value,
    query: &str,
) -> Result<Option<&'a serde_json::Value>, AppError> {
    if query.trim().is_empty() {
        return Err(AppError::Evaluation("empty key path query".to_string()));
    }

    let mut current = document;
    for segment in query.split('.') {
        if segment.is_empty() {
            return Err(AppError::Evaluation(format!(
                "malformed key path query: {}",
                query
            )));
        }

        current = match current {
            serde_json::Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return Ok(None),
            },
            serde_json::Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| {
                    AppError::Evaluation(format!(
                        "segment '{}' in '{}' does not index an array",
                        segment, query
                    ))
                })?;
                match items.get(index) {
                    Some(value) => value,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
    }

    Ok(Some(current))
}

/// Length of a selection: missing 0, array its element count, anything else 1.
fn selection_len(selected: Option<&serde_json::Value>) -> u64 {
    match selected {
        None => 0,
        Some(serde_json::Value::Array(items)) => items.len() as u64,
        Some(_) => 1,
    }
}

/// Apply a string predicate to a selected value, matching any string element
/// when the selection is an array (activities carry actor lists).
fn string_selection_matches<F>(selected: Option<&serde_json::Value>, predicate: F) -> bool
where
    F: Fn(&str) -> bool,
{
    match selected {
        Some(serde_json::Value::String(s)) => predicate(s),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .any(predicate),
        _ => false,
    }
}

fn combine_branch_errors(
    left: Result<bool, AppError>,
    right: Result<bool, AppError>,
) -> Result<(bool, bool), AppError> {
    match (left, right) {
        (Ok(l), Ok(r)) => Ok((l, r)),
        (Err(l), Err(r)) => Err(AppError::Evaluation(format!("left: {}; right: {}", l, r))),
        (Err(l), Ok(_)) => Err(AppError::Evaluation(format!("left: {}", l))),
        (Ok(_), Err(r)) => Err(AppError::Evaluation(format!("right: {}", r))),
    }
}

impl KVMatcher {
    /// Validate the matcher shape without evaluating it.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.key_path_query.trim().is_empty() {
            return Err(AppError::Validation(
                "keyPathQuery must not be empty".to_string(),
            ));
        }

        if self.key_path_query.split('.').any(|s| s.is_empty()) {
            return Err(AppError::Validation(format!(
                "malformed keyPathQuery: {}",
                self.key_path_query
            )));
        }

        self.value_matcher.validate()
    }

    /// Select the key path and run the matcher tree against it.
    pub fn evaluate(
        &self,
        document: &serde_json::Value,
        resolution: &mut Resolution,
    ) -> Result<bool, AppError> {
        let selected = select_path(document, &self.key_path_query)?;
        self.value_matcher
            .evaluate(document, selected, resolution)
    }
}

impl UnaryMatcher {
    /// Validate the matcher tree recursively.
    ///
    /// The exactly-one-variant invariant is already enforced by the enum and
    /// its externally tagged serde form; this covers the residual rules the
    /// type system cannot, like path syntax inside leaf predicates.
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            Self::Not(inner) => inner.validate(),
            Self::And(binary) | Self::Or(binary) => {
                binary.left.validate()?;
                binary.right.validate()
            }
            Self::Value(value) => value.validate(),
            Self::Empty(_) => Ok(()),
        }
    }

    /// Evaluate against the selected value, appending trace lines.
    ///
    /// AND and OR evaluate both sides unconditionally so both branches appear
    /// in the audit log, and branch errors merge instead of masking each
    /// other.
    pub fn evaluate(
        &self,
        document: &serde_json::Value,
        selected: Option<&serde_json::Value>,
        resolution: &mut Resolution,
    ) -> Result<bool, AppError> {
        match self {
            Self::Not(inner) => {
                let result = inner.evaluate(document, selected, resolution)?;
                resolution.log(format!("apply NOT({})=>{}", result, !result));
                Ok(!result)
            }
            Self::And(binary) => {
                let left = binary.left.evaluate(document, selected, resolution);
                let right = binary.right.evaluate(document, selected, resolution);
                let (l, r) = combine_branch_errors(left, right)?;
                resolution.log(format!("apply AND({}, {})=>{}", l, r, l && r));
                Ok(l && r)
            }
            Self::Or(binary) => {
                let left = binary.left.evaluate(document, selected, resolution);
                let right = binary.right.evaluate(document, selected, resolution);
                let (l, r) = combine_branch_errors(left, right)?;
                resolution.log(format!("apply OR({}, {})=>{}", l, r, l || r));
                Ok(l || r)
            }
            Self::Value(value) => value.evaluate(document, selected, resolution),
            Self::Empty(expected) => {
                // Emptiness follows the same length rule as the len
                // predicates, so an empty actor array and a missing actor
                // field gate identically.
                let is_empty = selection_len(selected) == 0;
                let matched = is_empty == *expected;
                resolution.log(format!(
                    "apply EMPTY(expected={}, empty={})=>{}",
                    expected, is_empty, matched
                ));
                Ok(matched)
            }
        }
    }
}

impl ValueMatcher {
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            Self::JsonPathEquals(path) => {
                if path.trim().is_empty() || path.split('.').any(|s| s.is_empty()) {
                    return Err(AppError::Validation(format!(
                        "malformed jsonPathEquals path: {:?}",
                        path
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn evaluate(
        &self,
        document: &serde_json::Value,
        selected: Option<&serde_json::Value>,
        resolution: &mut Resolution,
    ) -> Result<bool, AppError> {
        let matched = match self {
            Self::JsonPathEquals(path) => {
                let other = select_path(document, path)?;
                let matched = selected == other;
                resolution.log(format!("apply jsonPathEquals({})=>{}", path, matched));
                matched
            }
            Self::EqualsString(expected) => {
                let matched = string_selection_matches(selected, |s| s == expected);
                resolution.log(format!("apply equalsString({:?})=>{}", expected, matched));
                matched
            }
            Self::ContainsString(needle) => {
                let matched = string_selection_matches(selected, |s| s.contains(needle.as_str()));
                resolution.log(format!("apply containsString({:?})=>{}", needle, matched));
                matched
            }
            Self::LenEquals(n) => {
                let len = selection_len(selected);
                resolution.log(format!("apply lenEquals({}) on len {}=>{}", n, len, len == *n));
                len == *n
            }
            Self::LenGreater(n) => {
                let len = selection_len(selected);
                resolution.log(format!("apply lenGreater({}) on len {}=>{}", n, len, len > *n));
                len > *n
            }
            Self::LenLess(n) => {
                let len = selection_len(selected);
                resolution.log(format!("apply lenLess({}) on len {}=>{}", n, len, len < *n));
                len < *n
            }
        };

        Ok(matched)
    }
}
