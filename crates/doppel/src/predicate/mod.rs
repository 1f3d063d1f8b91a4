//! Predicate evaluation: a pure boolean function over (predicate, request).
//!
//! Evaluation runs in three phases. The selector phase reduces the actual
//! value (never the expected operand) by a JSONPath or XPath selector. The
//! normalization phase produces a comparable pair. The comparison phase
//! walks the expected structure: every expected map key must exist in the
//! actual and recursively satisfy the operator, and every expected array
//! element needs at least one satisfying actual element.

mod normalize;

pub use normalize::{json_path_lookup, value_to_string, xpath_lookup};

use crate::imposter::types::{Encoding, Predicate, PredicateOperator};
use crate::model::Request;
use crate::scripting::ScriptBridge;
use normalize::{normalize, normalize_pattern, select_value};
use serde_json::{Map, Value};
use tracing::{error, warn};

/// Evaluates predicates for one imposter.
pub struct PredicateEvaluator<'a> {
    encoding: Encoding,
    bridge: &'a ScriptBridge,
}

impl<'a> PredicateEvaluator<'a> {
    pub fn new(encoding: Encoding, bridge: &'a ScriptBridge) -> Self {
        PredicateEvaluator { encoding, bridge }
    }

    /// True when the request satisfies the predicate.
    pub fn evaluate(
        &self,
        predicate: &Predicate,
        request: &Request,
        state: &mut Map<String, Value>,
    ) -> bool {
        match predicate.operator() {
            PredicateOperator::Equals(expected) => {
                self.compare(predicate, request, expected, |e, a| e == a)
            }
            PredicateOperator::DeepEquals(expected) => {
                self.deep_equals(predicate, request, expected)
            }
            PredicateOperator::Contains(expected) => {
                self.compare(predicate, request, expected, |e, a| a.contains(e))
            }
            PredicateOperator::StartsWith(expected) => {
                self.compare(predicate, request, expected, |e, a| a.starts_with(e))
            }
            PredicateOperator::EndsWith(expected) => {
                self.compare(predicate, request, expected, |e, a| a.ends_with(e))
            }
            PredicateOperator::Matches(expected) => self.matches(predicate, request, expected),
            PredicateOperator::Exists(expected) => self.exists(predicate, request, expected),
            PredicateOperator::Not(inner) => !self.evaluate(inner, request, state),
            PredicateOperator::Or(inner) => {
                inner.iter().any(|p| self.evaluate(p, request, state))
            }
            PredicateOperator::And(inner) => {
                inner.iter().all(|p| self.evaluate(p, request, state))
            }
            PredicateOperator::Inject(source) => self.inject(source, request, state),
            PredicateOperator::None => false,
        }
    }

    fn prepared_pair(
        &self,
        predicate: &Predicate,
        request: &Request,
        expected: &Value,
    ) -> (Value, Value) {
        let expected = normalize(expected.clone(), predicate, self.encoding);
        let actual = select_value(request.to_value(), predicate);
        let actual = normalize(actual, predicate, self.encoding);
        (expected, actual)
    }

    fn compare<F>(
        &self,
        predicate: &Predicate,
        request: &Request,
        expected: &Value,
        scalar: F,
    ) -> bool
    where
        F: Fn(&str, &str) -> bool + Copy,
    {
        let (expected, actual) = self.prepared_pair(predicate, request, expected);
        satisfied(&expected, &actual, &|e, a| {
            scalar(&value_to_string(e), &value_to_string(a))
        })
    }

    fn matches(&self, predicate: &Predicate, request: &Request, expected: &Value) -> bool {
        if self.encoding == Encoding::Base64 {
            error!("the matches predicate is not allowed in binary mode");
            return false;
        }
        let case_sensitive = predicate.is_case_sensitive();
        // The expected side holds regex patterns. Its map keys fold like any
        // other operand, but the pattern strings keep their case:
        // insensitivity is expressed through `(?i)`, and folding a pattern
        // would corrupt classes like `\D`.
        let expected = normalize_pattern(expected.clone(), predicate, self.encoding);
        let actual = select_value(request.to_value(), predicate);
        let actual = normalize(actual, predicate, self.encoding);
        satisfied(&expected, &actual, &|e, a| {
            let mut pattern = value_to_string(e);
            if !case_sensitive {
                pattern = format!("(?i){pattern}");
            }
            match regex::Regex::new(&pattern) {
                Ok(re) => re.is_match(&value_to_string(a)),
                Err(_) => {
                    warn!("invalid regex pattern: {pattern}");
                    false
                }
            }
        })
    }

    /// deepEquals tolerates extra keys only at the root (headers usually
    /// carry more entries than any predicate names); nested structures must
    /// match exactly.
    fn deep_equals(&self, predicate: &Predicate, request: &Request, expected: &Value) -> bool {
        let (expected, actual) = self.prepared_pair(predicate, request, expected);
        let Value::Object(expected_map) = expected else {
            return expected == actual;
        };
        let Value::Object(actual_map) = actual else {
            return false;
        };
        for (key, expected_value) in &expected_map {
            match actual_map.get(key) {
                Some(actual_value) if actual_value == expected_value => {}
                _ => return false,
            }
        }
        true
    }

    fn exists(&self, predicate: &Predicate, request: &Request, expected: &Value) -> bool {
        let (expected, actual) = self.prepared_pair(predicate, request, expected);
        satisfied_exists(&expected, &actual)
    }

    fn inject(&self, source: &str, request: &Request, state: &mut Map<String, Value>) -> bool {
        // Dry runs only validate that the script parses; they always match.
        if request.is_dry_run {
            return true;
        }
        match self.bridge.evaluate_predicate(source, request, state) {
            Ok(result) => result,
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }
}

/// Walk the expected structure against the actual value.
fn satisfied(expected: &Value, actual: &Value, scalar: &dyn Fn(&Value, &Value) -> bool) -> bool {
    if actual.is_null() {
        return false;
    }
    match expected {
        Value::Object(expected_map) => {
            let Value::Object(actual_map) = actual else {
                return false;
            };
            expected_map.iter().all(|(key, expected_value)| {
                actual_map
                    .get(key)
                    .is_some_and(|actual_value| satisfied(expected_value, actual_value, scalar))
            })
        }
        Value::Array(expected_items) => {
            let Value::Array(actual_items) = actual else {
                return false;
            };
            expected_items.iter().all(|expected_item| {
                actual_items
                    .iter()
                    .any(|actual_item| satisfied(expected_item, actual_item, scalar))
            })
        }
        _ => scalar(expected, actual),
    }
}

/// Like [`satisfied`], but a missing actual key counts as absent rather than
/// failing outright, so `exists: false` can assert absence.
fn satisfied_exists(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::Object(expected_map) => expected_map.iter().all(|(key, expected_value)| {
            let actual_value = match actual {
                Value::Object(actual_map) => actual_map.get(key).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            };
            satisfied_exists(expected_value, &actual_value)
        }),
        Value::Bool(should_exist) => {
            let present = !actual.is_null() && actual != &Value::String(String::new());
            *should_exist == present
        }
        _ => false,
    }
}
