//! Copy behavior: lift request values into the response by token
//! replacement.

use super::extraction::apply_selector;
use crate::imposter::types::CopyBehavior;
use crate::model::{Request, Response};
use crate::predicate::value_to_string;
use serde_json::Value;

/// Apply copy behaviors in order. Entries whose source yields nothing are
/// no-ops; their token is left in place.
pub fn apply_copy(request: &Request, response: &mut Response, copies: &[CopyBehavior]) {
    let request_value = request.to_value();
    for copy in copies {
        let Some(source) = extract_path(&request_value, &copy.from) else {
            continue;
        };
        let replacement = match &copy.using {
            Some(selector) => match apply_selector(&source, selector) {
                Some(extracted) => extracted,
                None => continue,
            },
            None => value_to_string(&source),
        };
        replace_token(response, &copy.into, &replacement);
    }
}

/// Replace every occurrence of a token throughout the response body
/// (recursively for structured bodies) and its headers, including
/// list-valued ones.
pub fn replace_token(response: &mut Response, token: &str, replacement: &str) {
    replace_in_value(&mut response.body, token, replacement);
    for value in response.headers.values_mut() {
        replace_in_value(value, token, replacement);
    }
    if !response.data.is_empty() {
        response.data = response.data.replace(token, replacement);
    }
}

fn replace_in_value(value: &mut Value, token: &str, replacement: &str) {
    match value {
        Value::String(s) => {
            if s.contains(token) {
                *s = s.replace(token, replacement);
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_in_value(item, token, replacement);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                replace_in_value(item, token, replacement);
            }
        }
        _ => {}
    }
}

/// Dotted-path lookup into the canonical request map: `path`,
/// `query.name`, `headers.X-Id`, `body.field`. Map keys fall back to a
/// case-insensitive match so header names behave.
fn extract_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                let found = map.get(part).cloned().or_else(|| {
                    map.iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(part))
                        .map(|(_, v)| v.clone())
                })?;
                current = found;
            }
            Value::String(ref s) => {
                // Dotting into a string body means the body held JSON text.
                let parsed: Value = serde_json::from_str(s).ok()?;
                current = parsed.get(part)?.clone();
            }
            _ => return None,
        }
    }
    Some(current)
}
