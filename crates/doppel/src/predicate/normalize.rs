//! Selector and normalization phases of predicate evaluation.
//!
//! Before any comparison runs, the actual value (derived from the request)
//! is reduced by the predicate's selector, then both sides are normalized:
//! `except` patterns are regex-deleted from string leaves, keys and string
//! values are lowercased unless the predicate is case-sensitive, and binary
//! imposters base64-decode string values.

use crate::imposter::types::{Encoding, Predicate};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Reduce the actual value by the predicate's selector, if any.
pub fn select_value(value: Value, predicate: &Predicate) -> Value {
    if let Some(jsonpath) = &predicate.jsonpath {
        return json_path_lookup(&value, &jsonpath.selector).unwrap_or(Value::Null);
    }
    if let Some(xpath) = &predicate.xpath {
        let xml = match &value {
            Value::Object(map) => map.get("body").and_then(Value::as_str).unwrap_or(""),
            Value::String(s) => s.as_str(),
            _ => "",
        };
        if xml.is_empty() {
            return Value::Null;
        }
        return xpath_lookup(xml, &xpath.selector, &xpath.ns)
            .map(Value::String)
            .unwrap_or(Value::Null);
    }
    value
}

/// Normalize a value for comparison under the predicate's modifiers.
pub fn normalize(value: Value, predicate: &Predicate, encoding: Encoding) -> Value {
    let case_sensitive = predicate.is_case_sensitive();
    normalize_value(value, predicate, encoding, case_sensitive)
}

fn normalize_value(
    value: Value,
    predicate: &Predicate,
    encoding: Encoding,
    case_sensitive: bool,
) -> Value {
    match value {
        Value::String(s) => {
            let mut s = s;
            if encoding == Encoding::Base64 {
                use base64::Engine as _;
                if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(&s) {
                    s = String::from_utf8_lossy(&decoded).into_owned();
                }
            }
            if let Some(except) = &predicate.except {
                s = apply_except(&s, except);
            }
            if !case_sensitive {
                s = s.to_lowercase();
            }
            Value::String(s)
        }
        Value::Object(map) => {
            let mut result = Map::new();
            for (key, item) in map {
                let key = if case_sensitive {
                    key
                } else {
                    key.to_lowercase()
                };
                result.insert(key, normalize_value(item, predicate, encoding, case_sensitive));
            }
            Value::Object(result)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize_value(item, predicate, encoding, case_sensitive))
                .collect(),
        ),
        other => other,
    }
}

/// Normalize a `matches` operand. Map keys fold exactly as [`normalize`]
/// folds them, but leaf strings are regex patterns: folding one would
/// corrupt classes like `\D`, so case-insensitivity is left to the `(?i)`
/// flag the comparison prepends.
pub fn normalize_pattern(value: Value, predicate: &Predicate, encoding: Encoding) -> Value {
    let case_sensitive = predicate.is_case_sensitive();
    normalize_pattern_value(value, predicate, encoding, case_sensitive)
}

fn normalize_pattern_value(
    value: Value,
    predicate: &Predicate,
    encoding: Encoding,
    case_sensitive: bool,
) -> Value {
    match value {
        Value::String(s) => {
            let mut s = s;
            if let Some(except) = &predicate.except {
                s = apply_except(&s, except);
            }
            Value::String(s)
        }
        Value::Object(map) => {
            let mut result = Map::new();
            for (key, item) in map {
                let key = if case_sensitive {
                    key
                } else {
                    key.to_lowercase()
                };
                result.insert(
                    key,
                    normalize_pattern_value(item, predicate, encoding, case_sensitive),
                );
            }
            Value::Object(result)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize_pattern_value(item, predicate, encoding, case_sensitive))
                .collect(),
        ),
        other => other,
    }
}

fn apply_except(value: &str, pattern: &str) -> String {
    match regex::Regex::new(pattern) {
        Ok(re) => re.replace_all(value, "").into_owned(),
        Err(_) => {
            warn!("invalid except pattern: {pattern}");
            value.to_string()
        }
    }
}

/// Minimal JSONPath lookup over a JSON value. Supports rooted dotted paths
/// with numeric indexes: `$.body.items[0].name`.
pub fn json_path_lookup(value: &Value, path: &str) -> Option<Value> {
    let path = path.trim_start_matches('$').trim_start_matches('.');
    let mut current = value;
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        let mut rest = part;
        // Field portion before any bracket.
        if let Some(bracket) = rest.find('[') {
            let field = &rest[..bracket];
            if !field.is_empty() {
                current = current.get(field)?;
            }
            rest = &rest[bracket..];
            // One or more [idx] segments.
            while let Some(close) = rest.find(']') {
                let index: usize = rest[1..close].parse().ok()?;
                current = current.get(index)?;
                rest = &rest[close + 1..];
                if !rest.starts_with('[') {
                    break;
                }
            }
        } else {
            current = current.get(rest)?;
        }
    }
    Some(current.clone())
}

/// Evaluate an XPath expression against XML text, returning the string value
/// of the result (first node of a nodeset).
pub fn xpath_lookup(
    xml: &str,
    selector: &str,
    namespaces: &std::collections::HashMap<String, String>,
) -> Option<String> {
    use sxd_xpath::{Context, Factory, Value as XpathValue};

    let package = match sxd_document::parser::parse(xml) {
        Ok(p) => p,
        Err(e) => {
            debug!("xml parse failed: {e}");
            return None;
        }
    };
    let document = package.as_document();

    let factory = Factory::new();
    let xpath = factory.build(selector).ok()??;
    let mut context = Context::new();
    for (prefix, uri) in namespaces {
        context.set_namespace(prefix, uri);
    }

    match xpath.evaluate(&context, document.root()) {
        Ok(XpathValue::String(s)) => Some(s),
        Ok(XpathValue::Number(n)) => Some(n.to_string()),
        Ok(XpathValue::Boolean(b)) => Some(b.to_string()),
        Ok(XpathValue::Nodeset(nodes)) => nodes
            .document_order_first()
            .map(|node| node.string_value()),
        Err(e) => {
            debug!("xpath evaluation failed: {e}");
            None
        }
    }
}

/// Render a scalar for string comparison.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
