//! Value extraction for copy and lookup behaviors: regex, JSONPath, XPath.

use crate::imposter::types::CopySelector;
use crate::predicate::{json_path_lookup, value_to_string, xpath_lookup};
use serde_json::Value;
use tracing::warn;

/// Apply a selector to an extracted request value. Regex selectors return
/// the first capture group when one exists, else the whole match.
pub fn apply_selector(value: &Value, selector: &CopySelector) -> Option<String> {
    match selector.method.as_str() {
        "regex" => {
            let text = value_to_string(value);
            let ignore_case = selector
                .options
                .as_ref()
                .map(|o| o.ignore_case)
                .unwrap_or(false);
            let re = regex::RegexBuilder::new(&selector.selector)
                .case_insensitive(ignore_case)
                .build()
                .map_err(|e| warn!("invalid regex selector {}: {e}", selector.selector))
                .ok()?;
            let captures = re.captures(&text)?;
            captures
                .get(1)
                .or_else(|| captures.get(0))
                .map(|m| m.as_str().to_string())
        }
        "jsonpath" => {
            // The selector traverses the extracted value; string values that
            // hold JSON text are parsed first.
            let root = match value {
                Value::String(s) => serde_json::from_str(s).ok()?,
                other => other.clone(),
            };
            json_path_lookup(&root, &selector.selector)
                .filter(|v| !v.is_null())
                .map(|v| value_to_string(&v))
        }
        "xpath" => {
            let xml = value_to_string(value);
            xpath_lookup(&xml, &selector.selector, &selector.ns)
        }
        other => {
            warn!("unknown selector method: {other}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn selector(method: &str, pattern: &str) -> CopySelector {
        CopySelector {
            method: method.into(),
            selector: pattern.into(),
            options: None,
            ns: Default::default(),
        }
    }

    #[test]
    fn test_regex_capture_group() {
        let s = selector("regex", r"/users/(\d+)");
        assert_eq!(
            apply_selector(&json!("/users/123"), &s),
            Some("123".to_string())
        );
        assert_eq!(apply_selector(&json!("/posts/456"), &s), None);
    }

    #[test]
    fn test_regex_whole_match_without_group() {
        let s = selector("regex", r"\d+");
        assert_eq!(apply_selector(&json!("id 42"), &s), Some("42".to_string()));
    }

    #[test]
    fn test_regex_ignore_case_option() {
        let mut s = selector("regex", "HELLO");
        s.options = Some(crate::imposter::types::SelectorOptions { ignore_case: true });
        assert_eq!(
            apply_selector(&json!("say hello"), &s),
            Some("hello".to_string())
        );
    }

    #[test]
    fn test_jsonpath_over_json_text() {
        let s = selector("jsonpath", "$.user.name");
        assert_eq!(
            apply_selector(&json!(r#"{"user": {"name": "Alice"}}"#), &s),
            Some("Alice".to_string())
        );
    }

    #[test]
    fn test_xpath_over_xml_text() {
        let s = selector("xpath", "/doc/id");
        assert_eq!(
            apply_selector(&json!("<doc><id>7</id></doc>"), &s),
            Some("7".to_string())
        );
    }
}
