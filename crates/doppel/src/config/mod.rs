//! Imposter file format: newline-ended JSON with EJS-style directives.
//!
//! Two directives are resolved before JSON parsing, both against the
//! including file's directory:
//!
//! - `<%- include("relative/path") %>` splices the referenced file in
//!   verbatim (recursively processing its own directives).
//! - `<%- stringify(filename, "relative/path") %>` inlines the referenced
//!   file as a JSON-escaped string fragment with the outer quotes stripped,
//!   so it can sit inside a JSON string literal. The first argument is
//!   ignored, as it is in the original tooling.

use crate::errors::EngineError;
use crate::imposter::types::ImposterConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::error;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub imposters: Vec<ImposterConfig>,
}

static INCLUDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<%[-=]?\s*include\s*\(\s*["'](.+?)["']\s*\)\s*%>"#).expect("static regex")
});

static STRINGIFY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<%[-=]?\s*stringify\s*\(\s*[^,]*,\s*["'](.+?)["']\s*\)\s*%>"#)
        .expect("static regex")
});

/// Load an imposter file, resolving directives first.
pub fn load(path: &str) -> Result<ConfigFile, EngineError> {
    let text = process_directives(Path::new(path))?;
    serde_json::from_str(&text)
        .map_err(|e| EngineError::InvalidJson(format!("cannot parse config file {path}: {e}")))
}

/// Save imposter configs as a newline-ended JSON document.
pub fn save(path: &str, imposters: Vec<ImposterConfig>) -> Result<(), EngineError> {
    let config = ConfigFile { imposters };
    let mut data = serde_json::to_string_pretty(&config)
        .map_err(|e| EngineError::Validation(format!("cannot serialize config: {e}")))?;
    data.push('\n');
    fs::write(path, data)
        .map_err(|e| EngineError::Validation(format!("cannot write config file {path}: {e}")))
}

fn process_directives(path: &Path) -> Result<String, EngineError> {
    let text = fs::read_to_string(path).map_err(|e| {
        EngineError::Validation(format!("cannot read config file {}: {e}", path.display()))
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let text = INCLUDE_RE
        .replace_all(&text, |caps: &regex::Captures| {
            let target = dir.join(&caps[1]);
            match process_directives(&target) {
                Ok(included) => included,
                Err(e) => {
                    error!("{e}");
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    let text = STRINGIFY_RE
        .replace_all(&text, |caps: &regex::Captures| {
            let target = dir.join(&caps[1]);
            match fs::read_to_string(&target) {
                Ok(content) => {
                    let escaped =
                        serde_json::to_string(&content).unwrap_or_else(|_| "\"\"".to_string());
                    // Strip the outer quotes so the fragment embeds into an
                    // existing string literal.
                    escaped[1..escaped.len() - 1].to_string()
                }
                Err(e) => {
                    error!("cannot stringify {}: {e}", target.display());
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_plain_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imposters.json");
        fs::write(
            &path,
            r#"{"imposters": [{"protocol": "http", "port": 4545}]}
"#,
        )
        .unwrap();
        let config = load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.imposters.len(), 1);
        assert_eq!(config.imposters[0].port, Some(4545));
    }

    #[test]
    fn test_include_directive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("stub.json"),
            r#"{"responses": [{"is": {"statusCode": 200}}]}"#,
        )
        .unwrap();
        let main = dir.path().join("imposters.json");
        fs::write(
            &main,
            r#"{"imposters": [{"protocol": "http", "port": 4545, "stubs": [<%- include("stub.json") %>]}]}"#,
        )
        .unwrap();
        let config = load(main.to_str().unwrap()).unwrap();
        assert_eq!(config.imposters[0].stubs.len(), 1);
    }

    #[test]
    fn test_nested_include() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("inner.json"),
            r#"{"is": {"statusCode": 201}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("stub.json"),
            r#"{"responses": [<%- include("inner.json") %>]}"#,
        )
        .unwrap();
        let main = dir.path().join("imposters.json");
        fs::write(
            &main,
            r#"{"imposters": [{"protocol": "http", "port": 1, "stubs": [<%- include("stub.json") %>]}]}"#,
        )
        .unwrap();
        let config = load(main.to_str().unwrap()).unwrap();
        let response = &config.imposters[0].stubs[0].responses[0];
        assert_eq!(response.is.as_ref().unwrap().status_code, 201);
    }

    #[test]
    fn test_stringify_directive_embeds_escaped_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = fs::File::create(dir.path().join("body.txt")).unwrap();
        write!(body, "line \"one\"\nline two").unwrap();

        let main = dir.path().join("imposters.json");
        fs::write(
            &main,
            r#"{"imposters": [{"protocol": "http", "port": 1, "stubs": [{"responses": [{"is": {"statusCode": 200, "body": "<%- stringify(filename, "body.txt") %>"}}]}]}]}"#,
        )
        .unwrap();
        let config = load(main.to_str().unwrap()).unwrap();
        let response = config.imposters[0].stubs[0].responses[0].is.as_ref().unwrap();
        assert_eq!(response.body, serde_json::json!("line \"one\"\nline two"));
    }

    #[test]
    fn test_save_round_trip_newline_ended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let config: ImposterConfig =
            serde_json::from_value(serde_json::json!({"protocol": "http", "port": 9})).unwrap();
        save(path.to_str().unwrap(), vec![config]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        let loaded = load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.imposters[0].port, Some(9));
    }
}
