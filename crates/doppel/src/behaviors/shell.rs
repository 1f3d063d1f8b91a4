//! shellTransform behavior: hand the request and response to an external
//! command and adopt what it prints.

use crate::errors::EngineError;
use crate::model::{Request, Response};
use serde_json::Value;
use std::process::Command;
use tracing::debug;

/// Run the command under `sh -c` with the request and response JSON in the
/// `MB_REQUEST` / `MB_RESPONSE` environment variables. Stdout that parses as
/// a response object replaces the response wholesale; anything else becomes
/// the new body.
pub fn apply_shell_transform(
    command: &str,
    request: &Request,
    response: &Response,
) -> Result<Response, EngineError> {
    let request_json = serde_json::to_string(request)
        .map_err(|e| EngineError::Script(format!("request serialization failed: {e}")))?;
    let response_json = serde_json::to_string(response)
        .map_err(|e| EngineError::Script(format!("response serialization failed: {e}")))?;

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("MB_REQUEST", request_json)
        .env("MB_RESPONSE", response_json)
        .output()
        .map_err(|e| EngineError::Script(format!("shellTransform spawn failed: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::Script(format!(
            "shellTransform command failed: {stderr}"
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    match serde_json::from_str::<Response>(&stdout) {
        Ok(transformed) => Ok(transformed),
        Err(_) => {
            debug!("shellTransform stdout is not a response object, using it as the body");
            let mut transformed = response.clone();
            transformed.body = Value::String(stdout.trim_end_matches('\n').to_string());
            Ok(transformed)
        }
    }
}
