//! System endpoints: root hypermedia, /config, /logs.

use crate::admin::server::ServerOptions;
use crate::admin::types::json_response;
use crate::logging;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use once_cell::sync::Lazy;
use serde_json::json;
use std::time::Instant;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

/// Force uptime tracking to start with the server rather than the first
/// /config request.
pub fn mark_started() {
    Lazy::force(&STARTED_AT);
}

/// GET /
pub fn handle_root(base_url: &str) -> Response<Full<Bytes>> {
    let body = json!({
        "_links": {
            "imposters": {"href": format!("{base_url}/imposters")},
            "config": {"href": format!("{base_url}/config")},
            "logs": {"href": format!("{base_url}/logs")}
        }
    });
    json_response(StatusCode::OK, &body)
}

/// GET /config — version, effective options, process info.
pub fn handle_config(options: &ServerOptions) -> Response<Full<Bytes>> {
    let body = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "options": {
            "port": options.port,
            "allowInjection": options.allow_injection,
            "localOnly": options.policy.local_only,
            "ipWhitelist": if options.policy.ip_whitelist.is_empty() {
                vec!["*".to_string()]
            } else {
                options.policy.ip_whitelist.clone()
            },
        },
        "process": {
            "architecture": std::env::consts::ARCH,
            "platform": std::env::consts::OS,
            "pid": std::process::id(),
            "uptime": STARTED_AT.elapsed().as_secs(),
            "cwd": std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    });
    json_response(StatusCode::OK, &body)
}

/// GET /logs — an index slice of the in-memory ring.
pub fn handle_logs(query: Option<&str>) -> Response<Full<Bytes>> {
    let mut start_index = 0usize;
    let mut end_index = logging::count().saturating_sub(1);

    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                match (key, value.parse::<usize>()) {
                    ("startIndex", Ok(v)) => start_index = v,
                    ("endIndex", Ok(v)) => end_index = v,
                    _ => {}
                }
            }
        }
    }

    let body = json!({
        "logs": logging::slice(start_index, end_index),
        "_links": {
            "self": {"href": format!("/logs?startIndex={start_index}&endIndex={end_index}")}
        }
    });
    json_response(StatusCode::OK, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::guard::AccessPolicy;

    fn options() -> ServerOptions {
        ServerOptions {
            port: 2525,
            host: "0.0.0.0".to_string(),
            allow_injection: false,
            origin: None,
            policy: AccessPolicy::default(),
        }
    }

    #[test]
    fn test_root_links() {
        let response = handle_root("http://localhost:2525");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_config_ok() {
        let response = handle_config(&options());
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_logs_with_and_without_pagination() {
        assert_eq!(handle_logs(None).status(), StatusCode::OK);
        assert_eq!(
            handle_logs(Some("startIndex=2&endIndex=7")).status(),
            StatusCode::OK
        );
    }
}
