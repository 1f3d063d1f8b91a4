//! Imposter collection and per-imposter handlers.

use crate::admin::types::*;
use crate::errors::EngineError;
use crate::imposter::registry::ImposterRegistry;
use crate::imposter::types::ImposterConfig;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// POST /imposters
pub async fn handle_create(
    req: Request<Incoming>,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };
    let config: ImposterConfig = match serde_json::from_slice(&body) {
        Ok(config) => config,
        Err(e) => {
            return error_response(&EngineError::InvalidJson(format!(
                "unable to parse imposter: {e}"
            )))
        }
    };

    match registry.create(config).await {
        Ok(imposter) => json_response(
            StatusCode::CREATED,
            &imposter_json(&imposter, base_url, ImposterQueryParams::default()),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /imposters
pub fn handle_list(
    registry: &Arc<ImposterRegistry>,
    query: Option<&str>,
    base_url: &str,
) -> Response<Full<Bytes>> {
    let params = ImposterQueryParams::parse(query);
    let imposters = registry.get_all();

    let body = if params.replayable {
        let configs: Vec<Value> = imposters
            .iter()
            .map(|imposter| imposter_json(imposter, base_url, params))
            .collect();
        json!({ "imposters": configs })
    } else {
        let summaries: Vec<ImposterSummary> = imposters
            .iter()
            .map(|imposter| ImposterSummary {
                protocol: imposter.protocol().to_string(),
                port: imposter.port(),
                name: imposter.name().map(str::to_string),
                number_of_requests: imposter.request_count(),
                links: make_imposter_links(base_url, imposter.port()),
            })
            .collect();
        json!({ "imposters": summaries })
    };
    json_response(StatusCode::OK, &body)
}

/// PUT /imposters — replace the whole collection. The body is either
/// `{"imposters": [...]}` or a bare array.
pub async fn handle_replace_all(
    req: Request<Incoming>,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return error_response(&EngineError::InvalidJson(format!("unable to parse body: {e}")))
        }
    };
    let configs: Vec<ImposterConfig> = {
        let raw = match parsed {
            Value::Object(mut obj) => obj.remove("imposters").unwrap_or(Value::Array(Vec::new())),
            array @ Value::Array(_) => array,
            _ => {
                return error_response(&EngineError::InvalidJson(
                    "body must be an object or an array".to_string(),
                ))
            }
        };
        match serde_json::from_value(raw) {
            Ok(configs) => configs,
            Err(e) => {
                return error_response(&EngineError::InvalidJson(format!(
                    "unable to parse imposters: {e}"
                )))
            }
        }
    };

    registry.delete_all();
    let mut created = Vec::new();
    for config in configs {
        match registry.create(config).await {
            Ok(imposter) => created.push(imposter),
            Err(e) => return error_response(&e),
        }
    }

    let details: Vec<Value> = created
        .iter()
        .map(|imposter| imposter_json(imposter, base_url, ImposterQueryParams::default()))
        .collect();
    json_response(StatusCode::OK, &json!({ "imposters": details }))
}

/// DELETE /imposters
pub fn handle_delete_all(
    registry: &Arc<ImposterRegistry>,
    base_url: &str,
) -> Response<Full<Bytes>> {
    let deleted = registry.delete_all();
    let replayable = ImposterQueryParams {
        replayable: true,
        remove_proxies: false,
    };
    let configs: Vec<Value> = deleted
        .iter()
        .map(|imposter| imposter_json(imposter, base_url, replayable))
        .collect();
    json_response(StatusCode::OK, &json!({ "imposters": configs }))
}

/// GET /imposters/{port}
pub fn handle_get(
    port: u16,
    query: Option<&str>,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    let params = ImposterQueryParams::parse(query);
    match registry.get(port) {
        Ok(imposter) => json_response(StatusCode::OK, &imposter_json(&imposter, base_url, params)),
        Err(e) => error_response(&e),
    }
}

/// DELETE /imposters/{port}. Deleting an unknown imposter deliberately
/// answers 200 with an empty object so teardown scripts can run twice.
pub fn handle_delete(
    port: u16,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    match registry.delete(port) {
        Ok(imposter) => {
            info!("deleted imposter on port {port}");
            json_response(
                StatusCode::OK,
                &imposter_json(&imposter, base_url, ImposterQueryParams::default()),
            )
        }
        Err(EngineError::MissingResource(_)) => json_response(StatusCode::OK, &json!({})),
        Err(e) => error_response(&e),
    }
}

/// DELETE /imposters/{port}/savedRequests
pub fn handle_clear_requests(
    port: u16,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    match registry.get(port) {
        Ok(imposter) => {
            imposter.reset_requests();
            json_response(
                StatusCode::OK,
                &imposter_json(&imposter, base_url, ImposterQueryParams::default()),
            )
        }
        Err(e) => error_response(&e),
    }
}

/// DELETE /imposters/{port}/savedProxyResponses
pub fn handle_clear_proxy_responses(
    port: u16,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    match registry.get(port) {
        Ok(imposter) => {
            imposter.delete_saved_proxy_responses();
            json_response(
                StatusCode::OK,
                &imposter_json(&imposter, base_url, ImposterQueryParams::default()),
            )
        }
        Err(e) => error_response(&e),
    }
}
