//! Wire shapes and response helpers for the management API.

use crate::errors::{EngineError, ErrorEnvelope};
use crate::imposter::core::Imposter;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};

/// Hypermedia link.
#[derive(Debug, Serialize, Clone)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ImposterLinks {
    #[serde(rename = "self")]
    pub self_link: Link,
    pub stubs: Link,
}

/// Summary row for `GET /imposters`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImposterSummary {
    pub protocol: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub number_of_requests: u64,
    #[serde(rename = "_links")]
    pub links: ImposterLinks,
}

/// Query parameters understood by the imposter read endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImposterQueryParams {
    pub replayable: bool,
    pub remove_proxies: bool,
}

impl ImposterQueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let mut params = Self::default();
        if let Some(query) = query {
            for pair in query.split('&') {
                match pair {
                    "replayable=true" => params.replayable = true,
                    "removeProxies=true" => params.remove_proxies = true,
                    _ => {}
                }
            }
        }
        params
    }
}

pub fn make_imposter_links(base_url: &str, port: u16) -> ImposterLinks {
    ImposterLinks {
        self_link: Link {
            href: format!("{base_url}/imposters/{port}"),
        },
        stubs: Link {
            href: format!("{base_url}/imposters/{port}/stubs"),
        },
    }
}

/// Render an imposter for the API.
///
/// The replayable variant is a valid config for `PUT /imposters`: no
/// request log, no debug matches, no hypermedia. The full variant carries
/// the counter, recorded requests and `_links`.
pub fn imposter_json(imposter: &Imposter, base_url: &str, params: ImposterQueryParams) -> Value {
    let port = imposter.port();
    let mut stubs = imposter.stubs.get_all();
    if params.remove_proxies {
        stubs.retain(|stub| !stub.is_proxy);
    }

    if params.replayable {
        let mut config = imposter.to_config();
        config.stubs = stubs;
        let mut value = serde_json::to_value(&config).unwrap_or_else(|_| json!({}));
        if let Some(stub_values) = value.get_mut("stubs").and_then(Value::as_array_mut) {
            for stub in stub_values {
                if let Some(obj) = stub.as_object_mut() {
                    obj.remove("matches");
                }
            }
        }
        return value;
    }

    let stub_values: Vec<Value> = stubs
        .iter()
        .enumerate()
        .map(|(index, stub)| {
            let mut value = serde_json::to_value(stub).unwrap_or_else(|_| json!({}));
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "_links".to_string(),
                    json!({"self": {"href": format!("{base_url}/imposters/{port}/stubs/{index}")}}),
                );
            }
            value
        })
        .collect();

    let mut detail = json!({
        "protocol": imposter.protocol(),
        "port": port,
        "numberOfRequests": imposter.request_count(),
        "recordRequests": imposter.records_requests(),
        "requests": imposter.stubs.load_requests(),
        "stubs": stub_values,
        "_links": make_imposter_links(base_url, port),
    });
    if let Some(name) = imposter.name() {
        detail["name"] = json!(name);
    }
    detail
}

/// Base URL clients should see in hypermedia, derived from the Host header.
pub fn get_base_url(req: &Request<Incoming>) -> String {
    req.headers()
        .get("host")
        .and_then(|host| host.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_else(|| "http://localhost:2525".to_string())
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| fallback_500())
}

/// Render an engine error as the standard envelope.
pub fn error_response(err: &EngineError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &ErrorEnvelope::from_error(err))
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(&EngineError::MissingResource("no such resource".to_string()))
}

pub fn fallback_500() -> Response<Full<Bytes>> {
    Response::new(Full::new(Bytes::from_static(b"Internal Server Error")))
}

/// Collect the request body, surfacing failures as bad data.
pub async fn collect_body(req: Request<Incoming>) -> Result<Bytes, EngineError> {
    use http_body_util::BodyExt;
    req.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| EngineError::Validation(format!("failed to read request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imposter::types::ImposterConfig;

    #[test]
    fn test_query_params_parse() {
        let params = ImposterQueryParams::parse(Some("replayable=true&removeProxies=true"));
        assert!(params.replayable);
        assert!(params.remove_proxies);

        let params = ImposterQueryParams::parse(Some("replayable=false"));
        assert!(!params.replayable);

        let params = ImposterQueryParams::parse(None);
        assert!(!params.replayable);
        assert!(!params.remove_proxies);
    }

    #[test]
    fn test_make_imposter_links() {
        let links = make_imposter_links("http://localhost:2525", 4545);
        assert_eq!(links.self_link.href, "http://localhost:2525/imposters/4545");
        assert_eq!(links.stubs.href, "http://localhost:2525/imposters/4545/stubs");
    }

    #[test]
    fn test_imposter_json_variants() {
        let config: ImposterConfig = serde_json::from_value(serde_json::json!({
            "protocol": "http",
            "port": 4545,
            "name": "orders",
            "stubs": [{"responses": [{"is": {"statusCode": 200}}]}]
        }))
        .unwrap();
        let imposter = Imposter::new(config, false);

        let full = imposter_json(&imposter, "http://localhost:2525", ImposterQueryParams::default());
        assert_eq!(full["port"], 4545);
        assert_eq!(full["name"], "orders");
        assert!(full["_links"]["self"]["href"].is_string());
        assert!(full["stubs"][0]["_links"]["self"].is_string() || full["stubs"][0]["_links"]["self"]["href"].is_string());

        let replayable = imposter_json(
            &imposter,
            "http://localhost:2525",
            ImposterQueryParams {
                replayable: true,
                remove_proxies: false,
            },
        );
        assert!(replayable.get("_links").is_none());
        assert!(replayable.get("requests").is_none());
        assert!(replayable["stubs"][0].get("_links").is_none());
    }

    #[test]
    fn test_error_response_envelope() {
        let response = error_response(&EngineError::MissingResource("no imposter on port 1".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
