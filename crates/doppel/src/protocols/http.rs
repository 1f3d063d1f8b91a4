//! HTTP wire translation: decode hyper requests into the protocol-agnostic
//! model, encode resolved responses back out, and log the access line.

use crate::errors::{EngineError, ErrorEnvelope};
use crate::imposter::core::Imposter;
use crate::imposter::types::Encoding;
use crate::model::{Request, Response};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{header, Method, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info};

/// Serve one accepted connection until it closes.
pub async fn serve_connection<I>(io: TokioIo<I>, imposter: Arc<Imposter>, addr: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let imposter = Arc::clone(&imposter);
        async move { handle_request(req, imposter, addr).await }
    });
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
    {
        debug!("connection error: {e}");
    }
}

async fn handle_request(
    req: hyper::Request<Incoming>,
    imposter: Arc<Imposter>,
    addr: SocketAddr,
) -> Result<hyper::Response<Full<Bytes>>, std::convert::Infallible> {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let port = imposter.port();

    // CORS preflight short-circuits before the engine sees the request.
    if imposter.allows_cors() && method == Method::OPTIONS {
        return Ok(with_cors(
            hyper::Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::new()))
                .unwrap_or_else(|_| fallback_500()),
        ));
    }

    let mut request = match build_request(req, addr).await {
        Ok(r) => r,
        Err(e) => {
            error!("failed to read request: {e}");
            return Ok(plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            ));
        }
    };

    let result = imposter.get_response_for(&mut request).await;
    let http_response = match result {
        Ok(response) if response.blocked => plain_response(StatusCode::UNAUTHORIZED, "Unauthorized"),
        Ok(response) => encode_response(&response, imposter.encoding()),
        Err(e @ EngineError::InvalidInjection(_)) => {
            error!("{e}");
            error_envelope_response(&e)
        }
        Err(e) => {
            error!("error generating response: {e}");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    };
    let http_response = if imposter.allows_cors() {
        with_cors(http_response)
    } else {
        http_response
    };

    let elapsed = start.elapsed();
    let slow = if elapsed.as_millis() > 100 { " (SLOW)" } else { "" };
    info!("[imposter:{port}] {method} {uri} took {elapsed:?}{slow}");
    Ok(http_response)
}

/// Decode the wire request into the canonical model.
async fn build_request(
    req: hyper::Request<Incoming>,
    addr: SocketAddr,
) -> Result<Request, hyper::Error> {
    let method = req.method().to_string();
    let uri = req.uri().clone();
    let headers = headers_to_map(req.headers());
    let body_bytes = req.into_body().collect().await?.to_bytes();

    Ok(Request {
        protocol: "http".to_string(),
        ip: addr.ip().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        method,
        path: uri.path().to_string(),
        query: parse_query(uri.query()),
        headers,
        body: parse_body(&body_bytes),
        ..Default::default()
    })
}

/// Parse a query string: singletons collapse to strings, repeated keys keep
/// a list, values are percent-decoded.
pub fn parse_query(query: Option<&str>) -> Map<String, Value> {
    let mut map = Map::new();
    let Some(query) = query else {
        return map;
    };
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| value.to_string());
        insert_multi(&mut map, key, value);
    }
    map
}

/// Headers keep the conventional Title-Case spelling; repeated headers keep
/// a list.
pub fn headers_to_map(headers: &hyper::HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, value) in headers {
        insert_multi(
            &mut map,
            title_case(name.as_str()),
            value.to_str().unwrap_or("").to_string(),
        );
    }
    map
}

/// First value stays a string; repeats turn the slot into a list.
fn insert_multi(map: &mut Map<String, Value>, key: String, value: String) {
    use serde_json::map::Entry;
    match map.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(Value::String(value));
        }
        Entry::Occupied(mut slot) => match slot.get_mut() {
            Value::String(existing) => {
                let first = std::mem::take(existing);
                *slot.get_mut() =
                    Value::Array(vec![Value::String(first), Value::String(value)]);
            }
            Value::Array(list) => list.push(Value::String(value)),
            _ => {}
        },
    }
}

/// `content-type` -> `Content-Type`.
pub fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// JSON bodies become structured values; anything else stays a string,
/// empty bodies are null.
pub fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    let text = String::from_utf8_lossy(bytes).into_owned();
    match serde_json::from_str::<Value>(&text) {
        Ok(parsed) => parsed,
        Err(_) => Value::String(text),
    }
}

/// Encode a resolved response onto the wire.
pub fn encode_response(
    response: &Response,
    encoding: Encoding,
) -> hyper::Response<Full<Bytes>> {
    let mut builder = hyper::Response::builder().status(
        StatusCode::from_u16(response.effective_status()).unwrap_or(StatusCode::OK),
    );

    let mut has_content_type = false;
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("content-type") {
            has_content_type = true;
        }
        match value {
            Value::String(s) => builder = builder.header(name.as_str(), s.as_str()),
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(s) => builder = builder.header(name.as_str(), s.as_str()),
                        other => builder = builder.header(name.as_str(), other.to_string()),
                    }
                }
            }
            other => builder = builder.header(name.as_str(), other.to_string()),
        }
    }

    let body = match &response.body {
        Value::Null => Bytes::new(),
        Value::String(s) => match encoding {
            // Binary imposters carry base64 in string fields; the wire gets
            // the raw bytes.
            Encoding::Base64 => {
                use base64::Engine as _;
                match base64::engine::general_purpose::STANDARD.decode(s.as_bytes()) {
                    Ok(decoded) => Bytes::from(decoded),
                    Err(_) => Bytes::from(s.clone()),
                }
            }
            Encoding::Utf8 => Bytes::from(s.clone()),
        },
        structured => {
            if !has_content_type {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
            }
            Bytes::from(serde_json::to_vec(structured).unwrap_or_default())
        }
    };

    builder.body(Full::new(body)).unwrap_or_else(|_| fallback_500())
}

fn with_cors(mut response: hyper::Response<Full<Bytes>>) -> hyper::Response<Full<Bytes>> {
    let headers = response.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        hyper::header::HeaderValue::from_static("*"),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        hyper::header::HeaderValue::from_static("GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        hyper::header::HeaderValue::from_static(
            "Origin, X-Requested-With, Content-Type, Accept, Authorization",
        ),
    );
    response
}

fn plain_response(status: StatusCode, body: &'static str) -> hyper::Response<Full<Bytes>> {
    hyper::Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap_or_else(|_| fallback_500())
}

fn error_envelope_response(err: &EngineError) -> hyper::Response<Full<Bytes>> {
    let envelope = ErrorEnvelope::from_error(err);
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    hyper::Response::builder()
        .status(StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| fallback_500())
}

fn fallback_500() -> hyper::Response<Full<Bytes>> {
    hyper::Response::new(Full::new(Bytes::from_static(b"Internal Server Error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_query_collapses_singletons() {
        let map = parse_query(Some("name=Alice&tag=a&tag=b"));
        assert_eq!(map["name"], json!("Alice"));
        assert_eq!(map["tag"], json!(["a", "b"]));
    }

    #[test]
    fn test_parse_query_percent_decoding() {
        let map = parse_query(Some("greeting=hello%20world"));
        assert_eq!(map["greeting"], json!("hello world"));
    }

    #[test]
    fn test_parse_body_json_vs_text() {
        assert_eq!(parse_body(b""), Value::Null);
        assert_eq!(parse_body(b"{\"a\": 1}"), json!({"a": 1}));
        assert_eq!(parse_body(b"plain"), json!("plain"));
        assert_eq!(parse_body(b"42"), json!(42));
    }

    #[test]
    fn test_title_case_headers() {
        assert_eq!(title_case("content-type"), "Content-Type");
        assert_eq!(title_case("x-request-id"), "X-Request-Id");
    }

    #[test]
    fn test_encode_response_defaults() {
        let response = Response::default();
        let encoded = encode_response(&response, Encoding::Utf8);
        assert_eq!(encoded.status(), StatusCode::OK);
    }

    #[test]
    fn test_encode_structured_body_sets_content_type() {
        let response = Response {
            status_code: 200,
            body: json!({"ok": true}),
            ..Default::default()
        };
        let encoded = encode_response(&response, Encoding::Utf8);
        assert_eq!(
            encoded.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_encode_keeps_existing_content_type() {
        let response = Response {
            status_code: 200,
            headers: serde_json::from_value(json!({"Content-Type": "text/plain"})).unwrap(),
            body: json!({"still": "json"}),
            ..Default::default()
        };
        let encoded = encode_response(&response, Encoding::Utf8);
        let values: Vec<_> = encoded.headers().get_all(header::CONTENT_TYPE).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "text/plain");
    }

    #[test]
    fn test_encode_list_valued_header() {
        let response = Response {
            status_code: 200,
            headers: serde_json::from_value(json!({"Set-Cookie": ["a=1", "b=2"]})).unwrap(),
            ..Default::default()
        };
        let encoded = encode_response(&response, Encoding::Utf8);
        let cookies: Vec<_> = encoded.headers().get_all("Set-Cookie").iter().collect();
        assert_eq!(cookies.len(), 2);
    }

    #[test]
    fn test_encode_binary_mode_decodes_base64() {
        let response = Response {
            status_code: 200,
            body: json!("aGVsbG8="),
            ..Default::default()
        };
        let encoded = encode_response(&response, Encoding::Base64);
        // The body is the raw decoded bytes.
        let body = encoded.into_body();
        let collected = futures_body_bytes(body);
        assert_eq!(collected.as_ref(), b"hello");
    }

    fn futures_body_bytes(body: Full<Bytes>) -> Bytes {
        use http_body_util::BodyExt;
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async move { body.collect().await.unwrap().to_bytes() })
    }
}
