//! Route dispatch for the management API.

use crate::admin::handlers::{imposters, stubs, system};
use crate::admin::server::ServerOptions;
use crate::admin::types::{error_response, get_base_url, not_found};
use crate::imposter::registry::ImposterRegistry;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Routes under `/imposters/{port}`.
enum ImposterRoute {
    Root,
    Stubs,
    StubByIndex(usize),
    SavedRequests,
    SavedProxyResponses,
}

impl ImposterRoute {
    fn parse(segments: &[&str]) -> Option<Self> {
        match segments {
            [] => Some(ImposterRoute::Root),
            ["stubs"] => Some(ImposterRoute::Stubs),
            ["stubs", index] => index.parse().ok().map(ImposterRoute::StubByIndex),
            ["savedRequests"] => Some(ImposterRoute::SavedRequests),
            ["savedProxyResponses"] => Some(ImposterRoute::SavedProxyResponses),
            _ => None,
        }
    }
}

/// Entry point for every management request.
pub async fn route_request(
    req: Request<Incoming>,
    addr: SocketAddr,
    registry: Arc<ImposterRegistry>,
    options: Arc<ServerOptions>,
) -> Response<Full<Bytes>> {
    if let Err(e) = options.policy.check(&addr, req.headers()) {
        return error_response(&e);
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let base_url = get_base_url(&req);
    debug!("management: {method} {path}");

    // The management plane is always CORS-friendly.
    if method == Method::OPTIONS {
        return with_cors(
            Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::new()))
                .unwrap_or_else(|_| crate::admin::types::fallback_500()),
            &options,
        );
    }

    let response = dispatch(
        &method,
        &path,
        query.as_deref(),
        req,
        &base_url,
        &registry,
        &options,
    )
    .await;
    with_cors(response, &options)
}

async fn dispatch(
    method: &Method,
    path: &str,
    query: Option<&str>,
    req: Request<Incoming>,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
    options: &Arc<ServerOptions>,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/") => return system::handle_root(base_url),
        (&Method::GET, "/config") => return system::handle_config(options),
        (&Method::GET, "/logs") => return system::handle_logs(query),
        _ => {}
    }

    if path == "/imposters" {
        return match *method {
            Method::GET => imposters::handle_list(registry, query, base_url),
            Method::POST => imposters::handle_create(req, base_url, registry).await,
            Method::PUT => imposters::handle_replace_all(req, base_url, registry).await,
            Method::DELETE => imposters::handle_delete_all(registry, base_url),
            _ => not_found(),
        };
    }

    if let Some(rest) = path.strip_prefix("/imposters/") {
        return route_imposter(method, rest, query, req, base_url, registry).await;
    }

    not_found()
}

async fn route_imposter(
    method: &Method,
    path: &str,
    query: Option<&str>,
    req: Request<Incoming>,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((port_segment, rest)) = segments.split_first() else {
        return not_found();
    };
    let Ok(port) = port_segment.parse::<u16>() else {
        return error_response(&crate::errors::EngineError::Validation(format!(
            "invalid port: {port_segment}"
        )));
    };
    let Some(route) = ImposterRoute::parse(rest) else {
        return not_found();
    };

    match (method, route) {
        (&Method::GET, ImposterRoute::Root) => {
            imposters::handle_get(port, query, base_url, registry)
        }
        (&Method::DELETE, ImposterRoute::Root) => imposters::handle_delete(port, base_url, registry),

        (&Method::PUT, ImposterRoute::Stubs) => {
            stubs::handle_replace_all(port, req, base_url, registry).await
        }
        (&Method::POST, ImposterRoute::Stubs) => {
            stubs::handle_add(port, req, parse_index(query), base_url, registry).await
        }

        (&Method::PUT, ImposterRoute::StubByIndex(index)) => {
            stubs::handle_replace(port, index, req, base_url, registry).await
        }
        (&Method::DELETE, ImposterRoute::StubByIndex(index)) => {
            stubs::handle_delete(port, index, base_url, registry)
        }

        (&Method::DELETE, ImposterRoute::SavedRequests) => {
            imposters::handle_clear_requests(port, base_url, registry)
        }
        (&Method::DELETE, ImposterRoute::SavedProxyResponses) => {
            imposters::handle_clear_proxy_responses(port, base_url, registry)
        }

        _ => not_found(),
    }
}

fn parse_index(query: Option<&str>) -> Option<usize> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("index="))
        .and_then(|value| value.parse().ok())
}

fn with_cors(
    mut response: Response<Full<Bytes>>,
    options: &ServerOptions,
) -> Response<Full<Bytes>> {
    let origin = options.origin.as_deref().unwrap_or("*");
    let headers = response.headers_mut();
    if let Ok(value) = hyper::header::HeaderValue::from_str(origin) {
        headers.insert("Access-Control-Allow-Origin", value);
    }
    headers.insert(
        "Access-Control-Allow-Methods",
        hyper::header::HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        hyper::header::HeaderValue::from_static("*"),
    );
    response
}
