//! Stub index operations on a live imposter.

use crate::admin::types::*;
use crate::errors::EngineError;
use crate::imposter::registry::{validate_stub, ImposterRegistry};
use crate::imposter::types::Stub;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct StubEnvelope {
    stub: Stub,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Deserialize)]
struct StubsEnvelope {
    stubs: Vec<Stub>,
}

/// PUT /imposters/{port}/stubs — replace the whole list.
pub async fn handle_replace_all(
    port: u16,
    req: Request<Incoming>,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    let imposter = match registry.get(port) {
        Ok(imposter) => imposter,
        Err(e) => return error_response(&e),
    };
    let body = match collect_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };
    let envelope: StubsEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return error_response(&EngineError::InvalidJson(format!(
                "unable to parse stubs: {e}"
            )))
        }
    };
    for stub in &envelope.stubs {
        if let Err(e) = validate_stub(stub) {
            return error_response(&e);
        }
    }
    imposter.replace_all_stubs(envelope.stubs);
    json_response(
        StatusCode::OK,
        &imposter_json(&imposter, base_url, ImposterQueryParams::default()),
    )
}

/// POST /imposters/{port}/stubs — add one, optionally at `?index=N` (the
/// body's `index` field is honored as well).
pub async fn handle_add(
    port: u16,
    req: Request<Incoming>,
    query_index: Option<usize>,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    let imposter = match registry.get(port) {
        Ok(imposter) => imposter,
        Err(e) => return error_response(&e),
    };
    let body = match collect_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };
    let envelope: StubEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return error_response(&EngineError::InvalidJson(format!(
                "unable to parse stub: {e}"
            )))
        }
    };
    if let Err(e) = validate_stub(&envelope.stub) {
        return error_response(&e);
    }
    imposter.add_stub(envelope.stub, query_index.or(envelope.index));
    json_response(
        StatusCode::OK,
        &imposter_json(&imposter, base_url, ImposterQueryParams::default()),
    )
}

/// PUT /imposters/{port}/stubs/{index} — replace one. The body is either
/// `{"stub": ...}` or the bare stub.
pub async fn handle_replace(
    port: u16,
    index: usize,
    req: Request<Incoming>,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    let imposter = match registry.get(port) {
        Ok(imposter) => imposter,
        Err(e) => return error_response(&e),
    };
    let body = match collect_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };
    let stub = match serde_json::from_slice::<StubEnvelope>(&body) {
        Ok(envelope) => envelope.stub,
        Err(_) => match serde_json::from_slice::<Stub>(&body) {
            Ok(stub) => stub,
            Err(e) => {
                return error_response(&EngineError::InvalidJson(format!(
                    "unable to parse stub: {e}"
                )))
            }
        },
    };
    if let Err(e) = validate_stub(&stub) {
        return error_response(&e);
    }
    match imposter.replace_stub(stub, index) {
        Ok(()) => json_response(
            StatusCode::OK,
            &imposter_json(&imposter, base_url, ImposterQueryParams::default()),
        ),
        Err(e) => error_response(&e),
    }
}

/// DELETE /imposters/{port}/stubs/{index}
pub fn handle_delete(
    port: u16,
    index: usize,
    base_url: &str,
    registry: &Arc<ImposterRegistry>,
) -> Response<Full<Bytes>> {
    let imposter = match registry.get(port) {
        Ok(imposter) => imposter,
        Err(e) => return error_response(&e),
    };
    match imposter.delete_stub(index) {
        Ok(()) => json_response(
            StatusCode::OK,
            &imposter_json(&imposter, base_url, ImposterQueryParams::default()),
        ),
        Err(e) => error_response(&e),
    }
}
