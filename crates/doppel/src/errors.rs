//! Engine error kinds and their HTTP mapping.
//!
//! Every error surfaced through the management API or an imposter boundary
//! carries one of the wire-level codes below, rendered inside the standard
//! `{"errors": [...]}` envelope.

use serde::Serialize;

/// Error kinds understood by the management plane.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Input validation failure: port in use, bad stub index, schema violation.
    #[error("{0}")]
    Validation(String),

    /// A request body that could not be parsed as JSON.
    #[error("{0}")]
    InvalidJson(String),

    /// Lookup of an imposter (or other resource) that does not exist.
    #[error("{0}")]
    MissingResource(String),

    /// A script feature was used while injection is disabled, or an inject
    /// response failed at evaluation time.
    #[error("{0}")]
    InvalidInjection(String),

    /// Unknown protocol or listener bind failure.
    #[error("{0}")]
    CannotStartServer(String),

    /// IP whitelist / API key gate rejection.
    #[error("{0}")]
    InsufficientAccess(String),

    /// Script runtime failure inside decorate or middleware. Never surfaced
    /// to clients; callers log it and continue with the unmodified value.
    #[error("{0}")]
    Script(String),
}

impl EngineError {
    /// Wire-level error code used in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "bad data",
            EngineError::InvalidJson(_) => "invalid JSON",
            EngineError::MissingResource(_) => "no such resource",
            EngineError::InvalidInjection(_) => "invalid injection",
            EngineError::CannotStartServer(_) => "cannot start server",
            EngineError::InsufficientAccess(_) => "insufficient access",
            EngineError::Script(_) => "script error",
        }
    }

    /// HTTP status the management plane answers with for this kind.
    pub fn status(&self) -> u16 {
        match self {
            EngineError::Validation(_)
            | EngineError::InvalidJson(_)
            | EngineError::InvalidInjection(_) => 400,
            EngineError::MissingResource(_) => 404,
            EngineError::InsufficientAccess(_) => 403,
            EngineError::CannotStartServer(_) | EngineError::Script(_) => 500,
        }
    }

    pub fn invalid_injection() -> Self {
        EngineError::InvalidInjection(
            "JavaScript injection is not allowed unless the server is started with the --allow-injection flag"
                .to_string(),
        )
    }
}

/// One entry of the error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The envelope every 4xx/5xx management response uses.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorDetail>,
}

impl ErrorEnvelope {
    pub fn from_error(err: &EngineError) -> Self {
        ErrorEnvelope {
            errors: vec![ErrorDetail {
                code: err.code().to_string(),
                message: err.to_string(),
                source: None,
                details: None,
            }],
        }
    }
}
