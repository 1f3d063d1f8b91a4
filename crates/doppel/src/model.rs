//! Protocol-agnostic request and response value types.
//!
//! Requests carry the canonical JSON shape every other component works
//! against: predicates match on it, scripts receive it, and the management
//! API serializes it. One wrinkle is intentional: bodies received as JSON
//! are parsed into structured form internally, but are always rendered back
//! as the original JSON *string* on the external API, so clients that
//! recorded string bodies keep seeing string bodies.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A request, as seen by every protocol.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,

    // HTTP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub query: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(
        default,
        skip_serializing_if = "Value::is_null",
        serialize_with = "serialize_body_as_text",
        deserialize_with = "deserialize_body"
    )]
    pub body: Value,

    // TCP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,

    // SMTP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub html: String,

    /// Set while validating configs: predicate injections succeed without
    /// being evaluated so syntax errors surface, side effects do not.
    #[serde(skip)]
    pub is_dry_run: bool,
}

impl Request {
    /// The canonical map predicates and scripts operate on. Empty fields are
    /// omitted so `exists` checks behave.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if !self.method.is_empty() {
            map.insert("method".into(), Value::String(self.method.clone()));
        }
        if !self.path.is_empty() {
            map.insert("path".into(), Value::String(self.path.clone()));
        }
        if !self.query.is_empty() {
            map.insert("query".into(), Value::Object(self.query.clone()));
        }
        if !self.headers.is_empty() {
            map.insert("headers".into(), Value::Object(self.headers.clone()));
        }
        if !self.body.is_null() {
            map.insert("body".into(), self.body.clone());
        }
        if !self.data.is_empty() {
            map.insert("data".into(), Value::String(self.data.clone()));
        }
        if !self.ip.is_empty() {
            map.insert("ip".into(), Value::String(self.ip.clone()));
        }
        Value::Object(map)
    }

    /// The request body as text: strings verbatim, structured bodies as
    /// their JSON rendering.
    pub fn body_text(&self) -> String {
        body_to_text(&self.body)
    }
}

fn body_to_text(body: &Value) -> String {
    match body {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Render a structured body as a JSON string on the wire; string bodies pass
/// through untouched.
fn serialize_body_as_text<S: Serializer>(body: &Value, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&body_to_text(body))
}

/// Accept anything on the way in; the adapter decides whether a string body
/// parses as JSON, persisted requests come back as strings.
fn deserialize_body<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
    Value::deserialize(deserializer)
}

/// A response, as produced by stub resolution and consumed by protocols.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    // HTTP
    #[serde(default, skip_serializing_if = "is_zero")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,

    // TCP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,

    // SMTP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response: String,

    // Proxy bookkeeping
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub proxy: Value,
    #[serde(default, rename = "callbackURL", skip_serializing_if = "String::is_empty")]
    pub callback_url: String,
    #[serde(
        default,
        rename = "_proxyResponseTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy_response_time: Option<u64>,

    // Internal
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
}

fn is_zero(n: &u16) -> bool {
    *n == 0
}

impl Response {
    pub fn with_status(status_code: u16) -> Self {
        Response {
            status_code,
            ..Default::default()
        }
    }

    /// Effective status, defaulting unset to 200.
    pub fn effective_status(&self) -> u16 {
        if self.status_code == 0 {
            200
        } else {
            self.status_code
        }
    }

    pub fn body_text(&self) -> String {
        body_to_text(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_body_renders_as_string() {
        let req = Request {
            method: "POST".into(),
            path: "/orders".into(),
            body: json!({"foo": "bar", "num": 123}),
            ..Default::default()
        };
        let wire = serde_json::to_value(&req).unwrap();
        let body = wire["body"].as_str().expect("body must be a string");
        let parsed: Value = serde_json::from_str(body).unwrap();
        assert_eq!(parsed, json!({"foo": "bar", "num": 123}));
    }

    #[test]
    fn test_string_body_passes_through() {
        let req = Request {
            body: Value::String("plain text".into()),
            ..Default::default()
        };
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["body"], "plain text");
    }

    #[test]
    fn test_empty_fields_omitted() {
        let req = Request::default();
        let wire = serde_json::to_value(&req).unwrap();
        let obj = wire.as_object().unwrap();
        assert!(!obj.contains_key("method"));
        assert!(!obj.contains_key("body"));
        assert!(!obj.contains_key("data"));
    }

    #[test]
    fn test_response_status_default() {
        let res = Response::default();
        assert_eq!(res.effective_status(), 200);
        let res = Response::with_status(404);
        assert_eq!(res.effective_status(), 404);
    }

    #[test]
    fn test_response_round_trip() {
        let res = Response {
            status_code: 201,
            headers: serde_json::from_value(json!({"Content-Type": "application/json"})).unwrap(),
            body: json!("{\"ok\":true}"),
            ..Default::default()
        };
        let wire = serde_json::to_string(&res).unwrap();
        let back: Response = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, res);
    }
}
