//! Configuration types for imposters: stubs, predicates, response configs
//! and behaviors, with their wire (camelCase JSON) shapes.
//!
//! Predicates and response configs are polymorphic on the wire: exactly one
//! operator key is present per node. They deserialize into structs with
//! optional fields, and expose the active case through an accessor enum so
//! evaluation is a single match instead of a chain of presence tests.

use crate::errors::EngineError;
use crate::model::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

fn default_protocol() -> String {
    "http".to_string()
}

/// Configuration for creating an imposter.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImposterConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Port to bind. Absent or zero asks the OS for an ephemeral port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub record_requests: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stubs: Vec<Stub>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_response: Option<Response>,
    #[serde(
        default,
        rename = "allowCORS",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub allow_cors: bool,
    /// Middleware function source, evaluated before stub matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware: Option<String>,

    // TLS (https protocol)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mutual_auth: bool,

    /// "binary" switches string fields to base64 and rejects `matches`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl ImposterConfig {
    /// Encoding derived from `mode`: base64 for binary imposters, utf8 else.
    pub fn encoding(&self) -> Encoding {
        match self.mode.as_deref() {
            Some("binary") => Encoding::Base64,
            _ => Encoding::Utf8,
        }
    }
}

/// String-field encoding for an imposter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Base64,
}

/// A match/respond rule: predicates select, responses supply.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Stub {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicates: Vec<Predicate>,
    #[serde(default)]
    pub responses: Vec<ResponseConfig>,
    /// Debug trace of matched requests, populated when recording matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<Value>,
    /// True when this stub was recorded by a proxy response.
    #[serde(skip)]
    pub is_proxy: bool,
}

/// Selector applied before comparison: reduce the actual value by an XPath
/// expression over `request.body`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XPathSelector {
    pub selector: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ns: HashMap<String, String>,
}

/// Selector applied before comparison: reduce the actual value by a JSONPath
/// traversal over the request map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonPathSelector {
    pub selector: String,
}

/// A boolean condition over a normalized request. Exactly one operator field
/// is set per node; the modifiers apply to whichever operator is present.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Predicate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<Predicate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<Predicate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject: Option<String>,

    // Modifiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<XPathSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonpath: Option<JsonPathSelector>,
}

/// The active operator of a predicate node.
pub enum PredicateOperator<'a> {
    Equals(&'a Value),
    DeepEquals(&'a Value),
    Contains(&'a Value),
    StartsWith(&'a Value),
    EndsWith(&'a Value),
    Matches(&'a Value),
    Exists(&'a Value),
    Not(&'a Predicate),
    Or(&'a [Predicate]),
    And(&'a [Predicate]),
    Inject(&'a str),
    /// No operator key present; such a node matches nothing.
    None,
}

impl Predicate {
    pub fn operator(&self) -> PredicateOperator<'_> {
        if let Some(v) = &self.equals {
            PredicateOperator::Equals(v)
        } else if let Some(v) = &self.deep_equals {
            PredicateOperator::DeepEquals(v)
        } else if let Some(v) = &self.contains {
            PredicateOperator::Contains(v)
        } else if let Some(v) = &self.starts_with {
            PredicateOperator::StartsWith(v)
        } else if let Some(v) = &self.ends_with {
            PredicateOperator::EndsWith(v)
        } else if let Some(v) = &self.matches {
            PredicateOperator::Matches(v)
        } else if let Some(v) = &self.exists {
            PredicateOperator::Exists(v)
        } else if let Some(p) = &self.not {
            PredicateOperator::Not(p)
        } else if let Some(ps) = &self.or {
            PredicateOperator::Or(ps)
        } else if let Some(ps) = &self.and {
            PredicateOperator::And(ps)
        } else if let Some(src) = &self.inject {
            PredicateOperator::Inject(src)
        } else {
            PredicateOperator::None
        }
    }

    /// Case sensitivity is opt-in: comparisons are case-insensitive unless
    /// the predicate says `caseSensitive: true`.
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive == Some(true)
    }
}

/// One response slot of a stub. Exactly one of `is` / `proxy` / `inject` /
/// `fault` is set, optionally decorated with behaviors and a repeat count.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResponseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is: Option<Response>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub behaviors: Vec<Behavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,
}

/// The active resolution kind of a response config.
pub enum ResponseKind<'a> {
    Is(&'a Response),
    Proxy(&'a ProxyConfig),
    Inject(&'a str),
    Fault(&'a FaultConfig),
    /// Nothing set; resolves to an empty 200.
    Empty,
}

impl ResponseConfig {
    pub fn kind(&self) -> ResponseKind<'_> {
        if let Some(r) = &self.is {
            ResponseKind::Is(r)
        } else if let Some(p) = &self.proxy {
            ResponseKind::Proxy(p)
        } else if let Some(src) = &self.inject {
            ResponseKind::Inject(src)
        } else if let Some(f) = &self.fault {
            ResponseKind::Fault(f)
        } else {
            ResponseKind::Empty
        }
    }

    /// Rejects configs that set more than one of is/proxy/inject/fault.
    pub fn validate(&self) -> Result<(), EngineError> {
        let set = [
            self.is.is_some(),
            self.proxy.is_some(),
            self.inject.is_some(),
            self.fault.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();
        if set > 1 {
            return Err(EngineError::Validation(
                "each response must set at most one of is, proxy, inject, fault".to_string(),
            ));
        }
        Ok(())
    }

    /// How many consecutive calls this config serves before rotation
    /// advances.
    pub fn repeat_count(&self) -> u32 {
        self.repeat.unwrap_or(1).max(1)
    }
}

/// Proxy response configuration. Declared for configuration compatibility;
/// resolution currently answers with a documented placeholder.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicate_generators: Vec<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub add_wait_behavior: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_decorate_behavior: Option<String>,
}

/// Fault response configuration, same placeholder status as proxy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FaultConfig {
    pub fault: String,
}

/// A post-resolution transform on the response. One action per entry,
/// applied in declared order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Behavior {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decorate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<Vec<CopyBehavior>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_transform: Option<String>,
}

/// Latency behavior: suspend the handling task for this long.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WaitBehavior {
    #[serde(default)]
    pub milliseconds: u64,
}

/// Copy a request value into the response by token replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyBehavior {
    /// Dotted request path: `path`, `query.name`, `headers.X-Id`, `body.id`.
    pub from: String,
    /// Token literal replaced everywhere it occurs in the response.
    pub into: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub using: Option<CopySelector>,
}

/// Value reduction applied to the copied source before replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopySelector {
    pub method: String,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SelectorOptions>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ns: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SelectorOptions {
    #[serde(default)]
    pub ignore_case: bool,
}

/// Keyed join against an external CSV source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupBehavior {
    pub key: LookupKey,
    pub from_data_source: DataSourceConfig,
    pub into: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupKey {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub using: Option<CopySelector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub csv: CsvDataSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvDataSource {
    pub path: String,
    pub key_column: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}
