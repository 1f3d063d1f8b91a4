//! Sandboxed evaluation of user-supplied JavaScript function text.
//!
//! Everything script-shaped in a configuration (predicate `inject`, response
//! `inject`, `decorate` behaviors, imposter `middleware`) flows through the
//! [`ScriptBridge`]. Scripts receive a `config` object whose keys follow the
//! public JSON schema (`request`, `response`, `state`, `logger`), with
//! `console` and a minimal `Buffer` polyfill in scope. Legacy multi-argument
//! signatures are supported via arity detection on the user function.
//!
//! The whole surface is gated by `allowInjection`; with it off every entry
//! point answers *invalid injection*.

mod convert;

pub use convert::{js_to_json, json_to_js, plain_object};

use crate::errors::EngineError;
use crate::model::{Request, Response};
use boa_engine::native_function::NativeFunction;
use boa_engine::{js_string, Context, JsResult, JsValue, Source};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

/// Definitions evaluated before any user code: logger, console and Buffer,
/// all backed by the `__log` / `__atob` / `__btoa` host functions.
const PRELUDE: &str = r#"
var logger = {
    debug: function (msg) { __log('debug', String(msg)); },
    info: function (msg) { __log('info', String(msg)); },
    warn: function (msg) { __log('warn', String(msg)); },
    error: function (msg) { __log('error', String(msg)); }
};
var console = {
    log: function (msg) { __log('info', String(msg)); },
    info: function (msg) { __log('info', String(msg)); },
    warn: function (msg) { __log('warn', String(msg)); },
    error: function (msg) { __log('error', String(msg)); }
};
function __makeBuffer(data) {
    return {
        toString: function (encoding) {
            if (encoding === 'base64') { return __btoa(data); }
            return data;
        }
    };
}
var Buffer = {
    from: function (input, encoding) {
        var data = encoding === 'base64' ? __atob(String(input)) : String(input);
        return __makeBuffer(data);
    },
    alloc: function (size) {
        var data = '';
        for (var i = 0; i < size; i += 1) { data += '\u0000'; }
        return __makeBuffer(data);
    }
};
"#;

/// What a middleware evaluation decided.
pub enum MiddlewareOutcome {
    /// The script returned a response-shaped value; answer with it directly.
    ShortCircuit(Response),
    /// No short-circuit; continue matching with the (possibly modified)
    /// request.
    Continue(Request),
}

/// The embedded script evaluator. Cheap to construct; every evaluation runs
/// in a fresh interpreter context.
pub struct ScriptBridge {
    allow_injection: bool,
}

impl ScriptBridge {
    pub fn new(allow_injection: bool) -> Self {
        ScriptBridge { allow_injection }
    }

    pub fn allows_injection(&self) -> bool {
        self.allow_injection
    }

    /// Evaluate a predicate injection. The user function sees
    /// `config.request` / `config.state` / `config.logger` (or the legacy
    /// `(request, logger)` pair) and must return a boolean; anything else is
    /// coerced to false with a warning.
    pub fn evaluate_predicate(
        &self,
        source: &str,
        request: &Request,
        state: &mut Map<String, Value>,
    ) -> Result<bool, EngineError> {
        self.check_gate()?;
        let wrapper = format!(
            r#"(function () {{
                var fn = {source};
                if (typeof fn !== 'function') {{ throw new Error('predicate injection must evaluate to a function'); }}
                if (fn.length >= 2) {{ return fn(config.request, logger); }}
                return fn(config);
            }})()"#
        );
        let (value, mut context) = self.run(&wrapper, request, None, state)?;
        self.read_back_state(&mut context, state);
        match value.as_boolean() {
            Some(b) => {
                debug!("predicate injection returned {b}");
                Ok(b)
            }
            None => {
                warn!("predicate injection returned a non-boolean value, treating as false");
                Ok(false)
            }
        }
    }

    /// Evaluate a response injection. Supports the modern single-argument
    /// `function (config)` and the legacy `function (request, state, logger)`
    /// shapes.
    pub fn evaluate_inject(
        &self,
        source: &str,
        request: &Request,
        state: &mut Map<String, Value>,
    ) -> Result<Response, EngineError> {
        self.check_gate()?;
        let wrapper = format!(
            r#"(function () {{
                var fn = {source};
                if (typeof fn !== 'function') {{ throw new Error('response injection must evaluate to a function'); }}
                if (fn.length >= 3) {{ return fn(config.request, config.state, logger); }}
                return fn(config);
            }})()"#
        );
        let (value, mut context) = self.run(&wrapper, request, None, state)?;
        self.read_back_state(&mut context, state);
        let json = js_to_json(&mut context, &value)
            .map_err(|e| EngineError::InvalidInjection(format!("injection failed: {e}")))?;
        serde_json::from_value(json).map_err(|e| {
            EngineError::InvalidInjection(format!("injection did not return a response: {e}"))
        })
    }

    /// Evaluate a decorator. A non-nullish object return value replaces the
    /// response; otherwise the in-place mutations to `config.response` win.
    pub fn evaluate_decorate(
        &self,
        source: &str,
        request: &Request,
        response: &Response,
        state: &mut Map<String, Value>,
    ) -> Result<Response, EngineError> {
        self.check_gate()?;
        let wrapper = format!(
            r#"(function () {{
                var fn = {source};
                if (typeof fn !== 'function') {{ throw new Error('decorator must evaluate to a function'); }}
                var result = fn.length >= 3 ? fn(config.request, config.response, logger) : fn(config);
                if (result !== null && result !== undefined && typeof result === 'object') {{ return result; }}
                return config.response;
            }})()"#
        );
        let (value, mut context) = self.run(&wrapper, request, Some(response), state)?;
        self.read_back_state(&mut context, state);
        let json = js_to_json(&mut context, &value)
            .map_err(|e| EngineError::Script(format!("decorate failed: {e}")))?;
        serde_json::from_value(json)
            .map_err(|e| EngineError::Script(format!("decorate produced a malformed response: {e}")))
    }

    /// Evaluate imposter middleware. A map-shaped return value short-circuits
    /// the request; otherwise whatever the script did to `config.request`
    /// carries forward into stub matching.
    pub fn evaluate_middleware(
        &self,
        source: &str,
        request: &Request,
        state: &mut Map<String, Value>,
    ) -> Result<MiddlewareOutcome, EngineError> {
        self.check_gate()?;
        let wrapper = format!(
            r#"(function () {{
                var fn = {source};
                if (typeof fn !== 'function') {{ throw new Error('middleware must evaluate to a function'); }}
                return fn(config, logger);
            }})()"#
        );
        let (value, mut context) = self.run(&wrapper, request, None, state)?;
        self.read_back_state(&mut context, state);

        if value.is_object() {
            let json = js_to_json(&mut context, &value)
                .map_err(|e| EngineError::Script(format!("middleware failed: {e}")))?;
            if let Ok(response) = serde_json::from_value::<Response>(json) {
                info!("middleware short-circuited the request");
                return Ok(MiddlewareOutcome::ShortCircuit(response));
            }
        }

        // Adopt whatever the script did to config.request. Scripts see the
        // body as text, so a JSON body comes back as a string and is parsed
        // into structured form again.
        let mut updated = self
            .read_config_field(&mut context, "request")
            .and_then(|v| serde_json::from_value::<Request>(v).ok())
            .unwrap_or_else(|| request.clone());
        if let Value::String(text) = &updated.body {
            if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) =
                serde_json::from_str::<Value>(text)
            {
                updated.body = parsed;
            }
        }
        Ok(MiddlewareOutcome::Continue(updated))
    }

    fn check_gate(&self) -> Result<(), EngineError> {
        if self.allow_injection {
            Ok(())
        } else {
            Err(EngineError::invalid_injection())
        }
    }

    /// Run a wrapped script with `config` and the prelude in scope, returning
    /// the result value together with the context so callers can read state
    /// back out of it.
    fn run(
        &self,
        wrapper: &str,
        request: &Request,
        response: Option<&Response>,
        state: &Map<String, Value>,
    ) -> Result<(JsValue, Context), EngineError> {
        let mut context = Context::default();
        register_host_functions(&mut context)?;
        context
            .eval(Source::from_bytes(PRELUDE))
            .map_err(|e| EngineError::Script(format!("prelude failed: {e}")))?;

        let mut config = Map::new();
        // The request scripts see follows the public schema, body rendered
        // as a string.
        let request_json = serde_json::to_value(request)
            .map_err(|e| EngineError::Script(format!("request conversion failed: {e}")))?;
        config.insert("request".into(), request_json);
        if let Some(response) = response {
            let response_json = serde_json::to_value(response)
                .map_err(|e| EngineError::Script(format!("response conversion failed: {e}")))?;
            config.insert("response".into(), response_json);
        }
        config.insert("state".into(), Value::Object(state.clone()));

        let config_js = json_to_js(&mut context, &Value::Object(config))
            .map_err(|e| EngineError::Script(format!("config conversion failed: {e}")))?;
        let global = context.global_object();
        global
            .set(js_string!("config"), config_js, false, &mut context)
            .map_err(|e| EngineError::Script(format!("config binding failed: {e}")))?;
        context
            .eval(Source::from_bytes("config.logger = logger;"))
            .map_err(|e| EngineError::Script(format!("logger binding failed: {e}")))?;

        let value = context
            .eval(Source::from_bytes(wrapper))
            .map_err(|e| EngineError::Script(format!("{e}")))?;
        Ok((value, context))
    }

    /// Pull a field off the global `config` object as JSON.
    fn read_config_field(&self, context: &mut Context, field: &str) -> Option<Value> {
        let global = context.global_object();
        let config = global.get(js_string!("config"), context).ok()?;
        let object = config.as_object()?.clone();
        let value = object.get(js_string!(field), context).ok()?;
        js_to_json(context, &value).ok()
    }

    /// Mirror script mutations of `config.state` back into the imposter's
    /// state map. The caller holds the imposter lock for the whole
    /// evaluation, so this read-modify-write is atomic to observers.
    fn read_back_state(&self, context: &mut Context, state: &mut Map<String, Value>) {
        if let Some(Value::Object(updated)) = self.read_config_field(context, "state") {
            *state = updated;
        }
    }
}

fn host_log(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let level = args
        .first()
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default();
    let message = args
        .get(1)
        .map(|v| {
            v.as_string()
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_else(|| v.display().to_string())
        })
        .unwrap_or_default();
    match level.as_str() {
        "debug" => debug!(target: "script", "{message}"),
        "warn" => warn!(target: "script", "{message}"),
        "error" => error!(target: "script", "{message}"),
        _ => info!(target: "script", "{message}"),
    }
    Ok(JsValue::undefined())
}

fn host_atob(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    use base64::Engine as _;
    let input = args
        .first()
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(input.as_bytes())
        .unwrap_or_default();
    Ok(JsValue::from(js_string!(String::from_utf8_lossy(&decoded)
        .into_owned())))
}

fn host_btoa(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    use base64::Engine as _;
    let input = args
        .first()
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default();
    let encoded = base64::engine::general_purpose::STANDARD.encode(input.as_bytes());
    Ok(JsValue::from(js_string!(encoded)))
}

fn register_host_functions(context: &mut Context) -> Result<(), EngineError> {
    context
        .register_global_callable(js_string!("__log"), 2, NativeFunction::from_fn_ptr(host_log))
        .map_err(|e| EngineError::Script(format!("host function registration failed: {e}")))?;
    context
        .register_global_callable(
            js_string!("__atob"),
            1,
            NativeFunction::from_fn_ptr(host_atob),
        )
        .map_err(|e| EngineError::Script(format!("host function registration failed: {e}")))?;
    context
        .register_global_callable(
            js_string!("__btoa"),
            1,
            NativeFunction::from_fn_ptr(host_btoa),
        )
        .map_err(|e| EngineError::Script(format!("host function registration failed: {e}")))?;
    Ok(())
}
