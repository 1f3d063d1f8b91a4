//! Conversions between `serde_json::Value` and boa `JsValue`.

use boa_engine::object::builtins::JsArray;
use boa_engine::property::PropertyKey;
use boa_engine::{js_string, Context, JsObject, JsResult, JsValue};
use serde_json::{Map, Value};

/// Create a plain object carrying `Object.prototype`, so user scripts get
/// `toString`, `hasOwnProperty` and friends.
pub fn plain_object(context: &Context) -> JsObject {
    JsObject::with_object_proto(context.intrinsics())
}

/// Convert a JSON value into the script world.
pub fn json_to_js(context: &mut Context, value: &Value) -> JsResult<JsValue> {
    match value {
        Value::Null => Ok(JsValue::null()),
        Value::Bool(b) => Ok(JsValue::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(JsValue::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(JsValue::from(f))
            } else {
                Ok(JsValue::null())
            }
        }
        Value::String(s) => Ok(JsValue::from(js_string!(s.clone()))),
        Value::Array(items) => {
            let array = JsArray::new(context);
            for (i, item) in items.iter().enumerate() {
                let converted = json_to_js(context, item)?;
                array.set(i as u32, converted, false, context)?;
            }
            Ok(array.into())
        }
        Value::Object(map) => {
            let object = plain_object(context);
            for (key, item) in map {
                let converted = json_to_js(context, item)?;
                object.set(js_string!(key.clone()), converted, false, context)?;
            }
            Ok(object.into())
        }
    }
}

/// Convert a script value back into JSON. Symbols and functions are dropped,
/// unrepresentable numbers become null.
pub fn js_to_json(context: &mut Context, value: &JsValue) -> JsResult<Value> {
    if value.is_null() || value.is_undefined() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.as_boolean() {
        return Ok(Value::Bool(b));
    }
    if let Some(n) = value.as_number() {
        if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
            return Ok(Value::Number(serde_json::Number::from(n as i64)));
        }
        return Ok(serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_std_string_escaped()));
    }
    if let Some(object) = value.as_object() {
        if object.is_array() {
            let length = object
                .get(js_string!("length"), context)?
                .as_number()
                .unwrap_or(0.0) as u32;
            let mut items = Vec::with_capacity(length as usize);
            for i in 0..length {
                let item = object.get(i, context)?;
                items.push(js_to_json(context, &item)?);
            }
            return Ok(Value::Array(items));
        }

        let mut map = Map::new();
        for key in object.own_property_keys(context)? {
            let key_str = match &key {
                PropertyKey::String(s) => s.to_std_string_escaped(),
                PropertyKey::Index(i) => i.get().to_string(),
                PropertyKey::Symbol(_) => continue,
            };
            let item = object.get(key, context)?;
            if item.is_callable() {
                continue;
            }
            map.insert(key_str, js_to_json(context, &item)?);
        }
        return Ok(Value::Object(map));
    }
    Ok(Value::Null)
}
