//! Request encoding.
//!
//! Typed requests serialize their fields with serde; [`to_request`] then
//! stamps the method name into `"@type"`. The correlation token is attached
//! later, by whoever owns the pending-request map.

use serde::ser::Error as _;
use serde_json::Value;

use crate::{Object, RemoteCall};

/// Encode a typed request into a TDLib JSON object.
pub fn to_request<R: RemoteCall>(call: &R) -> Result<Object, serde_json::Error> {
    let mut object = match serde_json::to_value(call)? {
        Value::Object(map) => map,
        Value::Null        => Object::new(),
        other => {
            return Err(serde_json::Error::custom(format!(
                "{} must serialize to a JSON object, got {other}",
                R::TYPE
            )));
        }
    };
    object.insert("@type".into(), Value::String(R::TYPE.into()));
    Ok(object)
}

/// The `"@type"` of a request object, if present and a string.
pub fn request_type(request: &Object) -> Option<&str> {
    request.get("@type").and_then(Value::as_str)
}

/// Attach the correlation token and render the wire text.
pub fn with_extra(mut request: Object, extra: u64) -> String {
    request.insert("@extra".into(), Value::from(extra));
    Value::Object(request).to_string()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
