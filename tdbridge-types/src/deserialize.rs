//! Boundary decoding of incoming TDLib messages.
//!
//! Every text TDLib hands back is decoded exactly once, on the receive
//! thread, into an [`Incoming`]: either a [`Response`] to one of our
//! requests (it carries `"@extra"`) or an unsolicited [`Update`]. The rest of
//! the client matches on these variants instead of re-inspecting `"@type"`
//! strings.

use std::fmt;

use serde_json::Value;

use crate::{AuthorizationState, ConnectionState, Object, TdError};

// ─── DecodeError ─────────────────────────────────────────────────────────────

/// An incoming message that could not be classified.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodeError {
    /// The text is not valid JSON.
    Json(String),
    /// The JSON value is not an object.
    NotAnObject,
    /// The object has no string `"@type"`.
    MissingType,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e)     => write!(f, "invalid JSON: {e}"),
            Self::NotAnObject => write!(f, "message is not a JSON object"),
            Self::MissingType => write!(f, "message has no @type"),
        }
    }
}

impl std::error::Error for DecodeError {}

// ─── Incoming ────────────────────────────────────────────────────────────────

/// One decoded message from TDLib.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    /// The answer to a request we sent.
    Response(Response),
    /// An unsolicited event.
    Update(Update),
}

impl Incoming {
    /// Decode raw wire text.
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    /// Classify an already-parsed value.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(mut object) = value else {
            return Err(DecodeError::NotAnObject);
        };
        let type_name = match object.get("@type") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(DecodeError::MissingType),
        };
        // Present on the newer multi-client interface; meaningless here.
        object.remove("@client_id");

        match object.remove("@extra") {
            Some(extra) => Ok(Self::Response(Response::new(extra, type_name, object))),
            None        => Ok(Self::Update(Update::new(type_name, object))),
        }
    }
}

// ─── Response ────────────────────────────────────────────────────────────────

/// The answer to one request, keyed by the echoed `"@extra"`.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// The correlation token exactly as TDLib echoed it.
    pub extra:  Value,
    /// The success object, or the library's `error`.
    pub result: Result<Value, TdError>,
}

impl Response {
    fn new(extra: Value, type_name: String, object: Object) -> Self {
        let result = if type_name == "error" {
            Err(td_error(&object))
        } else {
            Ok(Value::Object(object))
        };
        Self { extra, result }
    }

    /// The token as one of our numeric request ids, if it is one.
    pub fn request_id(&self) -> Option<u64> {
        self.extra.as_u64()
    }
}

fn td_error(object: &Object) -> TdError {
    TdError {
        code:    object.get("code").and_then(Value::as_i64).and_then(|c| i32::try_from(c).ok()).unwrap_or_default(),
        message: object.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
    }
}

// ─── Update ──────────────────────────────────────────────────────────────────

/// The variants of [`Update`] the client itself cares about.
///
/// Everything else is [`UpdateKind::Other`]; the full payload is always
/// available through [`Update::raw`].
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateKind {
    /// `updateAuthorizationState`.
    AuthorizationState(AuthorizationState),
    /// `updateConnectionState`.
    ConnectionState(ConnectionState),
    /// `updateNewMessage`.
    NewMessage { chat_id: i64, message: Value },
    /// `updateOption`.
    Option { name: String, value: Value },
    /// An `error` object without a correlation token.
    Error(TdError),
    Other,
}

/// An unsolicited event from TDLib.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    type_name: String,
    kind:      UpdateKind,
    raw:       Object,
}

impl Update {
    /// Build an update from its `"@type"` and payload object.
    pub fn new(type_name: impl Into<String>, raw: Object) -> Self {
        let type_name = type_name.into();
        let kind = classify(&type_name, &raw);
        Self { type_name, kind, raw }
    }

    /// The update's `"@type"`, e.g. `updateNewMessage`.
    pub fn type_name(&self) -> &str { &self.type_name }

    pub fn kind(&self) -> &UpdateKind { &self.kind }

    /// The full payload, including `"@type"`.
    pub fn raw(&self) -> &Object { &self.raw }

    /// Shorthand for `raw().get(field)`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.raw.get(field)
    }

    /// The chat this update concerns, if it names one directly or through
    /// its `message`.
    pub fn chat_id(&self) -> Option<i64> {
        if let UpdateKind::NewMessage { chat_id, .. } = &self.kind {
            return Some(*chat_id);
        }
        self.raw.get("chat_id").and_then(Value::as_i64)
            .or_else(|| self.raw.get("message")?.get("chat_id")?.as_i64())
    }
}

fn classify(type_name: &str, raw: &Object) -> UpdateKind {
    match type_name {
        "updateAuthorizationState" => raw.get("authorization_state")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .map(UpdateKind::AuthorizationState)
            .unwrap_or(UpdateKind::AuthorizationState(AuthorizationState::Unknown)),
        "updateConnectionState" => raw.get("state")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .map(UpdateKind::ConnectionState)
            .unwrap_or(UpdateKind::ConnectionState(ConnectionState::Unknown)),
        "updateNewMessage" => {
            let message = raw.get("message").cloned().unwrap_or(Value::Null);
            match message.get("chat_id").and_then(Value::as_i64) {
                Some(chat_id) => UpdateKind::NewMessage { chat_id, message },
                None          => UpdateKind::Other,
            }
        }
        "updateOption" => UpdateKind::Option {
            name:  raw.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            value: raw.get("value").cloned().unwrap_or(Value::Null),
        },
        "error" => UpdateKind::Error(td_error(raw)),
        _ => UpdateKind::Other,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
