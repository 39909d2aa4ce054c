//! TDLib JSON wire model.
//!
//! Every message exchanged with TDLib's JSON interface is a JSON object whose
//! `"@type"` field names its class. Requests additionally carry an `"@extra"`
//! correlation token that TDLib echoes on the matching response; updates
//! carry none.
//!
//! # Overview
//!
//! | Module            | Contents                                                  |
//! |-------------------|-----------------------------------------------------------|
//! | [`functions`]     | Typed requests implementing [`RemoteCall`]                |
//! | [`types`]         | Response objects returned by those requests               |
//! | [`input`]         | Input fragments embedded in requests (files, content)     |
//! | [`authorization`] | [`AuthorizationState`] and [`ConnectionState`]             |
//! | [`deserialize`]   | Boundary decoding into [`Incoming`]                       |
//! | [`serialize`]     | Request encoding                                          |
//!
//! # Raw usage
//!
//! ```rust
//! use tdbridge_types::{functions, serialize::to_request};
//!
//! let req = to_request(&functions::GetMe {}).unwrap();
//! assert_eq!(req["@type"], "getMe");
//! ```

#![deny(unsafe_code)]

pub mod authorization;
pub mod deserialize;
pub mod error;
pub mod functions;
pub mod input;
pub mod serialize;
pub mod types;

pub use authorization::{AuthorizationState, ConnectionState};
pub use deserialize::{DecodeError, Incoming, Response, Update, UpdateKind};
pub use error::TdError;
pub use serialize::{request_type, to_request};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A JSON object as sent to or received from TDLib.
pub type Object = serde_json::Map<String, serde_json::Value>;

// ─── Core traits ──────────────────────────────────────────────────────────────

/// Marks a type that can be sent to TDLib as a request.
///
/// `TYPE` becomes the request's `"@type"`; `Return` is the object TDLib
/// responds with on success.
pub trait RemoteCall: Serialize {
    /// The TDLib method name.
    const TYPE: &'static str;

    /// The deserialized response type.
    type Return: DeserializeOwned;
}
