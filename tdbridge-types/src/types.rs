//! Response objects returned by [`crate::functions`].
//!
//! Only the fields the client and its demos read are modelled; unknown
//! fields are ignored on decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// TDLib's empty success object, `{"@type":"ok"}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Success {}

/// A list of usernames of a user or chat.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usernames {
    #[serde(default)]
    pub active_usernames:   Vec<String>,
    #[serde(default)]
    pub editable_username:  String,
}

/// A Telegram user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id:           i64,
    #[serde(default)]
    pub first_name:   String,
    #[serde(default)]
    pub last_name:    String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usernames:    Option<Usernames>,
    #[serde(default)]
    pub phone_number: String,
    /// `userTypeRegular`, `userTypeBot`, …, left undecoded.
    #[serde(rename = "type", default)]
    pub user_type:    Value,
}

impl User {
    /// Full display name.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// The first active username, if any.
    pub fn username(&self) -> Option<&str> {
        self.usernames.as_ref()?.active_usernames.first().map(String::as_str)
    }

    pub fn is_bot(&self) -> bool {
        self.user_type.get("@type").and_then(Value::as_str) == Some("userTypeBot")
    }
}

/// A message, with its content left undecoded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id:          i64,
    pub chat_id:     i64,
    #[serde(default)]
    pub is_outgoing: bool,
    #[serde(default)]
    pub date:        i32,
    #[serde(default)]
    pub content:     Value,
}

impl Message {
    /// Text of an `messageText` content.
    pub fn text(&self) -> Option<&str> {
        if self.content.get("@type")?.as_str()? != "messageText" {
            return None;
        }
        self.content.get("text")?.get("text")?.as_str()
    }
}

/// The value of a TDLib option (`getOption`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum OptionValue {
    #[serde(rename = "optionValueBoolean")]
    Boolean { value: bool },
    #[serde(rename = "optionValueEmpty")]
    Empty,
    /// int64 values travel as strings.
    #[serde(rename = "optionValueInteger")]
    Integer { value: String },
    #[serde(rename = "optionValueString")]
    String { value: String },
}

/// A TDLib log verbosity level (`getLogVerbosityLevel`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogVerbosityLevel {
    pub verbosity_level: i32,
}
