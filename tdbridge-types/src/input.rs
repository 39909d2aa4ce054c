//! Input fragments embedded in requests.
//!
//! These are opaque to the client core; they only need to serialize to the
//! shapes TDLib expects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── InputFile ───────────────────────────────────────────────────────────────

/// A file to upload or reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum InputFile {
    /// A file on the local disk.
    #[serde(rename = "inputFileLocal")]
    Local { path: String },
    /// A file already known to TDLib by its numeric identifier.
    #[serde(rename = "inputFileId")]
    Id { id: i32 },
    /// A file known to the server by its remote identifier.
    #[serde(rename = "inputFileRemote")]
    Remote { id: String },
    /// A file produced by the application on demand.
    #[serde(rename = "inputFileGenerated")]
    Generated {
        original_path: String,
        conversion:    String,
        #[serde(default)]
        expected_size: i64,
    },
}

impl InputFile {
    pub fn local(path: impl Into<String>) -> Self {
        Self::Local { path: path.into() }
    }

    pub fn id(id: i32) -> Self {
        Self::Id { id }
    }

    pub fn remote(id: impl Into<String>) -> Self {
        Self::Remote { id: id.into() }
    }
}

/// A thumbnail sent alongside a file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputThumbnail {
    pub thumbnail: InputFile,
    #[serde(default)]
    pub width:     i32,
    #[serde(default)]
    pub height:    i32,
}

// ─── Text ────────────────────────────────────────────────────────────────────

/// Text with formatting entities. Entities are passed through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormattedText {
    pub text:     String,
    #[serde(default)]
    pub entities: Vec<Value>,
}

impl FormattedText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), entities: Vec::new() }
    }
}

// ─── InputMessageContent ─────────────────────────────────────────────────────

/// The content of an outgoing message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum InputMessageContent {
    #[serde(rename = "inputMessageText")]
    Text {
        text: FormattedText,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link_preview_options: Option<Value>,
        #[serde(default)]
        clear_draft: bool,
    },
    #[serde(rename = "inputMessagePhoto")]
    Photo {
        photo: InputFile,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail: Option<InputThumbnail>,
        #[serde(default)]
        added_sticker_file_ids: Vec<i32>,
        #[serde(default)]
        width: i32,
        #[serde(default)]
        height: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<FormattedText>,
        #[serde(default)]
        has_spoiler: bool,
    },
    #[serde(rename = "inputMessageDocument")]
    Document {
        document: InputFile,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail: Option<InputThumbnail>,
        #[serde(default)]
        disable_content_type_detection: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<FormattedText>,
    },
}

impl InputMessageContent {
    /// Plain text message content.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: FormattedText::plain(text),
            link_preview_options: None,
            clear_draft: false,
        }
    }
}
