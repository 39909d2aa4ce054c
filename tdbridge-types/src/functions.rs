//! Typed TDLib requests.
//!
//! A representative subset: the authorization flow the login driver needs,
//! the offline methods the client issues itself, and a few everyday calls.
//! Anything else can be sent as a raw JSON object through
//! `Client::invoke_raw`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::input::InputMessageContent;
use crate::{AuthorizationState, RemoteCall, types};

macro_rules! remote_call {
    ($($ty:ident => $name:literal, $ret:ty;)*) => {
        $(
            impl RemoteCall for $ty {
                const TYPE: &'static str = $name;
                type Return = $ret;
            }
        )*
    };
}

remote_call! {
    GetAuthorizationState          => "getAuthorizationState",          AuthorizationState;
    SetTdlibParameters             => "setTdlibParameters",             types::Success;
    SetAuthenticationPhoneNumber   => "setAuthenticationPhoneNumber",   types::Success;
    CheckAuthenticationBotToken    => "checkAuthenticationBotToken",    types::Success;
    CheckAuthenticationCode        => "checkAuthenticationCode",        types::Success;
    CheckAuthenticationPassword    => "checkAuthenticationPassword",    types::Success;
    SetAuthenticationEmailAddress  => "setAuthenticationEmailAddress",  types::Success;
    CheckAuthenticationEmailCode   => "checkAuthenticationEmailCode",   types::Success;
    RegisterUser                   => "registerUser",                   types::Success;
    LogOut                         => "logOut",                         types::Success;
    Close                          => "close",                          types::Success;
    GetMe                          => "getMe",                          types::User;
    SendMessage                    => "sendMessage",                    types::Message;
    GetOption                      => "getOption",                      types::OptionValue;
    SetLogVerbosityLevel           => "setLogVerbosityLevel",           types::Success;
    GetLogVerbosityLevel           => "getLogVerbosityLevel",           types::LogVerbosityLevel;
}

// ─── Authorization ───────────────────────────────────────────────────────────

/// Returns the current authorization state. Can be called before initialization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetAuthorizationState {}

/// Sets the parameters for TDLib initialization.
/// Works only when the state is `WaitTdlibParameters`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SetTdlibParameters {
    pub use_test_dc:             bool,
    pub database_directory:      String,
    pub files_directory:         String,
    /// Base64-encoded encryption key for the local database.
    pub database_encryption_key: String,
    pub use_file_database:       bool,
    pub use_chat_info_database:  bool,
    pub use_message_database:    bool,
    pub use_secret_chats:        bool,
    pub api_id:                  i32,
    pub api_hash:                String,
    pub system_language_code:    String,
    pub device_model:            String,
    pub system_version:          String,
    pub application_version:     String,
}

impl SetTdlibParameters {
    /// Parameters with the required fields set and sensible defaults elsewhere.
    pub fn new(api_id: i32, api_hash: impl Into<String>, database_directory: impl Into<String>) -> Self {
        Self {
            api_id,
            api_hash:             api_hash.into(),
            database_directory:   database_directory.into(),
            use_message_database: true,
            use_secret_chats:     false,
            system_language_code: "en".into(),
            device_model:         "tdbridge".into(),
            application_version:  env!("CARGO_PKG_VERSION").into(),
            ..Default::default()
        }
    }
}

/// Sets the phone number of the user. Works only when the state is `WaitPhoneNumber`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SetAuthenticationPhoneNumber {
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings:     Option<Value>,
}

/// Checks the authentication token of a bot. Works only when the state is `WaitPhoneNumber`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckAuthenticationBotToken {
    pub token: String,
}

/// Checks the authentication code. Works only when the state is `WaitCode`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckAuthenticationCode {
    pub code: String,
}

/// Checks the 2-step verification password. Works only when the state is `WaitPassword`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckAuthenticationPassword {
    pub password: String,
}

/// Sets the login email address. Works only when the state is `WaitEmailAddress`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SetAuthenticationEmailAddress {
    pub email_address: String,
}

/// How an email address was confirmed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum EmailAddressAuthentication {
    #[serde(rename = "emailAddressAuthenticationCode")]
    Code { code: String },
    #[serde(rename = "emailAddressAuthenticationAppleId")]
    AppleId { token: String },
    #[serde(rename = "emailAddressAuthenticationGoogleId")]
    GoogleId { token: String },
}

/// Checks the email confirmation. Works only when the state is `WaitEmailCode`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckAuthenticationEmailCode {
    pub code: EmailAddressAuthentication,
}

/// Finishes registration of a new user. Works only when the state is `WaitRegistration`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterUser {
    pub first_name:           String,
    pub last_name:            String,
    #[serde(default)]
    pub disable_notification: bool,
}

/// Logs out the current user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogOut {}

/// Closes the instance. All databases are flushed; the instance ends in `Closed`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Close {}

// ─── Everyday calls ──────────────────────────────────────────────────────────

/// Returns the current user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetMe {}

/// Sends a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SendMessage {
    pub chat_id:               i64,
    #[serde(default)]
    pub message_thread_id:     i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to:              Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options:               Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_markup:          Option<Value>,
    pub input_message_content: InputMessageContent,
}

impl SendMessage {
    /// A plain text message to `chat_id`.
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_thread_id: 0,
            reply_to: None,
            options: None,
            reply_markup: None,
            input_message_content: InputMessageContent::text(text),
        }
    }
}

/// Returns the value of an option. Can be called before authorization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetOption {
    pub name: String,
}

/// Sets TDLib's internal log verbosity. Can be executed synchronously.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SetLogVerbosityLevel {
    pub new_verbosity_level: i32,
}

/// Returns TDLib's internal log verbosity. Can be executed synchronously.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GetLogVerbosityLevel {}
