//! Login and connection phases reported by TDLib.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── AuthorizationState ──────────────────────────────────────────────────────

/// The current login/logout phase of a TDLib instance.
///
/// Delivered inside `updateAuthorizationState`. States TDLib adds after
/// this crate was written decode as [`AuthorizationState::Unknown`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum AuthorizationState {
    #[serde(rename = "authorizationStateWaitTdlibParameters")]
    WaitTdlibParameters,

    #[serde(rename = "authorizationStateWaitPhoneNumber")]
    WaitPhoneNumber,

    /// Confirm the login on another device by opening `link` (QR login).
    #[serde(rename = "authorizationStateWaitOtherDeviceConfirmation")]
    WaitOtherDeviceConfirmation {
        #[serde(default)]
        link: String,
    },

    #[serde(rename = "authorizationStateWaitEmailAddress")]
    WaitEmailAddress {
        #[serde(default)]
        allow_apple_id: bool,
        #[serde(default)]
        allow_google_id: bool,
    },

    #[serde(rename = "authorizationStateWaitEmailCode")]
    WaitEmailCode {
        #[serde(default)]
        allow_apple_id: bool,
        #[serde(default)]
        allow_google_id: bool,
        #[serde(default)]
        code_info: Value,
    },

    /// A login code was sent; `code_info` describes how.
    #[serde(rename = "authorizationStateWaitCode")]
    WaitCode {
        #[serde(default)]
        code_info: Value,
    },

    /// The phone number is not registered; accept `terms_of_service` and register.
    #[serde(rename = "authorizationStateWaitRegistration")]
    WaitRegistration {
        #[serde(default)]
        terms_of_service: Value,
    },

    /// Two-step verification is enabled.
    #[serde(rename = "authorizationStateWaitPassword")]
    WaitPassword {
        #[serde(default)]
        password_hint: String,
        #[serde(default)]
        has_recovery_email_address: bool,
        #[serde(default)]
        has_passport_data: bool,
        #[serde(default)]
        recovery_email_address_pattern: String,
    },

    #[serde(rename = "authorizationStateReady")]
    Ready,

    #[serde(rename = "authorizationStateLoggingOut")]
    LoggingOut,

    #[serde(rename = "authorizationStateClosing")]
    Closing,

    /// Terminal. The instance must be destroyed.
    #[serde(rename = "authorizationStateClosed")]
    Closed,

    #[serde(other)]
    Unknown,
}

impl AuthorizationState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// `true` once the instance is on its way out and will never become ready.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Self::LoggingOut | Self::Closing | Self::Closed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// `true` for the `Wait*` states that expect input from the application.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Self::WaitTdlibParameters
                | Self::WaitPhoneNumber
                | Self::WaitOtherDeviceConfirmation { .. }
                | Self::WaitEmailAddress { .. }
                | Self::WaitEmailCode { .. }
                | Self::WaitCode { .. }
                | Self::WaitRegistration { .. }
                | Self::WaitPassword { .. }
        )
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WaitTdlibParameters              => "WaitTdlibParameters",
            Self::WaitPhoneNumber                  => "WaitPhoneNumber",
            Self::WaitOtherDeviceConfirmation { .. } => "WaitOtherDeviceConfirmation",
            Self::WaitEmailAddress { .. }          => "WaitEmailAddress",
            Self::WaitEmailCode { .. }             => "WaitEmailCode",
            Self::WaitCode { .. }                  => "WaitCode",
            Self::WaitRegistration { .. }          => "WaitRegistration",
            Self::WaitPassword { .. }              => "WaitPassword",
            Self::Ready                            => "Ready",
            Self::LoggingOut                       => "LoggingOut",
            Self::Closing                          => "Closing",
            Self::Closed                           => "Closed",
            Self::Unknown                          => "Unknown",
        }
    }
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── ConnectionState ─────────────────────────────────────────────────────────

/// Network connectivity as seen by TDLib (`updateConnectionState`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum ConnectionState {
    #[serde(rename = "connectionStateWaitingForNetwork")]
    WaitingForNetwork,
    #[serde(rename = "connectionStateConnectingToProxy")]
    ConnectingToProxy,
    #[serde(rename = "connectionStateConnecting")]
    Connecting,
    #[serde(rename = "connectionStateUpdating")]
    Updating,
    #[serde(rename = "connectionStateReady")]
    Ready,
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_unit_and_struct_states() {
        let ready: AuthorizationState =
            serde_json::from_value(json!({"@type": "authorizationStateReady"})).unwrap();
        assert!(ready.is_ready());

        let pw: AuthorizationState = serde_json::from_value(json!({
            "@type": "authorizationStateWaitPassword",
            "password_hint": "cat",
            "has_recovery_email_address": true,
        })).unwrap();
        match pw {
            AuthorizationState::WaitPassword { password_hint, has_recovery_email_address, .. } => {
                assert_eq!(password_hint, "cat");
                assert!(has_recovery_email_address);
            }
            other => panic!("expected WaitPassword, got {other:?}"),
        }
    }

    #[test]
    fn unknown_state_is_tolerated() {
        let s: AuthorizationState =
            serde_json::from_value(json!({"@type": "authorizationStateWaitPremiumPurchase"})).unwrap();
        assert_eq!(s, AuthorizationState::Unknown);
        assert!(!s.is_waiting());
    }

    #[test]
    fn shutdown_classification() {
        assert!(AuthorizationState::Closing.is_shutting_down());
        assert!(AuthorizationState::Closed.is_terminal());
        assert!(!AuthorizationState::Ready.is_shutting_down());
        assert!(AuthorizationState::WaitCode { code_info: Value::Null }.is_waiting());
    }
}
