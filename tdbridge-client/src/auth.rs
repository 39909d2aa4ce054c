//! Authorization state tracking and the optional scripted login.
//!
//! TDLib announces every login/logout phase with `updateAuthorizationState`.
//! [`AuthorizationStateMachine`] records those announcements and publishes
//! the latest one through a `watch` channel; it never guesses transitions on
//! its own.
//!
//! When [`Config::authenticator`](crate::Config::authenticator) is set, each
//! `Wait*` state additionally starts a short-lived driver task that asks the
//! [`Authenticator`] for the missing input and sends the matching request.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tdbridge_types::functions::{
    CheckAuthenticationBotToken, CheckAuthenticationCode, CheckAuthenticationEmailCode,
    CheckAuthenticationPassword, EmailAddressAuthentication, RegisterUser,
    SetAuthenticationEmailAddress, SetAuthenticationPhoneNumber, SetTdlibParameters,
};
use tdbridge_types::{AuthorizationState, Object, TdError, to_request};
use tokio::sync::watch;

use crate::{Client, ClientInner, InvocationError};

// ─── Pre-initialization allow-list ───────────────────────────────────────────

/// Methods TDLib accepts before the instance is authorized.
///
/// These are let through while the client is still starting, and are never
/// held back by [`Config::gate_until_ready`](crate::Config::gate_until_ready).
pub const PRE_INIT_METHODS: &[&str] = &[
    "getAuthorizationState",
    "setTdlibParameters",
    "setAuthenticationPhoneNumber",
    "setAuthenticationEmailAddress",
    "checkAuthenticationEmailCode",
    "checkAuthenticationBotToken",
    "checkAuthenticationCode",
    "checkAuthenticationPassword",
    "requestQrCodeAuthentication",
    "resendAuthenticationCode",
    "requestAuthenticationPasswordRecovery",
    "checkAuthenticationPasswordRecoveryCode",
    "recoverAuthenticationPassword",
    "registerUser",
    "logOut",
    "close",
    "destroy",
    "getOption",
    "setOption",
    "setLogVerbosityLevel",
    "getLogVerbosityLevel",
    "setNetworkType",
    "addProxy",
    "enableProxy",
    "disableProxy",
    "getProxies",
    "getCountries",
    "getCountryCode",
];

pub fn is_pre_init_method(method: &str) -> bool {
    PRE_INIT_METHODS.contains(&method)
}

// ─── AuthorizationStateMachine ───────────────────────────────────────────────

/// Outcome of observing one `updateAuthorizationState`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    Changed,
    Unchanged,
    /// Arrived after `Closed`; not applied.
    Ignored,
}

/// Owned by the dispatcher; readers hold `watch::Receiver`s.
pub(crate) struct AuthorizationStateMachine {
    tx: watch::Sender<Option<AuthorizationState>>,
}

impl AuthorizationStateMachine {
    pub(crate) fn new() -> (Self, watch::Receiver<Option<AuthorizationState>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    pub(crate) fn current(&self) -> Option<AuthorizationState> {
        self.tx.borrow().clone()
    }

    pub(crate) fn observe(&self, next: AuthorizationState) -> Transition {
        let prev = self.current();
        match &prev {
            Some(AuthorizationState::Closed) => {
                tracing::warn!("[tdbridge] authorization update after Closed ignored: {next}");
                return Transition::Ignored;
            }
            Some(p) if *p == next => return Transition::Unchanged,
            _ => {}
        }
        match &prev {
            Some(p) => tracing::info!("[tdbridge] authorization state: {p} → {next}"),
            None    => tracing::info!("[tdbridge] authorization state: {next}"),
        }
        self.tx.send_replace(Some(next));
        Transition::Changed
    }
}

// ─── Authenticator ───────────────────────────────────────────────────────────

/// How to prove who we are: as a user or as a bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    PhoneNumber(String),
    BotToken(String),
}

/// Supplies login input on demand.
///
/// Only the first four methods are required; the rest cover flows that most
/// applications never hit and fail the login by default.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Parameters for `setTdlibParameters`.
    async fn tdlib_parameters(&self) -> Result<SetTdlibParameters, InvocationError>;

    async fn credential(&self) -> Result<Credential, InvocationError>;

    /// The login code. `code_info` is TDLib's `authenticationCodeInfo`.
    async fn code(&self, code_info: &Value) -> Result<String, InvocationError>;

    /// The 2FA password.
    async fn password(&self, hint: &str) -> Result<String, InvocationError>;

    /// First and last name for a new account.
    async fn registration(&self, _terms_of_service: &Value) -> Result<(String, String), InvocationError> {
        Err(InvocationError::InvalidRequest("account registration is not supported".into()))
    }

    async fn email_address(&self) -> Result<String, InvocationError> {
        Err(InvocationError::InvalidRequest("login email address is not supported".into()))
    }

    async fn email_code(&self, _code_info: &Value) -> Result<String, InvocationError> {
        Err(InvocationError::InvalidRequest("login email code is not supported".into()))
    }

    /// QR login: the link to open on an already logged-in device.
    async fn confirm_on_other_device(&self, link: &str) {
        tracing::info!("[tdbridge] confirm this login on another device: {link}");
    }

    /// TDLib rejected what we sent in `state`. Called before asking again.
    async fn rejected(&self, state: &AuthorizationState, error: &TdError) {
        tracing::warn!("[tdbridge] {state} rejected: {error}");
    }
}

/// Answer one `Wait*` state. Runs until the request succeeds, the attempts
/// run out, or the state moves on.
///
/// Holds only a weak reference while the authenticator is thinking, so a
/// prompt nobody answers does not keep the client alive.
pub(crate) async fn drive(
    inner:    Weak<ClientInner>,
    auth:     Arc<dyn Authenticator>,
    state:    AuthorizationState,
    attempts: u32,
) {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if still_in(&inner, &state).is_none() {
            return;
        }
        let outcome = match request_for(auth.as_ref(), &state).await {
            Ok(Some(request)) => {
                let Some(client) = still_in(&inner, &state) else { return };
                client.invoke_raw(Value::Object(request)).await.map(drop)
            }
            Ok(None) => return,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => return,
            Err(InvocationError::Td(e)) => {
                auth.rejected(&state, &e).await;
                if attempt == attempts {
                    tracing::error!("[tdbridge] giving up on {state} after {attempts} attempt(s)");
                }
            }
            Err(e) => {
                tracing::error!("[tdbridge] login step {state} failed: {e}");
                return;
            }
        }
    }
}

/// The client, if it is still alive and still in `state`.
fn still_in(inner: &Weak<ClientInner>, state: &AuthorizationState) -> Option<Client> {
    let client = inner.upgrade().map(Client::from_inner)?;
    (client.authorization_state().as_ref() == Some(state)).then_some(client)
}

/// The request that answers `state`, or `None` if there is nothing to send.
async fn request_for(auth: &dyn Authenticator, state: &AuthorizationState) -> Result<Option<Object>, InvocationError> {
    use AuthorizationState as S;

    let request = match state {
        S::WaitTdlibParameters => to_request(&auth.tdlib_parameters().await?)?,
        S::WaitPhoneNumber => match auth.credential().await? {
            Credential::PhoneNumber(phone_number) => {
                to_request(&SetAuthenticationPhoneNumber { phone_number, settings: None })?
            }
            Credential::BotToken(token) => to_request(&CheckAuthenticationBotToken { token })?,
        },
        S::WaitCode { code_info } => {
            let code = auth.code(code_info).await?;
            to_request(&CheckAuthenticationCode { code })?
        }
        S::WaitPassword { password_hint, .. } => {
            let password = auth.password(password_hint).await?;
            to_request(&CheckAuthenticationPassword { password })?
        }
        S::WaitRegistration { terms_of_service } => {
            let (first_name, last_name) = auth.registration(terms_of_service).await?;
            to_request(&RegisterUser { first_name, last_name, disable_notification: false })?
        }
        S::WaitEmailAddress { .. } => {
            let email_address = auth.email_address().await?;
            to_request(&SetAuthenticationEmailAddress { email_address })?
        }
        S::WaitEmailCode { code_info, .. } => {
            let code = auth.email_code(code_info).await?;
            to_request(&CheckAuthenticationEmailCode { code: EmailAddressAuthentication::Code { code } })?
        }
        S::WaitOtherDeviceConfirmation { link } => {
            auth.confirm_on_other_device(link).await;
            return Ok(None);
        }
        _ => return Ok(None),
    };
    Ok(Some(request))
}
