//! # tdbridge-client
//!
//! Async client core over TDLib's JSON interface.
//!
//! ## Features
//! - Request/response correlation over a fire-and-forget native queue
//! - Typed calls via [`RemoteCall`] and raw JSON calls for everything else
//! - Update handlers with type/wildcard interest, filters and ordered groups
//! - Authorization state tracking with an optional scripted login
//! - Deterministic shutdown: pending calls are answered, the native
//!   instance is released exactly once
//!
//! ```rust,no_run
//! # #[cfg(feature = "tdjson")]
//! # async fn f() -> Result<(), tdbridge_client::InvocationError> {
//! use tdbridge_client::{Client, Config};
//! use tdbridge_types::functions::GetMe;
//!
//! let client = Client::create(Config::default())?;
//! client.start().await?;
//! client.wait_until_ready().await?;
//! let me = client.invoke(&GetMe {}).await?;
//! println!("logged in as {}", me.full_name());
//! client.stop().await;
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

mod auth;
mod bridge;
mod correlator;
mod dispatcher;
mod errors;
mod registry;
mod router;
#[cfg(feature = "tdjson")]
mod tdjson;
pub mod mock;

pub use auth::{Authenticator, Credential, PRE_INIT_METHODS, is_pre_init_method};
pub use bridge::TdEngine;
pub use errors::InvocationError;
pub use registry::{ClientId, ClientRegistry};
pub use router::{
    Delivery, Filter, Handler, HandlerError, HandlerFuture, HandlerId, HandlerResult, Interest,
    Subscription,
};
#[cfg(feature = "tdjson")]
pub use tdjson::TdJson;

pub use tdbridge_types as types;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tdbridge_types::functions::{Close, GetAuthorizationState, SetLogVerbosityLevel};
use tdbridge_types::{AuthorizationState, Incoming, Object, RemoteCall, Update, UpdateKind, request_type, to_request};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use auth::AuthorizationStateMachine;
use bridge::NativeBridge;
use dispatcher::{Command, Dispatcher, Parts};

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`Client::create`] and [`Client::with_engine`].
#[derive(Clone)]
pub struct Config {
    /// Deadline for each [`Client::invoke`]. `None` waits forever.
    pub request_timeout:  Option<Duration>,
    /// How long one native receive call may block (default: 1s).
    pub receive_timeout:  Duration,
    /// Messages the receive thread may queue ahead of the dispatcher.
    pub inbound_capacity: usize,
    /// Hold back calls outside the pre-initialization allow-list until the
    /// instance is authorized (default: false).
    pub gate_until_ready: bool,
    /// Send `close` and wait for `authorizationStateClosed` in [`Client::stop`].
    pub close_on_stop:    bool,
    pub close_timeout:    Duration,
    /// How long [`Client::stop`] lets running handlers finish before aborting them.
    pub handler_grace:    Duration,
    /// TDLib's own log verbosity, applied at construction. `None` leaves it alone.
    pub td_log_verbosity: Option<i32>,
    /// Answers the `Wait*` authorization states automatically.
    pub authenticator:    Option<Arc<dyn Authenticator>>,
    /// How often a rejected login step is retried.
    pub login_attempts:   u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout:  Some(Duration::from_secs(60)),
            receive_timeout:  Duration::from_secs(1),
            inbound_capacity: 1024,
            gate_until_ready: false,
            close_on_stop:    true,
            close_timeout:    Duration::from_secs(10),
            handler_grace:    Duration::from_secs(5),
            td_log_verbosity: Some(1),
            authenticator:    None,
            login_attempts:   3,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("request_timeout", &self.request_timeout)
            .field("receive_timeout", &self.receive_timeout)
            .field("inbound_capacity", &self.inbound_capacity)
            .field("gate_until_ready", &self.gate_until_ready)
            .field("close_on_stop", &self.close_on_stop)
            .field("close_timeout", &self.close_timeout)
            .field("handler_grace", &self.handler_grace)
            .field("td_log_verbosity", &self.td_log_verbosity)
            .field("authenticator", &self.authenticator.is_some())
            .field("login_attempts", &self.login_attempts)
            .finish()
    }
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

/// Where a [`Client`] is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed; [`Client::start`] not called yet.
    Created,
    Starting,
    Running,
    /// Pending calls are being cancelled and the native instance released.
    Stopping,
    Stopped,
}

// ─── Client ───────────────────────────────────────────────────────────────────

pub(crate) struct ClientInner {
    id:            ClientId,
    config:        Config,
    bridge:        Arc<NativeBridge>,
    commands:      mpsc::UnboundedSender<Command>,
    unstarted:     Mutex<Option<Dispatcher>>,
    dispatcher:    Mutex<Option<JoinHandle<()>>>,
    lifecycle:     Arc<watch::Sender<Lifecycle>>,
    auth:          watch::Receiver<Option<AuthorizationState>>,
    next_extra:    AtomicU64,
    next_handler:  AtomicU64,
    /// Serializes `start` and `stop`.
    ops:           tokio::sync::Mutex<()>,
}

/// A TDLib instance. Cheap to clone; internally Arc-wrapped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("lifecycle", &self.lifecycle())
            .field("authorization", &self.authorization_state())
            .finish()
    }
}

/// Sends `Abandon` for a call whose caller stopped waiting.
struct AbandonGuard<'a> {
    commands: &'a mpsc::UnboundedSender<Command>,
    id:       u64,
    armed:    bool,
}

impl AbandonGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.send(Command::Abandon(self.id));
        }
    }
}

impl Client {
    // ── Construction ───────────────────────────────────────────────────────

    /// Create a client backed by the system `libtdjson`.
    #[cfg(feature = "tdjson")]
    pub fn create(config: Config) -> Result<Self, InvocationError> {
        Ok(Self::with_engine(config, TdJson::create()?))
    }

    /// Create a client over any [`TdEngine`]. The client is not started.
    pub fn with_engine(config: Config, engine: impl TdEngine) -> Self {
        let id = ClientId::next();
        let bridge = Arc::new(NativeBridge::new(id, Arc::new(engine)));
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(watch::Sender::new(Lifecycle::Created));
        let (auth, auth_rx) = AuthorizationStateMachine::new();

        let inner = Arc::new_cyclic(|weak| {
            let dispatcher = Dispatcher::new(Parts {
                client_id:      id,
                inner:          weak.clone(),
                bridge:         bridge.clone(),
                commands:       commands_rx,
                lifecycle:      lifecycle.clone(),
                auth,
                authenticator:  config.authenticator.clone(),
                login_attempts: config.login_attempts,
                handler_grace:  config.handler_grace,
            });
            ClientInner {
                id,
                config,
                bridge,
                commands,
                unstarted:    Mutex::new(Some(dispatcher)),
                dispatcher:   Mutex::new(None),
                lifecycle,
                auth:         auth_rx,
                next_extra:   AtomicU64::new(1),
                next_handler: AtomicU64::new(1),
                ops:          tokio::sync::Mutex::new(()),
            }
        });
        let client = Self { inner };

        if let Some(level) = client.inner.config.td_log_verbosity {
            if let Err(e) = client.execute(&SetLogVerbosityLevel { new_verbosity_level: level }) {
                tracing::warn!(client = %id, "[tdbridge] could not set TDLib log verbosity: {e}");
            }
        }
        tracing::info!(client = %id, "[tdbridge] client created");
        client
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> ClientId { self.inner.id }

    pub fn config(&self) -> &Config { &self.inner.config }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    pub fn lifecycle(&self) -> Lifecycle { *self.inner.lifecycle.borrow() }

    /// Start receiving. Calls queued before this point are sent now.
    ///
    /// Starting a running client is a no-op; starting a stopped one fails
    /// with [`InvocationError::Closed`].
    pub async fn start(&self) -> Result<(), InvocationError> {
        let _ops = self.inner.ops.lock().await;
        match self.lifecycle() {
            Lifecycle::Created => {}
            Lifecycle::Starting | Lifecycle::Running => return Ok(()),
            Lifecycle::Stopping | Lifecycle::Stopped => return Err(InvocationError::Closed),
        }
        let Some(dispatcher) = self.inner.unstarted.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return Err(InvocationError::Closed);
        };
        self.inner.lifecycle.send_replace(Lifecycle::Starting);

        let config = &self.inner.config;
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        if let Err(e) = self.inner.bridge.spawn_receiver(inbound_tx, config.receive_timeout) {
            tracing::error!(client = %self.inner.id, "[tdbridge] start failed: {e}");
            dispatcher.discard();
            return Err(e);
        }

        self.inner.lifecycle.send_replace(Lifecycle::Running);
        let handle = tokio::spawn(dispatcher.run(inbound_rx));
        *self.inner.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::info!(client = %self.inner.id, "[tdbridge] client started");

        // TDLib stays idle until it receives its first request.
        let (reply, _) = oneshot::channel();
        let id = self.inner.next_extra.fetch_add(1, Ordering::Relaxed);
        let request = to_request(&GetAuthorizationState {})?;
        let _ = self.inner.commands.send(Command::Submit { id, request, reply });
        Ok(())
    }

    /// Shut down and release the native instance.
    ///
    /// When the client is running and not yet closed (and
    /// [`Config::close_on_stop`] is set), TDLib is asked to `close` first so
    /// its databases are flushed. Every call still pending resolves with
    /// [`InvocationError::Closed`]. Safe to call more than once.
    ///
    /// Called from one of this client's own handlers, it returns as soon as
    /// shutdown has begun; the dispatcher finishes once that handler returns.
    pub async fn stop(&self) {
        if dispatcher::in_handler_of(self.inner.id) {
            self.stop_from_handler().await;
            return;
        }
        let _ops = self.inner.ops.lock().await;
        match self.lifecycle() {
            Lifecycle::Stopped => return,
            Lifecycle::Created | Lifecycle::Starting => {
                let unstarted = self.inner.unstarted.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(dispatcher) = unstarted {
                    dispatcher.discard();
                    tracing::info!(client = %self.inner.id, "[tdbridge] stopped before start");
                    return;
                }
            }
            Lifecycle::Running => {
                if self.inner.config.close_on_stop {
                    self.close_gracefully().await;
                }
            }
            Lifecycle::Stopping => {}
        }

        let _ = self.inner.commands.send(Command::Shutdown);
        let handle = self.inner.dispatcher.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(client = %self.inner.id, "[tdbridge] dispatcher failed: {e}");
                    self.inner.lifecycle.send_replace(Lifecycle::Stopped);
                }
            }
            None => self.wait_stopped().await,
        }
    }

    async fn stop_from_handler(&self) {
        if self.lifecycle() == Lifecycle::Running && self.inner.config.close_on_stop {
            self.close_gracefully().await;
        }
        tracing::debug!(client = %self.inner.id, "[tdbridge] stop requested by a handler");
        let _ = self.inner.commands.send(Command::Shutdown);
    }

    async fn close_gracefully(&self) {
        let state = self.authorization_state();
        if state.as_ref().is_none_or(AuthorizationState::is_terminal) {
            return;
        }
        let timeout = self.inner.config.close_timeout;
        tracing::debug!(client = %self.inner.id, "[tdbridge] sending close");
        let closed = tokio::time::timeout(timeout, async {
            if let Err(e) = self.invoke_with_timeout(&Close {}, Some(timeout)).await {
                tracing::debug!(client = %self.inner.id, "[tdbridge] close: {e}");
            }
            // A dropped sender means the dispatcher is gone already.
            let mut auth = self.inner.auth.clone();
            let _ = auth.wait_for(|s| s.as_ref().is_some_and(AuthorizationState::is_terminal)).await;
        })
        .await;
        if closed.is_err() {
            tracing::warn!(client = %self.inner.id, "[tdbridge] TDLib did not close within {timeout:?}");
        }
    }

    /// Resolves once the client has fully stopped, however that happened.
    pub async fn wait_stopped(&self) {
        let mut rx = self.inner.lifecycle.subscribe();
        let _ = rx.wait_for(|l| *l == Lifecycle::Stopped).await;
    }

    // ── Authorization ──────────────────────────────────────────────────────

    /// The last state TDLib reported, if any.
    pub fn authorization_state(&self) -> Option<AuthorizationState> {
        self.inner.auth.borrow().clone()
    }

    pub fn subscribe_authorization(&self) -> watch::Receiver<Option<AuthorizationState>> {
        self.inner.auth.clone()
    }

    /// Wait for `authorizationStateReady`.
    ///
    /// Fails with [`InvocationError::Closed`] if the instance logs out or
    /// closes first.
    pub async fn wait_until_ready(&self) -> Result<(), InvocationError> {
        let mut rx = self.inner.auth.clone();
        let state = rx
            .wait_for(|s| s.as_ref().is_some_and(|s| s.is_ready() || s.is_shutting_down()))
            .await
            .map_err(|_| InvocationError::Closed)?;
        if state.as_ref().is_some_and(AuthorizationState::is_ready) {
            Ok(())
        } else {
            Err(InvocationError::Closed)
        }
    }

    // ── Requests ───────────────────────────────────────────────────────────

    /// Send a typed request and wait for its response.
    pub async fn invoke<R: RemoteCall>(&self, req: &R) -> Result<R::Return, InvocationError> {
        self.invoke_with_timeout(req, self.inner.config.request_timeout).await
    }

    /// [`invoke`](Self::invoke) with an explicit deadline.
    pub async fn invoke_with_timeout<R: RemoteCall>(
        &self,
        req:     &R,
        timeout: Option<Duration>,
    ) -> Result<R::Return, InvocationError> {
        let value = self.call(to_request(req)?, timeout).await?;
        serde_json::from_value(value).map_err(Into::into)
    }

    /// Send a raw JSON request. It must be an object with a string `@type`;
    /// any `@extra` is replaced.
    pub async fn invoke_raw(&self, request: Value) -> Result<Value, InvocationError> {
        self.invoke_raw_with_timeout(request, self.inner.config.request_timeout).await
    }

    pub async fn invoke_raw_with_timeout(
        &self,
        request: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, InvocationError> {
        self.call(raw_request(request)?, timeout).await
    }

    async fn call(&self, request: Object, timeout: Option<Duration>) -> Result<Value, InvocationError> {
        let method = request_type(&request)
            .ok_or_else(|| InvocationError::InvalidRequest("missing @type".into()))?
            .to_owned();
        let deadline = timeout.map(|t| Instant::now() + t);
        self.admit(&method, deadline, timeout).await?;

        let id = self.inner.next_extra.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.inner.commands
            .send(Command::Submit { id, request, reply })
            .map_err(|_| InvocationError::Closed)?;

        let guard = AbandonGuard { commands: &self.inner.commands, id, armed: true };
        let outcome = match deadline {
            Some(at) => match tokio::time::timeout_at(at, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::debug!(client = %self.inner.id, request_id = id, method = %method, "[tdbridge] {method} timed out");
                    return Err(InvocationError::Timeout(timeout.unwrap_or_default()));
                }
            },
            None => rx.await,
        };
        guard.disarm();
        outcome.unwrap_or(Err(InvocationError::Closed))
    }

    /// Decide whether `method` may be sent now, waiting for `Ready` when gated.
    async fn admit(
        &self,
        method:   &str,
        deadline: Option<Instant>,
        timeout:  Option<Duration>,
    ) -> Result<(), InvocationError> {
        let pre_init = is_pre_init_method(method);
        match self.lifecycle() {
            Lifecycle::Running => {}
            Lifecycle::Created | Lifecycle::Starting if pre_init => return Ok(()),
            _ => return Err(InvocationError::Closed),
        }
        if !self.inner.config.gate_until_ready || pre_init {
            return Ok(());
        }
        if self.authorization_state().as_ref().is_some_and(AuthorizationState::is_ready) {
            return Ok(());
        }

        tracing::trace!(client = %self.inner.id, method, "[tdbridge] {method} waits for Ready");
        match deadline {
            Some(at) => tokio::time::timeout_at(at, self.wait_until_ready())
                .await
                .map_err(|_| InvocationError::Timeout(timeout.unwrap_or_default()))?,
            None => self.wait_until_ready().await,
        }
    }

    /// Run one of the methods TDLib can answer synchronously, bypassing the
    /// queue. Works in every lifecycle state until the instance is released.
    pub fn execute<R: RemoteCall>(&self, req: &R) -> Result<R::Return, InvocationError> {
        let value = self.execute_raw(Value::Object(to_request(req)?))?;
        serde_json::from_value(value).map_err(Into::into)
    }

    pub fn execute_raw(&self, request: Value) -> Result<Value, InvocationError> {
        let text = Value::Object(raw_request(request)?).to_string();
        let reply = self.inner.bridge
            .execute(&text)?
            .ok_or_else(|| InvocationError::InvalidRequest("method cannot be executed synchronously".into()))?;
        match Incoming::from_json(&reply)? {
            Incoming::Response(resp) => resp.result.map_err(Into::into),
            Incoming::Update(update) => match update.kind() {
                UpdateKind::Error(e) => Err(e.clone().into()),
                _ => Ok(Value::Object(update.raw().clone())),
            },
        }
    }

    // ── Updates ────────────────────────────────────────────────────────────

    /// Register `handler` for the updates described by `subscription`.
    ///
    /// Handlers registered before [`start`](Self::start) see every update from
    /// the first one on.
    pub fn add_handler<F, Fut>(&self, subscription: Subscription, handler: F) -> HandlerId
    where
        F:   Fn(Client, Arc<Update>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.add_boxed_handler(subscription, Arc::new(handler))
    }

    /// [`add_handler`](Self::add_handler) for a [`Handler`] implemented by hand.
    pub fn add_boxed_handler(&self, subscription: Subscription, handler: Arc<dyn Handler>) -> HandlerId {
        let id = HandlerId(self.inner.next_handler.fetch_add(1, Ordering::Relaxed));
        let _ = self.inner.commands.send(Command::Register { id, subscription, handler });
        id
    }

    pub fn remove_handler(&self, id: HandlerId) {
        let _ = self.inner.commands.send(Command::Unregister(id));
    }
}

/// Validate a caller-supplied request object.
fn raw_request(request: Value) -> Result<Object, InvocationError> {
    let Value::Object(mut object) = request else {
        return Err(InvocationError::InvalidRequest("request must be a JSON object".into()));
    };
    if request_type(&object).is_none() {
        return Err(InvocationError::InvalidRequest("missing @type".into()));
    }
    object.remove("@extra");
    Ok(object)
}
