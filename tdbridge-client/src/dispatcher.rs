//! The client's event loop.
//!
//! One task per client owns the pending-request map, the handler registry
//! and the authorization state. Everything else reaches it through
//! [`Command`]s; the receive thread feeds it [`Inbound`] messages. Commands
//! are polled first so a burst of updates cannot starve callers.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tdbridge_types::{AuthorizationState, Incoming, Object, Update, UpdateKind};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::auth::{self, AuthorizationStateMachine, Authenticator, Transition};
use crate::bridge::{self, Inbound, NativeBridge};
use crate::correlator::{Reply, RequestCorrelator};
use crate::router::{Delivery, Handler, HandlerId, HandlerResult, Subscription, UpdateRouter};
use crate::{Client, ClientId, ClientInner, InvocationError, Lifecycle};

tokio::task_local! {
    /// Set while a handler of this client runs.
    static HANDLING: ClientId;
}

/// `true` when called from inside one of `client`'s update handlers.
pub(crate) fn in_handler_of(client: ClientId) -> bool {
    HANDLING.try_with(|id| *id == client).unwrap_or(false)
}

// ─── Command ──────────────────────────────────────────────────────────────────

pub(crate) enum Command {
    Submit { id: u64, request: Object, reply: Reply },
    Abandon(u64),
    Register { id: HandlerId, subscription: Subscription, handler: Arc<dyn Handler> },
    Unregister(HandlerId),
    Shutdown,
}

// ─── Dispatcher ───────────────────────────────────────────────────────────────

pub(crate) struct Dispatcher {
    client_id:      ClientId,
    inner:          Weak<ClientInner>,
    bridge:         Arc<NativeBridge>,
    commands:       mpsc::UnboundedReceiver<Command>,
    lifecycle:      Arc<watch::Sender<Lifecycle>>,

    correlator:     RequestCorrelator,
    router:         UpdateRouter,
    auth:           AuthorizationStateMachine,
    authenticator:  Option<Arc<dyn Authenticator>>,
    login_attempts: u32,

    handlers:       JoinSet<(HandlerId, HandlerResult)>,
    workers:        HashMap<HandlerId, mpsc::UnboundedSender<Arc<Update>>>,
    tracker:        TaskTracker,
    cancel:         CancellationToken,
    login:          CancellationToken,
    handler_grace:  Duration,
}

pub(crate) struct Parts {
    pub(crate) client_id:      ClientId,
    pub(crate) inner:          Weak<ClientInner>,
    pub(crate) bridge:         Arc<NativeBridge>,
    pub(crate) commands:       mpsc::UnboundedReceiver<Command>,
    pub(crate) lifecycle:      Arc<watch::Sender<Lifecycle>>,
    pub(crate) auth:           AuthorizationStateMachine,
    pub(crate) authenticator:  Option<Arc<dyn Authenticator>>,
    pub(crate) login_attempts: u32,
    pub(crate) handler_grace:  Duration,
}

impl Dispatcher {
    pub(crate) fn new(parts: Parts) -> Self {
        let cancel = CancellationToken::new();
        Self {
            client_id:      parts.client_id,
            inner:          parts.inner,
            bridge:         parts.bridge,
            commands:       parts.commands,
            lifecycle:      parts.lifecycle,
            correlator:     RequestCorrelator::new(),
            router:         UpdateRouter::new(),
            auth:           parts.auth,
            authenticator:  parts.authenticator,
            login_attempts: parts.login_attempts,
            handlers:       JoinSet::new(),
            workers:        HashMap::new(),
            tracker:        TaskTracker::new(),
            login:          cancel.child_token(),
            cancel,
            handler_grace:  parts.handler_grace,
        }
    }

    fn client(&self) -> Option<Client> {
        self.inner.upgrade().map(Client::from_inner)
    }

    /// Run until shutdown is requested, every `Client` is dropped, TDLib
    /// reports `authorizationStateClosed`, or the bridge fails.
    pub(crate) async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        tracing::debug!(client = %self.client_id, "[tdbridge] dispatcher started");

        let reason = loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break InvocationError::Closed,
                    Some(cmd) => {
                        if let ControlFlow::Break(e) = self.command(cmd) {
                            break e;
                        }
                    }
                },

                Some(done) = self.handlers.join_next(), if !self.handlers.is_empty() => {
                    log_outcome(done);
                }

                msg = inbound.recv() => match msg {
                    Some(Inbound::Message(Incoming::Response(resp))) => {
                        self.correlator.resolve(resp);
                    }
                    Some(Inbound::Message(Incoming::Update(update))) => {
                        if self.update(update).is_break() {
                            break InvocationError::Closed;
                        }
                    }
                    Some(Inbound::Failed(e)) => break e,
                    None => break InvocationError::Transport("receive loop ended unexpectedly".into()),
                },
            }
        };

        self.shutdown(reason, inbound).await;
    }

    /// Tear down a dispatcher that was never started.
    pub(crate) fn discard(mut self) {
        self.lifecycle.send_replace(Lifecycle::Stopping);
        self.reject_queued(&InvocationError::Closed);
        self.bridge.close();
        self.lifecycle.send_replace(Lifecycle::Stopped);
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    fn command(&mut self, cmd: Command) -> ControlFlow<InvocationError> {
        match cmd {
            Command::Submit { id, request, reply } => {
                let Some(text) = self.correlator.submit(id, request, reply) else {
                    return ControlFlow::Continue(());
                };
                match self.bridge.send(&text) {
                    Ok(()) => {}
                    Err(e @ InvocationError::Transport(_)) => {
                        tracing::error!(client = %self.client_id, request_id = id, "[tdbridge] send failed: {e}");
                        self.correlator.fail(id, e.clone());
                        return ControlFlow::Break(e);
                    }
                    Err(e) => self.correlator.fail(id, e),
                }
            }
            Command::Abandon(id) => self.correlator.abandon(id),
            Command::Register { id, subscription, handler } => {
                if subscription.delivery == Delivery::Sequential {
                    self.spawn_worker(id, handler.clone());
                }
                self.router.register(id, subscription, handler);
            }
            Command::Unregister(id) => {
                self.router.unregister(id);
                // Dropping the sender lets the worker finish what is queued.
                self.workers.remove(&id);
            }
            Command::Shutdown => {}
        }
        ControlFlow::Continue(())
    }

    /// Answer every request still queued in the command channel with `reason`.
    fn reject_queued(&mut self, reason: &InvocationError) {
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            if let Command::Submit { reply, .. } = cmd {
                let _ = reply.send(Err(reason.clone()));
            }
        }
    }

    // ── Updates ──────────────────────────────────────────────────────────────

    fn update(&mut self, update: Update) -> ControlFlow<()> {
        let mut closed = false;
        match update.kind() {
            UpdateKind::AuthorizationState(state) => {
                if self.auth.observe(state.clone()) == Transition::Changed {
                    closed = state.is_terminal();
                    self.drive_login(state.clone());
                }
            }
            UpdateKind::Error(e) => {
                tracing::warn!(client = %self.client_id, "[tdbridge] error without request: {e}");
            }
            _ => {}
        }

        self.dispatch(update);

        if closed { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
    }

    fn dispatch(&mut self, update: Update) {
        let Some(client) = self.client() else { return };
        let plan = self.router.plan(&update);
        if plan.is_empty() {
            tracing::trace!(client = %self.client_id, "[tdbridge] no handler for {}", update.type_name());
            return;
        }

        let update = Arc::new(update);
        for registered in plan {
            match registered.subscription.delivery {
                Delivery::Concurrent => {
                    let id  = registered.id;
                    let fut = HANDLING.scope(self.client_id, registered.handler.call(client.clone(), update.clone()));
                    self.handlers.spawn(async move { (id, fut.await) });
                }
                Delivery::Sequential => {
                    if let Some(queue) = self.workers.get(&registered.id) {
                        let _ = queue.send(update.clone());
                    }
                }
            }
        }
    }

    fn spawn_worker(&mut self, id: HandlerId, handler: Arc<dyn Handler>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.workers.insert(id, tx);
        self.tracker.spawn(sequential_worker(id, handler, self.inner.clone(), rx, self.cancel.child_token()));
    }

    fn drive_login(&mut self, state: AuthorizationState) {
        let Some(authenticator) = self.authenticator.clone() else { return };

        // A new state supersedes whatever the previous driver was waiting on.
        self.login.cancel();
        self.login = self.cancel.child_token();

        if !state.is_waiting() {
            return;
        }
        let inner    = self.inner.clone();
        let token    = self.login.clone();
        let attempts = self.login_attempts;
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = auth::drive(inner, authenticator, state, attempts) => {}
            }
        });
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    async fn shutdown(mut self, reason: InvocationError, mut inbound: mpsc::Receiver<Inbound>) {
        self.lifecycle.send_replace(Lifecycle::Stopping);
        if let InvocationError::Transport(_) = reason {
            tracing::error!(client = %self.client_id, "[tdbridge] stopping after fatal error: {reason}");
        } else {
            tracing::info!(client = %self.client_id, "[tdbridge] stopping");
        }

        self.reject_queued(&reason);
        self.correlator.cancel_all(&reason);
        self.login.cancel();

        // The receive thread may be parked in `blocking_send`; closing our end
        // wakes it.
        let receiver = self.bridge.close();
        inbound.close();
        if let Some(thread) = receiver {
            bridge::join_receiver(thread).await;
        }

        self.workers.clear();
        self.tracker.close();
        let handlers = &mut self.handlers;
        let tracker  = &self.tracker;
        let drained = tokio::time::timeout(self.handler_grace, async {
            while let Some(done) = handlers.join_next().await {
                log_outcome(done);
            }
            tracker.wait().await;
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                client = %self.client_id,
                "[tdbridge] handlers still running after {:?}; aborting them",
                self.handler_grace,
            );
            self.handlers.abort_all();
        }
        self.cancel.cancel();

        self.lifecycle.send_replace(Lifecycle::Stopped);
        tracing::info!(client = %self.client_id, "[tdbridge] stopped");
    }
}

// ─── Handler execution ───────────────────────────────────────────────────────

fn log_outcome(done: Result<(HandlerId, HandlerResult), JoinError>) {
    match done {
        Ok((_, Ok(()))) => {}
        Ok((id, Err(e))) => tracing::warn!(handler = %id, "[tdbridge] handler failed: {e}"),
        Err(e) if e.is_panic() => tracing::error!("[tdbridge] handler panicked: {e}"),
        Err(_) => {}
    }
}

async fn sequential_worker(
    id:      HandlerId,
    handler: Arc<dyn Handler>,
    inner:   Weak<ClientInner>,
    mut rx:  mpsc::UnboundedReceiver<Arc<Update>>,
    cancel:  CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(update) => update,
                None         => break,
            },
        };
        let Some(client) = inner.upgrade().map(Client::from_inner) else { break };

        // Its own task, so a panic stays inside it.
        let mut call = tokio::spawn(HANDLING.scope(client.id(), handler.call(client, update)));
        let done = tokio::select! {
            _ = cancel.cancelled() => {
                call.abort();
                break;
            }
            done = &mut call => done,
        };
        log_outcome(done.map(|res| (id, res)));
    }
}
