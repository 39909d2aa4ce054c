//! Native bridge: owns the TDLib instance and its blocking receive loop.
//!
//! TDLib's receive call blocks the calling thread, so it runs on a dedicated
//! OS thread for the client's whole life. Each message is decoded there and
//! handed to the dispatcher task through a bounded channel; the receive
//! thread never touches the pending-request map or the handler registry.
//!
//! The engine itself is released when its last reference drops: after
//! [`NativeBridge::close`] has taken the bridge's reference and the receive
//! thread has exited. Engines destroy their native handle in `Drop`, so that
//! happens exactly once on every path out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tdbridge_types::Incoming;
use tokio::sync::mpsc;

use crate::{ClientId, InvocationError};

// ─── TdEngine ────────────────────────────────────────────────────────────────

/// A native TDLib instance speaking JSON.
///
/// Implementations must release the native resource in `Drop`.
pub trait TdEngine: Send + Sync + 'static {
    /// Hand a serialized request to the library's queue. Does not wait for a reply.
    fn send(&self, request: &str) -> Result<(), InvocationError>;

    /// Wait up to `timeout` for the next message. `Ok(None)` on timeout.
    ///
    /// Only ever called from the bridge's receive thread.
    fn receive(&self, timeout: Duration) -> Result<Option<String>, InvocationError>;

    /// Synchronously execute one of the methods TDLib allows outside the queue.
    fn execute(&self, request: &str) -> Option<String>;

    /// Human-readable name of this engine (for log messages).
    fn name(&self) -> &str { "engine" }
}

// ─── Inbound ─────────────────────────────────────────────────────────────────

/// What the receive thread hands to the dispatcher.
#[derive(Debug)]
pub(crate) enum Inbound {
    Message(Incoming),
    /// The engine failed; no more messages will follow.
    Failed(InvocationError),
}

// ─── NativeBridge ────────────────────────────────────────────────────────────

pub(crate) struct NativeBridge {
    client:   ClientId,
    engine:   Mutex<Option<Arc<dyn TdEngine>>>,
    stop:     Arc<AtomicBool>,
    receiver: Mutex<Option<thread::JoinHandle<()>>>,
}

impl NativeBridge {
    pub(crate) fn new(client: ClientId, engine: Arc<dyn TdEngine>) -> Self {
        tracing::debug!(client = %client, engine = engine.name(), "[tdbridge] bridge created");
        Self {
            client,
            engine:   Mutex::new(Some(engine)),
            stop:     Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
        }
    }

    fn engine(&self) -> Result<Arc<dyn TdEngine>, InvocationError> {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(InvocationError::Closed)
    }

    /// `false` once the bridge has been closed or the receive loop has failed.
    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
            && self.engine.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub(crate) fn send(&self, text: &str) -> Result<(), InvocationError> {
        if self.stop.load(Ordering::Acquire) {
            return Err(InvocationError::Closed);
        }
        self.engine()?.send(text)
    }

    pub(crate) fn execute(&self, text: &str) -> Result<Option<String>, InvocationError> {
        Ok(self.engine()?.execute(text))
    }

    /// Start the receive thread. Messages flow into `tx` until the bridge is
    /// closed, the engine fails, or the dispatcher drops its receiver.
    pub(crate) fn spawn_receiver(
        &self,
        tx:   mpsc::Sender<Inbound>,
        poll: Duration,
    ) -> Result<(), InvocationError> {
        let engine = self.engine()?;
        let stop   = self.stop.clone();
        let client = self.client;

        let handle = thread::Builder::new()
            .name(format!("tdbridge-recv-{}", client.get()))
            .spawn(move || receive_loop(client, engine, stop, tx, poll))
            .map_err(|e| InvocationError::Initialization(format!("cannot spawn receive thread: {e}")))?;

        *self.receiver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stop the receive loop and drop the bridge's engine reference.
    ///
    /// Returns the receive thread's handle so the caller can join it off the
    /// async runtime. Calling this more than once is harmless.
    pub(crate) fn close(&self) -> Option<thread::JoinHandle<()>> {
        self.stop.store(true, Ordering::Release);
        if self.engine.lock().unwrap_or_else(PoisonError::into_inner).take().is_some() {
            tracing::debug!(client = %self.client, "[tdbridge] bridge closed");
        }
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl Drop for NativeBridge {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Join the receive thread without blocking the runtime.
pub(crate) async fn join_receiver(handle: thread::JoinHandle<()>) {
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => tracing::error!("[tdbridge] receive thread panicked"),
        Err(e)     => tracing::warn!("[tdbridge] could not join receive thread: {e}"),
    }
}

fn receive_loop(
    client: ClientId,
    engine: Arc<dyn TdEngine>,
    stop:   Arc<AtomicBool>,
    tx:     mpsc::Sender<Inbound>,
    poll:   Duration,
) {
    tracing::debug!(client = %client, "[tdbridge] receive loop started");
    while !stop.load(Ordering::Acquire) {
        match engine.receive(poll) {
            Ok(None) => continue,
            Ok(Some(text)) => match Incoming::from_json(&text) {
                Ok(msg) => {
                    if tx.blocking_send(Inbound::Message(msg)).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(client = %client, "[tdbridge] dropping undecodable message: {e}"),
            },
            Err(e) => {
                tracing::error!(client = %client, "[tdbridge] receive failed: {e}");
                stop.store(true, Ordering::Release);
                let _ = tx.blocking_send(Inbound::Failed(e));
                break;
            }
        }
    }
    tracing::debug!(client = %client, "[tdbridge] receive loop exited");
}

// ─── Tests ────────────────────────────────────────────────────────────────────
