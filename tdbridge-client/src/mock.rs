//! In-memory [`TdEngine`] for tests and offline development.
//!
//! [`MockEngine::new`] returns the engine together with a [`MockHandle`] that
//! stays with the test: it feeds messages to the receive loop, records every
//! request the client sends, and can answer requests automatically.
//!
//! ```rust
//! use tdbridge_client::mock::MockEngine;
//! use serde_json::json;
//!
//! let (engine, handle) = MockEngine::new();
//! handle.respond_with(|req| match req["@type"].as_str() {
//!     Some("getMe") => vec![MockEngine::reply(req, json!({"@type": "user", "id": 1}))],
//!     _             => vec![],
//! });
//! # drop(engine);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::{InvocationError, TdEngine};

type Responder = Box<dyn FnMut(&Value) -> Vec<Value> + Send>;
type Executor  = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Default)]
struct Shared {
    inbox:     Mutex<VecDeque<Result<String, InvocationError>>>,
    ready:     Condvar,
    sent:      Mutex<Vec<Value>>,
    responder: Mutex<Option<Responder>>,
    executor:  Mutex<Option<Executor>>,
    fail_send: AtomicBool,
    destroyed: AtomicUsize,
}

impl Shared {
    fn enqueue(&self, item: Result<String, InvocationError>) {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner).push_back(item);
        self.ready.notify_all();
    }
}

// ─── MockEngine ───────────────────────────────────────────────────────────────

/// The engine half, handed to [`Client::with_engine`](crate::Client::with_engine).
pub struct MockEngine {
    shared: Arc<Shared>,
}

/// The test half. Cheap to clone.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockEngine {
    pub fn new() -> (Self, MockHandle) {
        let shared = Arc::new(Shared::default());
        (Self { shared: shared.clone() }, MockHandle { shared })
    }

    /// A response to `request` carrying `payload` and the request's `@extra`.
    pub fn reply(request: &Value, mut payload: Value) -> Value {
        if let (Some(obj), Some(extra)) = (payload.as_object_mut(), request.get("@extra")) {
            obj.insert("@extra".into(), extra.clone());
        }
        payload
    }

    /// An `error` response to `request`.
    pub fn error(request: &Value, code: i32, message: &str) -> Value {
        Self::reply(request, json!({"@type": "error", "code": code, "message": message}))
    }

    /// An `updateAuthorizationState` carrying `state` (e.g. `"authorizationStateReady"`).
    pub fn authorization_update(state: &str) -> Value {
        json!({
            "@type": "updateAuthorizationState",
            "authorization_state": {"@type": state},
        })
    }
}

impl TdEngine for MockEngine {
    fn send(&self, request: &str) -> Result<(), InvocationError> {
        if self.shared.fail_send.load(Ordering::Acquire) {
            return Err(InvocationError::Transport("mock send failure".into()));
        }
        let value: Value = serde_json::from_str(request)?;
        self.shared.sent.lock().unwrap_or_else(PoisonError::into_inner).push(value.clone());

        let replies = match self.shared.responder.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            Some(respond) => respond(&value),
            None          => Vec::new(),
        };
        for reply in replies {
            self.shared.enqueue(Ok(reply.to_string()));
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<String>, InvocationError> {
        let deadline = Instant::now() + timeout;
        let mut inbox = self.shared.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(item) = inbox.pop_front() {
                return item.map(Some);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            inbox = self.shared.ready
                .wait_timeout(inbox, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn execute(&self, request: &str) -> Option<String> {
        let value: Value = serde_json::from_str(request).ok()?;
        let executor = self.shared.executor.lock().unwrap_or_else(PoisonError::into_inner);
        match executor.as_ref() {
            Some(exec) => exec(&value).map(|v| v.to_string()),
            None       => Some(json!({"@type": "ok"}).to_string()),
        }
    }

    fn name(&self) -> &str { "mock" }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.shared.destroyed.fetch_add(1, Ordering::AcqRel);
    }
}

// ─── MockHandle ───────────────────────────────────────────────────────────────

impl MockHandle {
    /// Queue a message for the receive loop.
    pub fn push(&self, message: Value) {
        self.shared.enqueue(Ok(message.to_string()));
    }

    /// Queue raw text, valid JSON or not.
    pub fn push_text(&self, text: &str) {
        self.shared.enqueue(Ok(text.to_string()));
    }

    /// Queue an authorization state change.
    pub fn push_authorization(&self, state: &str) {
        self.push(MockEngine::authorization_update(state));
    }

    /// Make the next receive call fail with `Transport(message)`.
    pub fn fail_receive(&self, message: &str) {
        self.shared.enqueue(Err(InvocationError::Transport(message.into())));
    }

    /// Make every subsequent send fail.
    pub fn fail_send(&self, fail: bool) {
        self.shared.fail_send.store(fail, Ordering::Release);
    }

    /// Answer each sent request with the returned messages (in order).
    pub fn respond_with<F>(&self, f: F)
    where
        F: FnMut(&Value) -> Vec<Value> + Send + 'static,
    {
        *self.shared.responder.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(f));
    }

    /// Answer synchronous `execute` calls. The default answers `ok`.
    pub fn execute_with<F>(&self, f: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        *self.shared.executor.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(f));
    }

    /// Every request sent so far, as parsed JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.shared.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Wait until a request of type `type_name` has been sent and return it.
    pub async fn sent_request(&self, type_name: &str, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let found = self.sent().into_iter().find(|r| r["@type"] == type_name);
            if found.is_some() {
                return found;
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// How many times the engine has been destroyed. Never more than one.
    pub fn destroy_count(&self) -> usize {
        self.shared.destroyed.load(Ordering::Acquire)
    }
}
