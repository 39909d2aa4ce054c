//! Update handler registry.
//!
//! Handlers are registered with a [`Subscription`] saying which updates they
//! want and in which group they run. For every update the router produces a
//! *plan*: the matching handlers, ordered by ascending group and then by
//! registration order. The dispatcher schedules that plan without waiting
//! for any handler to finish.
//!
//! ```rust,no_run
//! # async fn f(client: tdbridge_client::Client) {
//! use tdbridge_client::Subscription;
//!
//! client.add_handler(
//!     Subscription::on("updateNewMessage").group(10).filter(|u| u.chat_id() == Some(42)),
//!     |_client, update| async move {
//!         println!("{:?}", update.raw());
//!         Ok(())
//!     },
//! );
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tdbridge_types::Update;

use crate::Client;

/// What a handler may fail with. Logged, never propagated.
pub type HandlerError  = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

// ─── Handler ──────────────────────────────────────────────────────────────────

/// Something that reacts to updates.
///
/// Implemented for every `Fn(Client, Arc<Update>) -> impl Future<Output = HandlerResult>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, client: Client, update: Arc<Update>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F:   Fn(Client, Arc<Update>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, client: Client, update: Arc<Update>) -> HandlerFuture {
        Box::pin(self(client, update))
    }
}

/// Returned by [`Client::add_handler`]; pass it to [`Client::remove_handler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

// ─── Subscription ─────────────────────────────────────────────────────────────

/// Which update types a handler receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interest {
    /// Exactly this `@type`.
    Type(String),
    /// Every update.
    Any,
}

/// How a handler's invocations are scheduled relative to each other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Each invocation is its own task; invocations may overlap.
    #[default]
    Concurrent,
    /// Invocations run one at a time, in the order updates were received.
    Sequential,
}

pub type Filter = Arc<dyn Fn(&Update) -> bool + Send + Sync>;

/// Registration options for a handler.
#[derive(Clone)]
pub struct Subscription {
    pub(crate) interest: Interest,
    pub(crate) group:    i32,
    pub(crate) filter:   Option<Filter>,
    pub(crate) delivery: Delivery,
}

impl Subscription {
    /// Updates of type `type_name`. `"*"` subscribes to everything.
    pub fn on(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let interest = if type_name == "*" { Interest::Any } else { Interest::Type(type_name) };
        Self { interest, group: 0, filter: None, delivery: Delivery::Concurrent }
    }

    /// Every update.
    pub fn any() -> Self { Self::on("*") }

    /// Lower groups are scheduled first. Default `0`.
    pub fn group(mut self, group: i32) -> Self {
        self.group = group;
        self
    }

    /// Only updates for which `f` returns `true`.
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Update) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    /// Deliver updates to this handler one at a time, in receipt order.
    pub fn sequential(mut self) -> Self {
        self.delivery = Delivery::Sequential;
        self
    }

    pub fn interest(&self) -> &Interest { &self.interest }

    pub fn matches(&self, update: &Update) -> bool {
        let wanted = match &self.interest {
            Interest::Any     => true,
            Interest::Type(t) => t == update.type_name(),
        };
        wanted && self.filter.as_ref().is_none_or(|f| f(update))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("interest", &self.interest)
            .field("group", &self.group)
            .field("filtered", &self.filter.is_some())
            .field("delivery", &self.delivery)
            .finish()
    }
}

// ─── UpdateRouter ─────────────────────────────────────────────────────────────

pub(crate) struct Registered {
    pub(crate) id:           HandlerId,
    pub(crate) subscription: Subscription,
    pub(crate) handler:      Arc<dyn Handler>,
}

/// Owned by the dispatcher task.
#[derive(Default)]
pub(crate) struct UpdateRouter {
    groups: BTreeMap<i32, Vec<Registered>>,
}

impl UpdateRouter {
    pub(crate) fn new() -> Self { Self::default() }

    pub(crate) fn register(&mut self, id: HandlerId, subscription: Subscription, handler: Arc<dyn Handler>) {
        tracing::debug!(handler = %id, ?subscription, "[tdbridge] handler registered");
        self.groups
            .entry(subscription.group)
            .or_default()
            .push(Registered { id, subscription, handler });
    }

    /// `false` if `id` was not registered.
    pub(crate) fn unregister(&mut self, id: HandlerId) -> bool {
        let mut found = false;
        self.groups.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|h| h.id != id);
            found |= handlers.len() != before;
            !handlers.is_empty()
        });
        if found {
            tracing::debug!(handler = %id, "[tdbridge] handler removed");
        }
        found
    }

    /// Matching handlers in scheduling order.
    pub(crate) fn plan(&self, update: &Update) -> Vec<&Registered> {
        self.groups
            .values()
            .flatten()
            .filter(|h| h.subscription.matches(update))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}
