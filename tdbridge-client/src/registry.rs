//! Client identifiers and an explicit multi-client registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::Client;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identifier of one [`Client`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u32);

impl ClientId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u32 { self.0 }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

// ─── ClientRegistry ──────────────────────────────────────────────────────────

/// Holds several clients by id, with one of them marked as the default.
///
/// Applications that run more than one account keep one of these instead of
/// a global. The first client inserted becomes the default.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Client>>,
    default: RwLock<Option<ClientId>>,
}

impl ClientRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, client: Client) -> ClientId {
        let id = client.id();
        self.clients.write().unwrap_or_else(PoisonError::into_inner).insert(id, client);
        self.default.write().unwrap_or_else(PoisonError::into_inner).get_or_insert(id);
        id
    }

    pub fn get(&self, id: ClientId) -> Option<Client> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }

    /// Remove `id`. If it was the default, no client is the default afterwards.
    pub fn remove(&self, id: ClientId) -> Option<Client> {
        let removed = self.clients.write().unwrap_or_else(PoisonError::into_inner).remove(&id);
        let mut default = self.default.write().unwrap_or_else(PoisonError::into_inner);
        if *default == Some(id) {
            *default = None;
        }
        removed
    }

    /// Make `id` the default. `false` if no such client is registered.
    pub fn set_default(&self, id: ClientId) -> bool {
        if !self.clients.read().unwrap_or_else(PoisonError::into_inner).contains_key(&id) {
            return false;
        }
        *self.default.write().unwrap_or_else(PoisonError::into_inner) = Some(id);
        true
    }

    pub fn default_client(&self) -> Option<Client> {
        let id = (*self.default.read().unwrap_or_else(PoisonError::into_inner))?;
        self.get(id)
    }

    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.clients.read().unwrap_or_else(PoisonError::into_inner).keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Stop and remove every client.
    pub async fn stop_all(&self) {
        let clients: Vec<Client> = {
            let mut map = self.clients.write().unwrap_or_else(PoisonError::into_inner);
            map.drain().map(|(_, c)| c).collect()
        };
        *self.default.write().unwrap_or_else(PoisonError::into_inner) = None;
        for client in clients {
            client.stop().await;
        }
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.ids())
            .field("default", &*self.default.read().unwrap_or_else(PoisonError::into_inner))
            .finish()
    }
}
