//! Pending-request bookkeeping.
//!
//! Owned by the dispatcher task; nothing else touches the map. Every entry
//! leaves it exactly once: resolved, failed, abandoned or cancelled.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tdbridge_types::serialize::with_extra;
use tdbridge_types::{Object, Response, request_type};
use tokio::sync::oneshot;

use crate::InvocationError;

pub(crate) type Reply = oneshot::Sender<Result<Value, InvocationError>>;

struct Pending {
    method:  String,
    reply:   Reply,
    sent_at: Instant,
}

#[derive(Default)]
pub(crate) struct RequestCorrelator {
    pending: HashMap<u64, Pending>,
}

impl RequestCorrelator {
    pub(crate) fn new() -> Self { Self::default() }

    /// Park `reply` under `id` and return the wire text to send.
    ///
    /// Returns `None` when the request was rejected; the caller has already
    /// been answered in that case.
    pub(crate) fn submit(&mut self, id: u64, request: Object, reply: Reply) -> Option<String> {
        let Some(method) = request_type(&request).map(str::to_owned) else {
            let _ = reply.send(Err(InvocationError::InvalidRequest("missing @type".into())));
            return None;
        };
        if self.pending.contains_key(&id) {
            tracing::warn!(request_id = id, "[tdbridge] correlation id {id} is still pending");
            let _ = reply.send(Err(InvocationError::InvalidRequest(format!("correlation id {id} is in use"))));
            return None;
        }
        tracing::trace!(request_id = id, method = %method, "[tdbridge] → {method}");
        self.pending.insert(id, Pending { method, reply, sent_at: Instant::now() });
        Some(with_extra(request, id))
    }

    /// Complete the matching entry. `false` if no such entry was pending.
    pub(crate) fn resolve(&mut self, response: Response) -> bool {
        let Some(id) = response.request_id() else {
            tracing::debug!(extra = %response.extra, "[tdbridge] response with foreign @extra dropped");
            return false;
        };
        let Some(entry) = self.pending.remove(&id) else {
            tracing::debug!(request_id = id, "[tdbridge] response for unknown request dropped");
            return false;
        };
        let elapsed = entry.sent_at.elapsed();
        match &response.result {
            Ok(_)  => tracing::trace!(request_id = id, method = %entry.method, ?elapsed, "[tdbridge] ← {}", entry.method),
            Err(e) => tracing::debug!(request_id = id, method = %entry.method, ?elapsed, "[tdbridge] {} failed: {e}", entry.method),
        }
        // The caller may have gone away in the meantime; nothing to do then.
        let _ = entry.reply.send(response.result.map_err(InvocationError::Td));
        true
    }

    /// Complete `id` with `err` (e.g. the send itself failed).
    pub(crate) fn fail(&mut self, id: u64, err: InvocationError) {
        if let Some(entry) = self.pending.remove(&id) {
            let _ = entry.reply.send(Err(err));
        }
    }

    /// Forget `id` without answering; its caller is no longer waiting.
    pub(crate) fn abandon(&mut self, id: u64) {
        if let Some(entry) = self.pending.remove(&id) {
            tracing::debug!(request_id = id, method = %entry.method, "[tdbridge] request abandoned");
        }
    }

    /// Answer every pending entry with `reason`. Returns how many there were.
    pub(crate) fn cancel_all(&mut self, reason: &InvocationError) -> usize {
        let n = self.pending.len();
        for (_, entry) in self.pending.drain() {
            let _ = entry.reply.send(Err(reason.clone()));
        }
        if n > 0 {
            tracing::debug!("[tdbridge] cancelled {n} pending request(s): {reason}");
        }
        n
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize { self.pending.len() }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, id: u64) -> bool { self.pending.contains_key(&id) }
}
