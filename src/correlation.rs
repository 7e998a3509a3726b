//! Request/reply correlation for the command channel.
//!
//! Every correlated command is tagged with a fresh id. Replies for a command
//! name are multicast to all subscribers, so each waiter filters the shared
//! stream down to the single reply carrying its own id and then lets the
//! subscription go.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio_stream::{Stream, StreamExt};

use crate::channel::protocol::ResponseMessage;

/// Generate an opaque correlation id (random UUID v4).
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A command that has been sent and is awaiting its reply.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: String,
    pub command: String,
    pub issued_at: Instant,
}

/// Registry of in-flight correlated requests.
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request for `command`. The returned guard owns a
    /// fresh id that is unique among currently pending requests; dropping
    /// the guard removes the entry.
    pub fn register(&self, command: &str) -> PendingGuard {
        let mut map = self.inner.lock();
        let id = loop {
            let candidate = new_message_id();
            if !map.contains_key(&candidate) {
                break candidate;
            }
        };
        map.insert(
            id.clone(),
            PendingRequest {
                id: id.clone(),
                command: command.to_string(),
                issued_at: Instant::now(),
            },
        );
        tracing::trace!(%id, command, pending = map.len(), "request registered");
        PendingGuard {
            id,
            registry: self.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Snapshot of pending requests, oldest first.
    pub fn snapshot(&self) -> Vec<PendingRequest> {
        let mut list: Vec<_> = self.inner.lock().values().cloned().collect();
        list.sort_by_key(|p| p.issued_at);
        list
    }

    fn remove(&self, id: &str) {
        self.inner.lock().remove(id);
    }
}

/// Keeps a [`PendingRequest`] registered for as long as it is alive.
pub struct PendingGuard {
    id: String,
    registry: PendingRequests,
}

impl PendingGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Wait for the first reply tagged with `id`, ignoring every other reply.
///
/// Returns `None` if the stream ends before a match arrives. The stream is
/// consumed, which releases the underlying subscription.
pub async fn first_reply<S>(stream: S, id: &str) -> Option<ResponseMessage>
where
    S: Stream<Item = ResponseMessage> + Unpin,
{
    let mut matching = stream.filter(|msg| msg.id.as_deref() == Some(id));
    matching.next().await
}
