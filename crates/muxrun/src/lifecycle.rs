//! # Observable Lifecycle
//!
//! Tracks which observable ids are active and which client owns them.
//!
//! ## Invariants
//! - An id is either active (present here) or retired (absent). It never comes back.
//! - Retiring signals the forwarding task through its cancel channel, exactly once.
//! - Retiring an unknown or already retired id is a no-op.
//! - The per-client index only ever lists active ids.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::oneshot;

use muxrpc::ObservableId;

struct Active {
    client: String,
    cancel: oneshot::Sender<()>,
}

#[derive(Default)]
pub struct LifecycleTracker {
    active: DashMap<ObservableId, Active>,
    by_client: DashMap<String, HashSet<ObservableId>>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` active for `client`. The receiver fires when it is retired.
    pub fn register(&self, id: ObservableId, client: &str) -> oneshot::Receiver<()> {
        let (cancel, cancelled) = oneshot::channel();
        self.active.insert(id, Active { client: client.to_string(), cancel });
        self.by_client.entry(client.to_string()).or_default().insert(id);
        tracing::trace!(observable_id = %id, client, "observable registered");
        cancelled
    }

    /// Retires one id. Returns false if it was not active.
    pub fn retire(&self, id: ObservableId) -> bool {
        let Some((_, active)) = self.active.remove(&id) else {
            return false;
        };

        let now_empty = match self.by_client.get_mut(&active.client) {
            Some(mut ids) => {
                ids.remove(&id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_client.remove_if(&active.client, |_, ids| ids.is_empty());
        }

        let _ = active.cancel.send(());
        tracing::trace!(observable_id = %id, client = %active.client, "observable retired");
        true
    }

    /// Retires every id owned by `client`. Returns how many were active.
    pub fn retire_client(&self, client: &str) -> usize {
        let Some((_, ids)) = self.by_client.remove(client) else {
            return 0;
        };

        let mut retired = 0;
        for id in ids {
            if let Some((_, active)) = self.active.remove(&id) {
                let _ = active.cancel.send(());
                retired += 1;
            }
        }
        tracing::debug!(client, retired, "client observables retired");
        retired
    }

    pub fn is_active(&self, id: ObservableId) -> bool {
        self.active.contains_key(&id)
    }

    /// Total active ids across all clients.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active ids owned by `client`.
    pub fn active_for(&self, client: &str) -> usize {
        self.by_client.get(client).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Clients with at least one active id.
    pub fn client_count(&self) -> usize {
        self.by_client.len()
    }
}
