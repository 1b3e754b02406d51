//! Client-side demultiplexing of observations.
//!
//! Every id the server introduces gets a local channel. Observations are
//! routed by id; ids that are no longer open are dropped. Closing a handle
//! removes its id at once and queues it for a batched `ObservablesClosed`.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use muxrpc::Failure;
use muxrpc::Notification;
use muxrpc::ObservableId;
use muxrpc::Value;

use crate::observable::ClientValue;
use crate::observable::Observable;

pub struct Demux {
    open: DashMap<ObservableId, mpsc::UnboundedSender<Notification<ClientValue>>>,
    closing: mpsc::UnboundedSender<ObservableId>,
}

impl Demux {
    /// Returns the registry and the receiving end of the close queue.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ObservableId>) {
        let (closing, closed_rx) = mpsc::unbounded_channel();
        (Arc::new(Self { open: DashMap::new(), closing }), closed_rx)
    }

    /// Creates the local handle for a freshly introduced id.
    pub fn open(self: &Arc<Self>, id: ObservableId) -> Observable {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.open.insert(id, tx).is_some() {
            tracing::warn!(observable_id = %id, "server reintroduced an open observable");
        }
        Observable::new(id, rx, self.clone())
    }

    /// Replaces every id in a received value with a live handle.
    pub fn attach(self: &Arc<Self>, value: Value) -> ClientValue {
        value.map_observables(|id| self.open(id))
    }

    /// Routes one observation. Returns false if the id is not open here.
    ///
    /// Nested ids are attached before routing, so if the observation is
    /// dropped their handles are dropped too and the server hears about it.
    pub fn on_observation(self: &Arc<Self>, id: ObservableId, notification: Notification<Value>) -> bool {
        let notification = match notification {
            Notification::Next(value) => Notification::Next(self.attach(value)),
            Notification::Error(failure) => Notification::Error(failure),
            Notification::Completed => Notification::Completed,
        };

        if notification.is_terminal() {
            let Some((_, tx)) = self.open.remove(&id) else {
                tracing::debug!(observable_id = %id, "dropping terminal notification for unknown observable");
                return false;
            };
            let _ = tx.send(notification);
            return true;
        }

        // Cloned out so no map guard is held if a rejected notification drops nested handles.
        let Some(tx) = self.open.get(&id).map(|entry| entry.value().clone()) else {
            tracing::debug!(observable_id = %id, "dropping observation for unknown observable");
            return false;
        };
        tx.send(notification).is_ok()
    }

    /// Forgets an id and asks for it to be closed on the server.
    pub fn release(&self, id: ObservableId) {
        if self.open.remove(&id).is_some() {
            tracing::trace!(observable_id = %id, "observable released");
            let _ = self.closing.send(id);
        }
    }

    /// Ends every open handle with `failure`. Nothing is sent to the server.
    pub fn fail_all(&self, failure: Failure) {
        let ids: Vec<ObservableId> = self.open.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.open.remove(&id) {
                let _ = tx.send(Notification::Error(failure.clone()));
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

/// Collects everything already queued after `first` into one batch.
pub fn drain_batch(first: ObservableId, rx: &mut mpsc::UnboundedReceiver<ObservableId>) -> Vec<ObservableId> {
    let mut ids = vec![first];
    while let Ok(id) = rx.try_recv() {
        ids.push(id);
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_routes_by_id_and_ends_on_terminal() {
        let (demux, _closing) = Demux::new();
        let mut a = demux.open(ObservableId(0));
        let mut b = demux.open(ObservableId(1));

        assert!(demux.on_observation(ObservableId(1), Notification::Next(Value::U64(10))));
        assert!(demux.on_observation(ObservableId(0), Notification::Next(Value::U64(20))));
        assert!(demux.on_observation(ObservableId(0), Notification::Completed));

        assert!(matches!(a.next().await, Some(Notification::Next(Value::U64(20)))));
        assert!(matches!(a.next().await, Some(Notification::Completed)));
        assert!(a.next().await.is_none());
        assert!(matches!(b.next().await, Some(Notification::Next(Value::U64(10)))));
        assert_eq!(demux.open_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_dropped() {
        let (demux, _closing) = Demux::new();
        assert!(!demux.on_observation(ObservableId(9), Notification::Next(Value::Unit)));
        assert!(!demux.on_observation(ObservableId(9), Notification::Completed));
    }

    #[tokio::test]
    async fn test_drop_queues_close_once() {
        let (demux, mut closing) = Demux::new();
        let a = demux.open(ObservableId(3));
        let b = demux.open(ObservableId(4));
        drop(a);
        b.close();

        let first = closing.recv().await.unwrap();
        assert_eq!(drain_batch(first, &mut closing), vec![ObservableId(3), ObservableId(4)]);
        assert_eq!(demux.open_count(), 0);

        // Releasing again is a no-op.
        demux.release(ObservableId(3));
        assert!(closing.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_completed_handle_does_not_close() {
        let (demux, mut closing) = Demux::new();
        let obs = demux.open(ObservableId(5));
        demux.on_observation(ObservableId(5), Notification::Completed);
        drop(obs);
        assert!(closing.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_orphaned_nested_handles_are_closed() {
        let (demux, mut closing) = Demux::new();
        let nested = Value::List(vec![Value::Observable(ObservableId(7))]);
        assert!(!demux.on_observation(ObservableId(99), Notification::Next(nested)));
        assert_eq!(closing.recv().await, Some(ObservableId(7)));
    }

    #[tokio::test]
    async fn test_fail_all_errors_every_handle() {
        let (demux, mut closing) = Demux::new();
        let mut a = demux.open(ObservableId(0));
        demux.fail_all(Failure::Disconnected("bye".into()));

        assert!(matches!(a.next().await, Some(Notification::Error(Failure::Disconnected(_)))));
        drop(a);
        assert!(closing.try_recv().is_err());
    }
}
