//! In-process message broker.
//!
//! Every envelope is flattened with `Envelope::to_bytes` on send and parsed
//! again on delivery, so the full wire path is exercised without a network.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use tokio::sync::mpsc;

use muxrpc::Envelope;

use crate::transport::DisconnectStream;
use crate::transport::EnvelopeStream;
use crate::transport::Result;
use crate::transport::Transport;
use crate::transport::TransportError;
use crate::transport::address_matches;

struct Queue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// One `watch_disconnects` subscription. Unbounded, so no departure is ever lost.
struct Watcher {
    pattern: String,
    tx: mpsc::UnboundedSender<String>,
}

struct Inner {
    queues: DashMap<String, Queue>,
    watchers: DashMap<u64, Watcher>,
    next_watcher: AtomicU64,
}

/// A broker of named unbounded queues living in this process.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner { queues: DashMap::new(), watchers: DashMap::new(), next_watcher: AtomicU64::new(0) }),
        }
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.queues.contains_key(name)
    }

    pub fn queue_count(&self) -> usize {
        self.inner.queues.len()
    }

    /// Delivers raw bytes to a queue, bypassing envelope encoding.
    pub fn send_raw(&self, destination: &str, bytes: Vec<u8>) -> Result<()> {
        let queue = self
            .inner
            .queues
            .get(destination)
            .ok_or_else(|| TransportError::UnknownQueue(destination.to_string()))?;
        queue
            .tx
            .send(bytes)
            .map_err(|_| TransportError::ConnectionLost(format!("queue '{}' closed", destination)))
    }
}

#[async_trait::async_trait]
impl Transport for MemoryBroker {
    async fn create_queue(&self, name: &str) -> Result<()> {
        match self.inner.queues.entry(name.to_string()) {
            Entry::Occupied(_) => Err(TransportError::QueueExists(name.to_string())),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                slot.insert(Queue { tx, rx: Some(rx) });
                tracing::debug!(queue = name, "queue created");
                Ok(())
            }
        }
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        if self.inner.queues.remove(name).is_none() {
            return Err(TransportError::UnknownQueue(name.to_string()));
        }
        tracing::debug!(queue = name, "queue deleted");
        // Watchers whose stream was dropped are pruned here.
        self.inner
            .watchers
            .retain(|_, w| !address_matches(&w.pattern, name) || w.tx.send(name.to_string()).is_ok());
        Ok(())
    }

    async fn send(&self, destination: &str, envelope: Envelope) -> Result<()> {
        let bytes = envelope
            .to_bytes()
            .map_err(|e| TransportError::Io(format!("failed to flatten envelope: {}", e)))?;
        self.send_raw(destination, bytes)
    }

    async fn consume(&self, queue: &str) -> Result<EnvelopeStream> {
        let mut entry = self
            .inner
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;
        let mut rx = entry
            .rx
            .take()
            .ok_or_else(|| TransportError::Io(format!("queue '{}' already has a consumer", queue)))?;
        drop(entry);

        let name = queue.to_string();
        let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).filter_map(move |bytes| {
            let parsed = Envelope::from_bytes(&bytes);
            let name = name.clone();
            async move {
                match parsed {
                    Ok(env) => Some(env),
                    Err(e) => {
                        tracing::warn!(queue = %name, error = %e, "dropping unparseable envelope");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn watch_disconnects(&self, pattern: &str) -> Result<DisconnectStream> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.inner.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.inner.watchers.insert(id, Watcher { pattern: pattern.to_string(), tx });
        tracing::trace!(pattern, watcher = id, "watching departures");
        Ok(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}
