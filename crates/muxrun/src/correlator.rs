//! # Request/Reply Correlation
//!
//! Every outbound call gets a fresh `RequestId` and a pending completion. The
//! client pump hands each reply to `on_reply`, which resolves and removes the
//! matching entry. Replies without an entry are stale and dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;

use dashmap::DashMap;
use tokio::sync::oneshot;

use muxrpc::ClientToServer;
use muxrpc::Failure;
use muxrpc::Plain;
use muxrpc::RequestId;

use crate::error::Error;
use crate::error::Result;
use crate::observable::ClientValue;
use crate::transport::Transport;

type Completion = oneshot::Sender<Result<ClientValue>>;

/// Resolves once the reply for one request arrives or the session fails.
pub struct PendingCall {
    id: RequestId,
    rx: oneshot::Receiver<Result<ClientValue>>,
}

impl PendingCall {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<ClientValue>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ConnectionLost("reply channel closed".into()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct Correlator {
    transport: Arc<dyn Transport>,
    server_queue: String,
    reply_to: String,
    pending: DashMap<RequestId, Completion>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Correlator {
    pub fn new(transport: Arc<dyn Transport>, server_queue: impl Into<String>, reply_to: impl Into<String>) -> Self {
        Self {
            transport,
            server_queue: server_queue.into(),
            reply_to: reply_to.into(),
            pending: DashMap::new(),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    /// Sends a request and returns without waiting for the reply.
    ///
    /// # Errors
    /// Encoding and transport failures are returned here and leave no pending entry.
    pub async fn submit(&self, method: &str, args: Vec<Plain>) -> Result<(RequestId, PendingCall)> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // fail_all may have run between the insert and here.
        if self.closed.load(Ordering::Acquire) {
            self.pending.remove(&id);
            return Err(Error::ConnectionLost("session closed".into()));
        }

        let request = ClientToServer::RpcRequest {
            reply_to: self.reply_to.clone(),
            id,
            method: method.to_string(),
            args: args.into_iter().map(Plain::widen).collect(),
        };

        let envelope = match request.to_envelope() {
            Ok(env) => env,
            Err(e) => {
                self.pending.remove(&id);
                return Err(e.into());
            }
        };

        if let Err(e) = self.transport.send(&self.server_queue, envelope).await {
            self.pending.remove(&id);
            return Err(e.into());
        }

        tracing::trace!(rpc_id = %id, method, "request sent");
        Ok((id, PendingCall { id, rx }))
    }

    /// Resolves the call waiting on `id`. Returns false for stale or duplicate replies.
    pub fn on_reply(&self, id: RequestId, result: std::result::Result<ClientValue, Failure>) -> bool {
        let Some((_, tx)) = self.pending.remove(&id) else {
            tracing::debug!(rpc_id = %id, "dropping reply for unknown request");
            return false;
        };
        // The caller may have given up; whatever the value holds is dropped with it.
        let _ = tx.send(result.map_err(Error::Remote));
        true
    }

    /// Forgets a pending call, e.g. after a timeout.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Fails every pending call and refuses new ones.
    pub fn fail_all(&self, error: Error) {
        self.closed.store(true, Ordering::Release);
        let keys: Vec<RequestId> = self.pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, tx)) = self.pending.remove(&key) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
