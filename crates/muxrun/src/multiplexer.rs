//! # Observable Multiplexer (server side)
//!
//! Turns server payloads into wire payloads and keeps the resulting streams
//! flowing to the client.
//!
//! ## Flow
//! 1. `expose` replaces every `Source` in a value with a fresh `ObservableId`
//!    and registers it with the lifecycle tracker.
//! 2. The message introducing those ids is sent.
//! 3. `start` spawns one forwarding task per id. Each emission is exposed in
//!    turn (nesting is unbounded), wrapped as an `Observation` and sent.
//!
//! ## Invariants
//! - An id reaches the client only after the message introducing it.
//! - Emissions of one id are sent in order by a single task.
//! - Once an id is retired its task stops and its source is dropped.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use futures::StreamExt;
use tokio::sync::oneshot;

use muxrpc::Failure;
use muxrpc::Notification;
use muxrpc::ObservableId;
use muxrpc::RequestId;
use muxrpc::RpcResult;
use muxrpc::ServerToClient;
use muxrpc::Value;

use crate::error::Result;
use crate::lifecycle::LifecycleTracker;
use crate::observable::ServerValue;
use crate::observable::Source;
use crate::transport::Transport;

/// A registered id waiting for its introducing message to go out.
pub struct Subscription {
    id: ObservableId,
    source: Source,
    cancelled: oneshot::Receiver<()>,
}

impl Subscription {
    pub fn id(&self) -> ObservableId {
        self.id
    }
}

pub struct Multiplexer {
    transport: Arc<dyn Transport>,
    tracker: Arc<LifecycleTracker>,
    next_id: AtomicU64,
}

impl Multiplexer {
    pub fn new(transport: Arc<dyn Transport>, tracker: Arc<LifecycleTracker>) -> Self {
        Self { transport, tracker, next_id: AtomicU64::new(0) }
    }

    pub fn tracker(&self) -> &Arc<LifecycleTracker> {
        &self.tracker
    }

    /// Assigns ids to every source in `value` on behalf of `client`.
    pub fn expose(&self, client: &str, value: ServerValue) -> (Value, Vec<Subscription>) {
        let mut subs = Vec::new();
        let wire = value.map_observables(|source| {
            let id = ObservableId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let cancelled = self.tracker.register(id, client);
            subs.push(Subscription { id, source, cancelled });
            id
        });
        (wire, subs)
    }

    /// Retires subscriptions whose introducing message never made it out.
    fn abandon(&self, subs: Vec<Subscription>) {
        for sub in subs {
            self.tracker.retire(sub.id);
        }
    }

    /// Spawns the forwarding tasks for subscriptions that have been introduced.
    pub fn start(self: &Arc<Self>, client: &str, subs: Vec<Subscription>) {
        for sub in subs {
            let mux = self.clone();
            let client = client.to_string();
            tokio::spawn(async move { mux.forward(client, sub).await });
        }
    }

    /// Sends the reply to a request, then starts any streams it introduced.
    pub async fn reply(self: &Arc<Self>, client: &str, id: RequestId, result: RpcResult<ServerValue>) -> Result<()> {
        let (result, subs) = match result {
            Ok(value) => {
                let (wire, subs) = self.expose(client, value);
                (Ok(wire), subs)
            }
            Err(failure) => (Err(failure), Vec::new()),
        };

        let message = ServerToClient::RpcReply { id, result };
        let (envelope, subs) = match message.to_envelope() {
            Ok(env) => (env, subs),
            Err(e) => {
                tracing::warn!(rpc_id = %id, error = %e, "reply could not be encoded");
                self.abandon(subs);
                let fallback = ServerToClient::RpcReply {
                    id,
                    result: Err(Failure::ProtocolViolation(format!("reply could not be encoded: {}", e))),
                };
                (fallback.to_envelope()?, Vec::new())
            }
        };

        if let Err(e) = self.transport.send(client, envelope).await {
            self.abandon(subs);
            return Err(e.into());
        }
        self.start(client, subs);
        Ok(())
    }

    async fn forward(self: Arc<Self>, client: String, sub: Subscription) {
        let Subscription { id, source, mut cancelled } = sub;
        let mut stream = source.into_stream();

        loop {
            let notification = tokio::select! {
                biased;
                _ = &mut cancelled => {
                    tracing::debug!(observable_id = %id, client = %client, "observable cancelled");
                    return;
                }
                item = stream.next() => match item {
                    Some(Ok(value)) => Notification::Next(value),
                    Some(Err(failure)) => Notification::Error(failure),
                    None => Notification::Completed,
                },
            };

            // Closed while the emission was being produced.
            if !self.tracker.is_active(id) {
                return;
            }

            let terminal = notification.is_terminal();
            let (notification, nested) = match notification {
                Notification::Next(value) => {
                    let (wire, nested) = self.expose(&client, value);
                    (Notification::Next(wire), nested)
                }
                Notification::Error(failure) => (Notification::Error(failure), Vec::new()),
                Notification::Completed => (Notification::Completed, Vec::new()),
            };

            let message = ServerToClient::Observation { id, notification };
            let envelope = match message.to_envelope() {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!(observable_id = %id, error = %e, "observation could not be encoded");
                    self.abandon(nested);
                    self.fail(&client, id, Failure::ProtocolViolation(format!("observation could not be encoded: {}", e)))
                        .await;
                    return;
                }
            };

            if let Err(e) = self.transport.send(&client, envelope).await {
                tracing::debug!(observable_id = %id, client = %client, error = %e, "observation send failed");
                self.abandon(nested);
                self.tracker.retire(id);
                return;
            }
            self.start(&client, nested);

            if terminal {
                self.tracker.retire(id);
                return;
            }
        }
    }

    /// Ends a stream with an error notification and retires it.
    async fn fail(&self, client: &str, id: ObservableId, failure: Failure) {
        let message = ServerToClient::Observation { id, notification: Notification::Error(failure) };
        if let Ok(envelope) = message.to_envelope() {
            let _ = self.transport.send(client, envelope).await;
        }
        self.tracker.retire(id);
    }
}
