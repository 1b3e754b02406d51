//! # RPC Client with Async Pump
//!
//! A `Client` owns one reply queue for its whole session. Three background
//! tasks keep it running:
//!
//! - **pump**: reads the reply queue. Replies go to the `Correlator` (after
//!   their observables are attached), observations go to the `Demux`.
//! - **closer**: batches released observable ids into `ObservablesClosed`.
//! - **watch**: fails the session if the server queue disappears.
//!
//! When the session ends for any reason, pending calls fail with
//! `Error::ConnectionLost` and open observables receive
//! `Notification::Error(Failure::Disconnected)`.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use muxrpc::ClientToServer;
use muxrpc::Failure;
use muxrpc::ObservableId;
use muxrpc::Plain;
use muxrpc::RequestId;
use muxrpc::ServerToClient;

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::correlator::PendingCall;
use crate::demux::Demux;
use crate::demux::drain_batch;
use crate::error::Error;
use crate::error::Result;
use crate::observable::ClientValue;
use crate::observable::Observable;
use crate::transport::DisconnectStream;
use crate::transport::EnvelopeStream;
use crate::transport::Transport;

pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    demux: Arc<Demux>,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    /// Creates a reply queue and starts the session.
    pub async fn connect(transport: Arc<dyn Transport>, config: ClientConfig) -> Result<Self> {
        let reply_to = config.reply_address();
        transport.create_queue(&reply_to).await?;

        let inbound = match transport.consume(&reply_to).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = transport.delete_queue(&reply_to).await;
                return Err(e.into());
            }
        };
        let departures = match transport.watch_disconnects(&config.server_queue).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = transport.delete_queue(&reply_to).await;
                return Err(e.into());
            }
        };

        let correlator = Arc::new(Correlator::new(transport.clone(), config.server_queue.clone(), reply_to.clone()));
        let (demux, closing) = Demux::new();

        let tasks = vec![
            tokio::spawn(pump(inbound, correlator.clone(), demux.clone())),
            tokio::spawn(closer(closing, transport.clone(), config.server_queue.clone())),
            tokio::spawn(watch_server(departures, correlator.clone(), demux.clone())),
        ];

        tracing::debug!(reply_to = %reply_to, server = %config.server_queue, "client connected");
        Ok(Self { config, transport, correlator, demux, tasks })
    }

    pub fn reply_address(&self) -> &str {
        self.correlator.reply_to()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a request without waiting for the reply.
    pub async fn submit(&self, method: &str, args: Vec<Plain>) -> Result<(RequestId, PendingCall)> {
        self.correlator.submit(method, args).await
    }

    /// Sends a request and waits up to the configured timeout for the reply.
    pub async fn call(&self, method: &str, args: Vec<Plain>) -> Result<ClientValue> {
        let (id, pending) = self.submit(method, args).await?;
        match tokio::time::timeout(self.config.call_timeout, pending).await {
            Ok(result) => result,
            Err(_) => {
                self.correlator.cancel(id);
                tracing::debug!(rpc_id = %id, method, "call timed out");
                Err(Error::Timeout)
            }
        }
    }

    /// Calls a method whose reply is a single observable.
    pub async fn observe(&self, method: &str, args: Vec<Plain>) -> Result<Observable> {
        let value = self.call(method, args).await?;
        value
            .into_observable()
            .ok_or_else(|| Error::UnexpectedReply(format!("{} did not return an observable", method)))
    }

    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn open_observables(&self) -> usize {
        self.demux.open_count()
    }

    pub fn is_connected(&self) -> bool {
        !self.correlator.is_closed()
    }

    /// Ends the session and deletes the reply queue.
    ///
    /// The server sees the queue go away and retires everything this client had open.
    pub async fn close(mut self) -> Result<()> {
        disconnect(&self.correlator, &self.demux, "client closed");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.transport.delete_queue(self.correlator.reply_to()).await?;
        tracing::debug!(reply_to = %self.correlator.reply_to(), "client closed");
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in &self.tasks {
            task.abort();
        }
        disconnect(&self.correlator, &self.demux, "client dropped");

        // Without the queue going away the server would keep streaming to nobody.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let transport = self.transport.clone();
            let reply_to = self.correlator.reply_to().to_string();
            handle.spawn(async move {
                let _ = transport.delete_queue(&reply_to).await;
            });
        } else {
            tracing::warn!(
                reply_to = %self.correlator.reply_to(),
                "client dropped outside a runtime; reply queue left behind, use Client::close"
            );
        }
    }
}

fn disconnect(correlator: &Correlator, demux: &Demux, reason: &str) {
    if correlator.is_closed() {
        return;
    }
    correlator.fail_all(Error::ConnectionLost(reason.to_string()));
    demux.fail_all(Failure::Disconnected(reason.to_string()));
}

async fn pump(mut inbound: EnvelopeStream, correlator: Arc<Correlator>, demux: Arc<Demux>) {
    while let Some(envelope) = inbound.next().await {
        match ServerToClient::from_envelope(&envelope) {
            Ok(ServerToClient::RpcReply { id, result }) => {
                // Handles are registered before the caller can see them, so
                // observations that follow the reply always find their id.
                let result = result.map(|value| demux.attach(value));
                correlator.on_reply(id, result);
            }
            Ok(ServerToClient::Observation { id, notification }) => {
                demux.on_observation(id, notification);
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable server message");
            }
        }
    }
    tracing::debug!(reply_to = %correlator.reply_to(), "reply queue closed");
    disconnect(&correlator, &demux, "reply queue closed");
}

async fn closer(mut closing: mpsc::UnboundedReceiver<ObservableId>, transport: Arc<dyn Transport>, server_queue: String) {
    while let Some(first) = closing.recv().await {
        let ids = drain_batch(first, &mut closing);
        let count = ids.len();
        let envelope = match (ClientToServer::ObservablesClosed { ids }).to_envelope() {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "close message could not be encoded");
                continue;
            }
        };
        match transport.send(&server_queue, envelope).await {
            Ok(()) => tracing::trace!(count, "observables closed"),
            Err(e) => tracing::debug!(count, error = %e, "close message not delivered"),
        }
    }
}

async fn watch_server(mut departures: DisconnectStream, correlator: Arc<Correlator>, demux: Arc<Demux>) {
    if let Some(server) = departures.next().await {
        tracing::debug!(server = %server, "server departed");
        disconnect(&correlator, &demux, "server departed");
    }
}
