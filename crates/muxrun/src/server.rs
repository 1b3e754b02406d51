//! # RPC Server
//!
//! Consumes the server queue, dispatches requests through a `Router` and
//! streams observables back through the `Multiplexer`.
//!
//! ## Tasks
//! - **serve**: decodes inbound envelopes. Requests each get their own task;
//!   `ObservablesClosed` retires ids inline.
//! - **departures**: watches client reply queues and retires everything a
//!   departed client still had open.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;

use muxrpc::ClientToServer;
use muxrpc::Failure;
use muxrpc::ObservableId;
use muxrpc::Plain;
use muxrpc::RequestId;
use muxrpc::Value;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::lifecycle::LifecycleTracker;
use crate::multiplexer::Multiplexer;
use crate::router::Call;
use crate::router::Router;
use crate::transport::DisconnectStream;
use crate::transport::EnvelopeStream;
use crate::transport::Transport;

pub struct Server {
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    tracker: Arc<LifecycleTracker>,
}

impl Server {
    pub fn new(transport: Arc<dyn Transport>, router: Router, config: ServerConfig) -> Self {
        Self { config, transport, router: Arc::new(router), tracker: Arc::new(LifecycleTracker::new()) }
    }

    /// Creates the server queue and starts serving it.
    pub async fn start(self) -> Result<ServerHandle> {
        let queue = self.config.queue.clone();
        self.transport.create_queue(&queue).await?;
        let inbound = self.transport.consume(&queue).await?;
        let departures = self.transport.watch_disconnects(&self.config.client_pattern).await?;

        let mux = Arc::new(Multiplexer::new(self.transport.clone(), self.tracker.clone()));
        let serve = tokio::spawn(serve(inbound, self.router.clone(), mux));
        let watch = tokio::spawn(watch_departures(departures, self.tracker.clone()));

        tracing::debug!(queue = %queue, methods = self.router.methods().count(), "server started");
        Ok(ServerHandle {
            queue,
            transport: self.transport,
            tracker: self.tracker,
            tasks: vec![serve, watch],
        })
    }
}

/// A running server. Dropping it stops the background tasks.
pub struct ServerHandle {
    queue: String,
    transport: Arc<dyn Transport>,
    tracker: Arc<LifecycleTracker>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn tracker(&self) -> &Arc<LifecycleTracker> {
        &self.tracker
    }

    /// Stops serving and deletes the server queue.
    pub async fn shutdown(mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.transport.delete_queue(&self.queue).await?;
        tracing::debug!(queue = %self.queue, "server stopped");
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn serve(mut inbound: EnvelopeStream, router: Arc<Router>, mux: Arc<Multiplexer>) {
    while let Some(envelope) = inbound.next().await {
        match ClientToServer::from_envelope(&envelope) {
            Ok(ClientToServer::RpcRequest { reply_to, id, method, args }) => {
                tracing::trace!(rpc_id = %id, method = %method, client = %reply_to, "request received");
                let router = router.clone();
                let mux = mux.clone();
                tokio::spawn(async move { handle_request(router, mux, reply_to, id, method, args).await });
            }
            Ok(ClientToServer::ObservablesClosed { ids }) => {
                let retired = ids.iter().filter(|id| mux.tracker().retire(**id)).count();
                tracing::debug!(requested = ids.len(), retired, "observables closed by client");
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable client message");
            }
        }
    }
    tracing::debug!("server queue closed");
}

async fn handle_request(
    router: Arc<Router>,
    mux: Arc<Multiplexer>,
    client: String,
    id: RequestId,
    method: String,
    args: Vec<Value>,
) {
    let args: std::result::Result<Vec<Plain>, ObservableId> = args.into_iter().map(Value::into_plain).collect();
    let result = match args {
        Ok(args) => router.dispatch(Call { client: client.clone(), method, args }).await,
        Err(found) => Err(Failure::BadArguments(format!("arguments may not contain observables (found {})", found))),
    };

    if let Err(e) = &result {
        tracing::debug!(rpc_id = %id, failure = %e, "request failed");
    }
    if let Err(e) = mux.reply(&client, id, result).await {
        tracing::warn!(rpc_id = %id, client = %client, error = %e, "reply could not be delivered");
    }
}

async fn watch_departures(mut departures: DisconnectStream, tracker: Arc<LifecycleTracker>) {
    while let Some(client) = departures.next().await {
        let retired = tracker.retire_client(&client);
        tracing::debug!(client = %client, retired, "client departed");
    }
}
