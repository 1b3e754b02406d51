//! # Transport Abstraction
//!
//! A minimal, async interface over a message broker with named queues.
//!
//! ## Philosophy
//!
//! - **Envelope-Oriented**: The Transport moves `Envelope`s between named queues.
//!   It never looks inside the body.
//! - **One consumer per queue**: a queue is drained by exactly one `consume` stream.
//! - **Departure is a signal**: deleting a queue ends its consumer stream and is
//!   announced to every `watch_disconnects` stream whose pattern matches.

use std::fmt;

use futures::stream::BoxStream;
use muxrpc::Envelope;

/// Errors that occur at the broker/transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// No queue exists under the given name.
    UnknownQueue(String),
    /// A queue with the given name already exists.
    QueueExists(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::UnknownQueue(name) => write!(f, "Unknown queue '{}'", name),
            Self::QueueExists(name) => write!(f, "Queue '{}' already exists", name),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Envelopes arriving on a queue, in send order. Ends when the queue is deleted.
pub type EnvelopeStream = BoxStream<'static, Envelope>;

/// Addresses of queues that have been removed.
pub type DisconnectStream = BoxStream<'static, String>;

/// A message broker offering named queues.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Creates a queue. Fails with `QueueExists` if the name is taken.
    async fn create_queue(&self, name: &str) -> Result<()>;

    /// Deletes a queue, ending its consumer stream and announcing the departure.
    async fn delete_queue(&self, name: &str) -> Result<()>;

    /// Sends an envelope to a queue.
    ///
    /// # invariants
    /// - Envelopes sent by one task to one queue arrive in the order sent.
    /// - Must return `Err` if the destination does not exist.
    async fn send(&self, destination: &str, envelope: Envelope) -> Result<()>;

    /// Takes the single consumer stream of a queue.
    async fn consume(&self, queue: &str) -> Result<EnvelopeStream>;

    /// Streams the names of deleted queues matching `pattern`.
    ///
    /// A pattern is either an exact queue name or a prefix followed by `*`.
    /// Every matching deletion must be delivered, however far the watcher falls behind.
    async fn watch_disconnects(&self, pattern: &str) -> Result<DisconnectStream>;
}

/// Matches a queue address against an exact name or a `prefix*` pattern.
pub fn address_matches(pattern: &str, address: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => address.starts_with(prefix),
        None => pattern == address,
    }
}
