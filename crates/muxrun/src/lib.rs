//! # MuxRun
//!
//! Async runtime for MuxRPC: request/response calls and server-pushed
//! observables multiplexed over one request queue and one reply queue per
//! client.
//!
//! ## Layout
//!
//! - `transport`: the broker capability everything else is written against.
//! - `memory`: an in-process broker.
//! - `correlator` and `demux`: the client halves (replies, observations).
//! - `multiplexer` and `lifecycle`: the server halves (streams, retirement).
//! - `client`, `server` and `router`: the user-facing pieces.

pub mod client;
pub mod config;
pub mod correlator;
pub mod demux;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod multiplexer;
pub mod observable;
pub mod router;
pub mod server;
pub mod transport;


pub use client::Client;
pub use config::ClientConfig;
pub use config::ServerConfig;
pub use error::Error;
pub use error::Result;
pub use memory::MemoryBroker;
pub use observable::ClientValue;
pub use observable::Observable;
pub use observable::Publisher;
pub use observable::ServerValue;
pub use observable::Source;
pub use router::Call;
pub use router::Router;
pub use server::Server;
pub use server::ServerHandle;
pub use transport::Transport;
pub use transport::TransportError;

pub use muxrpc::Failure;
pub use muxrpc::Notification;
pub use muxrpc::ObservableId;
pub use muxrpc::Plain;
pub use muxrpc::RequestId;
pub use muxrpc::Value;
