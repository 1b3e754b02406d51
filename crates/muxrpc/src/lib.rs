//! # MuxRPC
//!
//! Wire messages for request/response calls multiplexed with server-pushed
//! observable streams over a pair of message queues.
//!
//! ## Architecture
//!
//! - `value`: the dynamic payload tree, generic over what fills an observable slot.
//! - `codec`: `Value` <-> muxpack.
//! - `envelope`: attribute map plus body, the unit a broker moves around.
//! - `frame`: `ClientToServer` / `ServerToClient` <-> `Envelope`.
//!
//! Nothing here does I/O; the runtime lives in `muxrun`.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod value;

#[cfg(test)]
mod tests;

pub use codec::decode_value;
pub use codec::encode_value;
pub use codec::WireSlot;
pub use envelope::Attribute;
pub use envelope::Envelope;
pub use error::Error;
pub use error::Failure;
pub use error::Result;
pub use frame::ClientToServer;
pub use frame::Notification;
pub use frame::RpcResult;
pub use frame::ServerToClient;
pub use value::ObservableId;
pub use value::Plain;
pub use value::RequestId;
pub use value::Value;
