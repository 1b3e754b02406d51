//! # Protocol Frames
//!
//! The two message families and their mapping onto an `Envelope`.
//!
//! ## Invariants
//! - **Panic Safety**: every decoding path returns `Result`; unknown tags, missing
//!   attributes, malformed bodies and trailing bytes are all errors.
//! - **Attributes carry scalars**: the tag, ids, method name and reply address are
//!   attributes; only payloads are serialized into the body.

use muxpack::Decoder;
use muxpack::Encoder;

use crate::codec::decode_failure;
use crate::codec::decode_value;
use crate::codec::decode_values;
use crate::codec::encode_failure;
use crate::codec::encode_value;
use crate::codec::encode_values;
use crate::envelope::Envelope;
use crate::envelope::ATTR_METHOD_NAME;
use crate::envelope::ATTR_OBSERVABLE_ID;
use crate::envelope::ATTR_REPLY_TO;
use crate::envelope::ATTR_RPC_ID;
use crate::envelope::ATTR_TAG;
use crate::error::Error;
use crate::error::Failure;
use crate::error::Result;
use crate::value::ObservableId;
use crate::value::RequestId;
use crate::value::Value;

pub const TAG_RPC_REQUEST: u64 = 0;
pub const TAG_OBSERVABLES_CLOSED: u64 = 1;
pub const TAG_RPC_REPLY: u64 = 0;
pub const TAG_OBSERVATION: u64 = 1;

/// Outcome of a call: a value, or the reason there is none.
pub type RpcResult<T = Value> = std::result::Result<T, Failure>;

/// One event of an observable stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<T> {
    Next(T),
    Error(Failure),
    Completed,
}

impl<T> Notification<T> {
    /// True for `Error` and `Completed`; nothing follows a terminal event.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }

    /// Wire name of the notification kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Next(_) => "next",
            Notification::Error(_) => "error",
            Notification::Completed => "completed",
        }
    }
}

/// Messages flowing from a client to the server queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientToServer {
    RpcRequest {
        reply_to: String,
        id: RequestId,
        method: String,
        args: Vec<Value>,
    },
    ObservablesClosed {
        ids: Vec<ObservableId>,
    },
}

impl ClientToServer {
    pub fn to_envelope(&self) -> Result<Envelope> {
        let mut enc = Encoder::new();
        match self {
            Self::RpcRequest { reply_to, id, method, args } => {
                encode_values(&mut enc, args)?;
                let mut env = Envelope::new(enc.into_bytes()?);
                env.set_u64(ATTR_TAG, TAG_RPC_REQUEST);
                env.set_u64(ATTR_RPC_ID, id.0);
                env.set_str(ATTR_METHOD_NAME, method.as_str());
                env.set_str(ATTR_REPLY_TO, reply_to.as_str());
                Ok(env)
            }
            Self::ObservablesClosed { ids } => {
                enc.list_begin()?;
                for id in ids {
                    enc.u64(id.0)?;
                }
                enc.list_end()?;
                let mut env = Envelope::new(enc.into_bytes()?);
                env.set_u64(ATTR_TAG, TAG_OBSERVABLES_CLOSED);
                Ok(env)
            }
        }
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self> {
        let mut dec = Decoder::new(env.body());
        let msg = match env.u64_attr(ATTR_TAG)? {
            TAG_RPC_REQUEST => Self::RpcRequest {
                reply_to: env.str_attr(ATTR_REPLY_TO)?.to_string(),
                id: RequestId(env.u64_attr(ATTR_RPC_ID)?),
                method: env.str_attr(ATTR_METHOD_NAME)?.to_string(),
                args: decode_values(&mut dec)?,
            },
            TAG_OBSERVABLES_CLOSED => {
                let mut iter = dec.list()?;
                let mut ids = Vec::new();
                while let Some(mut item) = iter.next()? {
                    ids.push(ObservableId(item.u64()?));
                }
                Self::ObservablesClosed { ids }
            }
            other => return Err(Error::UnknownVariant(format!("client message tag {}", other))),
        };
        dec.finish()?;
        Ok(msg)
    }
}

/// Messages flowing from the server to a client's reply address.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerToClient {
    RpcReply {
        id: RequestId,
        result: RpcResult,
    },
    Observation {
        id: ObservableId,
        notification: Notification<Value>,
    },
}

impl ServerToClient {
    pub fn to_envelope(&self) -> Result<Envelope> {
        let mut enc = Encoder::new();
        match self {
            Self::RpcReply { id, result } => {
                match result {
                    Ok(val) => {
                        enc.result_ok_begin()?;
                        encode_value(&mut enc, val)?;
                    }
                    Err(failure) => {
                        enc.result_err_begin()?;
                        encode_failure(&mut enc, failure)?;
                    }
                }
                enc.result_end()?;
                let mut env = Envelope::new(enc.into_bytes()?);
                env.set_u64(ATTR_TAG, TAG_RPC_REPLY);
                env.set_u64(ATTR_RPC_ID, id.0);
                Ok(env)
            }
            Self::Observation { id, notification } => {
                enc.variant_begin(notification.kind())?;
                match notification {
                    Notification::Next(val) => encode_value(&mut enc, val)?,
                    Notification::Error(failure) => encode_failure(&mut enc, failure)?,
                    Notification::Completed => enc.unit()?,
                }
                enc.variant_end()?;
                let mut env = Envelope::new(enc.into_bytes()?);
                env.set_u64(ATTR_TAG, TAG_OBSERVATION);
                env.set_u64(ATTR_OBSERVABLE_ID, id.0);
                Ok(env)
            }
        }
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self> {
        let mut dec = Decoder::new(env.body());
        let msg = match env.u64_attr(ATTR_TAG)? {
            TAG_RPC_REPLY => {
                let id = RequestId(env.u64_attr(ATTR_RPC_ID)?);
                let result = match dec.result()? {
                    Ok(mut ok) => {
                        let val = decode_value(&mut ok)?;
                        ok.finish()?;
                        Ok(val)
                    }
                    Err(mut err) => {
                        let failure = decode_failure(&mut err)?;
                        err.finish()?;
                        Err(failure)
                    }
                };
                Self::RpcReply { id, result }
            }
            TAG_OBSERVATION => {
                let id = ObservableId(env.u64_attr(ATTR_OBSERVABLE_ID)?);
                let (kind, mut body) = dec.variant()?;
                let notification = match kind {
                    "next" => Notification::Next(decode_value(&mut body)?),
                    "error" => Notification::Error(decode_failure(&mut body)?),
                    "completed" => {
                        body.unit()?;
                        Notification::Completed
                    }
                    other => return Err(Error::UnknownVariant(format!("notification kind {}", other))),
                };
                body.finish()?;
                Self::Observation { id, notification }
            }
            other => return Err(Error::UnknownVariant(format!("server message tag {}", other))),
        };
        dec.finish()?;
        Ok(msg)
    }
}
