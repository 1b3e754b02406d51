//! # Envelope
//!
//! The transport-level message: a set of typed attributes plus an opaque body.
//!
//! Brokers route and filter on attributes without touching the body, so the
//! scalar fields of every protocol message (tag, ids, method name, reply
//! address) live here and only the payload goes into the body.
//!
//! ## Byte Layout (`to_bytes`)
//! - Map of attributes, each a Variant named after the key holding a `u64` or a string.
//! - Bytes blob holding the body.

use std::collections::BTreeMap;

use muxpack::Decoder;
use muxpack::Encoder;
use muxpack::Tag;

use crate::error::Error;
use crate::error::Result;

/// Integer discriminant selecting the message variant.
pub const ATTR_TAG: &str = "tag";
/// Request correlation id.
pub const ATTR_RPC_ID: &str = "rpc-id";
/// Observable stream id.
pub const ATTR_OBSERVABLE_ID: &str = "observable-id";
/// Name of the invoked method.
pub const ATTR_METHOD_NAME: &str = "method-name";
/// Address the server must send replies and observations to.
pub const ATTR_REPLY_TO: &str = "reply-to";

/// A single envelope attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    U64(u64),
    Str(String),
}

/// A byte-bearing transport message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    attributes: BTreeMap<String, Attribute>,
    body: Vec<u8>,
}

impl Envelope {
    pub fn new(body: Vec<u8>) -> Self {
        Self { attributes: BTreeMap::new(), body }
    }

    pub fn set_u64(&mut self, name: &str, value: u64) {
        self.attributes.insert(name.to_string(), Attribute::U64(value));
    }

    pub fn set_str(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.insert(name.to_string(), Attribute::Str(value.into()));
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reads a required integer attribute.
    pub fn u64_attr(&self, name: &'static str) -> Result<u64> {
        match self.attributes.get(name) {
            Some(Attribute::U64(v)) => Ok(*v),
            Some(Attribute::Str(_)) => Err(Error::AttributeType { name: name.into(), expected: "u64" }),
            None => Err(Error::MissingAttribute(name)),
        }
    }

    /// Reads a required string attribute.
    pub fn str_attr(&self, name: &'static str) -> Result<&str> {
        match self.attributes.get(name) {
            Some(Attribute::Str(s)) => Ok(s),
            Some(Attribute::U64(_)) => Err(Error::AttributeType { name: name.into(), expected: "string" }),
            None => Err(Error::MissingAttribute(name)),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Flattens the envelope for byte-oriented transports.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.map_begin()?;
        for (name, attr) in &self.attributes {
            enc.variant_begin(name)?;
            match attr {
                Attribute::U64(v) => enc.u64(*v)?,
                Attribute::Str(s) => enc.str(s)?,
            }
            enc.variant_end()?;
        }
        enc.map_end()?;
        enc.bytes(&self.body)?;
        Ok(enc.into_bytes()?)
    }

    /// Parses bytes produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let mut attributes = BTreeMap::new();

        let mut map = dec.map()?;
        while let Some((name, mut val)) = map.next()? {
            let attr = match val.peek_tag()? {
                Tag::U64 => Attribute::U64(val.u64()?),
                Tag::String => Attribute::Str(val.str()?.to_string()),
                other => {
                    return Err(Error::ProtocolViolation(format!(
                        "attribute '{}' has unsupported type {:?}",
                        name, other
                    )));
                }
            };
            val.finish()?;
            attributes.insert(name.to_string(), attr);
        }

        let body = dec.bytes()?.to_vec();
        dec.finish()?;
        Ok(Self { attributes, body })
    }
}
