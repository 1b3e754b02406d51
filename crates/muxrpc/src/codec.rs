//! # Codec
//!
//! The translation layer between `Value` and the muxpack wire format.
//!
//! ## Invariants
//! - **Recursion Safety**: encoding and decoding are bounded by `MAX_RECURSION_DEPTH`.
//! - **Self-describing**: decoding needs no schema; the tag of each item picks the variant.
//! - **Exact consumption**: a payload decoder must be empty once its value is read.

use std::convert::Infallible;

use muxpack::Decoder;
use muxpack::Encoder;
use muxpack::Tag;

use crate::error::Error;
use crate::error::Failure;
use crate::error::Result;
use crate::value::ObservableId;
use crate::value::Value;

/// The maximum nesting depth for values before trapping.
pub const MAX_RECURSION_DEPTH: usize = 64;

/// Anything that can occupy an observable slot on the wire.
pub trait WireSlot {
    fn observable_id(&self) -> ObservableId;
}

impl WireSlot for ObservableId {
    fn observable_id(&self) -> ObservableId {
        *self
    }
}

impl WireSlot for Infallible {
    fn observable_id(&self) -> ObservableId {
        match *self {}
    }
}

/// Encodes a value into the encoder stream.
///
/// # Errors
/// Returns `Error::RecursionLimitExceeded` if the value is too deeply nested.
pub fn encode_value<O: WireSlot>(enc: &mut Encoder, val: &Value<O>) -> Result<()> {
    encode_value_impl(enc, val, 0)
}

fn encode_value_impl<O: WireSlot>(enc: &mut Encoder, val: &Value<O>, depth: usize) -> Result<()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    match val {
        Value::Unit => enc.unit()?,
        Value::Bool(b) => enc.bool(*b)?,
        Value::U64(v) => enc.u64(*v)?,
        Value::S64(v) => enc.s64(*v)?,
        Value::F64(v) => enc.f64(*v)?,
        Value::String(s) => enc.str(s)?,
        Value::Bytes(b) => enc.bytes(b)?,
        Value::List(items) => {
            enc.list_begin()?;
            for item in items {
                encode_value_impl(enc, item, depth + 1)?;
            }
            enc.list_end()?;
        }
        Value::Record(fields) => {
            enc.map_begin()?;
            for (name, value) in fields {
                enc.variant_begin(name)?;
                encode_value_impl(enc, value, depth + 1)?;
                enc.variant_end()?;
            }
            enc.map_end()?;
        }
        Value::Option(None) => enc.option_none()?,
        Value::Option(Some(v)) => {
            enc.option_some_begin()?;
            encode_value_impl(enc, v, depth + 1)?;
            enc.option_some_end()?;
        }
        Value::Variant(name, v) => {
            enc.variant_begin(name)?;
            encode_value_impl(enc, v, depth + 1)?;
            enc.variant_end()?;
        }
        Value::Observable(slot) => enc.handle(slot.observable_id().0)?,
    }
    Ok(())
}

/// Encodes a list of values (argument lists).
pub fn encode_values<O: WireSlot>(enc: &mut Encoder, vals: &[Value<O>]) -> Result<()> {
    enc.list_begin()?;
    for val in vals {
        encode_value_impl(enc, val, 1)?;
    }
    enc.list_end()?;
    Ok(())
}

/// Decodes a single value.
pub fn decode_value(dec: &mut Decoder) -> Result<Value> {
    decode_value_impl(dec, 0)
}

/// Decodes a list of values (argument lists).
pub fn decode_values(dec: &mut Decoder) -> Result<Vec<Value>> {
    let mut iter = dec.list()?;
    let mut vals = Vec::new();
    while let Some(mut item) = iter.next()? {
        vals.push(decode_value_impl(&mut item, 1)?);
    }
    Ok(vals)
}

fn decode_value_impl(dec: &mut Decoder, depth: usize) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let val = match dec.peek_tag()? {
        Tag::Unit => {
            dec.unit()?;
            Value::Unit
        }
        Tag::BoolTrue | Tag::BoolFalse => Value::Bool(dec.bool()?),
        Tag::U64 => Value::U64(dec.u64()?),
        Tag::S64 => Value::S64(dec.s64()?),
        Tag::F64 => Value::F64(dec.f64()?),
        Tag::Handle => Value::Observable(ObservableId(dec.handle()?)),
        Tag::String => Value::String(dec.str()?.to_string()),
        Tag::Bytes => Value::Bytes(dec.bytes()?.to_vec()),
        Tag::List => {
            let mut iter = dec.list()?;
            let mut items = Vec::new();
            while let Some(mut item) = iter.next()? {
                items.push(decode_value_impl(&mut item, depth + 1)?);
            }
            Value::List(items)
        }
        Tag::Map => {
            let mut iter = dec.map()?;
            let mut fields = Vec::new();
            while let Some((name, mut v)) = iter.next()? {
                fields.push((name.to_string(), decode_payload(&mut v, depth + 1)?));
            }
            Value::Record(fields)
        }
        Tag::OptionNone | Tag::OptionSome => match dec.option()? {
            None => Value::Option(None),
            Some(mut inner) => Value::Option(Some(Box::new(decode_payload(&mut inner, depth + 1)?))),
        },
        Tag::Variant => {
            let (name, mut inner) = dec.variant()?;
            Value::Variant(name.to_string(), Box::new(decode_payload(&mut inner, depth + 1)?))
        }
        Tag::ResultOk | Tag::ResultErr => {
            return Err(Error::ProtocolViolation("result container in value position".into()));
        }
    };
    Ok(val)
}

/// Decodes the single item inside a container payload and checks nothing follows it.
fn decode_payload(dec: &mut Decoder, depth: usize) -> Result<Value> {
    let val = decode_value_impl(dec, depth)?;
    dec.finish()?;
    Ok(val)
}

/// Encodes a failure as `variant(kind, message)`.
pub fn encode_failure(enc: &mut Encoder, failure: &Failure) -> Result<()> {
    enc.variant_begin(failure.as_tag())?;
    enc.str(failure.message())?;
    enc.variant_end()?;
    Ok(())
}

/// Decodes a failure written by `encode_failure`.
pub fn decode_failure(dec: &mut Decoder) -> Result<Failure> {
    let (kind, mut body) = dec.variant()?;
    let message = body.str()?;
    body.finish()?;
    Failure::from_tag(kind, message)
}
