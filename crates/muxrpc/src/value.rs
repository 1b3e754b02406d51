//! # Values
//!
//! The dynamic payload carried by requests, replies and observations.
//!
//! `Value` is generic over what sits in an observable slot. The same tree
//! shape is used at every stage of a stream's life:
//!
//! - on the server, slots hold live sources,
//! - on the wire, slots hold an `ObservableId`,
//! - on the client, slots hold a local handle.
//!
//! Moving between stages is `try_map_observables`, which is the only place
//! that has to know observables exist. Everything else treats values as data.

use std::convert::Infallible;

/// Identifies one outstanding client-to-server call.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc-{}", self.0)
    }
}

/// Identifies one live server-to-client stream.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObservableId(pub u64);

impl std::fmt::Display for ObservableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// A self-describing payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<O = ObservableId> {
    Unit,
    Bool(bool),
    U64(u64),
    S64(i64),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value<O>>),
    /// Named fields, in order.
    Record(Vec<(String, Value<O>)>),
    Option(Option<Box<Value<O>>>),
    Variant(String, Box<Value<O>>),
    /// A stream the receiving side can subscribe to.
    Observable(O),
}

/// A value that cannot contain observables, such as call arguments.
pub type Plain = Value<Infallible>;

impl<O> Value<O> {
    /// Rebuilds the tree, converting every observable slot with `f`.
    ///
    /// Slots are visited depth-first in the order they appear. The first error
    /// stops the walk; slots already converted are dropped.
    pub fn try_map_observables<P, E, F>(self, f: &mut F) -> std::result::Result<Value<P>, E>
    where
        F: FnMut(O) -> std::result::Result<P, E>,
    {
        Ok(match self {
            Value::Unit => Value::Unit,
            Value::Bool(b) => Value::Bool(b),
            Value::U64(v) => Value::U64(v),
            Value::S64(v) => Value::S64(v),
            Value::F64(v) => Value::F64(v),
            Value::String(s) => Value::String(s),
            Value::Bytes(b) => Value::Bytes(b),
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| item.try_map_observables(&mut *f))
                    .collect::<std::result::Result<Vec<_>, E>>()?,
            ),
            Value::Record(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(name, v)| v.try_map_observables(&mut *f).map(|v| (name, v)))
                    .collect::<std::result::Result<Vec<_>, E>>()?,
            ),
            Value::Option(None) => Value::Option(None),
            Value::Option(Some(v)) => Value::Option(Some(Box::new(v.try_map_observables(f)?))),
            Value::Variant(name, v) => Value::Variant(name, Box::new(v.try_map_observables(f)?)),
            Value::Observable(o) => Value::Observable(f(o)?),
        })
    }

    /// Infallible form of `try_map_observables`.
    pub fn map_observables<P>(self, mut f: impl FnMut(O) -> P) -> Value<P> {
        match self.try_map_observables(&mut |o| Ok::<P, Infallible>(f(o))) {
            Ok(v) => v,
            Err(never) => match never {},
        }
    }

    /// Visits every observable slot without rebuilding.
    pub fn for_each_observable<F: FnMut(&O)>(&self, f: &mut F) {
        match self {
            Value::List(items) => {
                for v in items {
                    v.for_each_observable(f);
                }
            }
            Value::Record(fields) => {
                for (_, v) in fields {
                    v.for_each_observable(f);
                }
            }
            Value::Option(Some(v)) | Value::Variant(_, v) => v.for_each_observable(f),
            Value::Observable(o) => f(o),
            _ => {}
        }
    }

    /// Number of observable slots in the tree.
    pub fn observable_count(&self) -> usize {
        let mut n = 0;
        self.for_each_observable(&mut |_| n += 1);
        n
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value<O>]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Takes the slot out of a bare `Value::Observable`.
    pub fn into_observable(self) -> Option<O> {
        match self {
            Value::Observable(o) => Some(o),
            _ => None,
        }
    }
}

impl Plain {
    /// Views an observable-free value as any other kind of value.
    pub fn widen<O>(self) -> Value<O> {
        self.map_observables(|never| match never {})
    }
}

impl Value<ObservableId> {
    /// Proves the value carries no observables, or returns the first one found.
    pub fn into_plain(self) -> std::result::Result<Plain, ObservableId> {
        self.try_map_observables(&mut |id| Err(id))
    }
}

impl<O> From<&str> for Value<O> {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<O> From<String> for Value<O> {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<O> From<u64> for Value<O> {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl<O> From<i64> for Value<O> {
    fn from(v: i64) -> Self {
        Value::S64(v)
    }
}

impl<O> From<f64> for Value<O> {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl<O> From<bool> for Value<O> {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<O> From<Vec<Value<O>>> for Value<O> {
    fn from(items: Vec<Value<O>>) -> Self {
        Value::List(items)
    }
}
