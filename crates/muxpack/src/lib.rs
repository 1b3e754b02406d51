//! # Muxpack
//!
//! A small, bounded, self-describing TLV format used for the bodies of
//! muxrpc messages.
//!
//! ## Philosophy
//!
//! - **Self-describing**: every item starts with a `Tag`, so a reader can walk
//!   (or skip) a body without knowing its schema.
//! - **Explicit scopes**: the `Encoder` keeps a stack of open containers and
//!   back-patches their lengths when they close.
//! - **Zero-copy reads**: the `Decoder` is a bounds-checked view over a slice.
//!   Nothing in here panics on hostile input.
//!
//! ## Format
//!
//! - **Markers**: `[Tag: 1b]`
//! - **Wide scalars**: `[Tag: 1b][Data: 8b]` (u64, s64, f64, handle)
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! All integers are Little-Endian.
//!
//! ## Handles
//!
//! `Tag::Handle` carries a `u64` that refers to something living outside of the
//! buffer, such as a stream the peer will push separately. The format does not
//! interpret it.


/// Muxpack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// A valid tag was found where a different one was required.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Closing a scope that does not match the innermost open scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Attempted to close a scope when only the Root remains.
    ScopeUnderflow,
    /// Attempted to finalize the buffer with open scopes.
    ScopeStillOpen,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Bytes were left over after the last expected item.
    TrailingBytes(usize),
    /// Blob or container length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// Attempted to write more than one item into an Option/Result/Variant scope.
    TooManyItems(Scope),
    /// Attempted to close an Option/Result/Variant scope without its item.
    EmptyAdt(Scope),
    /// Attempted to write a non-Variant directly into a Map.
    InvalidMapEntry,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::UnexpectedTag { expected, found } => {
                write!(f, "unexpected tag: expected {:?}, found {:?}", expected, found)
            }
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: expected {:?}, found {:?}", expected, actual)
            }
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after last item", n),
            Error::TooManyItems(s) => write!(f, "too many items in scope {:?}; expected exactly 1", s),
            Error::EmptyAdt(s) => write!(f, "empty scope {:?}; expected exactly 1 item", s),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for muxpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    // Markers
    Unit = 0x01,
    BoolTrue = 0x02,
    BoolFalse = 0x03,
    OptionNone = 0x04,

    // Wide scalars
    U64 = 0x08,
    S64 = 0x09,
    F64 = 0x0A,
    Handle = 0x0B,

    // Blobs
    String = 0x10,
    Bytes = 0x11,

    // Containers
    List = 0x20,
    Map = 0x21,

    // ADTs
    OptionSome = 0x30,
    ResultOk = 0x31,
    ResultErr = 0x32,
    Variant = 0x33,
}

impl Tag {
    /// Returns the Tag for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        let tag = match b {
            0x01 => Tag::Unit,
            0x02 => Tag::BoolTrue,
            0x03 => Tag::BoolFalse,
            0x04 => Tag::OptionNone,
            0x08 => Tag::U64,
            0x09 => Tag::S64,
            0x0A => Tag::F64,
            0x0B => Tag::Handle,
            0x10 => Tag::String,
            0x11 => Tag::Bytes,
            0x20 => Tag::List,
            0x21 => Tag::Map,
            0x30 => Tag::OptionSome,
            0x31 => Tag::ResultOk,
            0x32 => Tag::ResultErr,
            0x33 => Tag::Variant,
            _ => return None,
        };
        Some(tag)
    }

    /// Size of the fixed payload following the tag, for scalars and markers.
    /// `None` means a `u32` length prefix follows instead.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::Unit | Tag::BoolTrue | Tag::BoolFalse | Tag::OptionNone => Some(0),
            Tag::U64 | Tag::S64 | Tag::F64 | Tag::Handle => Some(8),
            _ => None,
        }
    }
}

/// Container kinds tracked on the `Encoder` stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The virtual root; allows any number of items.
    Root,
    /// Ordered sequence; allows any number of items.
    List,
    /// Key-Value container; only `Tag::Variant` items.
    Map,
    /// Exactly one item.
    Option,
    /// Exactly one item.
    Result,
    /// Exactly one item (the payload) after the name.
    Variant,
}

impl Scope {
    fn is_strict(self) -> bool {
        matches!(self, Scope::Option | Scope::Result | Scope::Variant)
    }
}

struct Frame {
    /// Offset of the first body byte.
    start: usize,
    scope: Scope,
    count: usize,
}

/// Generates the 8-byte scalar writers.
macro_rules! wide_writer {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $tag:expr) => {
        $(#[$doc])*
        pub fn $name(&mut self, v: $ty) -> Result<()> {
            self.write_tag($tag)?;
            self.buf.extend_from_slice(&v.to_le_bytes());
            self.item_written();
            Ok(())
        }
    };
}

/// Generates the 8-byte scalar readers.
macro_rules! wide_reader {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $tag:expr) => {
        $(#[$doc])*
        pub fn $name(&mut self) -> Result<$ty> {
            self.expect_tag($tag)?;
            Ok(<$ty>::from_le_bytes(self.read_array::<8>()?))
        }
    };
}

/// A bounded, state-machine driven encoder.
///
/// # Structural Invariants
///
/// 1. **Map scopes** accept only `variant_begin()` items.
/// 2. **Option, Result and Variant scopes** accept exactly one item.
/// 3. The buffer can only be taken once every scope is closed.
pub struct Encoder {
    buf: Vec<u8>,
    /// Bottom is always `Scope::Root`.
    stack: Vec<Frame>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: vec![Frame { start: 0, scope: Scope::Root, count: 0 }],
        }
    }

    /// Consumes the encoder and returns the bytes.
    ///
    /// # Errors
    /// Returns `Error::ScopeStillOpen` if any container is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    /// Depth of currently open containers, excluding the root.
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn check_write(&mut self, tag: Tag) -> Result<()> {
        let frame = self.top();
        match frame.scope {
            Scope::Root | Scope::List => Ok(()),
            Scope::Map if tag == Tag::Variant => Ok(()),
            Scope::Map => Err(Error::InvalidMapEntry),
            scope if frame.count >= 1 => Err(Error::TooManyItems(scope)),
            _ => Ok(()),
        }
    }

    fn item_written(&mut self) {
        self.top().count += 1;
    }

    fn write_tag(&mut self, tag: Tag) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        Ok(())
    }

    fn write_marker(&mut self, tag: Tag) -> Result<()> {
        self.write_tag(tag)?;
        self.item_written();
        Ok(())
    }

    fn write_blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::BlobTooLarge(data.len()))?;
        self.write_tag(tag)?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.item_written();
        Ok(())
    }

    fn begin_scope(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.write_tag(tag)?;
        self.buf.extend_from_slice(&[0; 4]);
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
        Ok(())
    }

    fn end_scope(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }

        let frame = self.top();
        if frame.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: frame.scope });
        }
        if frame.scope.is_strict() && frame.count == 0 {
            return Err(Error::EmptyAdt(frame.scope));
        }

        let Some(frame) = self.stack.pop() else {
            return Err(Error::ScopeUnderflow);
        };
        let body_len = self.buf.len() - frame.start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[frame.start - 4..frame.start].copy_from_slice(&len.to_le_bytes());

        self.item_written();
        Ok(())
    }

    /// Encodes Unit `()`.
    pub fn unit(&mut self) -> Result<()> { self.write_marker(Tag::Unit) }

    /// Encodes a boolean.
    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.write_marker(if v { Tag::BoolTrue } else { Tag::BoolFalse })
    }

    /// Encodes `Option::None`.
    pub fn option_none(&mut self) -> Result<()> { self.write_marker(Tag::OptionNone) }

    wide_writer!(
        /// Encodes an unsigned 64-bit integer.
        u64, u64, Tag::U64
    );
    wide_writer!(
        /// Encodes a signed 64-bit integer.
        s64, i64, Tag::S64
    );
    wide_writer!(
        /// Encodes a 64-bit float.
        f64, f64, Tag::F64
    );
    wide_writer!(
        /// Encodes an out-of-band handle.
        handle, u64, Tag::Handle
    );

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> { self.write_blob(Tag::String, v.as_bytes()) }

    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> { self.write_blob(Tag::Bytes, v) }

    /// Begins a List; closed by `list_end()`.
    pub fn list_begin(&mut self) -> Result<()> { self.begin_scope(Tag::List, Scope::List) }
    /// Ends a List.
    pub fn list_end(&mut self) -> Result<()> { self.end_scope(Scope::List) }

    /// Begins a Map; only `variant_begin()` may be written directly inside.
    pub fn map_begin(&mut self) -> Result<()> { self.begin_scope(Tag::Map, Scope::Map) }
    /// Ends a Map.
    pub fn map_end(&mut self) -> Result<()> { self.end_scope(Scope::Map) }

    /// Begins `Option::Some`; exactly one item must follow.
    pub fn option_some_begin(&mut self) -> Result<()> { self.begin_scope(Tag::OptionSome, Scope::Option) }
    /// Ends `Option::Some`.
    pub fn option_some_end(&mut self) -> Result<()> { self.end_scope(Scope::Option) }

    /// Begins `Result::Ok`; exactly one item must follow.
    pub fn result_ok_begin(&mut self) -> Result<()> { self.begin_scope(Tag::ResultOk, Scope::Result) }
    /// Begins `Result::Err`; exactly one item must follow.
    pub fn result_err_begin(&mut self) -> Result<()> { self.begin_scope(Tag::ResultErr, Scope::Result) }
    /// Ends either side of a Result.
    pub fn result_end(&mut self) -> Result<()> { self.end_scope(Scope::Result) }

    /// Begins a named Variant; exactly one payload item must follow.
    pub fn variant_begin(&mut self, name: &str) -> Result<()> {
        self.begin_scope(Tag::Variant, Scope::Variant)?;
        self.str(name)?;
        // The name is metadata, not the payload.
        self.top().count = 0;
        Ok(())
    }
    /// Ends a Variant.
    pub fn variant_end(&mut self) -> Result<()> { self.end_scope(Scope::Variant) }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Container reads return new `Decoder`s restricted to the container body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Succeeds only if every byte has been consumed.
    pub fn finish(&self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let &b = self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?) as usize)
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.buf = &self.buf[1..];
        Ok(())
    }

    fn enter(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect_tag(expected)?;
        let len = self.read_len()?;
        Ok(Decoder::new(self.read_bytes(len)?))
    }

    /// Skips the next item, including any nested children.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.buf = &self.buf[1..];
        match tag.fixed_width() {
            Some(n) => { self.read_bytes(n)?; }
            None => {
                let len = self.read_len()?;
                self.read_bytes(len)?;
            }
        }
        Ok(())
    }

    /// Decodes Unit `()`.
    pub fn unit(&mut self) -> Result<()> { self.expect_tag(Tag::Unit) }

    /// Decodes a bool.
    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::BoolTrue => {
                self.expect_tag(Tag::BoolTrue)?;
                Ok(true)
            }
            Tag::BoolFalse => {
                self.expect_tag(Tag::BoolFalse)?;
                Ok(false)
            }
            found => Err(Error::UnexpectedTag { expected: Tag::BoolTrue, found }),
        }
    }

    wide_reader!(
        /// Decodes an unsigned 64-bit integer.
        u64, u64, Tag::U64
    );
    wide_reader!(
        /// Decodes a signed 64-bit integer.
        s64, i64, Tag::S64
    );
    wide_reader!(
        /// Decodes a 64-bit float.
        f64, f64, Tag::F64
    );
    wide_reader!(
        /// Decodes an out-of-band handle.
        handle, u64, Tag::Handle
    );

    /// Decodes a string slice.
    pub fn str(&mut self) -> Result<&'a str> {
        self.expect_tag(Tag::String)?;
        let len = self.read_len()?;
        std::str::from_utf8(self.read_bytes(len)?).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a byte slice.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect_tag(Tag::Bytes)?;
        let len = self.read_len()?;
        self.read_bytes(len)
    }

    /// Decodes a List into an iterator over its items.
    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter(Tag::List)? })
    }

    /// Decodes a Map into an iterator over its entries.
    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Decodes an Option, returning the payload decoder when present.
    pub fn option(&mut self) -> Result<Option<Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::OptionNone => {
                self.expect_tag(Tag::OptionNone)?;
                Ok(None)
            }
            _ => Ok(Some(self.enter(Tag::OptionSome)?)),
        }
    }

    /// Decodes a Result, returning the decoder for whichever side is present.
    pub fn result(&mut self) -> Result<std::result::Result<Decoder<'a>, Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::ResultErr => Ok(Err(self.enter(Tag::ResultErr)?)),
            _ => Ok(Ok(self.enter(Tag::ResultOk)?)),
        }
    }

    /// Decodes a Variant, returning `(name, payload decoder)`.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter(Tag::Variant)?;
        let name = inner.str()?;
        Ok((name, inner))
    }
}

/// Iterator over the items of a List.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns a Decoder scoped to the next item, or `None` at the end.
    ///
    /// A malformed item is reported as an error rather than ending the list.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let mut ahead = self.dec.clone();
        ahead.skip()?;
        let len = self.dec.remaining() - ahead.remaining();
        Ok(Some(Decoder::new(self.dec.read_bytes(len)?)))
    }
}

/// Iterator over the `(key, value)` entries of a Map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns `(key, value decoder)` for the next entry, or `None`.
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        Ok(Some(self.dec.variant()?))
    }
}
